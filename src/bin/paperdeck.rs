//! CLI binary for paperdeck.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `Configuration` plus `EngineSettings`, runs the pipeline under a session
//! gate and prints where the artifacts landed.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paperdeck::{
    run, Configuration, ContentKind, EngineSettings, PipelineProgressCallback, PosterDensity,
    ProgressCallback, RunIdentity, RunOutcome, SessionGate, SlidesLength, Stage, Style,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the text stages run, then a
/// bar over the artifacts once generation reports its first one. Artifacts
/// may complete out of order in the parallel batch, so the bar only counts.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    /// Switch to the full bar style once the artifact count is known.
    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, session_id: &str, resume_from: Option<Stage>) {
        let from = resume_from.map_or("(all cached)".to_string(), |s| s.to_string());
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("Run {session_id}")),
            dim(&format!("resuming from {from}"))
        ));
    }

    fn on_stage_skipped(&self, stage: Stage) {
        self.bar
            .println(format!("  {} {:<10} {}", dim("↷"), stage, dim("checkpoint reused")));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("running…");
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!("  {} {}", green("✓"), stage));
    }

    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar
            .println(format!("  {} {:<10} {}", red("✗"), stage, red(&msg)));
    }

    fn on_artifact_complete(&self, section_id: &str, _index: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.activate_bar(total);
        }
        self.bar.println(format!("    {} {}", green("✓"), dim(section_id)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _session_id: &str, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Academic slide deck from a local paper
  paperdeck paper.pdf

  # Short deck in the Doraemon style, 4 images at a time
  paperdeck --length short --style doraemon --parallel 4 paper.pdf

  # Dense poster from a URL
  paperdeck --output poster --density dense https://arxiv.org/pdf/1706.03762

  # Custom style from free text
  paperdeck --message "watercolour with cats" notes.md --content general

  # Where did the last run stop?
  paperdeck --status-only paper.pdf

RESUMING:
  Every stage writes a checkpoint under --out-dir. Re-running the same
  inputs with the same options resumes at the first missing stage; runs that
  differ only in output options share the index and summary stages.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key (text stages)
  ANTHROPIC_API_KEY         Anthropic API key (text stages)
  GEMINI_API_KEY            Google Gemini API key (text stages)
  PAPERDECK_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  PAPERDECK_MODEL           Override model ID
  IMAGE_GEN_API_KEY         Image-generation API key; placeholders without it
  IMAGE_GEN_BASE_URL        Image API base URL (default https://openrouter.ai/api/v1)
  IMAGE_GEN_MODEL           Image model (default google/gemini-3-pro-image-preview)
"#;

/// Turn papers and documents into slide decks or posters.
#[derive(Parser, Debug)]
#[command(
    name = "paperdeck",
    version,
    about = "Turn papers and documents into slide decks or posters",
    long_about = "Turn PDF or Markdown documents (local files or URLs) into slide decks or \
posters through a four-stage pipeline: index, summarize, plan and generate. Every stage is \
checkpointed so interrupted runs resume where they stopped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths (.pdf, .md, .markdown, .txt) or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// What the documents are.
    #[arg(long, env = "PAPERDECK_CONTENT", value_enum, default_value = "paper")]
    content: ContentArg,

    /// What to produce.
    #[arg(long, env = "PAPERDECK_OUTPUT", value_enum, default_value = "slides")]
    output: OutputArg,

    /// academic, doraemon, or a free-text style description.
    #[arg(long, env = "PAPERDECK_STYLE", default_value = "academic")]
    style: String,

    /// Free-text style request; overrides --style.
    #[arg(long)]
    message: Option<String>,

    /// Deck length for slides.
    #[arg(long, env = "PAPERDECK_LENGTH", value_enum, default_value = "medium")]
    length: LengthArg,

    /// Information density for posters.
    #[arg(long, env = "PAPERDECK_DENSITY", value_enum, default_value = "medium")]
    density: DensityArg,

    /// Query whole papers instead of retrieved chunks.
    #[arg(long, env = "PAPERDECK_FAST")]
    fast: bool,

    /// Concurrent image generations after the style reference.
    #[arg(long, env = "PAPERDECK_PARALLEL", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..=32))]
    parallel: u32,

    /// Root directory for checkpoints and artifacts.
    #[arg(long, env = "PAPERDECK_OUT_DIR", default_value = "outputs")]
    out_dir: PathBuf,

    /// Run text stages offline and draw placeholder images.
    #[arg(long, env = "PAPERDECK_OFFLINE")]
    offline: bool,

    /// Print the persisted run record for these inputs and options; run nothing.
    #[arg(long)]
    status_only: bool,

    /// Print a JSON summary instead of artifact paths.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAPERDECK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAPERDECK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAPERDECK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ContentArg {
    Paper,
    General,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputArg {
    Slides,
    Poster,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LengthArg {
    Short,
    Medium,
    Long,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DensityArg {
    Sparse,
    Medium,
    Dense,
}

impl From<ContentArg> for ContentKind {
    fn from(v: ContentArg) -> Self {
        match v {
            ContentArg::Paper => ContentKind::Paper,
            ContentArg::General => ContentKind::General,
        }
    }
}

impl From<LengthArg> for SlidesLength {
    fn from(v: LengthArg) -> Self {
        match v {
            LengthArg::Short => SlidesLength::Short,
            LengthArg::Medium => SlidesLength::Medium,
            LengthArg::Long => SlidesLength::Long,
        }
    }
}

impl From<DensityArg> for PosterDensity {
    fn from(v: DensityArg) -> Self {
        match v {
            DensityArg::Sparse => PosterDensity::Sparse,
            DensityArg::Medium => PosterDensity::Medium,
            DensityArg::Dense => PosterDensity::Dense,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.status_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Status-only mode ─────────────────────────────────────────────────
    if cli.status_only {
        let settings = EngineSettings::default()
            .output_root(&cli.out_dir)
            .offline(true);
        let engine = run::default_engine(settings).context("Failed to set up engine")?;
        let record = run::status(&engine, &cli.inputs, &config).context("Failed to read run record")?;
        let identity = RunIdentity::derive(cli.inputs.as_slice(), &config);
        match record {
            Some(record) if cli.json => println!(
                "{}",
                serde_json::to_string_pretty(&record).context("Failed to serialise record")?
            ),
            Some(record) => {
                println!("Run:      {identity}");
                println!("Session:  {}", record.session_id);
                println!("Status:   {:?}", record.overall());
                for stage in Stage::ALL {
                    println!("  {:<10} {:?}", stage.as_str(), record.status(stage));
                }
                if let Some(ref e) = record.error {
                    println!("Error:    {e}");
                }
            }
            None => println!("No run recorded for {identity}"),
        }
        return Ok(());
    }

    // ── Engine ───────────────────────────────────────────────────────────
    let mut settings = EngineSettings::from_env()
        .output_root(&cli.out_dir)
        .max_parallel(cli.parallel as usize)
        .offline(cli.offline);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        settings = settings.progress_callback(cb);
    }
    let engine = run::default_engine(settings).context("Failed to set up engine")?;

    // ── Run with Ctrl-C → cooperative cancel, second Ctrl-C → exit ───────
    let gate = SessionGate::new();
    let session_id = run::new_session_id();
    {
        let gate = gate.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            let mut interrupts = Interrupts::default();
            while tokio::signal::ctrl_c().await.is_ok() {
                match interrupts.on_signal() {
                    Interrupt::Cancel => {
                        if gate.request_cancel(&session_id) {
                            eprintln!(
                                "{} cancel requested; stopping after the current stage \
                                 (Ctrl-C again to exit now)",
                                cyan("⚠")
                            );
                        }
                    }
                    Interrupt::Exit => {
                        eprintln!("{} interrupted", red("✖"));
                        std::process::exit(EXIT_INTERRUPTED);
                    }
                }
            }
        });
    }

    let outcome = run::run(&gate, &engine, &session_id, &cli.inputs, config)
        .await
        .context("Pipeline failed")?;

    report(&cli, &outcome)
}

/// Conventional exit status for a process stopped by SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// What a Ctrl-C means: the first asks for a cooperative cancel, any later
/// one exits at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

#[derive(Debug, Default)]
struct Interrupts {
    seen: u32,
}

impl Interrupts {
    fn on_signal(&mut self) -> Interrupt {
        self.seen += 1;
        if self.seen == 1 {
            Interrupt::Cancel
        } else {
            Interrupt::Exit
        }
    }
}

/// Map CLI args to a `Configuration`.
fn build_config(cli: &Cli) -> Result<Configuration> {
    let mut builder = Configuration::builder()
        .content_kind(cli.content.into())
        .style(Style::parse(&cli.style))
        .fast_mode(cli.fast);
    builder = match cli.output {
        OutputArg::Slides => builder.slides(cli.length.into()),
        OutputArg::Poster => builder.poster(cli.density.into()),
    };
    if let Some(ref message) = cli.message {
        builder = builder.message(message.clone());
    }
    builder.build().context("Invalid configuration")
}

fn report(cli: &Cli, outcome: &RunOutcome) -> Result<()> {
    if cli.json {
        let summary = serde_json::json!({
            "identity": outcome.identity.to_string(),
            "resumed_from": outcome.resumed_from,
            "executed": outcome.executed,
            "record": outcome.record,
            "generated": outcome.generated,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise outcome")?
        );
        return Ok(());
    }

    for path in outcome.artifact_paths() {
        println!("{}", path.display());
    }
    if let Some(deck) = outcome.deck_pdf_path() {
        println!("{}", deck.display());
    }
    if !cli.quiet {
        eprintln!(
            "{} {} image(s) in {}  {}",
            green("✔"),
            bold(&outcome.generated.artifacts.len().to_string()),
            bold(&outcome.generated.output_dir.display().to_string()),
            dim(&format!("({} service)", outcome.generated.service)),
        );
    }
    Ok(())
}
