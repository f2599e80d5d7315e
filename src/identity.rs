//! Run identity: the idempotence key for checkpoints.
//!
//! A [`RunIdentity`] is computed from the input file names and the
//! [`Configuration`] alone (never from time or session ids), so two runs
//! over the same inputs with the same configuration address the same
//! checkpoint directory and the second one resumes where the first stopped.

use crate::config::{ContentKind, Configuration, Style};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Longest project name kept verbatim before a digest suffix is used.
const MAX_PROJECT_NAME: usize = 64;

/// `{project_name, content_kind, configuration_fingerprint}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity {
    pub project_name: String,
    pub content_kind: ContentKind,
    pub fingerprint: String,
    /// `fast` or `normal`; selects the shared index/summary directory.
    pub retrieval_mode: &'static str,
}

impl RunIdentity {
    /// Derive the identity for the given inputs and configuration.
    ///
    /// `inputs` may be local paths or URLs; only their final path segment
    /// contributes to the project name.
    pub fn derive<S: AsRef<str>>(inputs: &[S], config: &Configuration) -> Self {
        Self {
            project_name: project_name(inputs),
            content_kind: config.content_kind,
            fingerprint: fingerprint(config),
            retrieval_mode: config.retrieval_mode(),
        }
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.project_name,
            self.content_kind.as_str(),
            self.fingerprint
        )
    }
}

/// Canonical configuration name, e.g. `slides_academic_medium_fast`.
///
/// Custom style text is folded into an 8-hex-digit digest so arbitrary user
/// text never reaches the file system.
pub fn fingerprint(config: &Configuration) -> String {
    let style = match &config.style {
        Style::Academic => "academic".to_string(),
        Style::Doraemon => "doraemon".to_string(),
        Style::Custom(text) => format!("custom-{}", short_digest(text.trim())),
    };
    let mut name = format!(
        "{}_{}_{}",
        config.output_kind().as_str(),
        style,
        config.output.extent_name()
    );
    if config.fast_mode {
        name.push_str("_fast");
    }
    name
}

/// Project name from one or more input names.
///
/// One input → its sanitised file stem. Several → the sanitised stems,
/// sorted, joined with `__`. Names longer than 64 characters are cut and
/// suffixed with a digest of the full name so distinct input sets stay
/// distinct.
pub fn project_name<S: AsRef<str>>(inputs: &[S]) -> String {
    let mut stems: Vec<String> = inputs
        .iter()
        .map(|s| sanitise(&file_stem(s.as_ref())))
        .filter(|s| !s.is_empty())
        .collect();
    stems.sort();
    stems.dedup();

    let joined = match stems.len() {
        0 => "document".to_string(),
        _ => stems.join("__"),
    };

    if joined.len() <= MAX_PROJECT_NAME {
        joined
    } else {
        let digest = short_digest(&joined);
        let keep = MAX_PROJECT_NAME - digest.len() - 1;
        let mut cut = keep;
        while !joined.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}_{}", &joined[..cut], digest)
    }
}

fn file_stem(input: &str) -> String {
    let last = input
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let last = last.split(['?', '#']).next().unwrap_or(last);
    Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Keep alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
fn sanitise(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_matches(|c| c == '_' || c == '.').to_string()
}

fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
