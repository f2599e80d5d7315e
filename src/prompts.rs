//! Prompt text for every LLM and image-model call.
//!
//! Centralising prompts here keeps the stage modules about control flow and
//! lets unit tests inspect prompt composition without a model.

use crate::config::{ContentKind, OutputKind, Style};
use crate::model::SectionKind;

// ── Index: retrieval queries ─────────────────────────────────────────────

/// Query categories for papers, in the order summaries are built.
pub const PAPER_QUERIES: &[(&str, &[&str])] = &[
    (
        "paper_info",
        &["List the paper title, author names and their institutional affiliations."],
    ),
    (
        "motivation",
        &[
            "What problem or task does this paper aim to solve? Describe the specific challenges.",
            "What are the limitations or drawbacks of existing approaches mentioned in the introduction or related work?",
            "What gap or unmet need motivates this research? How is it different from prior work?",
        ],
    ),
    (
        "solution",
        &[
            "What method, approach, or framework does this paper propose? Provide an overview.",
            "What are the main components, modules, or steps of the proposed method?",
            "What are the key equations or formulations? Show the notation.",
            "What is the algorithm, procedure, or workflow? Describe the key steps.",
        ],
    ),
    (
        "results",
        &[
            "What datasets, benchmarks, or experimental setups are used for evaluation?",
            "How does the proposed method compare to baseline methods? Report the exact numbers.",
            "What ablation study or analysis is conducted? What are the findings?",
        ],
    ),
    (
        "contributions",
        &[
            "What are the main contributions listed in the introduction or conclusion?",
            "What limitations does the paper acknowledge? What future directions are suggested?",
        ],
    ),
];

/// Single category used for general documents.
pub const GENERAL_CATEGORY: &str = "content";

pub const GENERAL_QUERIES: &[&str] = &[
    "What is the title of this document and what type of document is it?",
    "What is this document about? Give an overview of the main topic and key themes.",
    "What is the primary purpose of this document? What does it aim to explain?",
    "How is this document structured? What are the major sections?",
    "What are the most important findings, arguments, concepts or data?",
];

/// `(category, queries)` pairs for a content kind.
pub fn queries_for(kind: ContentKind) -> Vec<(&'static str, Vec<&'static str>)> {
    match kind {
        ContentKind::Paper => PAPER_QUERIES
            .iter()
            .map(|(c, qs)| (*c, qs.to_vec()))
            .collect(),
        ContentKind::General => vec![(GENERAL_CATEGORY, GENERAL_QUERIES.to_vec())],
    }
}

pub const QUERY_SYSTEM_PROMPT: &str =
    "You are an expert at analyzing documents. Answer based only on the provided content.";

/// User message for one retrieval query over `context`.
pub fn query_prompt(context: &str, query: &str) -> String {
    format!(
        "# Document Content\n\n{context}\n\n# Question\n\n{query}\n\n\
         Please provide a detailed answer based on the content above."
    )
}

// ── Summarize ────────────────────────────────────────────────────────────

pub const SUMMARY_SYSTEM_PROMPT: &str = "You condense research notes into presentation-ready \
prose. Keep exact numbers, names and formulas. Output plain Markdown without fences or commentary.";

/// What each paper summary section should contain.
pub fn paper_section_goal(category: &str) -> &'static str {
    match category {
        "paper_info" => "Title, authors and affiliations, one per line.",
        "motivation" => "The problem, why existing approaches fall short, and the gap addressed.",
        "solution" => "The proposed method: components, key equations and workflow.",
        "results" => "Evaluation setup and the headline results with exact numbers.",
        "contributions" => "The main contributions, plus acknowledged limitations.",
        _ => "A concise summary.",
    }
}

/// Prompt that turns the answers of one category into a summary section.
pub fn paper_section_prompt(category: &str, answers: &str) -> String {
    format!(
        "Write the '{category}' section of a paper summary.\n\
         Goal: {}\n\n=== NOTES ===\n{answers}",
        paper_section_goal(category)
    )
}

/// Prompt that reads title, authors and affiliations straight from the
/// beginning of each document, bypassing retrieval.
pub fn paper_metadata_prompt(heads: &str) -> String {
    format!(
        "From the beginning of the paper(s) below, list the title, the author names \
         and their institutional affiliations. One item per line, no commentary. \
         Write \"Unknown\" for anything that is not stated.\n\n=== DOCUMENT START ===\n{heads}"
    )
}

/// Prompt that summarises a general document from its answers.
pub fn general_summary_prompt(answers: &str) -> String {
    format!(
        "Summarise this document for a presentation. Cover its purpose, structure \
         and most important content in well-organised Markdown sections.\n\n\
         === NOTES ===\n{answers}"
    )
}

// ── Plan ─────────────────────────────────────────────────────────────────

pub const PLAN_SYSTEM_PROMPT: &str = "You are an expert presentation designer. You split \
content into sections and answer with JSON only.";

/// Prompt asking for a JSON section plan.
pub fn plan_prompt(
    kind: OutputKind,
    range: (usize, usize),
    summary: &str,
    tables: &[String],
    figures: &[String],
) -> String {
    let unit = match kind {
        OutputKind::Slides => "slides",
        OutputKind::Poster => "poster sections",
    };
    let count = if range.0 == range.1 {
        format!("exactly {}", range.0)
    } else {
        format!("between {} and {}", range.0, range.1)
    };
    let list = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join("\n")
        }
    };
    format!(
        "Plan {count} {unit} from the content below.\n\n\
         Return a JSON object: {{\"sections\": [{{\"id\": \"section_01\", \"title\": \"...\", \
         \"type\": \"opening|content|ending\", \"content\": \"...\", \
         \"tables\": [{{\"table_id\": \"...\", \"extract\": null, \"focus\": null}}], \
         \"figures\": [{{\"figure_id\": \"...\", \"focus\": null}}]}}]}}\n\n\
         Rules:\n\
         - The first section is the opening, the last is the ending.\n\
         - Reference tables and figures only by the ids listed below.\n\
         - Each section's content is the complete text that appears on it.\n\n\
         === AVAILABLE TABLES ===\n{}\n\n=== AVAILABLE FIGURES ===\n{}\n\n\
         === CONTENT ===\n{summary}",
        list(tables),
        list(figures),
    )
}

// ── Generate: custom style processing ────────────────────────────────────

pub const STYLE_SYSTEM_PROMPT: &str =
    "You turn visual style requests into concrete design directions and answer with JSON only.";

/// Prompt that normalises a free-text style request into JSON fields.
pub fn style_process_prompt(user_style: &str) -> String {
    format!(
        "A user wants a presentation in this visual style:\n\"{user_style}\"\n\n\
         Return a JSON object with:\n\
         - \"style_name\": a one-sentence description of the visual style\n\
         - \"color_tone\": background and accent colours\n\
         - \"special_elements\": characters or recurring elements, or \"\"\n\
         - \"decorations\": subtle decorative motifs, or \"\"\n\
         - \"valid\": false if the request is not a visual style or is inappropriate\n\
         - \"error\": reason when invalid, otherwise null"
    )
}

// ── Generate: image prompts ──────────────────────────────────────────────

pub const FORMAT_SLIDE: &str =
    "Create a 16:9 presentation slide image. Render all text legibly and spell it exactly.";

pub const FORMAT_POSTER: &str = "Create a portrait academic poster image that presents all \
sections below in a clear reading order. Render all text legibly and spell it exactly.";

/// Fixed part of every custom style paragraph, between the style name and
/// the colour palette.
pub const CUSTOM_STYLE_RULES: &str = "English text only. Use ROUNDED sans-serif fonts for ALL \
text. Characters should react to or interact with the content, with appropriate poses/actions and \
sizes - not just decoration.";

pub const SLIDE_COMMON_STYLE_RULES: &str =
    "Generous margins, at most 6 bullet points, no dense paragraphs.";

pub const POSTER_COMMON_STYLE_RULES: &str =
    "Clear section headers, balanced columns, consistent spacing between blocks.";

pub const VISUALIZATION_HINTS: &str = "Prefer charts, diagrams and icons over text where the \
content allows. Tables with numbers become clean tables or bar charts.";

pub const CONSISTENCY_HINT: &str = "If a reference slide is attached, match its background, \
colour palette, typography and icon style exactly.";

pub const SLIDE_FIGURE_HINT: &str =
    "Attached figures are the paper's originals: reproduce them faithfully, do not redraw their data.";

pub const POSTER_FIGURE_HINT: &str =
    "Place attached figures next to the section that references them, reproduced faithfully.";

/// Style paragraph for a predefined style.
pub fn style_hint(style: &Style, kind: OutputKind) -> &'static str {
    match (style, kind) {
        (Style::Doraemon, OutputKind::Slides) => {
            "Style: friendly Doraemon-inspired cartoon. Bright blue and white palette, rounded \
             fonts, Doraemon appears as a guide reacting to the content."
        }
        (Style::Doraemon, OutputKind::Poster) => {
            "Style: friendly Doraemon-inspired cartoon poster. Bright blue and white palette, \
             rounded fonts, small Doraemon characters guide the reader between sections."
        }
        (_, OutputKind::Slides) => {
            "Style: clean academic presentation. White background, navy accent colour, sans-serif \
             fonts, minimal decoration."
        }
        (_, OutputKind::Poster) => {
            "Style: professional academic conference poster. White background, navy and teal \
             accents, sans-serif fonts."
        }
    }
}

/// Layout rule for a slide of the given kind under a style.
pub fn layout_rule(style: &Style, kind: SectionKind) -> &'static str {
    match (style, kind) {
        (Style::Academic, SectionKind::Opening) => {
            "Layout: title slide. Large centred title, authors and affiliations below."
        }
        (Style::Academic, SectionKind::Content) => {
            "Layout: title bar at top, content in one or two columns below."
        }
        (Style::Academic, SectionKind::Ending) => {
            "Layout: summary slide. Key takeaways as a short list, no new content."
        }
        (Style::Doraemon, SectionKind::Opening) => {
            "Layout: cover page. Big playful title, Doraemon waving beside it."
        }
        (Style::Doraemon, SectionKind::Content) => {
            "Layout: content card with a title ribbon, Doraemon pointing at the key point."
        }
        (Style::Doraemon, SectionKind::Ending) => {
            "Layout: closing page. Takeaways in speech bubbles, Doraemon saying goodbye."
        }
        (Style::Custom(_), SectionKind::Opening) => {
            "Layout: title slide with the title as the focal point."
        }
        (Style::Custom(_), SectionKind::Content) => {
            "Layout: title at top, content below, one clear focal element."
        }
        (Style::Custom(_), SectionKind::Ending) => {
            "Layout: closing slide with the key takeaways."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_queries_cover_summary_sections() {
        let categories: Vec<&str> = queries_for(ContentKind::Paper)
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(
            categories,
            vec!["paper_info", "motivation", "solution", "results", "contributions"]
        );
    }

    #[test]
    fn general_content_uses_one_category() {
        let queries = queries_for(ContentKind::General);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, GENERAL_CATEGORY);
        assert!(!queries[0].1.is_empty());
    }

    #[test]
    fn plan_prompt_states_count_and_ids() {
        let p = plan_prompt(
            OutputKind::Poster,
            (4, 4),
            "summary",
            &["Table 1: results".into()],
            &[],
        );
        assert!(p.contains("exactly 4 poster sections"));
        assert!(p.contains("Table 1: results"));
        assert!(p.contains("=== AVAILABLE FIGURES ===\n(none)"));

        let s = plan_prompt(OutputKind::Slides, (8, 12), "x", &[], &[]);
        assert!(s.contains("between 8 and 12 slides"));
    }

    #[test]
    fn layouts_differ_by_style() {
        assert_ne!(
            layout_rule(&Style::Academic, SectionKind::Opening),
            layout_rule(&Style::Doraemon, SectionKind::Opening)
        );
        assert!(style_hint(&Style::Custom("x".into()), OutputKind::Slides).contains("academic"));
    }
}
