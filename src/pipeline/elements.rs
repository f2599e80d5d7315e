//! Tables and figures of the source markdown.
//!
//! The planner may only reference elements listed here, and the generate
//! stage attaches the referenced figures as images, so ids must be stable
//! across runs over the same input.
//!
//! ## Id assignment
//!
//! An element whose caption names it ("Table 2: …", "Fig. 3.") keeps that
//! number; others get the next unused sequential number. With several
//! documents every id is prefixed `Doc{n}_` so equal numbers from different
//! documents stay distinct.

use crate::model::{FigureInfo, OriginalElements, TableInfo};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

static RE_HTML_TABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<table\b.*?</table>").unwrap());

static RE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"!\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).unwrap());

static RE_TABLE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[*_\s]*(table)\s+(\d+)\b").unwrap());

static RE_FIGURE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[*_\s]*(figure|fig\.?)\s+(\d+)\b").unwrap());

/// Tables and figures of one markdown document, ids unprefixed.
pub fn extract_elements(markdown: &str) -> (Vec<TableInfo>, Vec<FigureInfo>) {
    let markdown = markdown.replace("\r\n", "\n");
    let tables = extract_tables(&markdown);
    let figures = extract_figures(&markdown);
    (tables, figures)
}

/// Elements of several documents, given as `(markdown, document directory)`.
///
/// Relative figure paths of the first document stay relative to
/// `base_path`; those of later documents are resolved against their own
/// directory.
pub fn collect_elements(documents: &[(String, PathBuf)]) -> OriginalElements {
    let multi = documents.len() > 1;
    let mut origin = OriginalElements {
        tables: Vec::new(),
        figures: Vec::new(),
        base_path: documents.first().map(|(_, dir)| absolute(dir)),
    };

    for (i, (markdown, dir)) in documents.iter().enumerate() {
        let (mut tables, mut figures) = extract_elements(markdown);
        if multi {
            let prefix = format!("Doc{}", i + 1);
            for t in &mut tables {
                t.id = format!("{prefix}_{}", t.id);
            }
            for f in &mut figures {
                f.id = format!("{prefix}_{}", f.id);
            }
        }
        if i > 0 {
            let dir = absolute(dir);
            for f in &mut figures {
                if !is_remote(&f.path) {
                    f.path = dir.join(&f.path).to_string_lossy().into_owned();
                }
            }
        }
        debug!(
            "Document {}: {} tables, {} figures",
            i + 1,
            tables.len(),
            figures.len()
        );
        origin.tables.extend(tables);
        origin.figures.extend(figures);
    }
    origin
}

fn absolute(dir: &Path) -> PathBuf {
    std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
}

fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://") || path.starts_with("data:")
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// A table's source with the byte offsets it spans.
struct Span {
    start: usize,
    end: usize,
    source: String,
}

fn extract_tables(markdown: &str) -> Vec<TableInfo> {
    let mut spans: Vec<Span> = RE_HTML_TABLE
        .find_iter(markdown)
        .map(|m| Span {
            start: m.start(),
            end: m.end(),
            source: m.as_str().to_string(),
        })
        .collect();

    for span in gfm_tables(markdown) {
        let inside_html = spans
            .iter()
            .any(|s| span.start >= s.start && span.start < s.end);
        if !inside_html {
            spans.push(span);
        }
    }
    spans.sort_by_key(|s| s.start);

    let mut ids = IdAllocator::new("Table");
    spans
        .into_iter()
        .map(|span| {
            let caption = table_caption(markdown, span.start, span.end);
            let named = caption
                .as_deref()
                .and_then(|c| caption_number(c, &RE_TABLE_CAPTION));
            TableInfo {
                id: ids.assign(named),
                caption: caption.unwrap_or_default(),
                html: span.source,
            }
        })
        .collect()
}

/// GFM pipe tables: a header row, a separator row, then body rows.
fn gfm_tables(markdown: &str) -> Vec<Span> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for line in markdown.split('\n') {
        lines.push((offset, line));
        offset += line.len() + 1;
    }

    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < lines.len() {
        let (start, header) = lines[i];
        let (_, separator) = lines[i + 1];
        if !(is_pipe_row(header) && is_separator_row(separator)) {
            i += 1;
            continue;
        }
        let mut j = i + 2;
        while j < lines.len() && is_pipe_row(lines[j].1) {
            j += 1;
        }
        let (last_start, last) = lines[j - 1];
        let end = last_start + last.len();
        spans.push(Span {
            start,
            end,
            source: markdown[start..end].to_string(),
        });
        i = j;
    }
    spans
}

fn is_pipe_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    is_pipe_row(t)
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

// ── Figures ──────────────────────────────────────────────────────────────────

fn extract_figures(markdown: &str) -> Vec<FigureInfo> {
    let mut ids = IdAllocator::new("Figure");
    let mut seen_paths = HashSet::new();
    let mut figures = Vec::new();

    for caps in RE_IMAGE.captures_iter(markdown) {
        let (Some(image), Some(path)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let path = path.as_str().to_string();
        if path.starts_with("data:") || !seen_paths.insert(path.clone()) {
            continue;
        }

        let alt = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|a| !a.is_empty());
        let nearby = figure_caption(markdown, image.end());
        let named = nearby
            .as_deref()
            .and_then(|c| caption_number(c, &RE_FIGURE_CAPTION))
            .or_else(|| alt.as_deref().and_then(|a| caption_number(a, &RE_FIGURE_CAPTION)));

        figures.push(FigureInfo {
            id: ids.assign(named),
            caption: nearby.or(alt),
            path,
        });
    }
    figures
}

// ── Captions and ids ─────────────────────────────────────────────────────────

/// The caption of a table: the line directly above it, else the line below.
fn table_caption(markdown: &str, start: usize, end: usize) -> Option<String> {
    line_above(markdown, start)
        .filter(|l| RE_TABLE_CAPTION.is_match(l))
        .or_else(|| line_below(markdown, end).filter(|l| RE_TABLE_CAPTION.is_match(l)))
        .map(strip_emphasis)
}

/// The caption of a figure: the line directly below the image.
fn figure_caption(markdown: &str, end: usize) -> Option<String> {
    line_below(markdown, end)
        .filter(|l| RE_FIGURE_CAPTION.is_match(l))
        .map(strip_emphasis)
}

fn line_above(markdown: &str, start: usize) -> Option<&str> {
    markdown[..start].trim_end().rsplit('\n').next().map(str::trim)
}

fn line_below(markdown: &str, end: usize) -> Option<&str> {
    markdown[end..].trim_start().split('\n').next().map(str::trim)
}

fn strip_emphasis(line: &str) -> String {
    line.trim_matches(|c| c == '*' || c == '_').trim().to_string()
}

fn caption_number(caption: &str, re: &Regex) -> Option<u32> {
    re.captures(caption)?.get(2)?.as_str().parse().ok()
}

/// Hands out `"{kind} {n}"` ids without repeats.
struct IdAllocator {
    kind: &'static str,
    used: HashSet<u32>,
    next: u32,
}

impl IdAllocator {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            used: HashSet::new(),
            next: 1,
        }
    }

    fn assign(&mut self, named: Option<u32>) -> String {
        let n = match named {
            Some(n) if self.used.insert(n) => n,
            _ => {
                while self.used.contains(&self.next) {
                    self.next += 1;
                }
                self.used.insert(self.next);
                self.next
            }
        };
        format!("{} {}", self.kind, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Paper

Table 2: Accuracy on benchmarks
<table><tr><td>ours</td><td>91.2</td></tr></table>

Some text.

| Model | Params |
|-------|-------:|
| A     | 7B     |
| B     | 13B    |

![Overview of the architecture](images/arch.png)
Figure 3: Overview of the architecture.

![](images/plot.png)
";

    #[test]
    fn tables_keep_caption_numbers_and_fill_gaps() {
        let (tables, _) = extract_elements(DOC);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].id, "Table 2");
        assert_eq!(tables[0].caption, "Table 2: Accuracy on benchmarks");
        assert!(tables[0].html.starts_with("<table>"));

        assert_eq!(tables[1].id, "Table 1");
        assert_eq!(tables[1].caption, "");
        assert!(tables[1].html.starts_with("| Model | Params |"));
        assert!(tables[1].html.ends_with("| B     | 13B    |"));
    }

    #[test]
    fn figures_take_caption_or_alt_text() {
        let (_, figures) = extract_elements(DOC);
        assert_eq!(figures.len(), 2);
        assert_eq!(figures[0].id, "Figure 3");
        assert_eq!(
            figures[0].caption.as_deref(),
            Some("Figure 3: Overview of the architecture.")
        );
        assert_eq!(figures[0].path, "images/arch.png");

        assert_eq!(figures[1].id, "Figure 1");
        assert_eq!(figures[1].caption, None);
    }

    #[test]
    fn pipe_rows_without_separator_are_not_tables() {
        let (tables, _) = extract_elements("| just | a line |\n| another | line |\n");
        assert!(tables.is_empty());
    }

    #[test]
    fn multiple_documents_are_prefixed() {
        let docs = vec![
            (DOC.to_string(), PathBuf::from("/data/a")),
            ("![Chart](fig.png)".to_string(), PathBuf::from("/data/b")),
        ];
        let origin = collect_elements(&docs);
        assert_eq!(origin.base_path.as_deref(), Some(Path::new("/data/a")));
        assert!(origin.table("Doc1_Table 2").is_some());
        assert_eq!(
            origin.figure("Doc1_Figure 3").map(|f| f.path.as_str()),
            Some("images/arch.png")
        );
        let second = origin.figure("Doc2_Figure 1").unwrap();
        assert_eq!(Path::new(&second.path), Path::new("/data/b/fig.png"));
    }

    #[test]
    fn single_document_ids_are_unprefixed() {
        let origin = collect_elements(&[(DOC.to_string(), PathBuf::from("/data/a"))]);
        assert!(origin.table("Table 2").is_some());
        assert!(origin.figure("Figure 3").is_some());
    }
}
