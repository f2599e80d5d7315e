//! Document text: pdfium page text for PDFs, file contents for Markdown.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. Extraction runs on
//! Tokio's blocking pool so worker threads never stall on a large document.

use crate::error::PipelineError;
use crate::pipeline::input::{InputKind, ResolvedInput};
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Markdown text of a resolved input.
pub async fn extract_markdown(input: &ResolvedInput) -> Result<String, PipelineError> {
    match input.kind() {
        InputKind::Markdown => tokio::fs::read_to_string(input.path())
            .await
            .map_err(|e| PipelineError::io(input.path(), e)),
        InputKind::Pdf => {
            let path = input.path().to_path_buf();
            tokio::task::spawn_blocking(move || extract_pdf_text_blocking(&path))
                .await
                .map_err(|e| PipelineError::Internal(format!("Extraction task panicked: {}", e)))?
        }
    }
}

/// Bind pdfium from the system library path, then from the working directory.
pub(crate) fn bind_pdfium() -> Result<Pdfium, String> {
    Pdfium::bind_to_system_library()
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        })
        .map(Pdfium::new)
        .map_err(|e| format!("pdfium library not available: {:?}", e))
}

fn extract_pdf_text_blocking(pdf_path: &Path) -> Result<String, PipelineError> {
    let failed = |detail: String| PipelineError::ExtractionFailed {
        path: pdf_path.to_path_buf(),
        detail,
    };

    let pdfium = bind_pdfium().map_err(failed)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| failed(format!("{:?}", e)))?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut parts = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map_err(|e| failed(format!("page {}: {:?}", idx + 1, e)))?
            .all();
        debug!("Page {}: {} chars", idx + 1, text.len());
        parts.push(text);
    }

    Ok(normalise_page_text(&parts))
}

/// Join page texts with blank lines, dropping empty pages and trailing spaces.
pub fn normalise_page_text(pages: &[String]) -> String {
    pages
        .iter()
        .map(|p| {
            p.replace("\r\n", "\n")
                .lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_text_is_normalised() {
        let pages = vec![
            "Title  \r\nline two   ".to_string(),
            "   ".to_string(),
            "\nlast page\n".to_string(),
        ];
        assert_eq!(normalise_page_text(&pages), "Title\nline two\n\nlast page");
    }

    #[tokio::test]
    async fn markdown_inputs_are_read_verbatim() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.md");
        std::fs::write(&path, "# Doc\n\nBody").unwrap();
        let input = ResolvedInput::Local {
            path,
            kind: InputKind::Markdown,
        };
        assert_eq!(extract_markdown(&input).await.unwrap(), "# Doc\n\nBody");
    }
}
