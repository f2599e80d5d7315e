//! Slide deck assembly: every saved slide image becomes one page of
//! `slides.pdf`.
//!
//! Pages are sized to their image at 100 dpi, so a 1280×720 slide becomes a
//! 921.6 × 518.4 pt page with the image filling it edge to edge. Images are
//! flattened to RGB first; PDF image objects carry no alpha here.
//!
//! pdfium is bound exactly as for text extraction. When no pdfium library
//! can be found the deck is skipped with a warning and the slide images
//! remain the stage's output.

use crate::error::PipelineError;
use crate::pipeline::extract::bind_pdfium;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the assembled deck inside the output directory.
pub const DECK_PDF_NAME: &str = "slides.pdf";

const DPI: f32 = 100.0;

/// Page size in points for an image of the given pixel size.
pub fn page_size_points(width_px: u32, height_px: u32) -> (f32, f32) {
    let scale = 72.0 / DPI;
    (width_px as f32 * scale, height_px as f32 * scale)
}

/// A deck is assembled for slide runs with more than one image.
pub fn wants_deck(slides: bool, image_count: usize) -> bool {
    slides && image_count > 1
}

/// Render `images` (in order) into PDF bytes.
///
/// `Ok(None)` when pdfium is not available on this machine.
pub async fn assemble_deck(
    images: Vec<PathBuf>,
    target: &Path,
) -> Result<Option<Vec<u8>>, PipelineError> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || assemble_deck_blocking(&images, &target))
        .await
        .map_err(|e| PipelineError::Internal(format!("Deck assembly task panicked: {}", e)))?
}

fn assemble_deck_blocking(
    images: &[PathBuf],
    target: &Path,
) -> Result<Option<Vec<u8>>, PipelineError> {
    let failed = |detail: String| PipelineError::DeckAssemblyFailed {
        path: target.to_path_buf(),
        detail,
    };

    let pdfium = match bind_pdfium() {
        Ok(pdfium) => pdfium,
        Err(e) => {
            warn!("Skipping {}: {}", DECK_PDF_NAME, e);
            return Ok(None);
        }
    };

    let mut document = pdfium
        .create_new_pdf()
        .map_err(|e| failed(format!("{:?}", e)))?;

    for (idx, path) in images.iter().enumerate() {
        let decoded = image::open(path).map_err(|e| failed(format!("{}: {}", path.display(), e)))?;
        let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
        let (width, height) = page_size_points(rgb.width(), rgb.height());
        let (width, height) = (PdfPoints::new(width), PdfPoints::new(height));

        let object = PdfPageImageObject::new_with_size(&document, &rgb, width, height)
            .map_err(|e| failed(format!("page {}: {:?}", idx + 1, e)))?;
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(width, height))
            .map_err(|e| failed(format!("page {}: {:?}", idx + 1, e)))?;
        page.objects_mut()
            .add_image_object(object)
            .map_err(|e| failed(format!("page {}: {:?}", idx + 1, e)))?;
        debug!("Deck page {}: {}", idx + 1, path.display());
    }

    let bytes = document
        .save_to_bytes()
        .map_err(|e| failed(format!("{:?}", e)))?;
    info!("Assembled {} pages ({} bytes)", images.len(), bytes.len());
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::placeholder::{PlaceholderBackend, HEIGHT, WIDTH};
    use crate::scheduler::ImageBackend;

    #[test]
    fn placeholder_slides_map_to_widescreen_pages() {
        let (w, h) = page_size_points(WIDTH, HEIGHT);
        assert!((w - 921.6).abs() < 0.01);
        assert!((h - 518.4).abs() < 0.01);
    }

    #[tokio::test]
    async fn slides_become_pages_in_order() {
        // Needs a pdfium library on the host; without one the deck is skipped.
        if bind_pdfium().is_err() {
            let dir = tempfile::TempDir::new().unwrap();
            let out = assemble_deck(Vec::new(), &dir.path().join(DECK_PDF_NAME)).await;
            assert!(out.unwrap().is_none());
            return;
        }

        let dir = tempfile::TempDir::new().unwrap();
        let mut pages = Vec::new();
        for (i, prompt) in ["---\nContent:\n## One", "---\nContent:\n## Two"].iter().enumerate() {
            let (png, _) = PlaceholderBackend.generate_one(prompt, &[]).await.unwrap();
            let path = dir.path().join(format!("section_0{}.png", i + 1));
            std::fs::write(&path, png).unwrap();
            pages.push(path);
        }

        let bytes = assemble_deck(pages, &dir.path().join(DECK_PDF_NAME))
            .await
            .unwrap()
            .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        let pdfium = bind_pdfium().unwrap();
        let document = pdfium.load_pdf_from_byte_slice(&bytes, None).unwrap();
        assert_eq!(document.pages().len(), 2);
    }

    #[test]
    fn only_multi_slide_runs_get_a_deck() {
        assert!(wants_deck(true, 5));
        assert!(!wants_deck(true, 1));
        assert!(!wants_deck(false, 1));
        assert!(!wants_deck(false, 0));
    }
}
