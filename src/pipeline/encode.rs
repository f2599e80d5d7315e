//! Image encoding: PNG bytes for generated placeholders and base64
//! reference images for figures attached to generation requests.

use crate::model::{FigureInfo, OriginalElements, Section};
use crate::output::ReferenceImage;
use image::DynamicImage;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// Encode an image as PNG.
///
/// PNG is lossless: text on slides stays crisp.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Media type from a file extension; unknown extensions are sent as JPEG.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

/// Read one figure from disk. Missing or unreadable files yield `None`.
pub fn load_figure(fig: &FigureInfo, base: Option<&Path>) -> Option<ReferenceImage> {
    let path = match base {
        Some(b) => b.join(&fig.path),
        None => Path::new(&fig.path).to_path_buf(),
    };
    match std::fs::read(&path) {
        Ok(bytes) => Some(ReferenceImage::from_bytes(
            fig.id.clone(),
            fig.caption.clone(),
            mime_for(&path),
            &bytes,
        )),
        Err(e) => {
            warn!("Skipping figure {} ({}): {}", fig.id, path.display(), e);
            None
        }
    }
}

/// The subset of `loaded` that `sections` reference, in loaded order.
pub fn figures_for(sections: &[Section], loaded: &[ReferenceImage]) -> Vec<ReferenceImage> {
    let used: HashSet<&str> = sections
        .iter()
        .flat_map(|s| s.figure_refs.iter().map(|r| r.figure_id.as_str()))
        .collect();
    loaded
        .iter()
        .filter(|img| used.contains(img.label.as_str()))
        .cloned()
        .collect()
}

/// Load every figure of `origin` that any section references.
pub fn load_referenced_figures(
    sections: &[Section],
    origin: &OriginalElements,
) -> Vec<ReferenceImage> {
    let used: HashSet<&str> = sections
        .iter()
        .flat_map(|s| s.figure_refs.iter().map(|r| r.figure_id.as_str()))
        .collect();
    origin
        .figures
        .iter()
        .filter(|f| used.contains(f.id.as_str()))
        .filter_map(|f| load_figure(f, origin.base_path.as_deref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FigureRef, SectionKind};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let bytes = encode_png(&img).expect("encode should succeed");
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn mime_map() {
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for(Path::new("a.bmp")), "image/jpeg");
    }

    #[test]
    fn only_referenced_figures_are_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/a.png"), b"png-a").unwrap();
        std::fs::write(dir.path().join("images/b.png"), b"png-b").unwrap();

        let origin = OriginalElements {
            tables: vec![],
            figures: vec![
                FigureInfo {
                    id: "Figure 1".into(),
                    caption: Some("A".into()),
                    path: "images/a.png".into(),
                },
                FigureInfo {
                    id: "Figure 2".into(),
                    caption: None,
                    path: "images/b.png".into(),
                },
                FigureInfo {
                    id: "Figure 3".into(),
                    caption: None,
                    path: "images/missing.png".into(),
                },
            ],
            base_path: Some(dir.path().to_path_buf()),
        };
        let mut section = Section::new("s1", "Method", SectionKind::Content);
        for id in ["Figure 1", "Figure 3"] {
            section.figure_refs.push(FigureRef {
                figure_id: id.into(),
                focus: None,
            });
        }

        let loaded = load_referenced_figures(std::slice::from_ref(&section), &origin);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].label, "Figure 1");
        assert_eq!(STANDARD.decode(&loaded[0].base64).unwrap(), b"png-a");
    }
}
