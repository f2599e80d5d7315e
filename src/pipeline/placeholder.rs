//! Offline image backend: deterministic 1280×720 PNG mock-ups.
//!
//! ## Why shapes instead of text?
//!
//! The `image` crate has no font rasteriser. A placeholder only has to show
//! that the pipeline ran end to end and which content landed on which slide,
//! so the title becomes a dark bar in a coloured header band and every
//! wrapped body line becomes a grey bar as long as the line. Identical
//! content always gives identical bytes.

use crate::error::ArtifactError;
use crate::output::ReferenceImage;
use crate::pipeline::encode::encode_png;
use crate::scheduler::ImageBackend;
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

pub const WIDTH: u32 = 1280;
pub const HEIGHT: u32 = 720;

const MARGIN_X: u32 = 40;
const TITLE_Y: u32 = 30;
const BODY_TOP: u32 = 90;
const BODY_BOTTOM: u32 = 680;
const LINE_HEIGHT: u32 = 22;
const BAR_HEIGHT: u32 = 10;
const WRAP_COLUMNS: usize = 90;
/// Pixels per character of a body line.
const CHAR_WIDTH: u32 = (WIDTH - 2 * MARGIN_X) / WRAP_COLUMNS as u32;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const HEADER: Rgba<u8> = Rgba([226, 234, 245, 255]);
const TITLE: Rgba<u8> = Rgba([31, 56, 100, 255]);
const BODY: Rgba<u8> = Rgba([150, 150, 150, 255]);

/// Markers after which a composed prompt carries the visible content.
const CONTENT_MARKERS: &[&str] = &["---\nThis slide content:\n", "---\nContent:\n"];

/// [`ImageBackend`] that draws locally and never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderBackend;

#[async_trait]
impl ImageBackend for PlaceholderBackend {
    async fn generate_one(
        &self,
        prompt: &str,
        _references: &[ReferenceImage],
    ) -> Result<(Vec<u8>, String), ArtifactError> {
        let (title, body) = visible_content(prompt);
        let bytes = render(&title, &body)?;
        debug!("Placeholder '{}': {} bytes", title, bytes.len());
        Ok((bytes, "image/png".to_string()))
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

/// Title and body text of the content block of a prompt.
///
/// The title is the first `## ` heading; the rest of the block is the body.
/// Prompts without a content marker are used whole.
pub fn visible_content(prompt: &str) -> (String, String) {
    let block = CONTENT_MARKERS
        .iter()
        .filter_map(|m| prompt.rfind(m).map(|at| &prompt[at + m.len()..]))
        .next()
        .unwrap_or(prompt);

    let mut title = String::new();
    let mut body = Vec::new();
    for line in block.lines() {
        match line.strip_prefix("## ") {
            Some(t) if title.is_empty() => title = t.trim().to_string(),
            _ => body.push(line),
        }
    }
    (title, body.join("\n").trim().to_string())
}

/// Greedy word wrap at `width` characters; words longer than a line are cut.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.push(word.drain(..width).collect());
            }
            let word: String = word.into_iter().collect();
            let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
            if needed > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

fn fill(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, colour: Rgba<u8>) {
    for py in y..(y + h).min(HEIGHT) {
        for px in x..(x + w).min(WIDTH) {
            img.put_pixel(px, py, colour);
        }
    }
}

fn render(title: &str, body: &str) -> Result<Vec<u8>, ArtifactError> {
    let mut img = RgbaImage::from_pixel(WIDTH, HEIGHT, WHITE);

    fill(&mut img, 0, 0, WIDTH, BODY_TOP - 20, HEADER);
    let title_chars = title.chars().count().clamp(1, WRAP_COLUMNS) as u32;
    fill(&mut img, MARGIN_X, TITLE_Y, title_chars * CHAR_WIDTH, 16, TITLE);

    let mut y = BODY_TOP;
    for line in wrap(body, WRAP_COLUMNS) {
        if y > BODY_BOTTOM {
            break;
        }
        let len = line.chars().count() as u32;
        fill(&mut img, MARGIN_X, y, len * CHAR_WIDTH, BAR_HEIGHT, BODY);
        y += LINE_HEIGHT;
    }

    encode_png(&DynamicImage::ImageRgba8(img)).map_err(|e| ArtifactError::Payload(e.to_string()))
}
