//! Output types: generated artifacts, reference images and run outcomes.

use crate::identity::RunIdentity;
use crate::model::GenerateResult;
use crate::state::{RunRecord, Stage};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::PathBuf;

/// One produced image: a slide, or the whole poster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub section_id: String,
    pub payload: Vec<u8>,
    pub media_type: String,
}

impl GeneratedArtifact {
    /// File extension for the media type; unknown types are saved as PNG.
    pub fn extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.section_id, self.extension())
    }
}

/// An image attached to a generation call, with the label shown before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub label: String,
    pub caption: Option<String>,
    pub media_type: String,
    /// Base64 (standard alphabet) image bytes.
    pub base64: String,
}

impl ReferenceImage {
    pub fn from_bytes(
        label: impl Into<String>,
        caption: Option<String>,
        media_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            label: label.into(),
            caption,
            media_type: media_type.into(),
            base64: STANDARD.encode(bytes),
        }
    }

    /// `data:` URL accepted by OpenAI-compatible chat APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }

    /// Text label placed before the image in a request.
    pub fn text_label(&self) -> String {
        match self.caption.as_deref() {
            Some(c) if !c.is_empty() => format!("[{}]: {}", self.label, c),
            _ => format!("[{}]", self.label),
        }
    }
}

/// The second slide, reused so later slides keep the same look.
///
/// Built once per `generate` call and only read afterwards; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleReference(ReferenceImage);

impl StyleReference {
    pub const LABEL: &'static str = "Reference Slide";
    pub const INSTRUCTION: &'static str = "STRICTLY MAINTAIN: same background color, same accent \
color, same font style, same chart/icon style. Keep visual consistency.";

    pub fn from_artifact(artifact: &GeneratedArtifact) -> Self {
        Self(ReferenceImage::from_bytes(
            Self::LABEL,
            Some(Self::INSTRUCTION.to_string()),
            artifact.media_type.clone(),
            &artifact.payload,
        ))
    }

    pub fn image(&self) -> &ReferenceImage {
        &self.0
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub identity: RunIdentity,
    pub record: RunRecord,
    /// Stage execution started from; `None` when everything was cached.
    pub resumed_from: Option<Stage>,
    /// Stages whose work function actually ran in this call.
    pub executed: Vec<Stage>,
    pub generated: GenerateResult,
}

impl RunOutcome {
    /// Saved artifact paths in section order.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.generated
            .artifacts
            .iter()
            .map(|a| self.generated.output_dir.join(&a.file_name))
            .collect()
    }

    /// Path of `slides.pdf`, if the run assembled one.
    pub fn deck_pdf_path(&self) -> Option<PathBuf> {
        self.generated
            .deck_pdf
            .as_ref()
            .map(|name| self.generated.output_dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_follows_media_type() {
        let mut a = GeneratedArtifact {
            section_id: "section_01".into(),
            payload: vec![1, 2, 3],
            media_type: "image/jpeg".into(),
        };
        assert_eq!(a.file_name(), "section_01.jpg");
        a.media_type = "application/octet-stream".into();
        assert_eq!(a.extension(), "png");
    }

    #[test]
    fn reference_label_includes_caption() {
        let img = ReferenceImage::from_bytes("Figure 1", Some("Overview".into()), "image/png", b"x");
        assert_eq!(img.text_label(), "[Figure 1]: Overview");
        assert_eq!(img.data_url(), "data:image/png;base64,eA==");

        let bare = ReferenceImage::from_bytes("Figure 2", None, "image/png", b"x");
        assert_eq!(bare.text_label(), "[Figure 2]");
    }

    #[test]
    fn style_reference_wraps_artifact_bytes() {
        let artifact = GeneratedArtifact {
            section_id: "s2".into(),
            payload: b"png-bytes".to_vec(),
            media_type: "image/png".into(),
        };
        let reference = StyleReference::from_artifact(&artifact);
        assert_eq!(reference.image().label, StyleReference::LABEL);
        assert_eq!(
            STANDARD.decode(&reference.image().base64).unwrap(),
            b"png-bytes"
        );
    }
}
