//! Remote image generation through an OpenAI-compatible chat endpoint.
//!
//! The request is one user message whose content list is the prompt text
//! followed by, for every reference image, a text label and the image as a
//! `data:` URL. `modalities: ["image", "text"]` asks the model to answer
//! with an image; it arrives as a `data:` URL in
//! `choices[0].message.images[0].image_url.url`.

use crate::config::ImageApiSettings;
use crate::error::ArtifactError;
use crate::output::ReferenceImage;
use crate::scheduler::ImageBackend;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// [`ImageBackend`] over an OpenRouter-style `chat/completions` API.
pub struct OpenRouterBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenRouterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenRouterBackend {
    /// `None` when no API key is configured.
    pub fn from_settings(settings: &ImageApiSettings) -> Result<Option<Self>, ArtifactError> {
        let Some(api_key) = settings.api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ArtifactError::Api(e.to_string()))?;
        Ok(Some(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
        }))
    }
}

/// Request body for one generation call.
pub fn request_body(model: &str, prompt: &str, references: &[ReferenceImage]) -> Value {
    let mut content = vec![json!({"type": "text", "text": prompt})];
    for img in references {
        content.push(json!({"type": "text", "text": img.text_label()}));
        content.push(json!({"type": "image_url", "image_url": {"url": img.data_url()}}));
    }
    json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
        "modalities": ["image", "text"],
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    images: Vec<ImagePart>,
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ImagePart {
    image_url: ImageUrl,
}

#[derive(Debug, Deserialize)]
struct ImageUrl {
    url: String,
}

/// Image bytes and media type from a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Result<(Vec<u8>, String), ArtifactError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ArtifactError::Payload("image is not a data URL".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ArtifactError::Payload("data URL has no payload".into()))?;
    let media_type = header.split(';').next().unwrap_or_default();
    let media_type = if media_type.is_empty() {
        "image/png".to_string()
    } else {
        media_type.to_string()
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ArtifactError::Payload(e.to_string()))?;
    Ok((bytes, media_type))
}

fn first_image(response: ChatResponse) -> Result<(Vec<u8>, String), ArtifactError> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(ArtifactError::EmptyResponse("no choices".into()));
    };
    match choice.message.images.into_iter().next() {
        Some(part) => decode_data_url(&part.image_url.url),
        None => {
            let text = choice
                .message
                .content
                .and_then(|c| c.as_str().map(str::to_string))
                .unwrap_or_default();
            Err(ArtifactError::EmptyResponse(if text.is_empty() {
                "no images in response".to_string()
            } else {
                format!("text only: {}", text.chars().take(200).collect::<String>())
            }))
        }
    }
}

#[async_trait]
impl ImageBackend for OpenRouterBackend {
    async fn generate_one(
        &self,
        prompt: &str,
        references: &[ReferenceImage],
    ) -> Result<(Vec<u8>, String), ArtifactError> {
        debug!(
            "Image call: {} prompt chars, {} reference image(s)",
            prompt.len(),
            references.len()
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body(&self.model, prompt, references))
            .send()
            .await
            .map_err(|e| ArtifactError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Api(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ArtifactError::Payload(e.to_string()))?;
        first_image(parsed)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_lists_prompt_then_labelled_images() {
        let refs = vec![
            ReferenceImage::from_bytes("Reference Slide", Some("keep style".into()), "image/png", b"a"),
            ReferenceImage::from_bytes("Figure 1", None, "image/jpeg", b"b"),
        ];
        let body = request_body("m", "Draw it", &refs);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 5);
        assert_eq!(content[0]["text"], "Draw it");
        assert_eq!(content[1]["text"], "[Reference Slide]: keep style");
        assert_eq!(content[2]["image_url"]["url"], "data:image/png;base64,YQ==");
        assert_eq!(content[3]["text"], "[Figure 1]");
        assert_eq!(body["modalities"], json!(["image", "text"]));
    }

    #[test]
    fn data_urls_decode() {
        let (bytes, mime) = decode_data_url("data:image/webp;base64,aGk=").unwrap();
        assert_eq!(bytes, b"hi");
        assert_eq!(mime, "image/webp");

        assert!(matches!(
            decode_data_url("https://x/y.png"),
            Err(ArtifactError::Payload(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(ArtifactError::Payload(_))
        ));
    }

    #[test]
    fn response_without_image_is_empty() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "I cannot draw that."}}]
        }))
        .unwrap();
        match first_image(resp) {
            Err(ArtifactError::EmptyResponse(msg)) => assert!(msg.contains("cannot draw")),
            other => panic!("expected EmptyResponse, got {other:?}"),
        }

        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"images": [{"image_url": {"url": "data:image/png;base64,eA=="}}]}}]
        }))
        .unwrap();
        assert_eq!(first_image(resp).unwrap(), (b"x".to_vec(), "image/png".to_string()));
    }

    #[test]
    fn backend_needs_api_key() {
        let settings = ImageApiSettings::default();
        assert!(OpenRouterBackend::from_settings(&settings).unwrap().is_none());
    }
}
