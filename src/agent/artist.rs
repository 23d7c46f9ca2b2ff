use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::ChatError;
use crate::models::{ImageModel, ImageRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl GeneratedImage {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// Illustrates the places a user mentions via the image endpoint.
pub struct ImageGenerator {
    model: Arc<dyn ImageModel>,
    model_name: String,
    prompt_template: String,
    size: String,
}

impl ImageGenerator {
    pub fn new(model: Arc<dyn ImageModel>, model_name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self { model, model_name: model_name.into(), prompt_template: prompt_template.into(), size: "512x512".into() }
    }

    pub fn prompt_for(&self, places: &[String]) -> String {
        self.prompt_template.replace("{places}", &places.join(", "))
    }

    pub async fn generate_image(&self, places: &[String]) -> Result<GeneratedImage, ChatError> {
        if places.is_empty() {
            return Err(ChatError::MalformedModelOutput("no places to draw".into()));
        }
        let prompt = self.prompt_for(places);
        tracing::info!(?places, model = %self.model_name, "generating image");
        let b64 = self
            .model
            .generate(ImageRequest { model: self.model_name.clone(), prompt, size: self.size.clone() })
            .await?;
        decode_image(&b64)
    }
}

fn decode_image(b64: &str) -> Result<GeneratedImage, ChatError> {
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|e| ChatError::MalformedModelOutput(format!("image payload is not base64: {}", e)))?;
    Ok(GeneratedImage { mime: sniff_mime(&bytes), bytes })
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(&b"WEBP"[..]) {
        "image/webp"
    } else {
        "image/png"
    }
}
