use std::sync::Arc;

use crate::chat::Message;
use crate::error::ChatError;
use crate::models::{ChatModel, ChatRequest};

const EXTRACT_PLACES_PROMPT: &str = "You are a chatbot which is able to extract names of countries and cities from text \
and provide them back in the form of a JSON list. \
Respond only in JSON list, if no countries or cities have been found in the text, respond with an empty JSON list. \
Example text: I would like to fly to new orleans in the united states. \
Example response: [\"New Orleans\", \"United States of America\"]";

/// Asks the model which cities and countries a message mentions.
pub struct PlaceExtractor {
    model: Arc<dyn ChatModel>,
    model_name: String,
}

impl PlaceExtractor {
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self { model, model_name: model_name.into() }
    }

    /// Malformed model output yields an empty list; only a failed model call
    /// is an error.
    pub async fn extract_places(&self, text: &str) -> Result<Vec<String>, ChatError> {
        let completion = self
            .model
            .complete(ChatRequest {
                model: self.model_name.clone(),
                messages: vec![Message::system(EXTRACT_PLACES_PROMPT), Message::user(text)],
                tools: Vec::new(),
            })
            .await?;
        let raw = completion.content.unwrap_or_default();
        match parse_places(&raw) {
            Ok(places) => {
                tracing::debug!(?places, "extracted places");
                Ok(places)
            }
            Err(e) => {
                tracing::warn!(err = %e, "could not decode place list");
                Ok(Vec::new())
            }
        }
    }
}

fn parse_places(raw: &str) -> Result<Vec<String>, ChatError> {
    let places: Vec<String> = serde_json::from_str(raw.trim())
        .map_err(|e| ChatError::MalformedModelOutput(format!("{}: {:?}", e, raw)))?;
    Ok(places.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
}
