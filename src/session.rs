use crate::chat::Message;
use crate::settings::SessionSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One browser conversation. History lives in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<Message>,
    pub settings: SessionSettings,
}

impl Session {
    pub fn new(client_id: Option<String>, settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            settings,
        }
    }

    /// Replaces the history after a completed turn.
    pub fn commit_turn(&mut self, history: Vec<Message>) {
        self.history = history;
        self.updated_at = Utc::now();
    }
}
