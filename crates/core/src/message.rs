//! Harness-side message shapes exchanged with the consumer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::nlp::NlpResult;

pub const UNKNOWN_MIME_TYPE: &str = "application/unknown";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub text: Option<String>,
    pub payload: Option<Value>,
}

impl Button {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), payload: None }
    }

    pub fn payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// A button the platform can act on: it has a label or a payload.
    pub fn is_actionable(&self) -> bool {
        self.text.is_some() || self.payload.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub uri: String,
    pub mime_type: Option<String>,
    /// Raw bytes for outgoing attachments; inbound media carries only the URI.
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

impl Media {
    pub fn remote(uri: impl Into<String>, mime_type: Option<String>) -> Self {
        Self { uri: uri.into(), mime_type, content: None }
    }

    pub fn attachment(uri: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self { uri: uri.into(), mime_type: Some(mime_type.into()), content: Some(content) }
    }

    /// Last path segment of the URI, used as the upload file name.
    pub fn file_name(&self) -> &str {
        let trimmed = self.uri.trim_end_matches(['/', '\\']);
        trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub text: Option<String>,
    pub buttons: Vec<Button>,
    pub media: Vec<Media>,
}

/// A user turn as the harness hands it to the connector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: Option<String>,
    pub buttons: Vec<Button>,
    pub media: Vec<Media>,
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    /// The button response this turn sends instead of its text, if any.
    pub fn button_response(&self) -> Option<&Button> {
        self.buttons.first().filter(|button| button.is_actionable())
    }
}

/// A platform reply translated for the consumer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotMessage {
    pub message_id: Option<String>,
    pub text: Option<String>,
    pub buttons: Vec<Button>,
    pub media: Vec<Media>,
    pub cards: Vec<Card>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlp: Option<NlpResult>,
    /// The frame the message was translated from.
    pub source: Value,
}

/// Receives every message a channel produces, in arrival order.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: BotMessage);

    /// Called when the channel loses its transport after it became ready.
    fn transport_failed(&self, _error: &str) {}
}

#[async_trait]
impl MessageSink for mpsc::UnboundedSender<BotMessage> {
    async fn deliver(&self, message: BotMessage) {
        if self.send(message).is_err() {
            tracing::warn!(
                event_name = "consumer.sink.closed",
                "message sink receiver dropped; discarding bot message"
            );
        }
    }
}
