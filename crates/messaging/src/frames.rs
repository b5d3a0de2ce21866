//! Socket frame shapes for the web messaging protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HANDSHAKE_FAILED: &str = "Websocket session is failed to configure";

/// Frames the client writes. Every frame carries the conversation token.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum ClientFrame {
    #[serde(rename = "configureSession", rename_all = "camelCase")]
    ConfigureSession { deployment_id: String, token: String },
    #[serde(rename = "onMessage")]
    OnMessage { token: String, message: OutboundMessage },
    #[serde(rename = "onAttachment", rename_all = "camelCase")]
    OnAttachment { file_name: String, file_type: String, file_size: usize, token: String },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<OutboundContent>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "contentType")]
pub enum OutboundContent {
    ButtonResponse {
        #[serde(rename = "buttonResponse")]
        button_response: ButtonResponse,
    },
    Attachment {
        attachment: AttachmentRef,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ButtonResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttachmentRef {
    pub id: String,
}

/// A frame received from the platform, with its classification fields lifted out.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(skip)]
    pub raw: Value,
}

/// Steps of the attachment upload exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadEvent {
    PresignedUrl { url: String, headers: Vec<(String, String)> },
    GenerateUrlError(String),
    Succeeded { attachment_id: String },
    Failed(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        let mut frame: ServerFrame = serde_json::from_value(raw.clone())?;
        frame.raw = raw;
        Ok(frame)
    }

    pub fn is_session_confirmed(&self) -> bool {
        self.class == "SessionResponse"
            && self.code == 200
            && self.body.get("connected").and_then(Value::as_bool) == Some(true)
    }

    pub fn is_error_response(&self) -> bool {
        self.kind == "response" && self.code >= 400
    }

    pub fn is_outbound_message(&self) -> bool {
        self.class == "StructuredMessage"
            && self.body.get("direction").and_then(Value::as_str) == Some("Outbound")
    }

    /// Body as a string when textual, otherwise its JSON rendering.
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// Reason given by a rejected session configuration.
    pub fn handshake_error(&self) -> String {
        self.body.as_str().map(str::to_owned).unwrap_or_else(|| HANDSHAKE_FAILED.to_owned())
    }

    pub fn upload_event(&self) -> Option<UploadEvent> {
        match (self.kind.as_str(), self.class.as_str()) {
            ("response", "PresignedUrlResponse") if self.code == 200 => {
                let url = self.body.get("url").and_then(Value::as_str)?.to_owned();
                let headers = self
                    .body
                    .get("headers")
                    .and_then(Value::as_object)
                    .map(|headers| {
                        headers
                            .iter()
                            .filter_map(|(name, value)| {
                                value.as_str().map(|value| (name.clone(), value.to_owned()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(UploadEvent::PresignedUrl { url, headers })
            }
            ("response", "GenerateUrlError") if self.code >= 400 => {
                Some(UploadEvent::GenerateUrlError(self.body_text()))
            }
            ("message", "UploadSuccessEvent") if self.code == 200 => {
                let attachment_id =
                    self.body.get("attachmentId").and_then(Value::as_str)?.to_owned();
                Some(UploadEvent::Succeeded { attachment_id })
            }
            ("message", "UploadFailureEvent") if self.code >= 400 => {
                Some(UploadEvent::Failed(self.body_text()))
            }
            _ => None,
        }
    }
}
