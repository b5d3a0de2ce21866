//! Mapping between harness messages and platform message payloads.

use cxbridge_core::message::{BotMessage, Button, Media, UserMessage, UNKNOWN_MIME_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::frames::{AttachmentRef, ButtonResponse, OutboundContent, OutboundMessage, ServerFrame};

/// Parses a payload string that looks like serialized JSON; keeps anything else literal.
/// Blank payloads map to none.
pub fn parse_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_structured {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Some(value);
        }
    }

    Some(Value::String(raw.to_owned()))
}

fn normalize_payload(payload: Option<&Value>) -> Option<Value> {
    match payload {
        Some(Value::String(raw)) => parse_payload(raw),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.clone()),
    }
}

/// Encodes a user turn. A usable first button replaces the text entirely;
/// otherwise the text travels with one content item per uploaded attachment.
pub fn encode_user_message(message: &UserMessage, attachment_ids: &[String]) -> OutboundMessage {
    if let Some(button) = message.button_response() {
        return OutboundMessage {
            kind: "Text",
            text: None,
            content: vec![OutboundContent::ButtonResponse {
                button_response: ButtonResponse {
                    text: button.text.clone(),
                    payload: normalize_payload(button.payload.as_ref()),
                    kind: "QuickReply",
                },
            }],
        };
    }

    OutboundMessage {
        kind: "Text",
        text: message.text.clone(),
        content: attachment_ids
            .iter()
            .map(|id| OutboundContent::Attachment { attachment: AttachmentRef { id: id.clone() } })
            .collect(),
    }
}

/// Translates a structured outbound platform message. Other frames yield none.
pub fn decode_bot_message(frame: &ServerFrame) -> Option<BotMessage> {
    if !frame.is_outbound_message() {
        return None;
    }

    let body = &frame.body;
    let mut message = BotMessage {
        message_id: body.get("id").and_then(Value::as_str).map(str::to_owned),
        text: body
            .get("text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_owned),
        source: frame.raw.clone(),
        ..BotMessage::default()
    };

    let contents = body.get("content").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    for content in contents {
        match content.get("contentType").and_then(Value::as_str) {
            Some("QuickReply") => {
                let reply = content.get("quickReply").unwrap_or(&Value::Null);
                message.buttons.push(Button {
                    text: reply.get("text").and_then(Value::as_str).map(str::to_owned),
                    payload: normalize_payload(reply.get("payload")),
                });
            }
            Some("Attachment") => {
                let attachment = content.get("attachment").unwrap_or(&Value::Null);
                let uri = attachment.get("url").and_then(Value::as_str).unwrap_or_default();
                let mime = attachment
                    .get("mime")
                    .and_then(Value::as_str)
                    .filter(|mime| !mime.is_empty())
                    .unwrap_or(UNKNOWN_MIME_TYPE);
                message.media.push(Media::remote(uri, Some(mime.to_owned())));
            }
            other => {
                debug!(
                    event_name = "messaging.translate.unsupported_content",
                    content_type = other.unwrap_or("missing"),
                    message_id = message.message_id.as_deref().unwrap_or("unknown"),
                    "dropping unsupported rich content item"
                );
            }
        }
    }

    Some(message)
}
