use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use cxbridge_core::config::{AppConfig, ChannelKind};
use cxbridge_core::errors::ConnectorError;
use cxbridge_core::message::{BotMessage, MessageSink, UserMessage};
use cxbridge_core::policy::{CallPolicy, TimedOut};
use cxbridge_nlu::fetch_access_token;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{already_started, not_started, Connector};

const INBOUND_OPEN_PATH: &str = "/api/v2/conversations/messages/inbound/open";
const SEND_CONTEXT: &str = "Failed to send open message";

struct OpenSession {
    conversation_id: String,
    token: SecretString,
    api_endpoint: String,
    integration_id: String,
    from: Value,
}

/// Open messaging: user turns are posted to the platform's inbound REST endpoint and
/// replies come back through the integration's webhook, handed in via [`accept_webhook`].
///
/// [`accept_webhook`]: OpenMessagingConnector::accept_webhook
pub struct OpenMessagingConnector {
    config: AppConfig,
    sink: Arc<dyn MessageSink>,
    http: reqwest::Client,
    user: Option<Value>,
    session: Option<OpenSession>,
}

impl OpenMessagingConnector {
    pub fn new(config: AppConfig, sink: Arc<dyn MessageSink>) -> Self {
        Self { config, sink, http: reqwest::Client::new(), user: None, session: None }
    }

    /// Sender identity posted as `channel.from`. Defaults to `{"id": <conversation id>}`.
    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    /// The id replies are addressed to while started.
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(|session| session.from.get("id")).and_then(Value::as_str)
    }

    /// Delivers a webhook payload if it is an outbound reply addressed to this session's user.
    /// Returns whether the payload was delivered.
    pub async fn accept_webhook(&self, payload: &Value) -> bool {
        let Some(session) = &self.session else {
            debug!("webhook payload received while connector is stopped");
            return false;
        };
        let body = payload.get("body").unwrap_or(payload);

        let recipient = body.pointer("/channel/to/id").and_then(Value::as_str);
        if recipient.is_none() || recipient != session.from.get("id").and_then(Value::as_str) {
            debug!(
                conversation_id = %session.conversation_id,
                recipient = recipient.unwrap_or("none"),
                "ignoring webhook payload for another recipient"
            );
            return false;
        }
        if body.get("direction").and_then(Value::as_str) != Some("Outbound") {
            return false;
        }

        let text = (body.get("type").and_then(Value::as_str) == Some("Text"))
            .then(|| body.get("text").and_then(Value::as_str).map(str::to_owned))
            .flatten();
        let message = BotMessage {
            message_id: body.get("id").and_then(Value::as_str).map(str::to_owned),
            text,
            source: body.clone(),
            ..BotMessage::default()
        };
        debug!(
            event_name = "connector.open.reply_received",
            conversation_id = %session.conversation_id,
            message_id = message.message_id.as_deref().unwrap_or("unknown"),
            "received open messaging reply"
        );
        self.sink.deliver(message).await;
        true
    }

    fn policy(&self) -> CallPolicy {
        self.config.policy.call_policy()
    }
}

fn send_error(message: impl ToString) -> ConnectorError {
    ConnectorError::Transport(format!("{SEND_CONTEXT}: {}", message.to_string()))
}

struct SendFailure(ConnectorError);

impl From<TimedOut> for SendFailure {
    fn from(value: TimedOut) -> Self {
        Self(send_error(value))
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(formatter)
    }
}

fn message_id() -> String {
    let mut rng = rand::thread_rng();
    (0..10).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

#[async_trait]
impl Connector for OpenMessagingConnector {
    fn kind(&self) -> ChannelKind {
        ChannelKind::OpenMessaging
    }

    async fn validate(&mut self) -> Result<(), ConnectorError> {
        if self.config.channel.kind != ChannelKind::OpenMessaging {
            return Err(ConnectorError::Configuration(
                "channel.kind must be open_messaging for this connector".to_owned(),
            ));
        }
        self.config.validate()?;
        Ok(())
    }

    async fn build(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn start(&mut self) -> Result<(), ConnectorError> {
        if self.session.is_some() {
            return Err(already_started());
        }

        let endpoints = self.config.endpoints();
        let region = &self.config.channel.region;
        let api_endpoint = endpoints.api.ok_or_else(|| {
            ConnectorError::Configuration(format!("no api endpoint found for `{region}` region"))
        })?;
        let auth_endpoint = endpoints.auth.ok_or_else(|| {
            ConnectorError::Configuration(format!("no auth endpoint found for `{region}` region"))
        })?;
        let client_id = self.config.credentials.client_id.as_deref().unwrap_or_default();
        let client_secret = self.config.credentials.client_secret.clone().ok_or_else(|| {
            ConnectorError::Configuration("credentials.client_secret is required".to_owned())
        })?;
        let integration_id =
            self.config.channel.open_messaging_integration_id.clone().unwrap_or_default();

        let token =
            fetch_access_token(&self.http, &auth_endpoint, client_id, &client_secret, &self.policy())
                .await
                .map_err(|error| ConnectorError::Transport(error.to_string()))?;

        let conversation_id = Uuid::new_v4().to_string();
        let from = self.user.clone().unwrap_or_else(|| json!({ "id": conversation_id }));
        info!(
            event_name = "connector.open.started",
            conversation_id = %conversation_id,
            integration_id = %integration_id,
            "open messaging connector started"
        );
        self.session = Some(OpenSession {
            conversation_id,
            token,
            api_endpoint: api_endpoint.trim_end_matches('/').to_owned(),
            integration_id,
            from,
        });
        Ok(())
    }

    /// Posts the turn's text. Buttons and media are not carried by this channel.
    async fn user_says(&self, message: UserMessage) -> Result<(), ConnectorError> {
        let session = self.session.as_ref().ok_or_else(not_started)?;
        if !message.buttons.is_empty() || !message.media.is_empty() {
            debug!(
                conversation_id = %session.conversation_id,
                "open messaging carries text only; dropping buttons and media"
            );
        }

        let body = json!({
            "id": session.conversation_id,
            "channel": {
                "platform": "Open",
                "type": "Private",
                "messageId": message_id(),
                "to": { "id": session.integration_id },
                "from": session.from,
                "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
            "type": "Text",
            "text": message.text.unwrap_or_default(),
            "direction": "Inbound",
        });
        let url = format!("{}{INBOUND_OPEN_PATH}", session.api_endpoint);
        let (url, body, http) = (url.as_str(), &body, &self.http);

        self.policy()
            .run(SEND_CONTEXT, move || async move {
                let response = http
                    .post(url)
                    .bearer_auth(session.token.expose_secret())
                    .json(body)
                    .send()
                    .await
                    .map_err(|error| SendFailure(send_error(error)))?;
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let text = response.text().await.unwrap_or_default();
                Err(SendFailure(send_error(format!("platform answered {status}: {text}"))))
            })
            .await
            .map_err(|SendFailure(error)| error)?;

        debug!(
            event_name = "connector.open.user_turn_sent",
            conversation_id = %session.conversation_id,
            "open messaging turn posted"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ConnectorError> {
        if let Some(session) = self.session.take() {
            info!(
                event_name = "connector.open.stopped",
                conversation_id = %session.conversation_id,
                "open messaging connector stopped"
            );
        }
        Ok(())
    }

    async fn clean(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}
