use std::sync::Arc;

use async_trait::async_trait;
use cxbridge_core::config::{AppConfig, ChannelKind};
use cxbridge_core::errors::ConnectorError;
use cxbridge_core::message::{MessageSink, UserMessage};
use cxbridge_messaging::{
    AttachmentUploader, BinaryUpload, ChannelSession, Delivery, EnrichmentQueue,
    HttpBinaryUpload, SessionSettings, SocketTransport, WebSocketTransport,
};
use cxbridge_nlu::{discover_bot_flows, fetch_access_token, HttpPlatformApi, NlpResolver, PlatformApi};
use secrecy::SecretString;
use tracing::{info, warn};

use crate::{already_started, not_started, Connector};

/// Web messaging over the platform's guest socket, with optional intent enrichment.
pub struct WebMessagingConnector {
    config: AppConfig,
    sink: Arc<dyn MessageSink>,
    http: reqwest::Client,
    transport: Arc<dyn SocketTransport>,
    upload: Arc<dyn BinaryUpload>,
    platform: Option<Arc<dyn PlatformApi>>,
    session: Option<ChannelSession>,
    queue: Option<Arc<EnrichmentQueue>>,
}

impl WebMessagingConnector {
    pub fn new(config: AppConfig, sink: Arc<dyn MessageSink>) -> Self {
        let http = reqwest::Client::new();
        Self {
            config,
            sink,
            upload: Arc::new(HttpBinaryUpload::new(http.clone())),
            http,
            transport: Arc::new(WebSocketTransport),
            platform: None,
            session: None,
            queue: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn SocketTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_binary_upload(mut self, upload: Arc<dyn BinaryUpload>) -> Self {
        self.upload = upload;
        self
    }

    /// Uses `platform` for flow discovery and resolution instead of fetching a token.
    pub fn with_platform_api(mut self, platform: Arc<dyn PlatformApi>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// The live session's conversation id.
    pub fn conversation_id(&self) -> Option<&str> {
        self.session.as_ref().map(ChannelSession::conversation_id)
    }

    async fn platform_api(&self) -> Result<Arc<dyn PlatformApi>, ConnectorError> {
        if let Some(platform) = &self.platform {
            return Ok(platform.clone());
        }

        let endpoints = self.config.endpoints();
        let missing = |what: &str| {
            ConnectorError::Configuration(format!(
                "no {what} endpoint found for `{}` region",
                self.config.channel.region
            ))
        };
        let api = endpoints.api.ok_or_else(|| missing("api"))?;
        let auth = endpoints.auth.ok_or_else(|| missing("auth"))?;
        let credentials = &self.config.credentials;
        let client_id = credentials.client_id.as_deref().ok_or_else(|| {
            ConnectorError::Configuration("credentials.client_id is required".to_owned())
        })?;
        let client_secret: &SecretString = credentials.client_secret.as_ref().ok_or_else(|| {
            ConnectorError::Configuration("credentials.client_secret is required".to_owned())
        })?;

        let policy = self.config.policy.call_policy();
        let token = fetch_access_token(&self.http, &auth, client_id, client_secret, &policy)
            .await
            .map_err(|error| ConnectorError::Resolution(error.to_string()))?;
        Ok(Arc::new(HttpPlatformApi::new(self.http.clone(), api, token, policy)))
    }

    async fn enrichment_queue(&self) -> Result<Arc<EnrichmentQueue>, ConnectorError> {
        let platform = self.platform_api().await?;
        let inbound_flow_name = self.config.nlp.inbound_flow_name.as_deref().unwrap_or_default();
        let flows = discover_bot_flows(platform.as_ref(), inbound_flow_name)
            .await
            .map_err(|error| ConnectorError::Resolution(error.to_string()))?;
        if flows.is_empty() {
            warn!(
                event_name = "connector.web.no_bot_flows",
                inbound_flow_name,
                "inbound flow references no usable bot flow; replies will not be enriched"
            );
        }

        let mut resolver = NlpResolver::new(platform, flows);
        if let Some(attribute) = &self.config.nlp.bot_flow_attribute_name {
            resolver = resolver.with_flow_attribute(attribute.clone());
        }
        Ok(Arc::new(EnrichmentQueue::spawn(Arc::new(resolver), self.sink.clone())))
    }
}

#[async_trait]
impl Connector for WebMessagingConnector {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebMessaging
    }

    async fn validate(&mut self) -> Result<(), ConnectorError> {
        if self.config.channel.kind != ChannelKind::WebMessaging {
            return Err(ConnectorError::Configuration(
                "channel.kind must be web_messaging for this connector".to_owned(),
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
        let websocket_endpoint = endpoints.websocket.ok_or_else(|| {
            ConnectorError::Configuration(format!(
                "no websocket address found for `{}` region",
                self.config.channel.region
            ))
        })?;
        let policy = self.config.policy.call_policy();

        let queue = if self.config.nlp.enabled { Some(self.enrichment_queue().await?) } else { None };
        let delivery = match &queue {
            Some(queue) => Delivery::Enriched(queue.clone()),
            None => Delivery::Direct(self.sink.clone()),
        };

        let session = ChannelSession::new(
            SessionSettings {
                websocket_endpoint,
                deployment_id: self.config.channel.deployment_id.clone().unwrap_or_default(),
                policy: policy.clone(),
            },
            self.transport.clone(),
            AttachmentUploader::new(self.upload.clone(), policy),
            delivery,
        );

        if let Err(error) = session.start().await {
            if let Some(queue) = &queue {
                queue.shutdown().await;
            }
            return Err(error.into());
        }

        info!(
            event_name = "connector.web.started",
            conversation_id = %session.conversation_id(),
            enrichment = queue.is_some(),
            "web messaging connector started"
        );
        self.session = Some(session);
        self.queue = queue;
        Ok(())
    }

    async fn user_says(&self, message: UserMessage) -> Result<(), ConnectorError> {
        let session = self.session.as_ref().ok_or_else(not_started)?;
        session.send_user_turn(&message).await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ConnectorError> {
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
        if let Some(queue) = self.queue.take() {
            queue.shutdown().await;
        }
        Ok(())
    }

    async fn clean(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}
