//! Consumer-facing connector lifecycle over the web and open messaging channels.

pub mod open;
pub mod web;

use std::sync::Arc;

use async_trait::async_trait;
use cxbridge_core::config::{AppConfig, ChannelKind};
use cxbridge_core::errors::ConnectorError;
use cxbridge_core::message::{MessageSink, UserMessage};

pub use open::OpenMessagingConnector;
pub use web::WebMessagingConnector;

/// Lifecycle a test harness drives: validate, build, start, any number of
/// `user_says`, then stop and clean. Replies arrive through the sink given at construction.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Checks configuration. Never touches the network.
    async fn validate(&mut self) -> Result<(), ConnectorError>;

    async fn build(&mut self) -> Result<(), ConnectorError>;

    async fn start(&mut self) -> Result<(), ConnectorError>;

    async fn user_says(&self, message: UserMessage) -> Result<(), ConnectorError>;

    async fn stop(&mut self) -> Result<(), ConnectorError>;

    async fn clean(&mut self) -> Result<(), ConnectorError>;
}

/// The connector for the configured channel kind.
pub fn connector_for(config: AppConfig, sink: Arc<dyn MessageSink>) -> Box<dyn Connector> {
    match config.channel.kind {
        ChannelKind::WebMessaging => Box::new(WebMessagingConnector::new(config, sink)),
        ChannelKind::OpenMessaging => Box::new(OpenMessagingConnector::new(config, sink)),
    }
}

fn not_started() -> ConnectorError {
    ConnectorError::Lifecycle("connector is not started".to_owned())
}

fn already_started() -> ConnectorError {
    ConnectorError::Lifecycle("connector is already started".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cxbridge_core::config::{AppConfig, ChannelKind};
    use cxbridge_core::message::BotMessage;
    use tokio::sync::mpsc;

    use super::connector_for;

    #[test]
    fn channel_kind_selects_the_connector() {
        let (sink, _replies) = mpsc::unbounded_channel::<BotMessage>();
        let sink = Arc::new(sink);

        let mut config = AppConfig::default();
        assert_eq!(connector_for(config.clone(), sink.clone()).kind(), ChannelKind::WebMessaging);

        config.channel.kind = ChannelKind::OpenMessaging;
        assert_eq!(connector_for(config, sink).kind(), ChannelKind::OpenMessaging);
    }
}
