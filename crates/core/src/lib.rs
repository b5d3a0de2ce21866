pub mod config;
pub mod errors;
pub mod flow;
pub mod logging;
pub mod message;
pub mod nlp;
pub mod policy;
pub mod region;

pub use config::{AppConfig, ChannelKind, ConfigError, ConfigOverrides, LoadOptions};
pub use errors::ConnectorError;
pub use flow::{BotFlowConfig, DetectionSource, NluDomainRef, ResponseBias};
pub use message::{BotMessage, Button, Card, Media, MessageSink, UserMessage};
pub use nlp::{
    Entity, IntentCandidate, IntentEnricher, IntentMatch, NlpResult, RankedIntent,
    ResolutionError,
};
pub use policy::{CallPolicy, TimedOut};
pub use region::Endpoints;
