//! Platform API client, bot flow discovery and intent resolution.

pub mod api;
pub mod auth;
pub mod discovery;
pub mod http;
pub mod knowledge;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use api::{ApiError, DocumentPage, FlowConfiguration, FlowSummary, KnowledgeDocument, PlatformApi};
pub use auth::fetch_access_token;
pub use discovery::{discover_bot_flows, DiscoveryError, INBOUND_MESSAGE_FLOW_TYPE};
pub use http::HttpPlatformApi;
pub use knowledge::KnowledgeDocuments;
pub use resolver::NlpResolver;
