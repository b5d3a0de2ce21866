//! Platform REST surface used for flow discovery and intent resolution.

use async_trait::async_trait;
use cxbridge_core::flow::{NluDomainRef, ResponseBias};
use cxbridge_core::nlp::IntentCandidate;
use cxbridge_core::policy::TimedOut;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{context}: {message}")]
    Request { context: &'static str, message: String },
    #[error("{context}: platform answered {status}: {body}")]
    Status { context: &'static str, status: u16, body: String },
    #[error("{context}: could not decode response: {message}")]
    Decode { context: &'static str, message: String },
    #[error(transparent)]
    TimedOut(#[from] TimedOut),
}

impl ApiError {
    pub fn request(context: &'static str, message: impl ToString) -> Self {
        Self::Request { context, message: message.to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSummary {
    pub id: String,
    pub name: String,
    pub flow_type: String,
}

/// Latest published configuration of a flow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowConfiguration {
    pub id: String,
    pub name: String,
    /// Bot flows referenced from the manifest, digital bot flows first.
    pub bot_flow_ids: Vec<String>,
    pub nlu_domain: Option<NluDomainRef>,
    pub knowledge_base_id: Option<String>,
    pub max_answers: Option<u32>,
    pub response_bias: Option<ResponseBias>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentPage {
    pub documents: Vec<KnowledgeDocument>,
    pub next_uri: Option<String>,
}

#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn find_flows(&self, name: &str) -> Result<Vec<FlowSummary>, ApiError>;

    async fn flow_configuration(&self, flow_id: &str) -> Result<FlowConfiguration, ApiError>;

    /// Ranked intents for `utterance`; an empty list means nothing matched.
    async fn detect_intents(
        &self,
        domain: &NluDomainRef,
        utterance: &str,
    ) -> Result<Vec<IntentCandidate>, ApiError>;

    /// Knowledge matches as candidates named after the document title.
    async fn search_knowledge(
        &self,
        knowledge_base_id: &str,
        query: &str,
        max_answers: u32,
    ) -> Result<Vec<IntentCandidate>, ApiError>;

    /// Value of the conversation attribute `attribute_name` for the conversation
    /// that carried `message_id`.
    async fn flow_name_for_message(
        &self,
        message_id: &str,
        attribute_name: &str,
    ) -> Result<Option<String>, ApiError>;

    /// One page of a knowledge base's documents. `cursor` is the previous page's next URI.
    async fn knowledge_documents_page(
        &self,
        knowledge_base_id: &str,
        cursor: Option<&str>,
    ) -> Result<DocumentPage, ApiError>;
}
