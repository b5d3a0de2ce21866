use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cxbridge_core::flow::NluDomainRef;
use cxbridge_core::nlp::IntentCandidate;

use crate::api::{ApiError, DocumentPage, FlowConfiguration, FlowSummary, PlatformApi};

/// Scripted platform. Unscripted detections and searches return no candidates.
#[derive(Default)]
pub(crate) struct FakePlatformApi {
    flows: Vec<FlowSummary>,
    configurations: HashMap<String, FlowConfiguration>,
    intents: HashMap<String, Result<Vec<IntentCandidate>, ApiError>>,
    knowledge: HashMap<String, Result<Vec<IntentCandidate>, ApiError>>,
    flow_names: HashMap<String, String>,
    pages: HashMap<String, DocumentPage>,
    calls: Mutex<Vec<String>>,
}

impl FakePlatformApi {
    pub(crate) fn with_flow(mut self, id: &str, name: &str, flow_type: &str) -> Self {
        self.flows.push(FlowSummary {
            id: id.to_owned(),
            name: name.to_owned(),
            flow_type: flow_type.to_owned(),
        });
        self
    }

    pub(crate) fn with_configuration(mut self, configuration: FlowConfiguration) -> Self {
        self.configurations.insert(configuration.id.clone(), configuration);
        self
    }

    pub(crate) fn with_intents(mut self, domain_id: &str, candidates: Vec<IntentCandidate>) -> Self {
        self.intents.insert(domain_id.to_owned(), Ok(candidates));
        self
    }

    pub(crate) fn with_failing_intents(mut self, domain_id: &str, error: ApiError) -> Self {
        self.intents.insert(domain_id.to_owned(), Err(error));
        self
    }

    pub(crate) fn with_knowledge(
        mut self,
        knowledge_base_id: &str,
        candidates: Vec<IntentCandidate>,
    ) -> Self {
        self.knowledge.insert(knowledge_base_id.to_owned(), Ok(candidates));
        self
    }

    pub(crate) fn with_flow_name(mut self, message_id: &str, flow_name: &str) -> Self {
        self.flow_names.insert(message_id.to_owned(), flow_name.to_owned());
        self
    }

    pub(crate) fn with_page(mut self, cursor: Option<&str>, page: DocumentPage) -> Self {
        self.pages.insert(cursor.unwrap_or_default().to_owned(), page);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

fn not_found(context: &'static str, what: &str) -> ApiError {
    ApiError::Status { context, status: 404, body: format!("{what} not found") }
}

#[async_trait]
impl PlatformApi for FakePlatformApi {
    async fn find_flows(&self, name: &str) -> Result<Vec<FlowSummary>, ApiError> {
        self.record(format!("flows:{name}"));
        Ok(self.flows.iter().filter(|flow| flow.name == name).cloned().collect())
    }

    async fn flow_configuration(&self, flow_id: &str) -> Result<FlowConfiguration, ApiError> {
        self.record(format!("configuration:{flow_id}"));
        self.configurations
            .get(flow_id)
            .cloned()
            .ok_or_else(|| not_found("Request the latest configuration for flow failed", flow_id))
    }

    async fn detect_intents(
        &self,
        domain: &NluDomainRef,
        _utterance: &str,
    ) -> Result<Vec<IntentCandidate>, ApiError> {
        self.record(format!("detect:{}", domain.domain_id));
        self.intents.get(&domain.domain_id).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn search_knowledge(
        &self,
        knowledge_base_id: &str,
        _query: &str,
        _max_answers: u32,
    ) -> Result<Vec<IntentCandidate>, ApiError> {
        self.record(format!("search:{knowledge_base_id}"));
        self.knowledge.get(knowledge_base_id).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn flow_name_for_message(
        &self,
        message_id: &str,
        _attribute_name: &str,
    ) -> Result<Option<String>, ApiError> {
        self.record(format!("lookup:{message_id}"));
        Ok(self.flow_names.get(message_id).cloned())
    }

    async fn knowledge_documents_page(
        &self,
        _knowledge_base_id: &str,
        cursor: Option<&str>,
    ) -> Result<DocumentPage, ApiError> {
        let key = cursor.unwrap_or_default();
        self.record(format!("page:{key}"));
        self.pages.get(key).cloned().ok_or_else(|| not_found("Request knowledge documents failed", key))
    }
}
