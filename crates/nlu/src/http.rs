use async_trait::async_trait;
use cxbridge_core::flow::NluDomainRef;
use cxbridge_core::nlp::{Entity, IntentCandidate};
use cxbridge_core::policy::CallPolicy;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::api::{
    ApiError, DocumentPage, FlowConfiguration, FlowSummary, KnowledgeDocument, PlatformApi,
};

/// `PlatformApi` over the platform's REST endpoints, authenticated with a bearer token.
pub struct HttpPlatformApi {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    policy: CallPolicy,
}

impl HttpPlatformApi {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: SecretString,
        policy: CallPolicy,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url, token, policy }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T>(
        &self,
        context: &'static str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        self.policy
            .run(context, move || async move {
                let response = self
                    .client
                    .get(url)
                    .query(query)
                    .bearer_auth(self.token.expose_secret())
                    .send()
                    .await
                    .map_err(|error| ApiError::request(context, error))?;
                decode(context, response).await
            })
            .await
    }

    async fn post<T, B>(&self, context: &'static str, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.policy
            .run(context, move || async move {
                let response = self
                    .client
                    .post(url)
                    .bearer_auth(self.token.expose_secret())
                    .json(body)
                    .send()
                    .await
                    .map_err(|error| ApiError::request(context, error))?;
                decode(context, response).await
            })
            .await
    }
}

pub(crate) async fn decode<T>(
    context: &'static str,
    response: reqwest::Response,
) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { context, status: status.as_u16(), body });
    }

    response
        .json::<T>()
        .await
        .map_err(|error| ApiError::Decode { context, message: error.to_string() })
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn find_flows(&self, name: &str) -> Result<Vec<FlowSummary>, ApiError> {
        let listing: FlowListing = self
            .get(
                "Request by name for inbound message flow failed",
                &self.url("/api/v2/flows"),
                &[("name", name)],
            )
            .await?;

        Ok(listing
            .entities
            .into_iter()
            .map(|entity| FlowSummary {
                id: entity.id,
                name: entity.name,
                flow_type: entity.flow_type,
            })
            .collect())
    }

    async fn flow_configuration(&self, flow_id: &str) -> Result<FlowConfiguration, ApiError> {
        let document: FlowConfigDocument = self
            .get(
                "Request the latest configuration for flow failed",
                &self.url(&format!("/api/v2/flows/{flow_id}/latestconfiguration")),
                &[],
            )
            .await?;

        let manifest = document.manifest.unwrap_or_default();
        let bot_flow_ids = manifest
            .digital_bot_flow
            .into_iter()
            .chain(manifest.bot_flow)
            .map(|reference| reference.id)
            .collect();

        let settings = document.bot_flow_settings.unwrap_or_default();
        let nlu_domain = match (settings.nlu_domain_id, settings.nlu_domain_version_id) {
            (Some(domain_id), Some(version_id)) => Some(NluDomainRef { domain_id, version_id }),
            _ => None,
        };
        let knowledge = settings.knowledge_settings.unwrap_or_default();
        let response_bias = knowledge.response_bias.as_deref().and_then(|bias| {
            let parsed = bias.parse().ok();
            if parsed.is_none() {
                debug!(flow_id, bias, "ignoring unknown knowledge response bias");
            }
            parsed
        });

        Ok(FlowConfiguration {
            id: document.id.unwrap_or_else(|| flow_id.to_owned()),
            name: document.name.unwrap_or_default(),
            bot_flow_ids,
            nlu_domain,
            knowledge_base_id: knowledge.knowledge_base_id.filter(|id| !id.is_empty()),
            max_answers: knowledge.max_answers,
            response_bias,
        })
    }

    async fn detect_intents(
        &self,
        domain: &NluDomainRef,
        utterance: &str,
    ) -> Result<Vec<IntentCandidate>, ApiError> {
        let url = self.url(&format!(
            "/api/v2/languageunderstanding/domains/{}/versions/{}/detect",
            domain.domain_id, domain.version_id
        ));
        let body = json!({ "input": { "text": utterance } });
        let response: DetectResponse = self.post("Intent detection failed", &url, &body).await?;

        Ok(response
            .output
            .intents
            .into_iter()
            .map(|intent| IntentCandidate {
                name: intent.name,
                confidence: intent.probability,
                entities: intent
                    .entities
                    .into_iter()
                    .map(|entity| Entity {
                        name: entity.name,
                        value: entity.value.map(EntityValue::into_text).unwrap_or_default(),
                        confidence: entity.probability,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn search_knowledge(
        &self,
        knowledge_base_id: &str,
        query: &str,
        max_answers: u32,
    ) -> Result<Vec<IntentCandidate>, ApiError> {
        let url = self
            .url(&format!("/api/v2/knowledge/knowledgebases/{knowledge_base_id}/documents/search"));
        let body = json!({ "query": query, "pageSize": max_answers });
        let response: SearchResponse = self.post("Knowledge search failed", &url, &body).await?;

        Ok(response
            .results
            .into_iter()
            .map(|hit| {
                let name =
                    if hit.document.title.is_empty() { hit.document.id } else { hit.document.title };
                IntentCandidate::new(name, hit.confidence)
            })
            .collect())
    }

    async fn flow_name_for_message(
        &self,
        message_id: &str,
        attribute_name: &str,
    ) -> Result<Option<String>, ApiError> {
        let details: MessageDetails = self
            .get(
                "Request message details failed",
                &self.url(&format!("/api/v2/conversations/messages/{message_id}/details")),
                &[],
            )
            .await?;
        let Some(conversation_id) = details.conversation_id else {
            return Ok(None);
        };

        let conversation: ConversationDocument = self
            .get(
                "Request conversation failed",
                &self.url(&format!("/api/v2/conversations/{conversation_id}")),
                &[],
            )
            .await?;

        Ok(conversation.participants.into_iter().find_map(|participant| {
            participant
                .attributes
                .get(attribute_name)
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_owned)
        }))
    }

    async fn knowledge_documents_page(
        &self,
        knowledge_base_id: &str,
        cursor: Option<&str>,
    ) -> Result<DocumentPage, ApiError> {
        let url = match cursor {
            Some(next) if next.starts_with("http://") || next.starts_with("https://") => {
                next.to_owned()
            }
            Some(next) => self.url(next),
            None => self.url(&format!("/api/v2/knowledge/knowledgebases/{knowledge_base_id}/documents")),
        };
        let listing: DocumentListing =
            self.get("Request knowledge documents failed", &url, &[]).await?;

        Ok(DocumentPage {
            documents: listing.entities,
            next_uri: listing.next_uri.filter(|next| !next.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FlowListing {
    #[serde(default)]
    entities: Vec<FlowEntity>,
}

#[derive(Debug, Deserialize)]
struct FlowEntity {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    flow_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowConfigDocument {
    id: Option<String>,
    name: Option<String>,
    manifest: Option<FlowManifest>,
    bot_flow_settings: Option<BotFlowSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowManifest {
    #[serde(default)]
    digital_bot_flow: Vec<IdReference>,
    #[serde(default)]
    bot_flow: Vec<IdReference>,
}

#[derive(Debug, Deserialize)]
struct IdReference {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotFlowSettings {
    nlu_domain_id: Option<String>,
    nlu_domain_version_id: Option<String>,
    knowledge_settings: Option<KnowledgeSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeSettings {
    knowledge_base_id: Option<String>,
    max_answers: Option<u32>,
    response_bias: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    output: DetectOutput,
}

#[derive(Debug, Default, Deserialize)]
struct DetectOutput {
    #[serde(default)]
    intents: Vec<DetectedIntent>,
}

#[derive(Debug, Deserialize)]
struct DetectedIntent {
    name: String,
    #[serde(default)]
    probability: f64,
    #[serde(default)]
    entities: Vec<DetectedEntity>,
}

#[derive(Debug, Deserialize)]
struct DetectedEntity {
    name: String,
    #[serde(default)]
    probability: f64,
    value: Option<EntityValue>,
}

#[derive(Debug, Deserialize)]
struct EntityValue {
    #[serde(default)]
    resolved: Value,
    #[serde(default)]
    raw: Value,
}

impl EntityValue {
    fn into_text(self) -> String {
        let value = if self.resolved.is_null() { self.raw } else { self.resolved };
        match value {
            Value::Null => String::new(),
            Value::String(text) => text,
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    confidence: f64,
    document: KnowledgeDocument,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetails {
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationDocument {
    #[serde(default)]
    participants: Vec<Participant>,
}

#[derive(Debug, Deserialize)]
struct Participant {
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentListing {
    #[serde(default)]
    entities: Vec<KnowledgeDocument>,
    next_uri: Option<String>,
}
