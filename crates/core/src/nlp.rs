use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Intent name the platform reports when nothing matched.
pub const INCOMPREHENSION_INTENT: &str = "None";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub name: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
}

impl IntentCandidate {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self { name: name.into(), confidence, entities: Vec::new() }
    }

    pub fn incomprehension() -> Self {
        Self::new(INCOMPREHENSION_INTENT, 1.0)
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn is_incomprehension(&self) -> bool {
        self.name == INCOMPREHENSION_INTENT
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedIntent {
    pub name: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentMatch {
    pub name: String,
    pub confidence: f64,
    #[serde(default)]
    pub incomprehension: bool,
    /// Runner-up intents in the order the backend ranked them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<RankedIntent>,
}

/// Intent data attached to a bot message after enrichment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NlpResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
}

impl NlpResult {
    pub fn incomprehension() -> Self {
        Self {
            intent: Some(IntentMatch {
                name: INCOMPREHENSION_INTENT.to_owned(),
                confidence: 1.0,
                incomprehension: true,
                intents: Vec::new(),
            }),
            entities: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intent.is_none() && self.entities.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("intent resolution failed: {0}")]
    Backend(String),
}

/// Computes intent data for the user utterance that produced a bot reply.
#[async_trait]
pub trait IntentEnricher: Send + Sync {
    async fn enrich(
        &self,
        utterance: &str,
        message_id: Option<&str>,
    ) -> Result<NlpResult, ResolutionError>;
}
