use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Utterances shorter than this (in characters) never reach knowledge search.
pub const MIN_KNOWLEDGE_QUERY_CHARS: usize = 3;

pub const DEFAULT_MAX_ANSWERS: u32 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBias {
    #[default]
    Intents,
    Knowledge,
    Neutral,
}

impl std::str::FromStr for ResponseBias {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "intents" | "intent" => Ok(Self::Intents),
            "knowledge" => Ok(Self::Knowledge),
            "neutral" => Ok(Self::Neutral),
            other => Err(ConfigError::Validation(format!(
                "unsupported response bias `{other}` (expected intents|knowledge|neutral)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectionSource {
    Intents,
    Knowledge,
}

/// A bot flow as it was configured on the platform when the session started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotFlowConfig {
    pub flow_id: String,
    pub flow_name: String,
    pub nlu_domain: Option<NluDomainRef>,
    pub knowledge_base_id: Option<String>,
    pub max_answers: u32,
    pub response_bias: ResponseBias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NluDomainRef {
    pub domain_id: String,
    pub version_id: String,
}

impl BotFlowConfig {
    pub fn new(flow_id: impl Into<String>, flow_name: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            flow_name: flow_name.into(),
            nlu_domain: None,
            knowledge_base_id: None,
            max_answers: DEFAULT_MAX_ANSWERS,
            response_bias: ResponseBias::default(),
        }
    }

    pub fn with_nlu_domain(
        mut self,
        domain_id: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        self.nlu_domain =
            Some(NluDomainRef { domain_id: domain_id.into(), version_id: version_id.into() });
        self
    }

    pub fn with_knowledge_base(mut self, knowledge_base_id: impl Into<String>) -> Self {
        self.knowledge_base_id = Some(knowledge_base_id.into());
        self
    }

    pub fn with_response_bias(mut self, bias: ResponseBias) -> Self {
        self.response_bias = bias;
        self
    }

    pub fn with_max_answers(mut self, max_answers: u32) -> Self {
        self.max_answers = max_answers;
        self
    }

    /// Whether `name` refers to this flow, by name or id.
    pub fn is_named(&self, name: &str) -> bool {
        let name = name.trim();
        self.flow_name.eq_ignore_ascii_case(name) || self.flow_id == name
    }

    /// Backends to consult for `utterance`, in application order. Later sources
    /// win ties of the replacement rule only when strictly better.
    pub fn detection_order(&self, utterance: &str) -> Vec<DetectionSource> {
        let short = utterance.chars().count() < MIN_KNOWLEDGE_QUERY_CHARS;
        if self.knowledge_base_id.is_none() || short {
            return vec![DetectionSource::Intents];
        }

        match self.response_bias {
            ResponseBias::Intents => vec![DetectionSource::Intents, DetectionSource::Knowledge],
            ResponseBias::Knowledge | ResponseBias::Neutral => {
                vec![DetectionSource::Knowledge, DetectionSource::Intents]
            }
        }
    }
}
