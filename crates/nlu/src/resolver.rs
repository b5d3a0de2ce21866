use std::sync::Arc;

use async_trait::async_trait;
use cxbridge_core::flow::{BotFlowConfig, DetectionSource};
use cxbridge_core::nlp::{
    IntentCandidate, IntentEnricher, IntentMatch, NlpResult, RankedIntent, ResolutionError,
};
use tracing::{debug, warn};

use crate::api::PlatformApi;

/// Picks the best intent or knowledge match for an utterance across the configured bot flows.
pub struct NlpResolver {
    api: Arc<dyn PlatformApi>,
    flows: Vec<BotFlowConfig>,
    flow_attribute: Option<String>,
}

impl NlpResolver {
    pub fn new(api: Arc<dyn PlatformApi>, flows: Vec<BotFlowConfig>) -> Self {
        Self { api, flows, flow_attribute: None }
    }

    /// Conversation attribute naming the bot flow that handled a message.
    pub fn with_flow_attribute(mut self, attribute_name: impl Into<String>) -> Self {
        self.flow_attribute = Some(attribute_name.into()).filter(|name| !name.trim().is_empty());
        self
    }

    pub fn flows(&self) -> &[BotFlowConfig] {
        &self.flows
    }

    pub async fn resolve(
        &self,
        utterance: &str,
        message_id: Option<&str>,
    ) -> Result<NlpResult, ResolutionError> {
        if self.flows.is_empty() {
            warn!(
                event_name = "nlu.resolver.no_flows",
                "no bot flows configured; returning empty result"
            );
            return Ok(NlpResult::default());
        }

        let flows = self.candidate_flows(message_id).await;
        let mut best: Option<Vec<IntentCandidate>> = None;
        let mut succeeded = 0_usize;
        let mut failed = 0_usize;

        for flow in flows {
            for source in flow.detection_order(utterance) {
                let outcome = match source {
                    DetectionSource::Intents => match &flow.nlu_domain {
                        Some(domain) => self.api.detect_intents(domain, utterance).await,
                        None => continue,
                    },
                    DetectionSource::Knowledge => match &flow.knowledge_base_id {
                        Some(knowledge_base_id) => {
                            self.api
                                .search_knowledge(knowledge_base_id, utterance, flow.max_answers)
                                .await
                        }
                        None => continue,
                    },
                };

                match outcome {
                    Ok(candidates) => {
                        succeeded += 1;
                        let replaced = apply_candidates(&mut best, candidates);
                        debug!(
                            event_name = "nlu.resolver.candidates",
                            flow_id = %flow.flow_id,
                            source = ?source,
                            replaced,
                            "applied detection result"
                        );
                    }
                    Err(error) => {
                        warn!(
                            event_name = "nlu.resolver.call_failed",
                            flow_id = %flow.flow_id,
                            source = ?source,
                            error = %error,
                            "detection call failed; continuing with remaining sources"
                        );
                        failed += 1;
                    }
                }
            }
        }

        if succeeded == 0 && failed > 0 {
            warn!(
                event_name = "nlu.resolver.all_calls_failed",
                failed,
                "every detection call failed; returning empty result"
            );
            return Ok(NlpResult::default());
        }

        Ok(best.map(into_result).unwrap_or_else(NlpResult::incomprehension))
    }

    async fn candidate_flows(&self, message_id: Option<&str>) -> Vec<&BotFlowConfig> {
        let all = || self.flows.iter().collect::<Vec<_>>();
        let (Some(attribute), Some(message_id)) = (&self.flow_attribute, message_id) else {
            return all();
        };
        if self.flows.len() < 2 {
            return all();
        }

        match self.api.flow_name_for_message(message_id, attribute).await {
            Ok(Some(flow_name)) => match self.flows.iter().find(|flow| flow.is_named(&flow_name)) {
                Some(flow) => {
                    debug!(
                        event_name = "nlu.resolver.flow_affinity",
                        message_id,
                        flow_id = %flow.flow_id,
                        "restricting resolution to owning flow"
                    );
                    vec![flow]
                }
                None => {
                    debug!(message_id, flow_name = %flow_name, "owning flow is not configured");
                    all()
                }
            },
            Ok(None) => all(),
            Err(error) => {
                warn!(
                    event_name = "nlu.resolver.flow_lookup_failed",
                    message_id,
                    error = %error,
                    "could not look up owning flow; trying every flow"
                );
                all()
            }
        }
    }
}

fn top_is_sentinel(candidates: &[IntentCandidate]) -> bool {
    candidates.first().map(IntentCandidate::is_incomprehension).unwrap_or(true)
}

/// Replaces the running best with `candidates` when the best is missing or is the
/// sentinel, or when the new top is a real intent with strictly higher confidence.
fn apply_candidates(best: &mut Option<Vec<IntentCandidate>>, candidates: Vec<IntentCandidate>) -> bool {
    let candidates =
        if candidates.is_empty() { vec![IntentCandidate::incomprehension()] } else { candidates };

    let replace = match best.as_deref() {
        None => true,
        Some(current) if top_is_sentinel(current) => true,
        Some(current) => {
            !top_is_sentinel(&candidates)
                && candidates[0].confidence > current.first().map(|top| top.confidence).unwrap_or(0.0)
        }
    };

    if replace {
        *best = Some(candidates);
    }
    replace
}

fn into_result(candidates: Vec<IntentCandidate>) -> NlpResult {
    let mut candidates = candidates.into_iter();
    let Some(top) = candidates.next().filter(|top| !top.is_incomprehension()) else {
        return NlpResult::incomprehension();
    };

    NlpResult {
        intent: Some(IntentMatch {
            name: top.name,
            confidence: top.confidence,
            incomprehension: false,
            intents: candidates
                .map(|candidate| RankedIntent { name: candidate.name, confidence: candidate.confidence })
                .collect(),
        }),
        entities: top.entities,
    }
}

#[async_trait]
impl IntentEnricher for NlpResolver {
    async fn enrich(
        &self,
        utterance: &str,
        message_id: Option<&str>,
    ) -> Result<NlpResult, ResolutionError> {
        self.resolve(utterance, message_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cxbridge_core::flow::{BotFlowConfig, ResponseBias};
    use cxbridge_core::nlp::{Entity, IntentCandidate, NlpResult};

    use super::{apply_candidates, NlpResolver};
    use crate::api::ApiError;
    use crate::testing::FakePlatformApi;

    fn flow(id: &str, name: &str, domain: &str) -> BotFlowConfig {
        BotFlowConfig::new(id, name).with_nlu_domain(domain, "v1")
    }

    fn intent_of(result: &NlpResult) -> (&str, f64) {
        let intent = result.intent.as_ref().expect("intent should be set");
        (intent.name.as_str(), intent.confidence)
    }

    #[test]
    fn sentinel_is_replaced_by_anything() {
        let mut best = Some(vec![IntentCandidate::incomprehension()]);
        assert!(apply_candidates(&mut best, vec![IntentCandidate::new("Greeting", 0.2)]));
        assert!(!apply_candidates(&mut best, vec![IntentCandidate::incomprehension()]));
        assert!(!apply_candidates(&mut best, vec![IntentCandidate::new("Other", 0.2)]));
        assert!(apply_candidates(&mut best, vec![IntentCandidate::new("Other", 0.21)]));
    }

    #[test]
    fn empty_list_counts_as_sentinel() {
        let mut best = Some(vec![IntentCandidate::new("Greeting", 0.4)]);
        assert!(!apply_candidates(&mut best, Vec::new()));

        let mut empty = None;
        apply_candidates(&mut empty, Vec::new());
        assert!(empty.expect("best set")[0].is_incomprehension());
    }

    #[tokio::test]
    async fn none_then_greeting_across_two_flows() {
        let api = FakePlatformApi::default()
            .with_intents("dom-a", vec![IntentCandidate::incomprehension()])
            .with_intents(
                "dom-b",
                vec![
                    IntentCandidate::new("Greeting", 0.8).with_entity(Entity {
                        name: "salutation".to_owned(),
                        value: "hello".to_owned(),
                        confidence: 0.7,
                    }),
                    IntentCandidate::new("Goodbye", 0.1),
                ],
            );
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a"), flow("b", "Flow B", "dom-b")],
        );

        let result = resolver.resolve("hello there", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("Greeting", 0.8));
        let intent = result.intent.as_ref().expect("intent");
        assert!(!intent.incomprehension);
        assert_eq!(intent.intents.len(), 1);
        assert_eq!(intent.intents[0].name, "Goodbye");
        assert_eq!(result.entities[0].value, "hello");
    }

    #[tokio::test]
    async fn later_sentinel_does_not_override_a_match() {
        let api = FakePlatformApi::default()
            .with_intents("dom-a", vec![IntentCandidate::new("Greeting", 0.3)])
            .with_intents("dom-b", vec![IntentCandidate::incomprehension()]);
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a"), flow("b", "Flow B", "dom-b")],
        );

        let result = resolver.resolve("hello there", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("Greeting", 0.3));
    }

    #[tokio::test]
    async fn all_sentinels_yield_incomprehension_marker() {
        let api = FakePlatformApi::default()
            .with_intents("dom-a", vec![IntentCandidate::incomprehension()]);
        let resolver = NlpResolver::new(Arc::new(api), vec![flow("a", "Flow A", "dom-a")]);

        let result = resolver.resolve("qwerty", None).await.expect("resolve");
        assert_eq!(result, NlpResult::incomprehension());
    }

    #[tokio::test]
    async fn intents_bias_keeps_intent_on_tie() {
        let api = FakePlatformApi::default()
            .with_intents("dom-a", vec![IntentCandidate::new("ResetPassword", 0.7)])
            .with_knowledge("kb-a", vec![IntentCandidate::new("How to reset", 0.7)]);
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a").with_knowledge_base("kb-a")],
        );

        let result = resolver.resolve("reset my password", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("ResetPassword", 0.7));
    }

    #[tokio::test]
    async fn knowledge_bias_lets_strictly_better_intent_win() {
        let api = Arc::new(
            FakePlatformApi::default()
                .with_intents("dom-a", vec![IntentCandidate::new("ResetPassword", 0.9)])
                .with_knowledge("kb-a", vec![IntentCandidate::new("How to reset", 0.6)]),
        );
        let resolver = NlpResolver::new(
            api.clone(),
            vec![flow("a", "Flow A", "dom-a")
                .with_knowledge_base("kb-a")
                .with_response_bias(ResponseBias::Knowledge)],
        );

        let result = resolver.resolve("reset my password", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("ResetPassword", 0.9));
        assert_eq!(api.calls(), vec!["search:kb-a".to_owned(), "detect:dom-a".to_owned()]);
    }

    #[tokio::test]
    async fn neutral_bias_keeps_knowledge_on_tie() {
        let api = FakePlatformApi::default()
            .with_intents("dom-a", vec![IntentCandidate::new("ResetPassword", 0.6)])
            .with_knowledge("kb-a", vec![IntentCandidate::new("How to reset", 0.6)]);
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a")
                .with_knowledge_base("kb-a")
                .with_response_bias(ResponseBias::Neutral)],
        );

        let result = resolver.resolve("reset my password", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("How to reset", 0.6));
    }

    #[tokio::test]
    async fn short_utterance_skips_knowledge_search() {
        let api = Arc::new(
            FakePlatformApi::default()
                .with_intents("dom-a", vec![IntentCandidate::new("Greeting", 0.5)])
                .with_knowledge("kb-a", vec![IntentCandidate::new("Hi article", 0.99)]),
        );
        let resolver = NlpResolver::new(
            api.clone(),
            vec![flow("a", "Flow A", "dom-a")
                .with_knowledge_base("kb-a")
                .with_response_bias(ResponseBias::Knowledge)],
        );

        let result = resolver.resolve("hi", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("Greeting", 0.5));
        assert_eq!(api.calls(), vec!["detect:dom-a".to_owned()]);
    }

    #[tokio::test]
    async fn flow_affinity_restricts_resolution() {
        let api = Arc::new(
            FakePlatformApi::default()
                .with_intents("dom-a", vec![IntentCandidate::new("Billing", 0.95)])
                .with_intents("dom-b", vec![IntentCandidate::new("Greeting", 0.4)])
                .with_flow_name("msg-1", "flow b"),
        );
        let resolver = NlpResolver::new(
            api.clone(),
            vec![flow("a", "Flow A", "dom-a"), flow("b", "Flow B", "dom-b")],
        )
        .with_flow_attribute("botFlowName");

        let result = resolver.resolve("hello there", Some("msg-1")).await.expect("resolve");
        assert_eq!(intent_of(&result), ("Greeting", 0.4));
        assert_eq!(api.calls(), vec!["lookup:msg-1".to_owned(), "detect:dom-b".to_owned()]);
    }

    #[tokio::test]
    async fn unknown_owning_flow_falls_back_to_all_flows() {
        let api = FakePlatformApi::default()
            .with_intents("dom-a", vec![IntentCandidate::new("Billing", 0.95)])
            .with_flow_name("msg-1", "Retired Flow");
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a"), flow("b", "Flow B", "dom-b")],
        )
        .with_flow_attribute("botFlowName");

        let result = resolver.resolve("pay my bill", Some("msg-1")).await.expect("resolve");
        assert_eq!(intent_of(&result), ("Billing", 0.95));
    }

    #[tokio::test]
    async fn failing_flow_is_skipped() {
        let api = FakePlatformApi::default()
            .with_failing_intents(
                "dom-a",
                ApiError::request("Intent detection failed", "connection reset"),
            )
            .with_intents("dom-b", vec![IntentCandidate::new("Greeting", 0.6)]);
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a"), flow("b", "Flow B", "dom-b")],
        );

        let result = resolver.resolve("hello there", None).await.expect("resolve");
        assert_eq!(intent_of(&result), ("Greeting", 0.6));
    }

    #[tokio::test]
    async fn every_call_failing_yields_an_empty_result() {
        let api = FakePlatformApi::default()
            .with_failing_intents("dom-a", ApiError::request("Intent detection failed", "reset"))
            .with_failing_intents("dom-b", ApiError::request("Intent detection failed", "reset"));
        let resolver = NlpResolver::new(
            Arc::new(api),
            vec![flow("a", "Flow A", "dom-a"), flow("b", "Flow B", "dom-b")],
        );

        let result = resolver.resolve("hello there", None).await.expect("empty result");
        assert!(result.is_empty());
        assert_eq!(result, NlpResult::default());
    }

    #[tokio::test]
    async fn no_flows_yields_an_empty_result() {
        let resolver = NlpResolver::new(Arc::new(FakePlatformApi::default()), Vec::new());
        let result = resolver.resolve("hello", None).await.expect("empty result");
        assert!(result.is_empty());
    }
}
