use cxbridge_core::flow::{BotFlowConfig, DEFAULT_MAX_ANSWERS};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, PlatformApi};

pub const INBOUND_MESSAGE_FLOW_TYPE: &str = "INBOUNDSHORTMESSAGE";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("inbound message flow not found by `{0}` name")]
    InboundFlowNotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Resolves the bot flows an inbound message flow hands conversations to.
///
/// Flows without an NLU domain or a knowledge base cannot resolve anything and are skipped.
pub async fn discover_bot_flows(
    api: &dyn PlatformApi,
    inbound_flow_name: &str,
) -> Result<Vec<BotFlowConfig>, DiscoveryError> {
    let inbound = api
        .find_flows(inbound_flow_name)
        .await?
        .into_iter()
        .find(|flow| flow.flow_type == INBOUND_MESSAGE_FLOW_TYPE)
        .ok_or_else(|| DiscoveryError::InboundFlowNotFound(inbound_flow_name.to_owned()))?;

    let inbound_config = api.flow_configuration(&inbound.id).await?;
    let mut flows = Vec::with_capacity(inbound_config.bot_flow_ids.len());

    for bot_flow_id in &inbound_config.bot_flow_ids {
        let config = api.flow_configuration(bot_flow_id).await?;
        if config.nlu_domain.is_none() && config.knowledge_base_id.is_none() {
            warn!(
                event_name = "nlu.discovery.flow_skipped",
                flow_id = %config.id,
                flow_name = %config.name,
                "bot flow has neither nlu domain nor knowledge base"
            );
            continue;
        }

        let mut flow = BotFlowConfig::new(config.id, config.name)
            .with_max_answers(config.max_answers.unwrap_or(DEFAULT_MAX_ANSWERS));
        if let Some(domain) = config.nlu_domain {
            flow = flow.with_nlu_domain(domain.domain_id, domain.version_id);
        }
        if let Some(knowledge_base_id) = config.knowledge_base_id {
            flow = flow.with_knowledge_base(knowledge_base_id);
        }
        if let Some(bias) = config.response_bias {
            flow = flow.with_response_bias(bias);
        }
        flows.push(flow);
    }

    info!(
        event_name = "nlu.discovery.completed",
        inbound_flow_id = %inbound.id,
        bot_flows = flows.len(),
        "bot flow configuration discovered"
    );
    Ok(flows)
}
