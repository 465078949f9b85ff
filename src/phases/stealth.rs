//! Stealth-aware decorator over the HTTP validation executor.
//!
//! When a stealth block is configured, the wrapper acquires the input
//! list itself, reorders it per the strategy, and hands it to the base
//! executor pre-loaded. The base never learns stealth exists; reordering
//! and jitter change nothing about result semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PhaseContext, PhaseExecutor, PhaseOutcome};
use crate::errors::{PhaseError, SchedulerError};
use crate::models::{DomainStatus, GeneratedDomain, PhaseType};

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealthStrategy {
    #[default]
    None,
    Shuffled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StealthConfig {
    #[serde(default)]
    pub strategy: StealthStrategy,
    /// Fixed delay inserted between batches, milliseconds.
    #[serde(default)]
    pub jitter_ms: Option<u64>,
}

/// Pull the optional `stealth` block out of a phase configuration.
fn stealth_block(configuration: &serde_json::Value) -> Result<StealthConfig, SchedulerError> {
    match configuration.get("stealth") {
        Some(block) => serde_json::from_value(block.clone())
            .map_err(|e| SchedulerError::InvalidConfiguration(format!("stealth: {}", e))),
        None => Ok(StealthConfig::default()),
    }
}

pub struct StealthAwareExecutor {
    inner: Arc<dyn PhaseExecutor>,
}

impl StealthAwareExecutor {
    pub fn new(inner: Arc<dyn PhaseExecutor>) -> Self {
        Self { inner }
    }

    fn load_input(
        &self,
        ctx: &PhaseContext,
        cap: usize,
    ) -> Result<Vec<GeneratedDomain>, PhaseError> {
        let mut input = Vec::new();
        let mut cursor = None;
        loop {
            let page = ctx.store.lock()?.list_domains_by_dns_status(
                ctx.campaign_id,
                DomainStatus::Ok,
                cursor,
                PAGE_SIZE,
            )?;
            input.extend(page.domains);
            if input.len() >= cap {
                input.truncate(cap);
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(input)
    }
}

#[async_trait]
impl PhaseExecutor for StealthAwareExecutor {
    fn phase_type(&self) -> PhaseType {
        self.inner.phase_type()
    }

    fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError> {
        stealth_block(configuration)?;
        self.inner.validate(configuration)
    }

    async fn execute(&self, mut ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
        let stealth = stealth_block(&ctx.configuration).map_err(|e| {
            PhaseError::Other(anyhow::anyhow!("invalid stealth configuration: {}", e))
        })?;

        if stealth.strategy == StealthStrategy::Shuffled && ctx.preloaded_input.is_none() {
            let cap = ctx
                .configuration
                .get("max_domains")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(10_000);
            let mut input = self.load_input(&ctx, cap)?;
            input.shuffle(&mut rand::thread_rng());
            debug!(
                campaign_id = ctx.campaign_id,
                domains = input.len(),
                "stealth shuffle applied"
            );
            ctx.preloaded_input = Some(input);
        }

        if let Some(ms) = stealth.jitter_ms
            && ms > 0
        {
            ctx.inter_batch_delay = Some(Duration::from_millis(ms));
        }

        self.inner.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_block_defaults_to_passthrough() {
        let config = stealth_block(&json!({"adhoc_keywords": ["x"]})).unwrap();
        assert_eq!(config.strategy, StealthStrategy::None);
        assert!(config.jitter_ms.is_none());
    }

    #[test]
    fn parses_shuffled_strategy() {
        let config =
            stealth_block(&json!({"stealth": {"strategy": "shuffled", "jitter_ms": 250}})).unwrap();
        assert_eq!(config.strategy, StealthStrategy::Shuffled);
        assert_eq!(config.jitter_ms, Some(250));
    }

    #[test]
    fn rejects_unknown_strategy() {
        assert!(stealth_block(&json!({"stealth": {"strategy": "quantum"}})).is_err());
    }
}
