//! DNS validation phase: concurrent resolution of generated domains with
//! pending-only transactional persistence.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PhaseContext, PhaseExecutor, PhaseOutcome};
use crate::errors::{PhaseError, SchedulerError};
use crate::models::{DomainStatus, GeneratedDomain, PhaseStatus, PhaseType};
use crate::scheduler::handle::CancelSignal;
use crate::store::DnsStatusUpdate;

const PAGE_SIZE: usize = 1000;
const BATCH_SIZE: usize = 50;

/// Outcome of resolving one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    Ok,
    Error(String),
    Timeout,
}

#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, domain: &str, timeout: Duration) -> DnsOutcome;
}

/// Default resolver backed by the runtime's host lookup.
pub struct TokioDnsResolver;

#[async_trait]
impl DnsResolver for TokioDnsResolver {
    async fn resolve(&self, domain: &str, timeout: Duration) -> DnsOutcome {
        let lookup = tokio::net::lookup_host((domain, 80));
        match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(mut addrs)) => {
                if addrs.next().is_some() {
                    DnsOutcome::Ok
                } else {
                    DnsOutcome::Error("no addresses returned".to_string())
                }
            }
            Ok(Err(e)) => DnsOutcome::Error(e.to_string()),
            Err(_) => DnsOutcome::Timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_domains")]
    pub max_domains: usize,
}

fn default_concurrency() -> usize {
    25
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_domains() -> usize {
    100_000
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
            max_domains: default_max_domains(),
        }
    }
}

pub struct DnsExecutor {
    resolver: std::sync::Arc<dyn DnsResolver>,
}

impl DnsExecutor {
    pub fn new(resolver: std::sync::Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    fn load_input(&self, ctx: &PhaseContext, cap: usize) -> Result<Vec<GeneratedDomain>, PhaseError> {
        let mut input = Vec::new();
        let mut cursor = None;
        loop {
            let page = ctx.store.lock()?.list_domains_by_dns_status(
                ctx.campaign_id,
                DomainStatus::Pending,
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
impl PhaseExecutor for DnsExecutor {
    fn phase_type(&self) -> PhaseType {
        PhaseType::DnsValidation
    }

    fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError> {
        let config: DnsConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| SchedulerError::InvalidConfiguration(e.to_string()))?;
        if config.concurrency == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "concurrency must be positive".to_string(),
            ));
        }
        if config.timeout_ms == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
        let config: DnsConfig = serde_json::from_value(ctx.configuration.clone())
            .map_err(|e| PhaseError::Other(e.into()))?;
        let timeout = Duration::from_millis(config.timeout_ms);

        let input = match ctx.preloaded_input {
            Some(ref preloaded) => preloaded.clone(),
            None => self.load_input(&ctx, config.max_domains)?,
        };
        let items_total = input.len() as i64;
        if input.is_empty() {
            return Ok(PhaseOutcome::Skipped {
                reason: "no generated domains".to_string(),
            });
        }
        info!(
            campaign_id = ctx.campaign_id,
            items_total, "starting dns validation"
        );

        let mut processed = 0i64;
        for batch in input.chunks(BATCH_SIZE) {
            match ctx.cancel_state() {
                CancelSignal::User => return Err(PhaseError::CancelledByUser),
                CancelSignal::Context => {
                    return Ok(PhaseOutcome::Paused {
                        items_processed: processed,
                        items_total,
                    });
                }
                CancelSignal::Run => {}
            }

            let resolver = &self.resolver;
            let names: Vec<String> = batch.iter().map(|domain| domain.domain_name.clone()).collect();
            let outcomes: Vec<(String, DnsOutcome)> = stream::iter(names)
                .map(|name| async move {
                    let outcome = resolver.resolve(&name, timeout).await;
                    (name, outcome)
                })
                .buffer_unordered(config.concurrency)
                .collect()
                .await;

            let updates: Vec<DnsStatusUpdate> = outcomes
                .into_iter()
                .map(|(domain_name, outcome)| match outcome {
                    DnsOutcome::Ok => DnsStatusUpdate {
                        domain_name,
                        status: DomainStatus::Ok,
                        reason: None,
                    },
                    DnsOutcome::Error(reason) => DnsStatusUpdate {
                        domain_name,
                        status: DomainStatus::Error,
                        reason: Some(reason),
                    },
                    DnsOutcome::Timeout => DnsStatusUpdate {
                        domain_name,
                        status: DomainStatus::Timeout,
                        reason: Some("resolution timed out".to_string()),
                    },
                })
                .collect();

            ctx.store
                .lock()?
                .bulk_update_dns_status(ctx.campaign_id, &updates)
                .map_err(|source| PhaseError::BatchPersistFailed {
                    offset: processed,
                    source,
                })?;

            processed += batch.len() as i64;
            ctx.progress.emit(
                PhaseStatus::InProgress,
                processed,
                items_total,
                Some(format!("resolved {} of {} domains", processed, items_total)),
                None,
            );
            if let Err(e) = ctx.store.lock().and_then(|store| {
                store
                    .update_phase_progress(
                        ctx.campaign_id,
                        PhaseType::DnsValidation,
                        (processed as f64 / items_total as f64) * 100.0,
                        processed,
                        items_total,
                    )
                    .map_err(Into::into)
            }) {
                warn!(campaign_id = ctx.campaign_id, error = %e, "progress persist failed");
            }

            if let Some(delay) = ctx.inter_batch_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(PhaseOutcome::Completed {
            items_processed: processed,
            items_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults() {
        let config: DnsConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.concurrency, 25);
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn validate_rejects_zero_knobs() {
        let executor = DnsExecutor::new(std::sync::Arc::new(TokioDnsResolver));
        assert!(executor.validate(&json!({"concurrency": 0})).is_err());
        assert!(executor.validate(&json!({"timeout_ms": 0})).is_err());
        assert!(executor.validate(&json!({})).is_ok());
    }

    #[tokio::test]
    async fn resolver_times_out() {
        struct SlowResolver;
        #[async_trait]
        impl DnsResolver for SlowResolver {
            async fn resolve(&self, _domain: &str, timeout: Duration) -> DnsOutcome {
                match tokio::time::timeout(timeout, tokio::time::sleep(Duration::from_secs(60)))
                    .await
                {
                    Ok(_) => DnsOutcome::Ok,
                    Err(_) => DnsOutcome::Timeout,
                }
            }
        }
        let outcome = SlowResolver
            .resolve("slow.example.com", Duration::from_millis(10))
            .await;
        assert_eq!(outcome, DnsOutcome::Timeout);
    }
}
