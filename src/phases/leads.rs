//! Lead classification phase: folds enrichment output into a terminal
//! lead status per domain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PhaseContext, PhaseExecutor, PhaseOutcome};
use crate::errors::{PhaseError, SchedulerError};
use crate::models::{DomainStatus, GeneratedDomain, LeadStatus, PhaseStatus, PhaseType};
use crate::scheduler::handle::CancelSignal;
use crate::store::LeadStatusUpdate;

const PAGE_SIZE: usize = 1000;
const BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadConfig {
    /// Minimum unique keyword coverage for a `match`.
    #[serde(default = "default_min_kw_unique")]
    pub min_kw_unique: u32,
}

fn default_min_kw_unique() -> u32 {
    1
}

impl Default for LeadConfig {
    fn default() -> Self {
        Self {
            min_kw_unique: default_min_kw_unique(),
        }
    }
}

/// Pure classification rule. HTTP failures carry through; an ok fetch
/// classifies on keyword coverage and parked state.
pub fn classify_lead(domain: &GeneratedDomain, min_kw_unique: u32) -> LeadStatus {
    match domain.http_status {
        DomainStatus::Error => LeadStatus::Error,
        DomainStatus::Timeout => LeadStatus::Timeout,
        DomainStatus::Pending => LeadStatus::Pending,
        DomainStatus::Ok => {
            if domain.is_parked {
                return LeadStatus::NoMatch;
            }
            match &domain.feature_vector {
                Some(vector) if vector.kw_unique >= min_kw_unique => LeadStatus::Match,
                _ => LeadStatus::NoMatch,
            }
        }
    }
}

pub struct LeadExecutor;

#[async_trait]
impl PhaseExecutor for LeadExecutor {
    fn phase_type(&self) -> PhaseType {
        PhaseType::LeadClassification
    }

    fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError> {
        let config: LeadConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| SchedulerError::InvalidConfiguration(e.to_string()))?;
        if config.min_kw_unique == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "min_kw_unique must be positive".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
        let config: LeadConfig = serde_json::from_value(ctx.configuration.clone())
            .map_err(|e| PhaseError::Other(e.into()))?;

        // Input: every domain with a resolved HTTP outcome still awaiting
        // classification.
        let mut input = Vec::new();
        let mut cursor = None;
        loop {
            let page = ctx
                .store
                .lock()?
                .list_domains(ctx.campaign_id, cursor, PAGE_SIZE)?;
            input.extend(page.domains.into_iter().filter(|d| {
                d.lead_status == LeadStatus::Pending && d.http_status != DomainStatus::Pending
            }));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let items_total = input.len() as i64;
        if input.is_empty() {
            return Ok(PhaseOutcome::Skipped {
                reason: "no http-validated domains".to_string(),
            });
        }
        info!(
            campaign_id = ctx.campaign_id,
            items_total, "starting lead classification"
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

            let updates: Vec<LeadStatusUpdate> = batch
                .iter()
                .map(|domain| LeadStatusUpdate {
                    domain_name: domain.domain_name.clone(),
                    status: classify_lead(domain, config.min_kw_unique),
                })
                .collect();
            ctx.store
                .lock()?
                .bulk_update_lead_status(ctx.campaign_id, &updates)
                .map_err(|source| PhaseError::BatchPersistFailed {
                    offset: processed,
                    source,
                })?;

            processed += batch.len() as i64;
            ctx.progress.emit(
                PhaseStatus::InProgress,
                processed,
                items_total,
                Some(format!("classified {} of {} domains", processed, items_total)),
                None,
            );
            if let Err(e) = ctx.store.lock().and_then(|store| {
                store
                    .update_phase_progress(
                        ctx.campaign_id,
                        PhaseType::LeadClassification,
                        (processed as f64 / items_total as f64) * 100.0,
                        processed,
                        items_total,
                    )
                    .map_err(Into::into)
            }) {
                warn!(campaign_id = ctx.campaign_id, error = %e, "progress persist failed");
            }
        }

        Ok(PhaseOutcome::Completed {
            items_processed: processed,
            items_total,
        })
    }
}
