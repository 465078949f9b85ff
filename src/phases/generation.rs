//! Single-shot domain discovery.
//!
//! Synthesizes candidate domains from a keyword × TLD grid, assigns dense
//! monotonic offsets, and fingerprints the configuration so the phase can
//! never run twice against the same campaign.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{PhaseContext, PhaseExecutor, PhaseOutcome};
use crate::errors::{PhaseError, SchedulerError};
use crate::models::{PhaseStatus, PhaseType};
use crate::scheduler::handle::CancelSignal;

const INSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub keywords: Vec<String>,
    pub tlds: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default = "default_max_domains")]
    pub max_domains: usize,
    #[serde(default)]
    pub offset_start: i64,
}

fn default_max_domains() -> usize {
    10_000
}

impl GenerationConfig {
    /// SHA-256 fingerprint over the canonical serialized form. Identical
    /// configurations always hash identically; field order is fixed by
    /// the struct definition.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{:x}", digest)
    }

    /// The full candidate list in deterministic grid order, capped at
    /// `max_domains`.
    pub fn candidates(&self) -> Vec<String> {
        let mut names = Vec::new();
        'outer: for keyword in &self.keywords {
            let keyword = sanitize_label(keyword);
            if keyword.is_empty() {
                continue;
            }
            let mut stems = vec![keyword.clone()];
            for prefix in &self.prefixes {
                let prefix = sanitize_label(prefix);
                if !prefix.is_empty() {
                    stems.push(format!("{}-{}", prefix, keyword));
                }
            }
            for stem in &stems {
                for tld in &self.tlds {
                    let tld = tld.trim().trim_start_matches('.').to_lowercase();
                    if tld.is_empty() {
                        continue;
                    }
                    names.push(format!("{}.{}", stem, tld));
                    if names.len() >= self.max_domains {
                        break 'outer;
                    }
                }
            }
        }
        names
    }
}

/// Lowercase, map whitespace runs to single hyphens, drop anything that
/// is not alphanumeric or a hyphen.
fn sanitize_label(raw: &str) -> String {
    let mut label = String::with_capacity(raw.len());
    let mut last_hyphen = false;
    for c in raw.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            label.push(c);
            last_hyphen = false;
        } else if (c.is_whitespace() || c == '-' || c == '_') && !last_hyphen && !label.is_empty() {
            label.push('-');
            last_hyphen = true;
        }
    }
    label.trim_end_matches('-').to_string()
}

pub struct GenerationExecutor;

#[async_trait]
impl PhaseExecutor for GenerationExecutor {
    fn phase_type(&self) -> PhaseType {
        PhaseType::DomainGeneration
    }

    fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError> {
        let config: GenerationConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| SchedulerError::InvalidConfiguration(e.to_string()))?;
        if config.keywords.iter().all(|k| sanitize_label(k).is_empty()) {
            return Err(SchedulerError::InvalidConfiguration(
                "at least one keyword is required".to_string(),
            ));
        }
        if config.tlds.is_empty() {
            return Err(SchedulerError::InvalidConfiguration(
                "at least one tld is required".to_string(),
            ));
        }
        if config.max_domains == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "max_domains must be positive".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
        let config: GenerationConfig = serde_json::from_value(ctx.configuration.clone())
            .map_err(|e| PhaseError::Other(e.into()))?;

        // Discovery is immutable: any existing domain blocks a re-run.
        let existing = ctx.store.lock()?.count_generated_domains(ctx.campaign_id)?;
        if existing > 0 {
            return Err(PhaseError::Other(anyhow::anyhow!(
                "campaign {} already has {} generated domains",
                ctx.campaign_id,
                existing
            )));
        }

        let candidates = config.candidates();
        let items_total = candidates.len() as i64;
        if candidates.is_empty() {
            return Err(PhaseError::NoResults);
        }

        let hash = config.fingerprint();
        let offset_start = config.offset_start;
        ctx.store.lock()?.set_discovery_config(
            ctx.campaign_id,
            &hash,
            offset_start,
            offset_start + items_total,
        )?;
        info!(
            campaign_id = ctx.campaign_id,
            candidates = items_total,
            config_hash = %hash,
            "starting domain generation"
        );

        let mut processed = 0i64;
        for chunk in candidates.chunks(INSERT_CHUNK) {
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

            let rows: Vec<(String, i64)> = chunk
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), offset_start + processed + i as i64))
                .collect();
            ctx.store
                .lock()?
                .insert_generated_domains(ctx.campaign_id, &rows)
                .map_err(|source| PhaseError::BatchPersistFailed {
                    offset: processed,
                    source,
                })?;
            processed += chunk.len() as i64;

            ctx.progress.emit(
                PhaseStatus::InProgress,
                processed,
                items_total,
                Some(format!("generated {} of {} domains", processed, items_total)),
                None,
            );
            if let Err(e) = ctx.store.lock().and_then(|store| {
                store
                    .update_phase_progress(
                        ctx.campaign_id,
                        PhaseType::DomainGeneration,
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
