//! HTTP + keyword validation phase.
//!
//! Pages validated-DNS domains in offset order, fans out batched fetches,
//! enriches successful results into feature vectors, persists outcomes
//! through the pending-only transactional bulk update, and streams batch
//! samples to the event bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::taxonomy;
use super::{PhaseContext, PhaseExecutor, PhaseOutcome};
use crate::config::FeatureFlags;
use crate::enrich;
use crate::errors::{PhaseError, SchedulerError};
use crate::events::{
    BatchSample, BusEvent, DeltaItem, EnrichmentSample, new_correlation_id,
};
use crate::fetch::{FetchResult, Fetcher};
use crate::keywords::KeywordScanner;
use crate::models::{
    DomainStatus, FeatureVector, GeneratedDomain, HttpKeywordParams, Persona, PhaseStatus,
    PhaseType, Proxy,
};
use crate::scheduler::handle::CancelSignal;
use crate::store::{HttpStatusUpdate, StoreHandle};

const PAGE_SIZE: usize = 1000;
const BATCH_SIZE: usize = 50;
const FETCH_CONCURRENCY: usize = 25;

/// Phase configuration JSON. Also the fallback source for persona
/// resolution when no canonical params row exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpPhaseConfig {
    #[serde(default)]
    pub persona_ids: Vec<String>,
    #[serde(default)]
    pub proxy_ids: Vec<String>,
    #[serde(default)]
    pub keyword_set_ids: Vec<i64>,
    #[serde(default)]
    pub adhoc_keywords: Vec<String>,
    #[serde(default = "default_max_domains")]
    pub max_domains: usize,
    /// Per-phase overrides of the process-wide feature flags.
    #[serde(default)]
    pub enrichment: Option<bool>,
    #[serde(default)]
    pub microcrawl: Option<bool>,
}

fn default_max_domains() -> usize {
    10_000
}

impl HttpPhaseConfig {
    fn effective_flags(&self, base: &FeatureFlags) -> FeatureFlags {
        FeatureFlags {
            enrichment: self.enrichment.unwrap_or(base.enrichment),
            microcrawl: self.microcrawl.unwrap_or(base.microcrawl),
            ..*base
        }
    }
}

pub struct HttpExecutor {
    fetcher: Arc<dyn Fetcher>,
    scanner: Option<Arc<dyn KeywordScanner>>,
}

impl HttpExecutor {
    pub fn new(fetcher: Arc<dyn Fetcher>, scanner: Option<Arc<dyn KeywordScanner>>) -> Self {
        Self { fetcher, scanner }
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

/// Resolve the fetch profile in priority order: canonical params row,
/// then phase configuration, then nothing (fetcher defaults apply).
pub fn resolve_persona_proxy(
    store: &StoreHandle,
    campaign_id: i64,
    config: &HttpPhaseConfig,
) -> Result<(Option<Persona>, Option<Proxy>), PhaseError> {
    let guard = store.lock()?;

    if let Some(params) = guard.get_http_keyword_params(campaign_id)? {
        let persona = params
            .persona_ids
            .first()
            .and_then(|id| guard.get_persona(id).ok().flatten());
        let proxy = resolve_proxy(&guard, &params)?;
        return Ok((persona, proxy));
    }

    // Fallback: persona straight from the phase configuration JSON.
    let persona = config
        .persona_ids
        .first()
        .and_then(|id| guard.get_persona(id).ok().flatten());
    Ok((persona, None))
}

fn resolve_proxy(
    store: &crate::store::Store,
    params: &HttpKeywordParams,
) -> Result<Option<Proxy>, PhaseError> {
    // Explicit proxy preference wins.
    if let Some(id) = params.proxy_ids.first()
        && let Some(proxy) = store.get_proxy(id)?
    {
        return Ok(Some(proxy));
    }
    // First enabled+healthy proxy linked to the campaign's personas.
    let linked = store.list_proxies_by_personas(&params.persona_ids)?;
    if let Some(proxy) = linked.iter().find(|p| p.enabled && p.healthy) {
        return Ok(Some(proxy.clone()));
    }
    // Otherwise the first enabled+healthy proxy anywhere.
    let all = store.list_proxies()?;
    Ok(all.into_iter().find(|p| p.enabled && p.healthy))
}

#[async_trait]
impl PhaseExecutor for HttpExecutor {
    fn phase_type(&self) -> PhaseType {
        PhaseType::HttpKeywordValidation
    }

    fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError> {
        let config: HttpPhaseConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| SchedulerError::InvalidConfiguration(e.to_string()))?;
        if config.keyword_set_ids.is_empty() && config.adhoc_keywords.is_empty() {
            return Err(SchedulerError::InvalidConfiguration(
                "at least one keyword set or ad-hoc keyword is required".to_string(),
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
        let config: HttpPhaseConfig = serde_json::from_value(ctx.configuration.clone())
            .map_err(|e| PhaseError::Other(e.into()))?;
        let flags = config.effective_flags(&ctx.flags);

        let (persona, proxy) = resolve_persona_proxy(&ctx.store, ctx.campaign_id, &config)?;
        debug!(
            campaign_id = ctx.campaign_id,
            persona = persona.as_ref().map(|p| p.id.as_str()),
            proxy = proxy.as_ref().map(|p| p.id.as_str()),
            "resolved fetch profile"
        );

        let input = match ctx.preloaded_input {
            Some(ref preloaded) => preloaded.clone(),
            None => self.load_input(&ctx, config.max_domains)?,
        };
        let items_total = input.len() as i64;
        if input.is_empty() {
            return Ok(PhaseOutcome::Skipped {
                reason: "no validated domains".to_string(),
            });
        }
        info!(
            campaign_id = ctx.campaign_id,
            items_total,
            enrichment = flags.enrichment,
            microcrawl = flags.microcrawl,
            "starting http validation"
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

            let names: Vec<String> = batch.iter().map(|d| d.domain_name.clone()).collect();
            let mut results = self
                .fetcher
                .fetch_bulk(&names, FETCH_CONCURRENCY, persona.as_ref(), proxy.as_ref())
                .await;

            // A fetcher may drop domains; synthesize errors so no row is
            // left pending.
            let returned: HashMap<&str, ()> =
                results.iter().map(|r| (r.domain.as_str(), ())).collect();
            let missing: Vec<FetchResult> = names
                .iter()
                .filter(|name| !returned.contains_key(name.as_str()))
                .map(|name| FetchResult {
                    domain: name.clone(),
                    status: "FetchError".to_string(),
                    error: "no result returned".to_string(),
                    ..Default::default()
                })
                .collect();
            results.extend(missing);

            // Enrichment before persistence so parked/vector state rides
            // the same batch boundary.
            let mut vectors: Vec<(String, FeatureVector)> = Vec::new();
            if flags.enrichment
                && let Some(ref scanner) = self.scanner
            {
                for result in results.iter().filter(|r| taxonomy::classify(r).0 == DomainStatus::Ok)
                {
                    let vector = enrich::build_feature_vector(
                        result,
                        scanner.as_ref(),
                        self.fetcher.as_ref(),
                        &config.keyword_set_ids,
                        &config.adhoc_keywords,
                        &flags,
                    )
                    .await;
                    vectors.push((result.domain.clone(), vector));
                }
            }

            let updates: Vec<HttpStatusUpdate> = results
                .iter()
                .map(|result| {
                    let (status, reason) = taxonomy::classify(result);
                    HttpStatusUpdate {
                        domain_name: result.domain.clone(),
                        status,
                        status_code: (result.status_code != 0).then_some(result.status_code),
                        reason,
                    }
                })
                .collect();

            let deltas = ctx
                .store
                .lock()?
                .bulk_update_http_status(ctx.campaign_id, &updates)
                .map_err(|source| PhaseError::BatchPersistFailed {
                    offset: processed,
                    source,
                })?;
            debug!(
                campaign_id = ctx.campaign_id,
                written = deltas.total,
                ok = deltas.ok,
                error = deltas.error,
                timeout = deltas.timeout,
                "batch persisted"
            );

            for (domain, vector) in &vectors {
                if let Err(e) = ctx
                    .store
                    .lock()
                    .and_then(|mut s| s.upsert_enrichment(ctx.campaign_id, domain, vector))
                {
                    warn!(campaign_id = ctx.campaign_id, domain = %domain, error = %e,
                          "enrichment upsert failed");
                }
            }

            processed += batch.len() as i64;
            self.publish_batch_events(&ctx, &flags, &updates, &vectors);

            ctx.progress.emit(
                PhaseStatus::InProgress,
                processed,
                items_total,
                Some(format!("validated {} of {} domains", processed, items_total)),
                None,
            );
            if let Err(e) = ctx.store.lock().and_then(|store| {
                store
                    .update_phase_progress(
                        ctx.campaign_id,
                        PhaseType::HttpKeywordValidation,
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

impl HttpExecutor {
    /// One correlation id stitches the batch's three event kinds together.
    fn publish_batch_events(
        &self,
        ctx: &PhaseContext,
        flags: &FeatureFlags,
        updates: &[HttpStatusUpdate],
        vectors: &[(String, FeatureVector)],
    ) {
        let correlation_id = new_correlation_id();

        let sample: Vec<BatchSample> = updates
            .iter()
            .map(|u| BatchSample {
                domain: u.domain_name.clone(),
                status: u.status.as_str().to_string(),
                reason: u.reason.map(|r| r.as_str().to_string()),
            })
            .collect();
        ctx.bus.publish(BusEvent::HttpBatchValidated {
            campaign_id: ctx.campaign_id,
            count: updates.len(),
            sample,
            correlation_id: correlation_id.clone(),
        });

        if !vectors.is_empty() {
            let sample: Vec<EnrichmentSample> = vectors
                .iter()
                .map(|(domain, v)| EnrichmentSample {
                    domain: domain.clone(),
                    kw_unique: v.kw_unique,
                    parked_confidence: v.parked_confidence,
                    is_parked: v.is_parked,
                    microcrawl_planned: v.microcrawl.is_some(),
                })
                .collect();
            ctx.bus.publish(BusEvent::HttpEnrichment {
                campaign_id: ctx.campaign_id,
                count: vectors.len(),
                sample,
                microcrawl: flags.microcrawl,
                micro_max_pages: flags.microcrawl_max_pages,
                micro_byte_budget: flags.microcrawl_byte_budget,
                correlation_id: correlation_id.clone(),
            });
        }

        let items: Vec<DeltaItem> = updates
            .iter()
            .map(|u| DeltaItem {
                domain: u.domain_name.clone(),
                http_status: u.status.as_str().to_string(),
                http_reason: u.reason.map(|r| r.as_str().to_string()),
            })
            .collect();
        ctx.bus.publish(BusEvent::DomainStatusDelta {
            campaign_id: ctx.campaign_id,
            phase: PhaseType::HttpKeywordValidation,
            count: updates.len(),
            items,
            correlation_id,
        });
    }
}
