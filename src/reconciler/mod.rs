//! Counter reconciliation: the safety net against lost deltas.
//!
//! On a fixed interval, compares the counters row of every campaign
//! against aggregate ground truth and overwrites drifted rows when
//! auto-correction is on. Corrections per cycle are capped to bound
//! write amplification.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::errors::StoreError;
use crate::models::DomainCounters;
use crate::store::StoreHandle;

/// What one campaign's reconciliation pass concluded.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    pub campaign_id: i64,
    /// Largest absolute field delta between counters and ground truth.
    pub max_delta: i64,
    /// `max_delta / truth.total`; zero when the campaign has no domains.
    pub drift_ratio: f64,
    pub corrected: bool,
}

pub struct Reconciler {
    store: StoreHandle,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: StoreHandle, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// One full pass over all campaigns. Returns a report per campaign
    /// whose counters drifted.
    pub fn run_once(&self) -> Result<Vec<DriftReport>, StoreError> {
        let campaign_ids = self.store.lock()?.list_campaign_ids()?;
        let mut reports = Vec::new();
        let mut corrections = 0usize;

        for campaign_id in campaign_ids {
            let (counters, truth) = {
                let store = self.store.lock()?;
                let counters = match store.get_counters(campaign_id) {
                    Ok(counters) => counters,
                    Err(StoreError::CountersNotFound { .. }) => {
                        warn!(campaign_id, "counters row missing, skipping");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let truth = store.aggregate_counters(campaign_id)?;
                (counters, truth)
            };

            let max_delta = max_field_delta(&counters, &truth);
            if max_delta == 0 {
                continue;
            }
            // A campaign with no domains cannot drift meaningfully.
            let drift_ratio = if truth.total > 0 {
                max_delta as f64 / truth.total as f64
            } else {
                0.0
            };

            let over_threshold = truth.total > 0 && drift_ratio > self.config.drift_threshold_pct;
            let mut corrected = false;
            if over_threshold && self.config.auto_correct {
                if corrections < self.config.max_corrections {
                    self.store.lock()?.overwrite_counters(&truth)?;
                    corrections += 1;
                    corrected = true;
                    info!(
                        campaign_id,
                        max_delta,
                        drift_ratio,
                        before_total = counters.total,
                        after_total = truth.total,
                        before_http_ok = counters.http_ok,
                        after_http_ok = truth.http_ok,
                        "counters corrected from ground truth"
                    );
                } else {
                    warn!(
                        campaign_id,
                        max_delta,
                        max_corrections = self.config.max_corrections,
                        "drift detected but correction budget exhausted"
                    );
                }
            } else if over_threshold {
                info!(
                    campaign_id,
                    max_delta, drift_ratio, "drift detected, auto_correct disabled"
                );
            }

            reports.push(DriftReport {
                campaign_id,
                max_delta,
                drift_ratio,
                corrected,
            });
        }
        Ok(reports)
    }

    /// Periodic loop; runs until the task is aborted or the shutdown
    /// signal resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once() {
                        Ok(reports) if !reports.is_empty() => {
                            info!(drifted = reports.len(), "reconciliation cycle finished");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

fn max_field_delta(a: &DomainCounters, b: &DomainCounters) -> i64 {
    let pairs = [
        (a.total, b.total),
        (a.dns_pending, b.dns_pending),
        (a.dns_ok, b.dns_ok),
        (a.dns_error, b.dns_error),
        (a.dns_timeout, b.dns_timeout),
        (a.http_pending, b.http_pending),
        (a.http_ok, b.http_ok),
        (a.http_error, b.http_error),
        (a.http_timeout, b.http_timeout),
        (a.lead_pending, b.lead_pending),
        (a.lead_match, b.lead_match),
        (a.lead_no_match, b.lead_no_match),
        (a.lead_error, b.lead_error),
        (a.lead_timeout, b.lead_timeout),
    ];
    pairs.iter().map(|(x, y)| (x - y).abs()).max().unwrap_or(0)
}
