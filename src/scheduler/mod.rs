//! Phase scheduler: owns per-(campaign, phase) execution handles and the
//! persisted phase lifecycle.
//!
//! All handle transitions happen under the write lock; `get_status` reads
//! under the read lock. One background worker per active execution; the
//! progress channel belongs to that worker and closes exactly once when
//! the run finalizes.

pub mod handle;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::FeatureFlags;
use crate::errors::{PhaseError, SchedulerError};
use crate::events::{BusEvent, EventBus};
use crate::fetch::Fetcher;
use crate::keywords::KeywordScanner;
use crate::models::{PhaseProgress, PhaseStatus, PhaseType};
use crate::phases::dns::{DnsExecutor, DnsResolver};
use crate::phases::generation::GenerationExecutor;
use crate::phases::http::HttpExecutor;
use crate::phases::leads::LeadExecutor;
use crate::phases::stealth::StealthAwareExecutor;
use crate::phases::{PhaseContext, PhaseExecutor, PhaseOutcome};
use crate::scheduler::handle::{CancelSignal, ExecutionHandle, ProgressEmitter};
use crate::store::StoreHandle;

type HandleKey = (i64, PhaseType);

struct SchedulerInner {
    store: StoreHandle,
    bus: EventBus,
    flags: FeatureFlags,
    executors: HashMap<PhaseType, Arc<dyn PhaseExecutor>>,
    executions: RwLock<HashMap<HandleKey, ExecutionHandle>>,
}

/// Cheap-to-clone handle; workers carry their own clone into spawned
/// tasks.
#[derive(Clone)]
pub struct PhaseScheduler {
    inner: Arc<SchedulerInner>,
}

impl PhaseScheduler {
    /// Standard executor registry: generation, DNS, stealth-wrapped HTTP,
    /// lead classification.
    pub fn new(
        store: StoreHandle,
        bus: EventBus,
        flags: FeatureFlags,
        fetcher: Arc<dyn Fetcher>,
        resolver: Arc<dyn DnsResolver>,
        scanner: Option<Arc<dyn KeywordScanner>>,
    ) -> Self {
        let http: Arc<dyn PhaseExecutor> = Arc::new(HttpExecutor::new(fetcher, scanner));
        let executors: Vec<Arc<dyn PhaseExecutor>> = vec![
            Arc::new(GenerationExecutor),
            Arc::new(DnsExecutor::new(resolver)),
            Arc::new(StealthAwareExecutor::new(http)),
            Arc::new(LeadExecutor),
        ];
        Self::with_executors(store, bus, flags, executors)
    }

    /// Registry injection seam (tests swap in stub executors here).
    pub fn with_executors(
        store: StoreHandle,
        bus: EventBus,
        flags: FeatureFlags,
        executors: Vec<Arc<dyn PhaseExecutor>>,
    ) -> Self {
        let executors = executors
            .into_iter()
            .map(|e| (e.phase_type(), e))
            .collect();
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                bus,
                flags,
                executors,
                executions: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn executor(&self, phase: PhaseType) -> Result<Arc<dyn PhaseExecutor>, SchedulerError> {
        self.inner
            .executors
            .get(&phase)
            .cloned()
            .ok_or_else(|| {
                SchedulerError::InvalidConfiguration(format!(
                    "no executor registered for {:?}",
                    phase
                ))
            })
    }

    /// Validate a configuration without persisting anything.
    pub fn validate(
        &self,
        phase: PhaseType,
        configuration: &serde_json::Value,
    ) -> Result<(), SchedulerError> {
        self.executor(phase)?.validate(configuration)
    }

    /// Persist a phase configuration and move the phase to `Configured`.
    /// Permitted before prior phases complete; refused while a run is
    /// active.
    pub fn configure(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        configuration: &serde_json::Value,
    ) -> Result<(), SchedulerError> {
        if self.inner
            .store
            .lock()?
            .get_campaign(campaign_id)?
            .is_none()
        {
            return Err(SchedulerError::CampaignNotFound { campaign_id });
        }
        self.executor(phase)?.validate(configuration)?;

        let mut executions = self.inner
            .executions
            .write()
            .map_err(|_| SchedulerError::Store(crate::errors::StoreError::LockPoisoned))?;
        if let Some(handle) = executions.get(&(campaign_id, phase))
            && handle.status == PhaseStatus::InProgress
        {
            return Err(SchedulerError::InvalidConfiguration(
                "phase is currently running".to_string(),
            ));
        }

        self.inner.store
            .lock()?
            .update_phase_configuration(campaign_id, phase, configuration)?;
        executions.insert((campaign_id, phase), ExecutionHandle::configured(0));
        info!(campaign_id, phase = phase.as_str(), "phase configured");
        Ok(())
    }

    /// In-memory status if an execution handle exists, persisted status
    /// otherwise.
    pub fn get_status(
        &self,
        campaign_id: i64,
        phase: PhaseType,
    ) -> Result<PhaseStatus, SchedulerError> {
        {
            let executions = self.inner
                .executions
                .read()
                .map_err(|_| SchedulerError::Store(crate::errors::StoreError::LockPoisoned))?;
            if let Some(handle) = executions.get(&(campaign_id, phase)) {
                return Ok(handle.status);
            }
        }
        let row = self.inner.store.lock()?.get_campaign_phase(campaign_id, phase)?;
        Ok(row.map(|r| r.status).unwrap_or(PhaseStatus::NotStarted))
    }

    /// Cancel an active execution. The worker observes the signal at the
    /// next batch boundary and finalizes as Failed("cancelled by user").
    pub fn cancel(&self, campaign_id: i64, phase: PhaseType) -> Result<(), SchedulerError> {
        let executions = self.inner
            .executions
            .read()
            .map_err(|_| SchedulerError::Store(crate::errors::StoreError::LockPoisoned))?;
        match executions.get(&(campaign_id, phase)) {
            Some(handle) if handle.status == PhaseStatus::InProgress => {
                handle.signal_cancel(CancelSignal::User);
                info!(campaign_id, phase = phase.as_str(), "cancel requested");
                Ok(())
            }
            _ => Err(SchedulerError::NoActiveExecution { campaign_id }),
        }
    }

    /// Signal every active execution to pause (caller context going away).
    pub fn shutdown(&self) {
        if let Ok(executions) = self.inner.executions.read() {
            for handle in executions.values() {
                if handle.status == PhaseStatus::InProgress {
                    handle.signal_cancel(CancelSignal::Context);
                }
            }
        }
    }

    /// Start (or attach to) an execution, returning its progress stream.
    pub fn execute(
        &self,
        campaign_id: i64,
        phase: PhaseType,
    ) -> Result<broadcast::Receiver<PhaseProgress>, SchedulerError> {
        self.execute_inner(campaign_id, phase, false)
    }

    fn execute_inner(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        auto_started: bool,
    ) -> Result<broadcast::Receiver<PhaseProgress>, SchedulerError> {
        let executor = self.executor(phase)?;

        let mut executions = self.inner
            .executions
            .write()
            .map_err(|_| SchedulerError::Store(crate::errors::StoreError::LockPoisoned))?;

        // Re-entry on a live run attaches to the existing channel;
        // no second worker is spawned.
        if let Some(existing) = executions.get(&(campaign_id, phase))
            && existing.status == PhaseStatus::InProgress
        {
            return existing
                .subscribe()
                .ok_or(SchedulerError::NoActiveExecution { campaign_id });
        }

        let row = self.inner
            .store
            .lock()?
            .get_campaign_phase(campaign_id, phase)?
            .ok_or(SchedulerError::NotConfigured { campaign_id, phase })?;
        let configuration = row
            .configuration
            .clone()
            .ok_or(SchedulerError::NotConfigured { campaign_id, phase })?;

        self.check_preconditions(campaign_id, phase)?;

        // Fresh run: reuse the handle slot, replacing channel state. A
        // handle whose channel was already released (terminal or skipped
        // run) always gets a new one.
        let entry = executions
            .entry((campaign_id, phase))
            .or_insert_with(|| ExecutionHandle::configured(0));
        if entry.status.allows_restart() || entry.sender().is_none() {
            entry.release_progress();
            entry.reset_for_restart();
        } else {
            entry.status = PhaseStatus::InProgress;
        }
        let receiver = entry
            .subscribe()
            .ok_or(SchedulerError::NoActiveExecution { campaign_id })?;
        let sender = entry.sender();
        let cancel = entry.cancel_receiver();
        drop(executions);

        if let Err(e) = self.inner
            .store
            .lock()
            .and_then(|s| s.start_phase(campaign_id, phase).map_err(Into::into))
        {
            // No worker was spawned; put the handle back into a startable
            // state before surfacing the error.
            if let Ok(mut executions) = self.inner.executions.write()
                && let Some(handle) = executions.get_mut(&(campaign_id, phase))
            {
                handle.status = PhaseStatus::Configured;
            }
            return Err(e.into());
        }

        let event = if auto_started {
            BusEvent::PhaseAutoStarted {
                campaign_id,
                phase,
                message: format!("{} started", phase.as_str()),
                correlation_id: None,
            }
        } else {
            BusEvent::PhaseStarted {
                campaign_id,
                phase,
                message: format!("{} started", phase.as_str()),
                correlation_id: None,
            }
        };
        self.inner.bus.publish(event);

        let ctx = PhaseContext {
            campaign_id,
            configuration,
            store: self.inner.store.clone(),
            bus: self.inner.bus.clone(),
            progress: ProgressEmitter::new(phase, sender.clone()),
            cancel,
            flags: self.inner.flags,
            preloaded_input: None,
            inter_batch_delay: None,
        };

        let scheduler = self.clone();
        let emitter = ProgressEmitter::new(phase, sender);
        tokio::spawn(async move {
            let outcome = executor.execute(ctx).await;
            scheduler.finalize(campaign_id, phase, outcome, emitter).await;
        });

        Ok(receiver)
    }

    fn check_preconditions(&self, campaign_id: i64, phase: PhaseType) -> Result<(), SchedulerError> {
        if phase == PhaseType::DomainGeneration {
            let existing = self.inner.store.lock()?.count_generated_domains(campaign_id)?;
            if existing > 0 {
                return Err(SchedulerError::DiscoveryImmutable {
                    campaign_id,
                    existing,
                });
            }
        }
        if let Some(blocking) = phase.predecessor() {
            let status = self.inner
                .store
                .lock()?
                .get_campaign_phase(campaign_id, blocking)?
                .map(|row| row.status)
                .unwrap_or(PhaseStatus::NotStarted);
            if status != PhaseStatus::Completed {
                return Err(SchedulerError::PreconditionNotMet {
                    phase,
                    blocking,
                    status,
                });
            }
        }
        Ok(())
    }

    /// Persist the terminal state, emit the final progress event, publish
    /// phase lifecycle events, and release the progress channel.
    async fn finalize(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        outcome: Result<PhaseOutcome, PhaseError>,
        emitter: ProgressEmitter,
    ) {
        let (status, message, error_text, processed, total) = match &outcome {
            Ok(PhaseOutcome::Completed {
                items_processed,
                items_total,
            }) => (
                PhaseStatus::Completed,
                Some(format!("{} completed", phase.as_str())),
                None,
                *items_processed,
                *items_total,
            ),
            Ok(PhaseOutcome::Skipped { reason }) => {
                (PhaseStatus::Skipped, Some(reason.clone()), None, 0, 0)
            }
            Ok(PhaseOutcome::Paused {
                items_processed,
                items_total,
            }) => (
                PhaseStatus::Paused,
                Some("paused".to_string()),
                None,
                *items_processed,
                *items_total,
            ),
            Err(e) => {
                let text = e.to_string();
                (PhaseStatus::Failed, None, Some(text), 0, 0)
            }
        };

        // Terminal persistence is best-effort; a store hiccup here must
        // not leave the worker wedged.
        let persisted = self.inner.store.lock().map_err(Into::into).and_then(|store| {
            match status {
                PhaseStatus::Completed => store.complete_phase(campaign_id, phase),
                PhaseStatus::Skipped => store.skip_phase(
                    campaign_id,
                    phase,
                    message.as_deref().unwrap_or("skipped"),
                ),
                PhaseStatus::Paused => store.pause_phase(campaign_id, phase),
                _ => store.fail_phase(
                    campaign_id,
                    phase,
                    error_text.as_deref().unwrap_or("failed"),
                ),
            }
        });
        if let Err(e) = persisted {
            error!(campaign_id, phase = phase.as_str(), error = %e,
                   "failed to persist terminal phase state");
        }
        if status == PhaseStatus::Completed
            && let Err(e) = self.inner
                .store
                .lock()
                .and_then(|s| s.increment_completed_phases(campaign_id).map_err(Into::into))
        {
            warn!(campaign_id, error = %e, "failed to bump completed_phases");
        }

        emitter.emit(status, processed, total, message.clone(), error_text.clone());

        match status {
            PhaseStatus::Completed | PhaseStatus::Skipped => {
                self.inner.bus.publish(BusEvent::PhaseCompleted {
                    campaign_id,
                    phase,
                    results: serde_json::json!({
                        "status": status.as_str(),
                        "progress_pct": if status == PhaseStatus::Completed { 100.0 } else { 0.0 },
                        "items_processed": processed,
                        "items_total": total,
                    }),
                    correlation_id: None,
                });
                self.publish_campaign_progress(campaign_id);
            }
            PhaseStatus::Failed => {
                self.inner.bus.publish(BusEvent::PhaseFailed {
                    campaign_id,
                    phase,
                    error: error_text.clone().unwrap_or_default(),
                    correlation_id: None,
                });
            }
            _ => {}
        }

        // Transition the handle and release the channel exactly once.
        if let Ok(mut executions) = self.inner.executions.write()
            && let Some(handle) = executions.get_mut(&(campaign_id, phase))
        {
            handle.status = status;
            handle.release_progress();
        }

        info!(campaign_id, phase = phase.as_str(), status = status.as_str(),
              items_processed = processed, "phase finalized");

        // Chain into the next configured phase.
        if status == PhaseStatus::Completed {
            self.auto_start_next(campaign_id, phase);
        }
    }

    fn auto_start_next(&self, campaign_id: i64, completed: PhaseType) {
        let ordered = PhaseType::ordered();
        let next = ordered
            .iter()
            .position(|p| *p == completed)
            .and_then(|i| ordered.get(i + 1).copied());
        let Some(next) = next else {
            return;
        };

        let configured = self.inner
            .store
            .lock()
            .ok()
            .and_then(|s| s.get_campaign_phase(campaign_id, next).ok().flatten())
            .map(|row| row.status == PhaseStatus::Configured)
            .unwrap_or(false);
        if !configured {
            return;
        }

        match self.execute_inner(campaign_id, next, true) {
            Ok(_) => info!(campaign_id, phase = next.as_str(), "auto-started next phase"),
            Err(e) => warn!(campaign_id, phase = next.as_str(), error = %e,
                            "auto-start skipped"),
        }
    }

    fn publish_campaign_progress(&self, campaign_id: i64) {
        let Ok(store) = self.inner.store.lock() else {
            return;
        };
        let Ok(Some(campaign)) = store.get_campaign(campaign_id) else {
            return;
        };
        self.inner.bus.publish(BusEvent::CampaignProgress {
            campaign_id,
            progress: serde_json::json!({
                "completed_phases": campaign.completed_phases,
                "total_phases": campaign.total_phases,
                "status": campaign.status,
            }),
            correlation_id: None,
        });
    }

    /// Run epoch of the current handle, if any. Attaching to a live run
    /// keeps the epoch; a fresh run bumps it.
    pub fn execution_epoch(&self, campaign_id: i64, phase: PhaseType) -> Option<u64> {
        self.inner.executions
            .read()
            .ok()?
            .get(&(campaign_id, phase))
            .map(|h| h.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::store::Store;

    /// Executor that waits for cancellation or a short deadline.
    struct SlowExecutor {
        phase: PhaseType,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PhaseExecutor for SlowExecutor {
        fn phase_type(&self) -> PhaseType {
            self.phase
        }

        fn validate(&self, _configuration: &serde_json::Value) -> Result<(), SchedulerError> {
            Ok(())
        }

        async fn execute(&self, ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            for i in 0..50 {
                match ctx.cancel_state() {
                    CancelSignal::User => return Err(PhaseError::CancelledByUser),
                    CancelSignal::Context => {
                        return Ok(PhaseOutcome::Paused {
                            items_processed: i,
                            items_total: 50,
                        });
                    }
                    CancelSignal::Run => {}
                }
                ctx.progress
                    .emit(PhaseStatus::InProgress, i + 1, 50, None, None);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(PhaseOutcome::Completed {
                items_processed: 50,
                items_total: 50,
            })
        }
    }

    struct InstantExecutor {
        phase: PhaseType,
    }

    #[async_trait]
    impl PhaseExecutor for InstantExecutor {
        fn phase_type(&self) -> PhaseType {
            self.phase
        }

        fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError> {
            if configuration.get("bad").is_some() {
                return Err(SchedulerError::InvalidConfiguration("bad".to_string()));
            }
            Ok(())
        }

        async fn execute(&self, _ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError> {
            Ok(PhaseOutcome::Completed {
                items_processed: 1,
                items_total: 1,
            })
        }
    }

    fn scheduler_with(executors: Vec<Arc<dyn PhaseExecutor>>) -> (Arc<PhaseScheduler>, i64) {
        let store = StoreHandle::new(Store::open_in_memory().unwrap());
        let campaign_id = store
            .lock()
            .unwrap()
            .create_campaign("acme", "lead_generation")
            .unwrap()
            .id;
        let scheduler = Arc::new(PhaseScheduler::with_executors(
            store,
            EventBus::new(),
            FeatureFlags::default(),
            executors,
        ));
        (scheduler, campaign_id)
    }

    async fn wait_for_status(
        scheduler: &Arc<PhaseScheduler>,
        campaign_id: i64,
        phase: PhaseType,
        wanted: PhaseStatus,
    ) {
        for _ in 0..200 {
            if scheduler.get_status(campaign_id, phase).unwrap() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "status never became {:?}, still {:?}",
            wanted,
            scheduler.get_status(campaign_id, phase).unwrap()
        );
    }

    #[tokio::test]
    async fn configure_then_execute_completes() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::DomainGeneration,
        })]);
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();
        assert_eq!(
            scheduler
                .get_status(campaign_id, PhaseType::DomainGeneration)
                .unwrap(),
            PhaseStatus::Configured
        );

        let _rx = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        wait_for_status(
            &scheduler,
            campaign_id,
            PhaseType::DomainGeneration,
            PhaseStatus::Completed,
        )
        .await;

        let row = scheduler.inner
            .store
            .lock()
            .unwrap()
            .get_campaign_phase(campaign_id, PhaseType::DomainGeneration)
            .unwrap()
            .unwrap();
        assert_eq!(row.status, PhaseStatus::Completed);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn execute_without_configure_is_rejected() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::DnsValidation,
        })]);
        let err = scheduler
            .execute(campaign_id, PhaseType::DnsValidation)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn configure_rejects_invalid_payload() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::DnsValidation,
        })]);
        let err = scheduler
            .configure(campaign_id, PhaseType::DnsValidation, &json!({"bad": true}))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn http_requires_completed_dns() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::HttpKeywordValidation,
        })]);
        scheduler
            .configure(campaign_id, PhaseType::HttpKeywordValidation, &json!({}))
            .unwrap();

        let err = scheduler
            .execute(campaign_id, PhaseType::HttpKeywordValidation)
            .unwrap_err();
        match err {
            SchedulerError::PreconditionNotMet {
                blocking, status, ..
            } => {
                assert_eq!(blocking, PhaseType::DnsValidation);
                assert_eq!(status, PhaseStatus::NotStarted);
            }
            other => panic!("expected PreconditionNotMet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn discovery_is_single_shot() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::DomainGeneration,
        })]);
        scheduler.inner
            .store
            .lock()
            .unwrap()
            .insert_generated_domains(campaign_id, &[("a.example.com".into(), 0)])
            .unwrap();
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();

        let err = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::DiscoveryImmutable { existing: 1, .. }
        ));
        assert_eq!(
            scheduler.inner
                .store
                .lock()
                .unwrap()
                .count_generated_domains(campaign_id)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn reentry_attaches_to_live_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(SlowExecutor {
            phase: PhaseType::DomainGeneration,
            runs: runs.clone(),
        })]);
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();

        let _rx1 = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        let epoch1 = scheduler
            .execution_epoch(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        let _rx2 = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        let epoch2 = scheduler
            .execution_epoch(campaign_id, PhaseType::DomainGeneration)
            .unwrap();

        // Same run: the epoch did not advance and only one worker exists.
        assert_eq!(epoch1, epoch2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        scheduler
            .cancel(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        wait_for_status(
            &scheduler,
            campaign_id,
            PhaseType::DomainGeneration,
            PhaseStatus::Failed,
        )
        .await;
    }

    #[tokio::test]
    async fn cancel_marks_failed_with_message() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(SlowExecutor {
            phase: PhaseType::DomainGeneration,
            runs,
        })]);
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();
        let _rx = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler
            .cancel(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        wait_for_status(
            &scheduler,
            campaign_id,
            PhaseType::DomainGeneration,
            PhaseStatus::Failed,
        )
        .await;

        let row = scheduler.inner
            .store
            .lock()
            .unwrap()
            .get_campaign_phase(campaign_id, PhaseType::DomainGeneration)
            .unwrap()
            .unwrap();
        assert_eq!(row.last_error.as_deref(), Some("cancelled by user"));
    }

    #[tokio::test]
    async fn shutdown_pauses_active_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(SlowExecutor {
            phase: PhaseType::DomainGeneration,
            runs,
        })]);
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();
        let _rx = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.shutdown();
        wait_for_status(
            &scheduler,
            campaign_id,
            PhaseType::DomainGeneration,
            PhaseStatus::Paused,
        )
        .await;
    }

    #[tokio::test]
    async fn restart_after_failure_bumps_epoch() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(SlowExecutor {
            phase: PhaseType::DomainGeneration,
            runs: runs.clone(),
        })]);
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();
        let _rx = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler
            .cancel(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        wait_for_status(
            &scheduler,
            campaign_id,
            PhaseType::DomainGeneration,
            PhaseStatus::Failed,
        )
        .await;
        let epoch_before = scheduler
            .execution_epoch(campaign_id, PhaseType::DomainGeneration)
            .unwrap();

        let _rx = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        let epoch_after = scheduler
            .execution_epoch(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
        assert_eq!(epoch_after, epoch_before + 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        scheduler
            .cancel(campaign_id, PhaseType::DomainGeneration)
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_without_active_run_errors() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::DomainGeneration,
        })]);
        let err = scheduler
            .cancel(campaign_id, PhaseType::DomainGeneration)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoActiveExecution { .. }));
    }

    #[tokio::test]
    async fn progress_stream_closes_after_completion() {
        let (scheduler, campaign_id) = scheduler_with(vec![Arc::new(InstantExecutor {
            phase: PhaseType::DomainGeneration,
        })]);
        scheduler
            .configure(campaign_id, PhaseType::DomainGeneration, &json!({}))
            .unwrap();
        let mut rx = scheduler
            .execute(campaign_id, PhaseType::DomainGeneration)
            .unwrap();

        // Drain until the channel closes; the last observed event is the
        // terminal one.
        let mut last = None;
        loop {
            match rx.recv().await {
                Ok(event) => last = Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        let last = last.expect("expected at least one progress event");
        assert_eq!(last.status, PhaseStatus::Completed);
    }
}
