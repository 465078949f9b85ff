//! In-memory execution handles: one per (campaign, phase) run.
//!
//! The handle owns the progress channel and the cancel signal. Progress
//! sends never block; the channel closes exactly once when the worker
//! finalizes and the handle releases its sender.

use chrono::Utc;
use tokio::sync::{broadcast, watch};

use crate::models::{PhaseProgress, PhaseStatus, PhaseType};

/// Bounded progress channel capacity per execution.
pub const PROGRESS_CAPACITY: usize = 100;

/// Cooperative cancellation state observed by workers between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSignal {
    /// Keep going.
    Run,
    /// Explicit user cancel; terminal state is Failed("cancelled by user").
    User,
    /// Caller context went away; terminal state is Paused.
    Context,
}

/// Execution state for one (campaign, phase) pair.
pub struct ExecutionHandle {
    pub status: PhaseStatus,
    /// Monotonic run counter; a fresh run bumps it, an attach does not.
    pub epoch: u64,
    progress_tx: Option<broadcast::Sender<PhaseProgress>>,
    cancel_tx: watch::Sender<CancelSignal>,
}

impl ExecutionHandle {
    /// Fresh handle in `Configured` state with a new progress channel.
    pub fn configured(epoch: u64) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CAPACITY);
        let (cancel_tx, _) = watch::channel(CancelSignal::Run);
        Self {
            status: PhaseStatus::Configured,
            epoch,
            progress_tx: Some(progress_tx),
            cancel_tx,
        }
    }

    /// Subscribe to this execution's progress stream.
    /// `None` once the channel has been released.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<PhaseProgress>> {
        self.progress_tx.as_ref().map(|tx| tx.subscribe())
    }

    /// Sender clone for the worker task.
    pub fn sender(&self) -> Option<broadcast::Sender<PhaseProgress>> {
        self.progress_tx.clone()
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<CancelSignal> {
        self.cancel_tx.subscribe()
    }

    /// Signal the worker. Later signals do not downgrade a User cancel.
    pub fn signal_cancel(&self, signal: CancelSignal) {
        let current = *self.cancel_tx.borrow();
        if current == CancelSignal::User {
            return;
        }
        let _ = self.cancel_tx.send(signal);
    }

    /// Release the progress sender so the channel can close. Idempotent.
    pub fn release_progress(&mut self) {
        self.progress_tx = None;
    }

    /// Replace channel state for a fresh run after a terminal status.
    pub fn reset_for_restart(&mut self) {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CAPACITY);
        let (cancel_tx, _) = watch::channel(CancelSignal::Run);
        self.progress_tx = Some(progress_tx);
        self.cancel_tx = cancel_tx;
        self.epoch += 1;
        self.status = PhaseStatus::InProgress;
    }
}

/// Worker-side progress emitter. Sends are non-blocking; a full buffer
/// drops the event rather than stalling the batch loop.
#[derive(Clone)]
pub struct ProgressEmitter {
    phase: PhaseType,
    tx: Option<broadcast::Sender<PhaseProgress>>,
}

impl ProgressEmitter {
    pub fn new(phase: PhaseType, tx: Option<broadcast::Sender<PhaseProgress>>) -> Self {
        Self { phase, tx }
    }

    /// Emitter that drops everything (for executors run outside the
    /// scheduler, e.g. in tests).
    pub fn sink(phase: PhaseType) -> Self {
        Self { phase, tx: None }
    }

    pub fn emit(
        &self,
        status: PhaseStatus,
        items_processed: i64,
        items_total: i64,
        message: Option<String>,
        error: Option<String>,
    ) {
        let progress_pct = if items_total > 0 {
            (items_processed as f64 / items_total as f64) * 100.0
        } else {
            0.0
        };
        let event = PhaseProgress {
            phase: self.phase,
            status,
            progress_pct,
            items_processed,
            items_total,
            message,
            error,
            timestamp: Utc::now(),
        };
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }
}
