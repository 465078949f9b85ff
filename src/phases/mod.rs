//! Phase executors.
//!
//! | Module       | Phase                                               |
//! |--------------|-----------------------------------------------------|
//! | `generation` | Single-shot domain discovery                        |
//! | `dns`        | Batched DNS validation                              |
//! | `http`       | HTTP + keyword validation with enrichment           |
//! | `leads`      | Lead classification over enrichment output          |
//! | `stealth`    | Ordering/jitter decorator over any executor         |
//! | `taxonomy`   | Raw validator output → canonical reason mapping     |
//!
//! Executors never invoke one another; each reads the previous phase's
//! persisted output through the store.

pub mod dns;
pub mod generation;
pub mod http;
pub mod leads;
pub mod stealth;
pub mod taxonomy;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::FeatureFlags;
use crate::errors::{PhaseError, SchedulerError};
use crate::events::EventBus;
use crate::models::{GeneratedDomain, PhaseType};
use crate::scheduler::handle::{CancelSignal, ProgressEmitter};
use crate::store::StoreHandle;

/// Everything a phase executor needs for one run. Built by the scheduler;
/// all collaborators arrive by injection.
pub struct PhaseContext {
    pub campaign_id: i64,
    pub configuration: serde_json::Value,
    pub store: StoreHandle,
    pub bus: EventBus,
    pub progress: ProgressEmitter,
    pub cancel: watch::Receiver<CancelSignal>,
    pub flags: FeatureFlags,
    /// Input list already acquired (and possibly reordered) by a wrapper.
    /// When set, the executor skips its own input acquisition.
    pub preloaded_input: Option<Vec<GeneratedDomain>>,
    /// Optional delay between batches, set by a wrapping executor.
    pub inter_batch_delay: Option<Duration>,
}

impl PhaseContext {
    pub fn cancel_state(&self) -> CancelSignal {
        *self.cancel.borrow()
    }
}

/// How a run ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Completed {
        items_processed: i64,
        items_total: i64,
    },
    Skipped {
        reason: String,
    },
    Paused {
        items_processed: i64,
        items_total: i64,
    },
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    fn phase_type(&self) -> PhaseType;

    /// Reject bad configuration before anything is persisted.
    fn validate(&self, configuration: &serde_json::Value) -> Result<(), SchedulerError>;

    async fn execute(&self, ctx: PhaseContext) -> Result<PhaseOutcome, PhaseError>;
}
