//! Typed error hierarchy for the dragnet engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `SchedulerError`: phase lifecycle and precondition failures
//! - `PhaseError`: failures inside a running phase executor
//! - `StoreError`: persistence failures

use thiserror::Error;

use crate::models::{PhaseStatus, PhaseType};

/// Errors from the phase scheduler (lifecycle, preconditions, config).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Phase {phase:?} requires {blocking:?} to be completed, but it is {status:?}")]
    PreconditionNotMet {
        phase: PhaseType,
        blocking: PhaseType,
        status: PhaseStatus,
    },

    #[error("Campaign {campaign_id} already has {existing} generated domains; discovery is single-shot")]
    DiscoveryImmutable { campaign_id: i64, existing: i64 },

    #[error("Phase {phase:?} for campaign {campaign_id} has no configuration")]
    NotConfigured { campaign_id: i64, phase: PhaseType },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Campaign {campaign_id} not found")]
    CampaignNotFound { campaign_id: i64 },

    #[error("No execution in progress for campaign {campaign_id}")]
    NoActiveExecution { campaign_id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Batch persistence failed at offset {offset}: {source}")]
    BatchPersistFailed {
        offset: i64,
        #[source]
        source: StoreError,
    },

    #[error("Phase produced no results")]
    NoResults,

    #[error("cancelled by user")]
    CancelledByUser,

    #[error("Fetch primitive error: {0}")]
    Fetch(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Campaign {id} not found")]
    CampaignNotFound { id: i64 },

    #[error("Phase row ({campaign_id}, {phase:?}) not found")]
    PhaseNotFound { campaign_id: i64, phase: PhaseType },

    #[error("Counters row for campaign {campaign_id} not found")]
    CountersNotFound { campaign_id: i64 },

    #[error("Invalid column value '{value}' in {column}: {message}")]
    InvalidColumn {
        column: String,
        value: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_error_names_blocking_phase() {
        let err = SchedulerError::PreconditionNotMet {
            phase: PhaseType::HttpKeywordValidation,
            blocking: PhaseType::DnsValidation,
            status: PhaseStatus::InProgress,
        };
        let msg = err.to_string();
        assert!(msg.contains("DnsValidation"));
        assert!(msg.contains("InProgress"));
    }

    #[test]
    fn discovery_immutable_carries_counts() {
        let err = SchedulerError::DiscoveryImmutable {
            campaign_id: 7,
            existing: 120,
        };
        assert!(err.to_string().contains("120"));
        assert!(matches!(err, SchedulerError::DiscoveryImmutable { .. }));
    }

    #[test]
    fn cancelled_by_user_message_is_exact() {
        assert_eq!(PhaseError::CancelledByUser.to_string(), "cancelled by user");
    }

    #[test]
    fn store_error_converts_into_phase_error() {
        let inner = StoreError::CountersNotFound { campaign_id: 3 };
        let phase_err: PhaseError = inner.into();
        match &phase_err {
            PhaseError::Store(StoreError::CountersNotFound { campaign_id }) => {
                assert_eq!(*campaign_id, 3);
            }
            _ => panic!("Expected PhaseError::Store(CountersNotFound)"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SchedulerError::CampaignNotFound { campaign_id: 1 });
        assert_std_error(&PhaseError::NoResults);
        assert_std_error(&StoreError::LockPoisoned);
    }
}
