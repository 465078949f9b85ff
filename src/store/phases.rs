use rusqlite::{Row, params};

use super::Store;
use crate::errors::StoreError;
use crate::models::{CampaignPhase, PhaseStatus, PhaseType};

fn phase_from_row(row: &Row<'_>) -> rusqlite::Result<(CampaignPhase, String, String)> {
    let phase_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let config_raw: Option<String> = row.get(3)?;
    Ok((
        CampaignPhase {
            campaign_id: row.get(0)?,
            // Placeholders, fixed up by the caller after enum parsing.
            phase_type: PhaseType::DomainGeneration,
            status: PhaseStatus::NotStarted,
            configuration: config_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
            progress_pct: row.get(4)?,
            items_total: row.get(5)?,
            items_processed: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            last_error: row.get(9)?,
        },
        phase_raw,
        status_raw,
    ))
}

fn parse_phase_row(
    (mut phase, phase_raw, status_raw): (CampaignPhase, String, String),
) -> Result<CampaignPhase, StoreError> {
    phase.phase_type =
        PhaseType::from_str(&phase_raw).map_err(|message| StoreError::InvalidColumn {
            column: "phase_type".to_string(),
            value: phase_raw.clone(),
            message,
        })?;
    phase.status =
        PhaseStatus::from_str(&status_raw).map_err(|message| StoreError::InvalidColumn {
            column: "status".to_string(),
            value: status_raw.clone(),
            message,
        })?;
    Ok(phase)
}

const PHASE_COLUMNS: &str = "campaign_id, phase_type, status, configuration, progress_pct,
                             items_total, items_processed, started_at, completed_at, last_error";

impl Store {
    pub fn get_campaign_phase(
        &self,
        campaign_id: i64,
        phase: PhaseType,
    ) -> Result<Option<CampaignPhase>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHASE_COLUMNS} FROM campaign_phases WHERE campaign_id = ?1 AND phase_type = ?2"
        ))?;
        let mut rows = stmt.query_map(params![campaign_id, phase.as_str()], phase_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(parse_phase_row(row?)?)),
            None => Ok(None),
        }
    }

    pub fn list_campaign_phases(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<CampaignPhase>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHASE_COLUMNS} FROM campaign_phases WHERE campaign_id = ?1"
        ))?;
        let rows = stmt.query_map(params![campaign_id], phase_from_row)?;
        let mut phases = Vec::new();
        for row in rows {
            phases.push(parse_phase_row(row?)?);
        }
        // Present phases in pipeline order.
        phases.sort_by_key(|p| {
            PhaseType::ordered()
                .iter()
                .position(|t| *t == p.phase_type)
                .unwrap_or(usize::MAX)
        });
        Ok(phases)
    }

    /// Create or replace the configuration for a phase, moving it to
    /// `Configured` and resetting progress fields.
    pub fn update_phase_configuration(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        configuration: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(configuration)
            .map_err(|e| StoreError::Other(e.into()))?;
        self.conn.execute(
            "INSERT INTO campaign_phases (campaign_id, phase_type, status, configuration)
             VALUES (?1, ?2, 'configured', ?3)
             ON CONFLICT (campaign_id, phase_type) DO UPDATE SET
                 status = 'configured',
                 configuration = excluded.configuration,
                 progress_pct = 0,
                 items_total = 0,
                 items_processed = 0,
                 started_at = NULL,
                 completed_at = NULL,
                 last_error = NULL",
            params![campaign_id, phase.as_str(), raw],
        )?;
        Ok(())
    }

    /// Transition a phase to `InProgress` and stamp `started_at`.
    pub fn start_phase(&self, campaign_id: i64, phase: PhaseType) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE campaign_phases
             SET status = 'in_progress', started_at = datetime('now'),
                 completed_at = NULL, last_error = NULL,
                 progress_pct = 0, items_processed = 0
             WHERE campaign_id = ?1 AND phase_type = ?2",
            params![campaign_id, phase.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::PhaseNotFound { campaign_id, phase });
        }
        Ok(())
    }

    pub fn update_phase_progress(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        progress_pct: f64,
        items_processed: i64,
        items_total: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE campaign_phases
             SET progress_pct = ?3, items_processed = ?4, items_total = ?5
             WHERE campaign_id = ?1 AND phase_type = ?2",
            params![
                campaign_id,
                phase.as_str(),
                progress_pct,
                items_processed,
                items_total
            ],
        )?;
        Ok(())
    }

    pub fn complete_phase(&self, campaign_id: i64, phase: PhaseType) -> Result<(), StoreError> {
        self.finish_phase(campaign_id, phase, PhaseStatus::Completed, None)
    }

    pub fn fail_phase(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        error: &str,
    ) -> Result<(), StoreError> {
        self.finish_phase(campaign_id, phase, PhaseStatus::Failed, Some(error))
    }

    pub fn pause_phase(&self, campaign_id: i64, phase: PhaseType) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE campaign_phases SET status = 'paused'
             WHERE campaign_id = ?1 AND phase_type = ?2",
            params![campaign_id, phase.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::PhaseNotFound { campaign_id, phase });
        }
        Ok(())
    }

    pub fn skip_phase(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.finish_phase(campaign_id, phase, PhaseStatus::Skipped, Some(reason))
    }

    fn finish_phase(
        &self,
        campaign_id: i64,
        phase: PhaseType,
        status: PhaseStatus,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let progress = if status == PhaseStatus::Completed {
            Some(100.0)
        } else {
            None
        };
        let changed = self.conn.execute(
            "UPDATE campaign_phases
             SET status = ?3, completed_at = datetime('now'),
                 last_error = ?4,
                 progress_pct = COALESCE(?5, progress_pct)
             WHERE campaign_id = ?1 AND phase_type = ?2",
            params![campaign_id, phase.as_str(), status.as_str(), message, progress],
        )?;
        if changed == 0 {
            return Err(StoreError::PhaseNotFound { campaign_id, phase });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn campaign(store: &Store) -> i64 {
        store.create_campaign("acme", "lead_generation").unwrap().id
    }

    #[test]
    fn test_configure_creates_row() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);

        assert!(store.get_campaign_phase(id, PhaseType::DnsValidation)?.is_none());

        store.update_phase_configuration(
            id,
            PhaseType::DnsValidation,
            &json!({"concurrency": 10}),
        )?;
        let phase = store.get_campaign_phase(id, PhaseType::DnsValidation)?.unwrap();
        assert_eq!(phase.status, PhaseStatus::Configured);
        assert_eq!(phase.configuration.unwrap()["concurrency"], 10);
        assert_eq!(phase.progress_pct, 0.0);
        Ok(())
    }

    #[test]
    fn test_reconfigure_resets_progress() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);

        store.update_phase_configuration(id, PhaseType::DnsValidation, &json!({}))?;
        store.start_phase(id, PhaseType::DnsValidation)?;
        store.update_phase_progress(id, PhaseType::DnsValidation, 50.0, 5, 10)?;
        store.fail_phase(id, PhaseType::DnsValidation, "boom")?;

        store.update_phase_configuration(id, PhaseType::DnsValidation, &json!({}))?;
        let phase = store.get_campaign_phase(id, PhaseType::DnsValidation)?.unwrap();
        assert_eq!(phase.status, PhaseStatus::Configured);
        assert_eq!(phase.items_processed, 0);
        assert!(phase.last_error.is_none());
        assert!(phase.started_at.is_none());
        Ok(())
    }

    #[test]
    fn test_lifecycle_transitions() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);

        store.update_phase_configuration(id, PhaseType::HttpKeywordValidation, &json!({}))?;
        store.start_phase(id, PhaseType::HttpKeywordValidation)?;
        let phase = store
            .get_campaign_phase(id, PhaseType::HttpKeywordValidation)?
            .unwrap();
        assert_eq!(phase.status, PhaseStatus::InProgress);
        assert!(phase.started_at.is_some());

        store.complete_phase(id, PhaseType::HttpKeywordValidation)?;
        let phase = store
            .get_campaign_phase(id, PhaseType::HttpKeywordValidation)?
            .unwrap();
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert_eq!(phase.progress_pct, 100.0);
        assert!(phase.completed_at.is_some());
        Ok(())
    }

    #[test]
    fn test_fail_records_last_error() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);

        store.update_phase_configuration(id, PhaseType::DnsValidation, &json!({}))?;
        store.start_phase(id, PhaseType::DnsValidation)?;
        store.fail_phase(id, PhaseType::DnsValidation, "cancelled by user")?;

        let phase = store.get_campaign_phase(id, PhaseType::DnsValidation)?.unwrap();
        assert_eq!(phase.status, PhaseStatus::Failed);
        assert_eq!(phase.last_error.as_deref(), Some("cancelled by user"));
        Ok(())
    }

    #[test]
    fn test_skip_records_reason() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);

        store.update_phase_configuration(id, PhaseType::HttpKeywordValidation, &json!({}))?;
        store.skip_phase(id, PhaseType::HttpKeywordValidation, "no validated domains")?;

        let phase = store
            .get_campaign_phase(id, PhaseType::HttpKeywordValidation)?
            .unwrap();
        assert_eq!(phase.status, PhaseStatus::Skipped);
        assert_eq!(phase.last_error.as_deref(), Some("no validated domains"));
        Ok(())
    }

    #[test]
    fn test_start_unknown_phase_errors() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);
        let err = store.start_phase(id, PhaseType::DnsValidation);
        assert!(matches!(err, Err(StoreError::PhaseNotFound { .. })));
        Ok(())
    }

    #[test]
    fn test_list_phases_in_pipeline_order() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = campaign(&store);

        store.update_phase_configuration(id, PhaseType::HttpKeywordValidation, &json!({}))?;
        store.update_phase_configuration(id, PhaseType::DomainGeneration, &json!({}))?;
        store.update_phase_configuration(id, PhaseType::DnsValidation, &json!({}))?;

        let phases = store.list_campaign_phases(id)?;
        let order: Vec<PhaseType> = phases.iter().map(|p| p.phase_type).collect();
        assert_eq!(
            order,
            vec![
                PhaseType::DomainGeneration,
                PhaseType::DnsValidation,
                PhaseType::HttpKeywordValidation,
            ]
        );
        Ok(())
    }
}
