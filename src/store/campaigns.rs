use rusqlite::params;

use super::Store;
use crate::errors::StoreError;
use crate::models::Campaign;

impl Store {
    pub fn create_campaign(&self, owner: &str, campaign_type: &str) -> Result<Campaign, StoreError> {
        self.conn.execute(
            "INSERT INTO campaigns (owner, campaign_type) VALUES (?1, ?2)",
            params![owner, campaign_type],
        )?;
        let id = self.conn.last_insert_rowid();
        // A fresh campaign always gets its singleton counters row.
        self.conn.execute(
            "INSERT INTO campaign_domain_counters (campaign_id) VALUES (?1)",
            params![id],
        )?;
        self.get_campaign(id)?
            .ok_or(StoreError::CampaignNotFound { id })
    }

    pub fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner, campaign_type, status, total_phases, completed_phases,
                    discovery_config_hash, discovery_offset_start, discovery_offset_end,
                    created_at, updated_at
             FROM campaigns WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(Campaign {
                id: row.get(0)?,
                owner: row.get(1)?,
                campaign_type: row.get(2)?,
                status: row.get(3)?,
                total_phases: row.get(4)?,
                completed_phases: row.get(5)?,
                discovery_config_hash: row.get(6)?,
                discovery_offset_start: row.get(7)?,
                discovery_offset_end: row.get(8)?,
                created_at: row.get(9)?,
                updated_at: row.get(10)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_campaign_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM campaigns ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn update_campaign_status(&self, id: i64, status: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE campaigns SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status, id],
        )?;
        if changed == 0 {
            return Err(StoreError::CampaignNotFound { id });
        }
        Ok(())
    }

    /// Record the discovery fingerprint and offset window. Refuses to
    /// overwrite an existing hash with a different one.
    pub fn set_discovery_config(
        &self,
        id: i64,
        config_hash: &str,
        offset_start: i64,
        offset_end: i64,
    ) -> Result<(), StoreError> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT discovery_config_hash FROM campaigns WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::CampaignNotFound { id },
                other => StoreError::Database(other),
            })?;

        if let Some(ref hash) = existing
            && hash != config_hash
        {
            return Err(StoreError::InvalidColumn {
                column: "discovery_config_hash".to_string(),
                value: config_hash.to_string(),
                message: format!("campaign {} already fingerprinted as {}", id, hash),
            });
        }

        self.conn.execute(
            "UPDATE campaigns
             SET discovery_config_hash = ?1, discovery_offset_start = ?2,
                 discovery_offset_end = ?3, updated_at = datetime('now')
             WHERE id = ?4",
            params![config_hash, offset_start, offset_end, id],
        )?;
        Ok(())
    }

    pub fn increment_completed_phases(&self, id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE campaigns SET completed_phases = completed_phases + 1,
                    updated_at = datetime('now')
             WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }
}
