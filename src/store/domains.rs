use rusqlite::{Row, params};

use super::Store;
use crate::errors::StoreError;
use crate::models::{
    DomainStatus, ExtractionFeatureRow, FeatureVector, GeneratedDomain, HttpReason, LeadStatus,
};

/// One page of a cursor-paginated domain listing.
#[derive(Debug)]
pub struct DomainPage {
    pub domains: Vec<GeneratedDomain>,
    /// Cursor to pass to the next call; `None` when the listing is drained.
    pub next_cursor: Option<i64>,
}

/// Per-domain outcome applied by the DNS bulk update.
#[derive(Debug, Clone)]
pub struct DnsStatusUpdate {
    pub domain_name: String,
    pub status: DomainStatus,
    pub reason: Option<String>,
}

/// Per-domain outcome applied by the HTTP bulk update.
#[derive(Debug, Clone)]
pub struct HttpStatusUpdate {
    pub domain_name: String,
    pub status: DomainStatus,
    pub status_code: Option<i64>,
    pub reason: Option<HttpReason>,
}

/// Per-domain outcome applied by the lead-classification bulk update.
#[derive(Debug, Clone)]
pub struct LeadStatusUpdate {
    pub domain_name: String,
    pub status: LeadStatus,
}

/// Counter deltas derived from rows actually transitioned out of `pending`
/// within one transaction. `total` is the number of rows written, not the
/// batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusDeltas {
    pub total: i64,
    pub ok: i64,
    pub error: i64,
    pub timeout: i64,
}

fn domain_from_row(row: &Row<'_>) -> rusqlite::Result<GeneratedDomain> {
    let dns_raw: String = row.get(4)?;
    let http_raw: String = row.get(6)?;
    let lead_raw: String = row.get(10)?;
    let fv_raw: Option<String> = row.get(11)?;
    Ok(GeneratedDomain {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        domain_name: row.get(2)?,
        offset_index: row.get(3)?,
        dns_status: DomainStatus::from_str(&dns_raw).unwrap_or(DomainStatus::Pending),
        dns_reason: row.get(5)?,
        http_status: DomainStatus::from_str(&http_raw).unwrap_or(DomainStatus::Pending),
        http_status_code: row.get(7)?,
        http_reason: row.get(8)?,
        last_validated_at: row.get(9)?,
        lead_status: LeadStatus::from_str(&lead_raw).unwrap_or(LeadStatus::Pending),
        feature_vector: fv_raw.and_then(|raw| serde_json::from_str::<FeatureVector>(&raw).ok()),
        parked_confidence: row.get(12)?,
        is_parked: row.get::<_, i64>(13)? != 0,
        last_http_fetched_at: row.get(14)?,
    })
}

const DOMAIN_COLUMNS: &str = "id, campaign_id, domain_name, offset_index, dns_status, dns_reason,
                              http_status, http_status_code, http_reason, last_validated_at,
                              lead_status, feature_vector, parked_confidence, is_parked,
                              last_http_fetched_at";

impl Store {
    /// Insert a batch of freshly generated domains and bump the counters
    /// row inside the same transaction (total plus the three pending
    /// quadrants).
    pub fn insert_generated_domains(
        &mut self,
        campaign_id: i64,
        domains: &[(String, i64)],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO generated_domains (campaign_id, domain_name, offset_index)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (name, offset) in domains {
                inserted += stmt.execute(params![campaign_id, name, offset])?;
            }
        }
        let n = inserted as i64;
        tx.execute(
            "UPDATE campaign_domain_counters
             SET total = total + ?1,
                 dns_pending = dns_pending + ?1,
                 http_pending = http_pending + ?1,
                 lead_pending = lead_pending + ?1,
                 updated_at = datetime('now')
             WHERE campaign_id = ?2",
            params![n, campaign_id],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    pub fn count_generated_domains(&self, campaign_id: i64) -> Result<i64, StoreError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM generated_domains WHERE campaign_id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_domain(
        &self,
        campaign_id: i64,
        domain_name: &str,
    ) -> Result<Option<GeneratedDomain>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM generated_domains
             WHERE campaign_id = ?1 AND domain_name = ?2"
        ))?;
        let mut rows = stmt.query_map(params![campaign_id, domain_name], domain_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Cursor-paginated listing of domains filtered by DNS status, ordered
    /// by `offset_index` ASC. Pass the previous page's `next_cursor` to
    /// continue; `None` starts from the beginning.
    pub fn list_domains_by_dns_status(
        &self,
        campaign_id: i64,
        dns_status: DomainStatus,
        cursor: Option<i64>,
        page_size: usize,
    ) -> Result<DomainPage, StoreError> {
        let after = cursor.unwrap_or(i64::MIN);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM generated_domains
             WHERE campaign_id = ?1 AND dns_status = ?2 AND offset_index > ?3
             ORDER BY offset_index ASC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![campaign_id, dns_status.as_str(), after, page_size as i64],
            domain_from_row,
        )?;
        let mut domains = Vec::new();
        for row in rows {
            domains.push(row?);
        }
        let next_cursor = if domains.len() == page_size {
            domains.last().map(|d| d.offset_index)
        } else {
            None
        };
        Ok(DomainPage {
            domains,
            next_cursor,
        })
    }

    /// Listing of all domains for a campaign in offset order (generation
    /// output for the DNS phase).
    pub fn list_domains(
        &self,
        campaign_id: i64,
        cursor: Option<i64>,
        page_size: usize,
    ) -> Result<DomainPage, StoreError> {
        let after = cursor.unwrap_or(i64::MIN);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM generated_domains
             WHERE campaign_id = ?1 AND offset_index > ?2
             ORDER BY offset_index ASC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![campaign_id, after, page_size as i64], domain_from_row)?;
        let mut domains = Vec::new();
        for row in rows {
            domains.push(row?);
        }
        let next_cursor = if domains.len() == page_size {
            domains.last().map(|d| d.offset_index)
        } else {
            None
        };
        Ok(DomainPage {
            domains,
            next_cursor,
        })
    }

    /// Transactional pending-only bulk update of DNS outcomes.
    ///
    /// Each row is written only while `dns_status = 'pending'`; the counter
    /// delta is derived from the statuses RETURNING actually reported, so
    /// replaying a batch is observationally a no-op.
    pub fn bulk_update_dns_status(
        &mut self,
        campaign_id: i64,
        updates: &[DnsStatusUpdate],
    ) -> Result<StatusDeltas, StoreError> {
        let tx = self.conn.transaction()?;
        let mut deltas = StatusDeltas::default();
        {
            let mut stmt = tx.prepare(
                "UPDATE generated_domains
                 SET dns_status = ?3, dns_reason = ?4, last_validated_at = datetime('now')
                 WHERE campaign_id = ?1 AND domain_name = ?2 AND dns_status = 'pending'
                 RETURNING dns_status",
            )?;
            for update in updates {
                let mut rows = stmt.query(params![
                    campaign_id,
                    update.domain_name,
                    update.status.as_str(),
                    update.reason,
                ])?;
                while let Some(row) = rows.next()? {
                    let written: String = row.get(0)?;
                    tally(&mut deltas, &written);
                }
            }
        }
        tx.execute(
            "UPDATE campaign_domain_counters
             SET dns_pending = dns_pending - ?1,
                 dns_ok = dns_ok + ?2,
                 dns_error = dns_error + ?3,
                 dns_timeout = dns_timeout + ?4,
                 updated_at = datetime('now')
             WHERE campaign_id = ?5",
            params![deltas.total, deltas.ok, deltas.error, deltas.timeout, campaign_id],
        )?;
        tx.commit()?;
        Ok(deltas)
    }

    /// Transactional pending-only bulk update of HTTP outcomes. Same
    /// idempotence contract as [`Store::bulk_update_dns_status`].
    pub fn bulk_update_http_status(
        &mut self,
        campaign_id: i64,
        updates: &[HttpStatusUpdate],
    ) -> Result<StatusDeltas, StoreError> {
        let tx = self.conn.transaction()?;
        let mut deltas = StatusDeltas::default();
        {
            let mut stmt = tx.prepare(
                "UPDATE generated_domains
                 SET http_status = ?3, http_status_code = ?4, http_reason = ?5,
                     last_validated_at = datetime('now')
                 WHERE campaign_id = ?1 AND domain_name = ?2 AND http_status = 'pending'
                 RETURNING http_status",
            )?;
            for update in updates {
                let mut rows = stmt.query(params![
                    campaign_id,
                    update.domain_name,
                    update.status.as_str(),
                    update.status_code,
                    update.reason.map(|r| r.as_str()),
                ])?;
                while let Some(row) = rows.next()? {
                    let written: String = row.get(0)?;
                    tally(&mut deltas, &written);
                }
            }
        }
        tx.execute(
            "UPDATE campaign_domain_counters
             SET http_pending = http_pending - ?1,
                 http_ok = http_ok + ?2,
                 http_error = http_error + ?3,
                 http_timeout = http_timeout + ?4,
                 updated_at = datetime('now')
             WHERE campaign_id = ?5",
            params![deltas.total, deltas.ok, deltas.error, deltas.timeout, campaign_id],
        )?;
        tx.commit()?;
        Ok(deltas)
    }

    /// Transactional pending-only bulk update of lead classification.
    /// Returns (written, match, no_match, error, timeout) as deltas folded
    /// into the lead counter quadruple.
    pub fn bulk_update_lead_status(
        &mut self,
        campaign_id: i64,
        updates: &[LeadStatusUpdate],
    ) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        let (mut written, mut matched, mut no_match, mut errored, mut timed_out) =
            (0i64, 0i64, 0i64, 0i64, 0i64);
        {
            let mut stmt = tx.prepare(
                "UPDATE generated_domains
                 SET lead_status = ?3
                 WHERE campaign_id = ?1 AND domain_name = ?2 AND lead_status = 'pending'
                 RETURNING lead_status",
            )?;
            for update in updates {
                let mut rows = stmt.query(params![
                    campaign_id,
                    update.domain_name,
                    update.status.as_str(),
                ])?;
                while let Some(row) = rows.next()? {
                    let status: String = row.get(0)?;
                    written += 1;
                    match status.as_str() {
                        "match" => matched += 1,
                        "no_match" => no_match += 1,
                        "error" => errored += 1,
                        "timeout" => timed_out += 1,
                        _ => {}
                    }
                }
            }
        }
        tx.execute(
            "UPDATE campaign_domain_counters
             SET lead_pending = lead_pending - ?1,
                 lead_match = lead_match + ?2,
                 lead_no_match = lead_no_match + ?3,
                 lead_error = lead_error + ?4,
                 lead_timeout = lead_timeout + ?5,
                 updated_at = datetime('now')
             WHERE campaign_id = ?6",
            params![written, matched, no_match, errored, timed_out, campaign_id],
        )?;
        tx.commit()?;
        Ok(written)
    }

    /// Best-effort enrichment upsert: feature vector JSON, fetch timestamp,
    /// parked confidence (COALESCEd so a missing new value keeps the old),
    /// and `is_parked` latched true once set. Also refreshes the
    /// analysis-ready projection row.
    pub fn upsert_enrichment(
        &mut self,
        campaign_id: i64,
        domain_name: &str,
        vector: &FeatureVector,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(vector).map_err(|e| StoreError::Other(e.into()))?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE generated_domains
             SET feature_vector = ?3,
                 last_http_fetched_at = ?4,
                 parked_confidence = COALESCE(?5, parked_confidence),
                 is_parked = MAX(is_parked, ?6)
             WHERE campaign_id = ?1 AND domain_name = ?2",
            params![
                campaign_id,
                domain_name,
                raw,
                vector.fetched_at,
                Some(vector.parked_confidence),
                vector.is_parked as i64,
            ],
        )?;
        tx.execute(
            "INSERT INTO extraction_features
                 (campaign_id, domain_name, kw_unique, kw_hits_total, parked_confidence,
                  is_parked, language, content_bytes, microcrawl_used, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
             ON CONFLICT (campaign_id, domain_name) DO UPDATE SET
                 kw_unique = excluded.kw_unique,
                 kw_hits_total = excluded.kw_hits_total,
                 parked_confidence = excluded.parked_confidence,
                 is_parked = MAX(extraction_features.is_parked, excluded.is_parked),
                 language = excluded.language,
                 content_bytes = excluded.content_bytes,
                 microcrawl_used = excluded.microcrawl_used,
                 updated_at = excluded.updated_at",
            params![
                campaign_id,
                domain_name,
                vector.kw_unique,
                vector.kw_hits_total,
                vector.parked_confidence,
                vector.is_parked as i64,
                vector.language,
                vector.content_bytes,
                vector.microcrawl.as_ref().map(|m| m.used).unwrap_or(false) as i64,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_extraction_feature_row(
        &self,
        campaign_id: i64,
        domain_name: &str,
    ) -> Result<Option<ExtractionFeatureRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT campaign_id, domain_name, kw_unique, kw_hits_total, parked_confidence,
                    is_parked, language, content_bytes, microcrawl_used, updated_at
             FROM extraction_features WHERE campaign_id = ?1 AND domain_name = ?2",
        )?;
        let mut rows = stmt.query_map(params![campaign_id, domain_name], |row| {
            Ok(ExtractionFeatureRow {
                campaign_id: row.get(0)?,
                domain_name: row.get(1)?,
                kw_unique: row.get(2)?,
                kw_hits_total: row.get(3)?,
                parked_confidence: row.get(4)?,
                is_parked: row.get::<_, i64>(5)? != 0,
                language: row.get(6)?,
                content_bytes: row.get(7)?,
                microcrawl_used: row.get::<_, i64>(8)? != 0,
                updated_at: row.get(9)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

fn tally(deltas: &mut StatusDeltas, written: &str) {
    deltas.total += 1;
    match written {
        "ok" => deltas.ok += 1,
        "error" => deltas.error += 1,
        "timeout" => deltas.timeout += 1,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(store: &mut Store, n: i64) -> i64 {
        let campaign = store.create_campaign("acme", "lead_generation").unwrap();
        let domains: Vec<(String, i64)> = (0..n)
            .map(|i| (format!("d{}.example.com", i), i))
            .collect();
        store.insert_generated_domains(campaign.id, &domains).unwrap();
        campaign.id
    }

    #[test]
    fn test_insert_updates_counters() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 4);

        let counters = store.get_counters(id)?;
        assert_eq!(counters.total, 4);
        assert_eq!(counters.dns_pending, 4);
        assert_eq!(counters.http_pending, 4);
        assert_eq!(counters.lead_pending, 4);
        Ok(())
    }

    #[test]
    fn test_insert_is_duplicate_safe() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 2);

        let inserted = store.insert_generated_domains(
            id,
            &[("d0.example.com".to_string(), 0), ("d9.example.com".to_string(), 9)],
        )?;
        assert_eq!(inserted, 1);
        assert_eq!(store.count_generated_domains(id)?, 3);
        assert_eq!(store.get_counters(id)?.total, 3);
        Ok(())
    }

    #[test]
    fn test_cursor_pagination_in_offset_order() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 5);

        let page1 = store.list_domains(id, None, 2)?;
        assert_eq!(page1.domains.len(), 2);
        assert_eq!(page1.domains[0].offset_index, 0);
        assert_eq!(page1.next_cursor, Some(1));

        let page2 = store.list_domains(id, page1.next_cursor, 2)?;
        assert_eq!(page2.domains[0].offset_index, 2);

        let page3 = store.list_domains(id, page2.next_cursor, 2)?;
        assert_eq!(page3.domains.len(), 1);
        assert_eq!(page3.next_cursor, None);
        Ok(())
    }

    #[test]
    fn test_http_bulk_delta_idempotence() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 6);

        // Move all six through DNS first so the scenario mirrors a real run.
        let dns: Vec<DnsStatusUpdate> = (0..6)
            .map(|i| DnsStatusUpdate {
                domain_name: format!("d{}.example.com", i),
                status: DomainStatus::Ok,
                reason: None,
            })
            .collect();
        store.bulk_update_dns_status(id, &dns)?;

        let updates = vec![
            HttpStatusUpdate {
                domain_name: "d0.example.com".into(),
                status: DomainStatus::Ok,
                status_code: Some(200),
                reason: None,
            },
            HttpStatusUpdate {
                domain_name: "d1.example.com".into(),
                status: DomainStatus::Ok,
                status_code: Some(200),
                reason: None,
            },
            HttpStatusUpdate {
                domain_name: "d2.example.com".into(),
                status: DomainStatus::Timeout,
                status_code: None,
                reason: Some(HttpReason::Timeout),
            },
            HttpStatusUpdate {
                domain_name: "d3.example.com".into(),
                status: DomainStatus::Error,
                status_code: Some(404),
                reason: Some(HttpReason::NotFound),
            },
            HttpStatusUpdate {
                domain_name: "d4.example.com".into(),
                status: DomainStatus::Error,
                status_code: Some(503),
                reason: Some(HttpReason::Upstream5xx),
            },
            HttpStatusUpdate {
                domain_name: "d5.example.com".into(),
                status: DomainStatus::Ok,
                status_code: Some(200),
                reason: None,
            },
        ];

        let deltas = store.bulk_update_http_status(id, &updates)?;
        assert_eq!(
            deltas,
            StatusDeltas {
                total: 6,
                ok: 3,
                error: 2,
                timeout: 1
            }
        );

        let counters = store.get_counters(id)?;
        assert_eq!(counters.http_pending, 0);
        assert_eq!(counters.http_ok, 3);
        assert_eq!(counters.http_error, 2);
        assert_eq!(counters.http_timeout, 1);

        // Replay: no rows are pending, so deltas are zero and counters hold.
        let replay = store.bulk_update_http_status(id, &updates)?;
        assert_eq!(replay, StatusDeltas::default());
        let counters = store.get_counters(id)?;
        assert_eq!(counters.http_ok, 3);
        assert_eq!(counters.http_error, 2);
        assert_eq!(counters.http_timeout, 1);
        assert_eq!(counters.http_pending, 0);
        Ok(())
    }

    #[test]
    fn test_http_update_skips_unknown_domains() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 1);

        let deltas = store.bulk_update_http_status(
            id,
            &[HttpStatusUpdate {
                domain_name: "nope.example.com".into(),
                status: DomainStatus::Ok,
                status_code: Some(200),
                reason: None,
            }],
        )?;
        assert_eq!(deltas.total, 0);
        Ok(())
    }

    #[test]
    fn test_reason_is_persisted_as_canonical_string() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 1);

        store.bulk_update_http_status(
            id,
            &[HttpStatusUpdate {
                domain_name: "d0.example.com".into(),
                status: DomainStatus::Error,
                status_code: Some(403),
                reason: Some(HttpReason::Forbidden),
            }],
        )?;
        let domain = store.get_domain(id, "d0.example.com")?.unwrap();
        assert_eq!(domain.http_reason.as_deref(), Some("FORBIDDEN"));
        assert_eq!(domain.http_status, DomainStatus::Error);
        assert_eq!(domain.http_status_code, Some(403));
        Ok(())
    }

    #[test]
    fn test_is_parked_latches_true() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 1);

        let parked = FeatureVector {
            parked_confidence: 0.4,
            is_parked: true,
            fetched_at: "2026-01-01T00:00:00Z".into(),
            ..Default::default()
        };
        store.upsert_enrichment(id, "d0.example.com", &parked)?;
        let domain = store.get_domain(id, "d0.example.com")?.unwrap();
        assert!(domain.is_parked);

        // A later batch that no longer sees parked signals must not demote.
        let not_parked = FeatureVector {
            parked_confidence: 0.0,
            is_parked: false,
            fetched_at: "2026-01-02T00:00:00Z".into(),
            ..Default::default()
        };
        store.upsert_enrichment(id, "d0.example.com", &not_parked)?;
        let domain = store.get_domain(id, "d0.example.com")?.unwrap();
        assert!(domain.is_parked);
        assert_eq!(
            domain.last_http_fetched_at.as_deref(),
            Some("2026-01-02T00:00:00Z")
        );

        let projection = store.get_extraction_feature_row(id, "d0.example.com")?.unwrap();
        assert!(projection.is_parked);
        Ok(())
    }

    #[test]
    fn test_feature_vector_round_trips_through_json_column() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 1);

        let vector = FeatureVector {
            status_code: 200,
            fetched_at: "2026-01-01T00:00:00Z".into(),
            content_bytes: 2048,
            kw_unique: 4,
            kw_hits_total: 11,
            ..Default::default()
        };
        store.upsert_enrichment(id, "d0.example.com", &vector)?;
        let domain = store.get_domain(id, "d0.example.com")?.unwrap();
        assert_eq!(domain.feature_vector.unwrap(), vector);
        Ok(())
    }

    #[test]
    fn test_lead_bulk_update_pending_only() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let id = seeded(&mut store, 3);

        let updates = vec![
            LeadStatusUpdate {
                domain_name: "d0.example.com".into(),
                status: LeadStatus::Match,
            },
            LeadStatusUpdate {
                domain_name: "d1.example.com".into(),
                status: LeadStatus::NoMatch,
            },
        ];
        let written = store.bulk_update_lead_status(id, &updates)?;
        assert_eq!(written, 2);

        let counters = store.get_counters(id)?;
        assert_eq!(counters.lead_pending, 1);
        assert_eq!(counters.lead_match, 1);
        assert_eq!(counters.lead_no_match, 1);

        // Replay is a no-op.
        let written = store.bulk_update_lead_status(id, &updates)?;
        assert_eq!(written, 0);
        assert_eq!(store.get_counters(id)?.lead_match, 1);
        Ok(())
    }
}
