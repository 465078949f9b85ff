use rusqlite::params;

use super::Store;
use crate::errors::StoreError;
use crate::models::DomainCounters;

impl Store {
    pub fn get_counters(&self, campaign_id: i64) -> Result<DomainCounters, StoreError> {
        self.conn
            .query_row(
                "SELECT campaign_id, total,
                        dns_pending, dns_ok, dns_error, dns_timeout,
                        http_pending, http_ok, http_error, http_timeout,
                        lead_pending, lead_match, lead_no_match, lead_error, lead_timeout,
                        updated_at
                 FROM campaign_domain_counters WHERE campaign_id = ?1",
                params![campaign_id],
                |row| {
                    Ok(DomainCounters {
                        campaign_id: row.get(0)?,
                        total: row.get(1)?,
                        dns_pending: row.get(2)?,
                        dns_ok: row.get(3)?,
                        dns_error: row.get(4)?,
                        dns_timeout: row.get(5)?,
                        http_pending: row.get(6)?,
                        http_ok: row.get(7)?,
                        http_error: row.get(8)?,
                        http_timeout: row.get(9)?,
                        lead_pending: row.get(10)?,
                        lead_match: row.get(11)?,
                        lead_no_match: row.get(12)?,
                        lead_error: row.get(13)?,
                        lead_timeout: row.get(14)?,
                        updated_at: row.get(15)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::CountersNotFound { campaign_id }
                }
                other => StoreError::Database(other),
            })
    }

    /// Ground-truth tallies computed by aggregate SQL over the domain rows.
    /// Used by the reconciler; never on the hot path.
    pub fn aggregate_counters(&self, campaign_id: i64) -> Result<DomainCounters, StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(*),
                        SUM(dns_status = 'pending'), SUM(dns_status = 'ok'),
                        SUM(dns_status = 'error'), SUM(dns_status = 'timeout'),
                        SUM(http_status = 'pending'), SUM(http_status = 'ok'),
                        SUM(http_status = 'error'), SUM(http_status = 'timeout'),
                        SUM(lead_status = 'pending'), SUM(lead_status = 'match'),
                        SUM(lead_status = 'no_match'), SUM(lead_status = 'error'),
                        SUM(lead_status = 'timeout')
                 FROM generated_domains WHERE campaign_id = ?1",
                params![campaign_id],
                |row| {
                    let get = |i: usize| -> rusqlite::Result<i64> {
                        row.get::<_, Option<i64>>(i).map(|v| v.unwrap_or(0))
                    };
                    Ok(DomainCounters {
                        campaign_id,
                        total: row.get(0)?,
                        dns_pending: get(1)?,
                        dns_ok: get(2)?,
                        dns_error: get(3)?,
                        dns_timeout: get(4)?,
                        http_pending: get(5)?,
                        http_ok: get(6)?,
                        http_error: get(7)?,
                        http_timeout: get(8)?,
                        lead_pending: get(9)?,
                        lead_match: get(10)?,
                        lead_no_match: get(11)?,
                        lead_error: get(12)?,
                        lead_timeout: get(13)?,
                        updated_at: None,
                    })
                },
            )
            .map_err(StoreError::Database)
    }

    /// Overwrite the counters row with ground truth (reconciler correction).
    pub fn overwrite_counters(&self, truth: &DomainCounters) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE campaign_domain_counters
             SET total = ?2,
                 dns_pending = ?3, dns_ok = ?4, dns_error = ?5, dns_timeout = ?6,
                 http_pending = ?7, http_ok = ?8, http_error = ?9, http_timeout = ?10,
                 lead_pending = ?11, lead_match = ?12, lead_no_match = ?13,
                 lead_error = ?14, lead_timeout = ?15,
                 updated_at = datetime('now')
             WHERE campaign_id = ?1",
            params![
                truth.campaign_id,
                truth.total,
                truth.dns_pending,
                truth.dns_ok,
                truth.dns_error,
                truth.dns_timeout,
                truth.http_pending,
                truth.http_ok,
                truth.http_error,
                truth.http_timeout,
                truth.lead_pending,
                truth.lead_match,
                truth.lead_no_match,
                truth.lead_error,
                truth.lead_timeout,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::CountersNotFound {
                campaign_id: truth.campaign_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DomainStatus;
    use crate::store::DnsStatusUpdate;

    #[test]
    fn test_aggregate_matches_deltas() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let campaign = store.create_campaign("acme", "lead_generation")?;
        let domains: Vec<(String, i64)> = (0..5)
            .map(|i| (format!("d{}.example.com", i), i))
            .collect();
        store.insert_generated_domains(campaign.id, &domains)?;

        let updates = vec![
            DnsStatusUpdate {
                domain_name: "d0.example.com".into(),
                status: DomainStatus::Ok,
                reason: None,
            },
            DnsStatusUpdate {
                domain_name: "d1.example.com".into(),
                status: DomainStatus::Ok,
                reason: None,
            },
            DnsStatusUpdate {
                domain_name: "d2.example.com".into(),
                status: DomainStatus::Error,
                reason: Some("NXDOMAIN".into()),
            },
        ];
        store.bulk_update_dns_status(campaign.id, &updates)?;

        let counters = store.get_counters(campaign.id)?;
        let truth = store.aggregate_counters(campaign.id)?;
        assert_eq!(counters.total, truth.total);
        assert_eq!(counters.dns_pending, truth.dns_pending);
        assert_eq!(counters.dns_ok, truth.dns_ok);
        assert_eq!(counters.dns_error, truth.dns_error);
        assert_eq!(counters.dns_timeout, truth.dns_timeout);
        Ok(())
    }

    #[test]
    fn test_aggregate_empty_campaign_is_all_zero() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let campaign = store.create_campaign("acme", "lead_generation")?;
        let truth = store.aggregate_counters(campaign.id)?;
        assert_eq!(truth.total, 0);
        assert_eq!(truth.dns_pending, 0);
        assert_eq!(truth.lead_timeout, 0);
        Ok(())
    }

    #[test]
    fn test_overwrite_counters() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let campaign = store.create_campaign("acme", "lead_generation")?;
        store.insert_generated_domains(campaign.id, &[("a.example.com".into(), 0)])?;

        let mut truth = store.aggregate_counters(campaign.id)?;
        truth.total = 7;
        store.overwrite_counters(&truth)?;
        assert_eq!(store.get_counters(campaign.id)?.total, 7);

        truth.campaign_id = 999;
        assert!(matches!(
            store.overwrite_counters(&truth),
            Err(StoreError::CountersNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_counters_missing_campaign() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        assert!(matches!(
            store.get_counters(404),
            Err(StoreError::CountersNotFound { campaign_id: 404 })
        ));
        Ok(())
    }
}
