//! SQLite persistence for campaigns, phases, domains and counters.
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `campaigns`  | Campaign row CRUD                                    |
//! | `phases`     | Per-(campaign,phase) lifecycle rows                  |
//! | `domains`    | Generated domains, transactional bulk status updates |
//! | `counters`   | Authoritative tallies + ground-truth aggregates      |
//! | `params`     | HTTP phase params, personas, proxies, keyword sets   |
//!
//! All access goes through [`StoreHandle`], a thin `Arc<Mutex<Store>>`.
//! rusqlite is synchronous; callers on async paths take the lock for the
//! duration of one statement or one transaction, never across awaits.

mod campaigns;
mod counters;
mod domains;
mod params;
mod phases;

pub use domains::{DnsStatusUpdate, DomainPage, HttpStatusUpdate, LeadStatusUpdate, StatusDeltas};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::errors::StoreError;

pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                campaign_type TEXT NOT NULL DEFAULT 'lead_generation',
                status TEXT NOT NULL DEFAULT 'created',
                total_phases INTEGER NOT NULL DEFAULT 4,
                completed_phases INTEGER NOT NULL DEFAULT 0,
                discovery_config_hash TEXT,
                discovery_offset_start INTEGER,
                discovery_offset_end INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS campaign_phases (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                phase_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'not_started',
                configuration TEXT,
                progress_pct REAL NOT NULL DEFAULT 0,
                items_total INTEGER NOT NULL DEFAULT 0,
                items_processed INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                completed_at TEXT,
                last_error TEXT,
                PRIMARY KEY (campaign_id, phase_type)
            );

            CREATE TABLE IF NOT EXISTS generated_domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                domain_name TEXT NOT NULL,
                offset_index INTEGER NOT NULL,
                dns_status TEXT NOT NULL DEFAULT 'pending',
                dns_reason TEXT,
                http_status TEXT NOT NULL DEFAULT 'pending',
                http_status_code INTEGER,
                http_reason TEXT,
                last_validated_at TEXT,
                lead_status TEXT NOT NULL DEFAULT 'pending',
                feature_vector TEXT,
                parked_confidence REAL,
                is_parked INTEGER NOT NULL DEFAULT 0,
                last_http_fetched_at TEXT,
                UNIQUE (campaign_id, domain_name)
            );

            CREATE TABLE IF NOT EXISTS campaign_domain_counters (
                campaign_id INTEGER PRIMARY KEY REFERENCES campaigns(id) ON DELETE CASCADE,
                total INTEGER NOT NULL DEFAULT 0,
                dns_pending INTEGER NOT NULL DEFAULT 0,
                dns_ok INTEGER NOT NULL DEFAULT 0,
                dns_error INTEGER NOT NULL DEFAULT 0,
                dns_timeout INTEGER NOT NULL DEFAULT 0,
                http_pending INTEGER NOT NULL DEFAULT 0,
                http_ok INTEGER NOT NULL DEFAULT 0,
                http_error INTEGER NOT NULL DEFAULT 0,
                http_timeout INTEGER NOT NULL DEFAULT 0,
                lead_pending INTEGER NOT NULL DEFAULT 0,
                lead_match INTEGER NOT NULL DEFAULT 0,
                lead_no_match INTEGER NOT NULL DEFAULT 0,
                lead_error INTEGER NOT NULL DEFAULT 0,
                lead_timeout INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS personas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                accept_language TEXT,
                enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS proxies (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                healthy INTEGER NOT NULL DEFAULT 1,
                persona_id TEXT REFERENCES personas(id)
            );

            CREATE TABLE IF NOT EXISTS http_keyword_params (
                campaign_id INTEGER PRIMARY KEY REFERENCES campaigns(id) ON DELETE CASCADE,
                persona_ids TEXT NOT NULL DEFAULT '[]',
                proxy_ids TEXT NOT NULL DEFAULT '[]',
                keyword_set_ids TEXT NOT NULL DEFAULT '[]',
                adhoc_keywords TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS keyword_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                patterns TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS extraction_features (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                domain_name TEXT NOT NULL,
                kw_unique INTEGER NOT NULL DEFAULT 0,
                kw_hits_total INTEGER NOT NULL DEFAULT 0,
                parked_confidence REAL NOT NULL DEFAULT 0,
                is_parked INTEGER NOT NULL DEFAULT 0,
                language TEXT,
                content_bytes INTEGER NOT NULL DEFAULT 0,
                microcrawl_used INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (campaign_id, domain_name)
            );

            CREATE INDEX IF NOT EXISTS idx_domains_campaign ON generated_domains(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_domains_dns ON generated_domains(campaign_id, dns_status, offset_index);
            CREATE INDEX IF NOT EXISTS idx_domains_http ON generated_domains(campaign_id, http_status);
            CREATE INDEX IF NOT EXISTS idx_phases_campaign ON campaign_phases(campaign_id);
            ",
        )?;
        Ok(())
    }
}

/// Shared, lock-guarded handle to the store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Store>>,
}

impl StoreHandle {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Acquire the store lock, mapping poisoning to a typed error.
    pub fn lock(&self) -> Result<MutexGuard<'_, Store>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}
