//! Runtime configuration for the dragnet engine.
//!
//! Layered: TOML file → environment → CLI flags. The file path comes from
//! `--config` or `DRAGNET_CONFIG`, defaulting to `dragnet.toml` in the
//! working directory; a missing file yields defaults.
//!
//! ```toml
//! [server]
//! port = 3141
//! db_path = "dragnet.db"
//!
//! [http_phase]
//! enrichment = true
//! microcrawl = true
//! microcrawl_max_pages = 3
//! microcrawl_byte_budget = 150000
//!
//! [reconciler]
//! interval_secs = 300
//! drift_threshold_pct = 0.0001
//! auto_correct = true
//! max_corrections = 50
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Feature flags and knobs for the HTTP validation phase.
///
/// Passed by explicit injection into the orchestrator; never read from
/// globals. Env vars `ENABLE_HTTP_ENRICHMENT`, `ENABLE_HTTP_MICROCRAWL`,
/// `MICROCRAWL_MAX_PAGES` and `MICROCRAWL_BYTE_BUDGET` override file values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub enrichment: bool,
    #[serde(default = "default_true")]
    pub microcrawl: bool,
    #[serde(default = "default_microcrawl_max_pages")]
    pub microcrawl_max_pages: u32,
    #[serde(default = "default_microcrawl_byte_budget")]
    pub microcrawl_byte_budget: usize,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enrichment: true,
            microcrawl: true,
            microcrawl_max_pages: default_microcrawl_max_pages(),
            microcrawl_byte_budget: default_microcrawl_byte_budget(),
        }
    }
}

impl FeatureFlags {
    /// Validate knob ranges. Rejects out-of-range values rather than
    /// clamping, so a bad deployment fails loudly at startup.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.microcrawl_max_pages) {
            bail!(
                "microcrawl_max_pages must be in 1..=10, got {}",
                self.microcrawl_max_pages
            );
        }
        if !(1024..=500_000).contains(&self.microcrawl_byte_budget) {
            bail!(
                "microcrawl_byte_budget must be in 1024..=500000, got {}",
                self.microcrawl_byte_budget
            );
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ENABLE_HTTP_ENRICHMENT") {
            self.enrichment = parse_bool(&v, self.enrichment);
        }
        if let Ok(v) = std::env::var("ENABLE_HTTP_MICROCRAWL") {
            self.microcrawl = parse_bool(&v, self.microcrawl);
        }
        if let Ok(v) = std::env::var("MICROCRAWL_MAX_PAGES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.microcrawl_max_pages = n;
        }
        if let Ok(v) = std::env::var("MICROCRAWL_BYTE_BUDGET")
            && let Ok(n) = v.parse::<usize>()
        {
            self.microcrawl_byte_budget = n;
        }
    }
}

/// Reconciler schedule and correction policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_reconciler_interval")]
    pub interval_secs: u64,
    /// Drift ratio (|delta| / total) above which a campaign is corrected.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_pct: f64,
    #[serde(default = "default_true")]
    pub auto_correct: bool,
    /// Ceiling on counter-row overwrites per reconciliation cycle.
    #[serde(default = "default_max_corrections")]
    pub max_corrections: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconciler_interval(),
            drift_threshold_pct: default_drift_threshold(),
            auto_correct: true,
            max_corrections: default_max_corrections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "http_phase")]
    pub flags: FeatureFlags,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then apply env
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var("DRAGNET_CONFIG").ok().map(PathBuf::from),
        };

        let mut config = match resolved {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", p.display()))?
            }
            Some(ref p) => bail!("Config file {} does not exist", p.display()),
            None => {
                let fallback = Path::new("dragnet.toml");
                if fallback.exists() {
                    let raw = std::fs::read_to_string(fallback)
                        .context("Failed to read dragnet.toml")?;
                    toml::from_str(&raw).context("Failed to parse dragnet.toml")?
                } else {
                    AppConfig::default()
                }
            }
        };

        config.flags.apply_env();
        config.flags.validate()?;
        Ok(config)
    }
}

fn parse_bool(raw: &str, fallback: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

fn default_true() -> bool {
    true
}

fn default_microcrawl_max_pages() -> u32 {
    3
}

fn default_microcrawl_byte_budget() -> usize {
    150_000
}

fn default_reconciler_interval() -> u64 {
    300
}

fn default_drift_threshold() -> f64 {
    0.0001
}

fn default_max_corrections() -> usize {
    50
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from("dragnet.db")
}
