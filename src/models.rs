use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Phase identity and lifecycle ─────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    DomainGeneration,
    DnsValidation,
    HttpKeywordValidation,
    LeadClassification,
}

impl PhaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DomainGeneration => "domain_generation",
            Self::DnsValidation => "dns_validation",
            Self::HttpKeywordValidation => "http_keyword_validation",
            Self::LeadClassification => "lead_classification",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "domain_generation" => Ok(Self::DomainGeneration),
            "dns_validation" => Ok(Self::DnsValidation),
            "http_keyword_validation" => Ok(Self::HttpKeywordValidation),
            "lead_classification" => Ok(Self::LeadClassification),
            _ => Err(format!("Invalid phase type: {}", s)),
        }
    }

    /// The phase that must be `Completed` before this one may execute.
    pub fn predecessor(&self) -> Option<PhaseType> {
        match self {
            Self::DomainGeneration => None,
            Self::DnsValidation => Some(Self::DomainGeneration),
            Self::HttpKeywordValidation => Some(Self::DnsValidation),
            Self::LeadClassification => Some(Self::HttpKeywordValidation),
        }
    }

    pub fn ordered() -> [PhaseType; 4] {
        [
            Self::DomainGeneration,
            Self::DnsValidation,
            Self::HttpKeywordValidation,
            Self::LeadClassification,
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Configured,
    InProgress,
    Paused,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Configured => "configured",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "configured" => Ok(Self::Configured),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }

    /// Terminal statuses allow a fresh run to be started on re-entry.
    pub fn allows_restart(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Paused)
    }
}

// ── Per-domain validation state ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Pending,
    Ok,
    Error,
    Timeout,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid domain status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Match,
    NoMatch,
    Error,
    Timeout,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Match => "match",
            Self::NoMatch => "no_match",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "match" => Ok(Self::Match),
            "no_match" => Ok(Self::NoMatch),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid lead status: {}", s)),
        }
    }
}

// ── Canonical HTTP failure reasons ───────────────────────────────────

/// Canonical reason recorded alongside a non-ok HTTP validation outcome.
/// Mapping from raw validator output happens in `phases::http::taxonomy`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpReason {
    StatusCodeMismatch,
    ContentMismatch,
    FetchError,
    HeadlessFailed,
    Timeout,
    Canceled,
    ConnectionRefused,
    DnsResolveError,
    ConnectionReset,
    TlsHandshake,
    SslExpired,
    TlsError,
    ProxyError,
    NotFound,
    Forbidden,
    Unauthorized,
    Gone,
    RateLimit,
    UnavailableLegal,
    Upstream5xx,
    Error,
}

impl HttpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusCodeMismatch => "STATUS_CODE_MISMATCH",
            Self::ContentMismatch => "CONTENT_MISMATCH",
            Self::FetchError => "FETCH_ERROR",
            Self::HeadlessFailed => "HEADLESS_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Canceled => "CANCELED",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::DnsResolveError => "DNS_RESOLVE_ERROR",
            Self::ConnectionReset => "CONNECTION_RESET",
            Self::TlsHandshake => "TLS_HANDSHAKE",
            Self::SslExpired => "SSL_EXPIRED",
            Self::TlsError => "TLS_ERROR",
            Self::ProxyError => "PROXY_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Gone => "GONE",
            Self::RateLimit => "RATE_LIMIT",
            Self::UnavailableLegal => "UNAVAILABLE_LEGAL",
            Self::Upstream5xx => "UPSTREAM_5XX",
            Self::Error => "ERROR",
        }
    }
}

// ── Row types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub owner: String,
    pub campaign_type: String,
    pub status: String,
    pub total_phases: i64,
    pub completed_phases: i64,
    pub discovery_config_hash: Option<String>,
    pub discovery_offset_start: Option<i64>,
    pub discovery_offset_end: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPhase {
    pub campaign_id: i64,
    pub phase_type: PhaseType,
    pub status: PhaseStatus,
    /// Opaque phase configuration; parsed by the owning executor.
    pub configuration: Option<serde_json::Value>,
    pub progress_pct: f64,
    pub items_total: i64,
    pub items_processed: i64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDomain {
    pub id: i64,
    pub campaign_id: i64,
    pub domain_name: String,
    pub offset_index: i64,
    pub dns_status: DomainStatus,
    pub dns_reason: Option<String>,
    pub http_status: DomainStatus,
    pub http_status_code: Option<i64>,
    pub http_reason: Option<String>,
    pub last_validated_at: Option<String>,
    pub lead_status: LeadStatus,
    pub feature_vector: Option<FeatureVector>,
    pub parked_confidence: Option<f64>,
    /// Latches true; later enrichment batches never demote it.
    pub is_parked: bool,
    pub last_http_fetched_at: Option<String>,
}

/// Authoritative per-campaign tallies, maintained by transactional deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainCounters {
    pub campaign_id: i64,
    pub total: i64,
    pub dns_pending: i64,
    pub dns_ok: i64,
    pub dns_error: i64,
    pub dns_timeout: i64,
    pub http_pending: i64,
    pub http_ok: i64,
    pub http_error: i64,
    pub http_timeout: i64,
    pub lead_pending: i64,
    pub lead_match: i64,
    pub lead_no_match: i64,
    pub lead_error: i64,
    pub lead_timeout: i64,
    pub updated_at: Option<String>,
}

impl DomainCounters {
    pub fn new(campaign_id: i64) -> Self {
        Self {
            campaign_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub user_agent: String,
    pub accept_language: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    pub url: String,
    pub enabled: bool,
    pub healthy: bool,
    /// Persona this proxy is linked to, if any.
    pub persona_id: Option<String>,
}

/// Canonical per-campaign parameters for the HTTP+keyword phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpKeywordParams {
    pub campaign_id: i64,
    pub persona_ids: Vec<String>,
    pub proxy_ids: Vec<String>,
    pub keyword_set_ids: Vec<i64>,
    pub adhoc_keywords: Vec<String>,
}

// ── Streamed progress ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: PhaseType,
    pub status: PhaseStatus,
    pub progress_pct: f64,
    pub items_processed: i64,
    pub items_total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ── Enrichment output ────────────────────────────────────────────────

/// Typed feature vector built during HTTP enrichment. Serialized to JSON
/// only at the persistence boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub status_code: i64,
    /// RFC3339 UTC fetch timestamp.
    pub fetched_at: String,
    pub content_bytes: i64,
    pub h1_count: u32,
    pub internal_links: u32,
    pub external_links: u32,
    pub link_ratio: f64,
    pub language: Option<String>,
    pub language_confidence: f64,
    /// Per-keyword-set pattern hits, keyed by set id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_hits: Vec<KeywordSetHits>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adhoc_hits: Vec<String>,
    pub title_has_keyword: bool,
    pub kw_hits_total: u32,
    pub kw_unique: u32,
    /// Top three keywords by occurrence count.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_keywords: Vec<KeywordCount>,
    pub parked_confidence: f64,
    pub is_parked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microcrawl: Option<MicroCrawlOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordSetHits {
    pub set_id: i64,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: u32,
}

/// Result of the bounded depth-1 micro-crawl, nested under the feature
/// vector when the crawl ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MicroCrawlOutcome {
    pub used: bool,
    pub pages: u32,
    pub exhausted: bool,
    pub secondary_pages_examined: u32,
    pub kw_unique_root: u32,
    pub kw_unique_added: u32,
    pub kw_unique: u32,
    pub kw_growth_ratio: f64,
    pub diminishing_returns: bool,
    pub partial_coverage: bool,
}

/// Analysis-ready projection of enrichment output, one row per
/// (campaign, domain), upserted each enrichment batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionFeatureRow {
    pub campaign_id: i64,
    pub domain_name: String,
    pub kw_unique: u32,
    pub kw_hits_total: u32,
    pub parked_confidence: f64,
    pub is_parked: bool,
    pub language: Option<String>,
    pub content_bytes: i64,
    pub microcrawl_used: bool,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_type_round_trips_through_strings() {
        for phase in PhaseType::ordered() {
            assert_eq!(PhaseType::from_str(phase.as_str()), Ok(phase));
        }
        assert!(PhaseType::from_str("nonsense").is_err());
    }

    #[test]
    fn phase_ordering_is_linear() {
        assert_eq!(PhaseType::DomainGeneration.predecessor(), None);
        assert_eq!(
            PhaseType::DnsValidation.predecessor(),
            Some(PhaseType::DomainGeneration)
        );
        assert_eq!(
            PhaseType::HttpKeywordValidation.predecessor(),
            Some(PhaseType::DnsValidation)
        );
        assert_eq!(
            PhaseType::LeadClassification.predecessor(),
            Some(PhaseType::HttpKeywordValidation)
        );
    }

    #[test]
    fn phase_status_restart_rules() {
        assert!(PhaseStatus::Completed.allows_restart());
        assert!(PhaseStatus::Failed.allows_restart());
        assert!(PhaseStatus::Paused.allows_restart());
        assert!(!PhaseStatus::InProgress.allows_restart());
        assert!(!PhaseStatus::Configured.allows_restart());
        assert!(!PhaseStatus::NotStarted.allows_restart());
    }

    #[test]
    fn domain_status_round_trips() {
        for s in ["pending", "ok", "error", "timeout"] {
            assert_eq!(DomainStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(DomainStatus::from_str("bogus").is_err());
    }

    #[test]
    fn lead_status_round_trips() {
        for s in ["pending", "match", "no_match", "error", "timeout"] {
            assert_eq!(LeadStatus::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn feature_vector_serializes_without_empty_optionals() {
        let fv = FeatureVector {
            status_code: 200,
            fetched_at: "2026-01-01T00:00:00Z".to_string(),
            content_bytes: 1024,
            ..Default::default()
        };
        let json = serde_json::to_string(&fv).unwrap();
        assert!(!json.contains("microcrawl"));
        assert!(!json.contains("set_hits"));
        assert!(json.contains("\"status_code\":200"));
    }

    #[test]
    fn feature_vector_with_microcrawl_round_trips() {
        let fv = FeatureVector {
            status_code: 200,
            kw_unique: 7,
            microcrawl: Some(MicroCrawlOutcome {
                used: true,
                pages: 3,
                kw_unique_root: 5,
                kw_unique_added: 2,
                kw_unique: 7,
                kw_growth_ratio: 1.4,
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&fv).unwrap();
        let back: FeatureVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fv);
        assert_eq!(back.microcrawl.unwrap().pages, 3);
    }

    #[test]
    fn http_reason_strings_are_screaming_snake() {
        assert_eq!(HttpReason::StatusCodeMismatch.as_str(), "STATUS_CODE_MISMATCH");
        assert_eq!(HttpReason::Upstream5xx.as_str(), "UPSTREAM_5XX");
        assert_eq!(
            serde_json::to_string(&HttpReason::DnsResolveError).unwrap(),
            "\"DNS_RESOLVE_ERROR\""
        );
    }
}
