//! External event bus: the SSE-facing catalog of campaign events.
//!
//! Events fan out over a tokio broadcast channel as JSON strings; the
//! server module exposes the stream to clients. Publishing never blocks
//! and publish errors are swallowed; a campaign run must not care
//! whether anyone is listening. Clients must tolerate unknown events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::PhaseType;

/// Sample-size caps keep event payloads bounded.
pub const BATCH_SAMPLE_LIMIT: usize = 50;
pub const ENRICHMENT_SAMPLE_LIMIT: usize = 25;
pub const DELTA_ITEM_LIMIT: usize = 200;

const BUS_CAPACITY: usize = 256;

/// Mint a fresh correlation id for one batch worth of events.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSample {
    pub domain: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSample {
    pub domain: String,
    pub kw_unique: u32,
    pub parked_confidence: f64,
    pub is_parked: bool,
    pub microcrawl_planned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaItem {
    pub domain: String,
    pub http_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_reason: Option<String>,
}

/// The published event catalog. Correlation ids are optional on legacy
/// phase events and mandatory on enrichment events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    PhaseStarted {
        campaign_id: i64,
        phase: PhaseType,
        message: String,
        #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    PhaseAutoStarted {
        campaign_id: i64,
        phase: PhaseType,
        message: String,
        #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    PhaseCompleted {
        campaign_id: i64,
        phase: PhaseType,
        results: serde_json::Value,
        #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    PhaseFailed {
        campaign_id: i64,
        phase: PhaseType,
        error: String,
        #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    CampaignProgress {
        campaign_id: i64,
        progress: serde_json::Value,
        #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    HttpBatchValidated {
        #[serde(rename = "campaignId")]
        campaign_id: i64,
        count: usize,
        sample: Vec<BatchSample>,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    HttpEnrichment {
        #[serde(rename = "campaignId")]
        campaign_id: i64,
        count: usize,
        sample: Vec<EnrichmentSample>,
        microcrawl: bool,
        #[serde(rename = "microMaxPages")]
        micro_max_pages: u32,
        #[serde(rename = "microByteBudget")]
        micro_byte_budget: usize,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    DomainStatusDelta {
        #[serde(rename = "campaignId")]
        campaign_id: i64,
        phase: PhaseType,
        count: usize,
        items: Vec<DeltaItem>,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    KeepAlive {
        ts: String,
    },
}

impl BusEvent {
    /// Enforce the per-event sample caps.
    fn bounded(mut self) -> Self {
        match &mut self {
            Self::HttpBatchValidated { sample, .. } => sample.truncate(BATCH_SAMPLE_LIMIT),
            Self::HttpEnrichment { sample, .. } => sample.truncate(ENRICHMENT_SAMPLE_LIMIT),
            Self::DomainStatusDelta { items, .. } => items.truncate(DELTA_ITEM_LIMIT),
            _ => {}
        }
        self
    }
}

/// Shared handle to the event fan-out channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Serialize and publish. Returns silently when no client is
    /// subscribed or serialization fails.
    pub fn publish(&self, event: BusEvent) {
        match serde_json::to_string(&event.bounded()) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize bus event");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_started_serialization() {
        let event = BusEvent::PhaseStarted {
            campaign_id: 7,
            phase: PhaseType::DnsValidation,
            message: "starting".to_string(),
            correlation_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"phase_started\""));
        assert!(json.contains("\"campaign_id\":7"));
        assert!(json.contains("\"phase\":\"dns_validation\""));
        assert!(!json.contains("correlationId"));
    }

    #[test]
    fn enrichment_event_uses_camel_case_fields() {
        let event = BusEvent::HttpEnrichment {
            campaign_id: 3,
            count: 1,
            sample: vec![EnrichmentSample {
                domain: "a.example.com".to_string(),
                kw_unique: 4,
                parked_confidence: 0.1,
                is_parked: false,
                microcrawl_planned: true,
            }],
            microcrawl: true,
            micro_max_pages: 3,
            micro_byte_budget: 150_000,
            correlation_id: new_correlation_id(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"http_enrichment\""));
        assert!(json.contains("\"campaignId\":3"));
        assert!(json.contains("\"microMaxPages\":3"));
        assert!(json.contains("\"microByteBudget\":150000"));
        assert!(json.contains("\"correlationId\""));
    }

    #[test]
    fn batch_sample_is_capped_at_fifty() {
        let sample: Vec<BatchSample> = (0..80)
            .map(|i| BatchSample {
                domain: format!("d{}.example.com", i),
                status: "ok".to_string(),
                reason: None,
            })
            .collect();
        let event = BusEvent::HttpBatchValidated {
            campaign_id: 1,
            count: 80,
            sample,
            correlation_id: new_correlation_id(),
        }
        .bounded();
        match event {
            BusEvent::HttpBatchValidated { sample, count, .. } => {
                assert_eq!(sample.len(), BATCH_SAMPLE_LIMIT);
                // count still reflects the full batch
                assert_eq!(count, 80);
            }
            _ => panic!("Expected HttpBatchValidated"),
        }
    }

    #[test]
    fn delta_items_are_capped_at_two_hundred() {
        let items: Vec<DeltaItem> = (0..300)
            .map(|i| DeltaItem {
                domain: format!("d{}.example.com", i),
                http_status: "ok".to_string(),
                http_reason: None,
            })
            .collect();
        let event = BusEvent::DomainStatusDelta {
            campaign_id: 1,
            phase: PhaseType::HttpKeywordValidation,
            count: 300,
            items,
            correlation_id: new_correlation_id(),
        }
        .bounded();
        match event {
            BusEvent::DomainStatusDelta { items, .. } => {
                assert_eq!(items.len(), DELTA_ITEM_LIMIT);
            }
            _ => panic!("Expected DomainStatusDelta"),
        }
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(BusEvent::KeepAlive {
            ts: "2026-01-01T00:00:00Z".to_string(),
        });

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert!(received1.contains("keep_alive"));
        assert_eq!(received1, received2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(BusEvent::KeepAlive {
            ts: "2026-01-01T00:00:00Z".to_string(),
        });
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(new_correlation_id(), new_correlation_id());
    }
}
