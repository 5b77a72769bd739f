use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Channels / Topics
// -----------------------------------------------------------------------------

/// Redis channel the bus mirrors its events to (when configured).
pub const CHANNEL_CLOUDINFO_EVENTS: &str = "cloudinfo_events";

pub const TOPIC_PREFIX: &str = "load:service";

/// Topic on which "scraping complete" is announced for `provider`.
pub fn scraping_complete_topic(provider: &str) -> String {
    format!("{}:{}", TOPIC_PREFIX, provider)
}

// -----------------------------------------------------------------------------
// Events (EVT:*)
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CloudInfoEvent {
    #[serde(rename = "EVT:SCRAPING_COMPLETE")]
    ScrapingComplete { provider: String },
}

impl CloudInfoEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudInfoEvent::ScrapingComplete { .. } => "EVT:SCRAPING_COMPLETE",
        }
    }

    pub fn topic(&self) -> String {
        match self {
            CloudInfoEvent::ScrapingComplete { provider } => scraping_complete_topic(provider),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub topic: String,
    pub event: CloudInfoEvent,
    pub occurred_at: DateTime<Utc>,
    pub source: String,
}

impl EventEnvelope {
    pub fn new(event: CloudInfoEvent, source: &str) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            topic: event.topic(),
            event,
            occurred_at: Utc::now(),
            source: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_namespaced_per_provider() {
        assert_eq!(scraping_complete_topic("amazon"), "load:service:amazon");
        let evt = CloudInfoEvent::ScrapingComplete {
            provider: "google".to_string(),
        };
        assert_eq!(evt.topic(), "load:service:google");
    }

    #[test]
    fn envelope_serializes_event_type() {
        let env = EventEnvelope::new(
            CloudInfoEvent::ScrapingComplete {
                provider: "dummy".to_string(),
            },
            "cloudinfo-scraper",
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["event"]["type"], "EVT:SCRAPING_COMPLETE");
        assert_eq!(json["event"]["payload"]["provider"], "dummy");
        assert_eq!(json["topic"], "load:service:dummy");

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back.event, env.event);
    }
}
