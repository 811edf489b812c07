use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WebhookId;

/// Subscribable event types (spec.md §4.7/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Settled,
    Disputed,
    Expired,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Settled => "settled",
            EventType::Disputed => "disputed",
            EventType::Expired => "expired",
        }
    }
}

/// A delivery target. The signing secret, if any, is kept out of this
/// struct's serialization surface entirely — it lives in a separate table in
/// `webhook::store` and is never attached to a value returned from a read
/// operation (spec.md §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub id: WebhookId,
    pub url: String,
    pub events: Vec<EventType>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl WebhookRegistration {
    pub fn subscribes_to(&self, event_type: EventType) -> bool {
        self.active && self.events.contains(&event_type)
    }
}

/// The wire payload pushed to a subscriber (spec.md §6 "Webhook payload
/// format"). Field names match the original JSON shape exactly since
/// external receivers already parse for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub event_id: uuid::Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub contract_id: uuid::Uuid,
    pub h3_index: String,
    pub risk_type: String,
    pub outcome: String,
    pub observed_value: Option<f64>,
    pub settled_at: Option<DateTime<Utc>>,
    pub record_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribes_to_respects_active_flag_and_event_set() {
        let reg = WebhookRegistration {
            id: uuid::Uuid::new_v4(),
            url: "https://example.com/hook".to_string(),
            events: vec![EventType::Settled],
            created_at: Utc::now(),
            active: true,
        };
        assert!(reg.subscribes_to(EventType::Settled));
        assert!(!reg.subscribes_to(EventType::Disputed));

        let mut inactive = reg.clone();
        inactive.active = false;
        assert!(!inactive.subscribes_to(EventType::Settled));
    }
}
