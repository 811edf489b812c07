//! Webhook registration store (spec.md §4.8). In-memory, guarded by
//! `parking_lot::RwLock` — the teacher's preferred lock type for short
//! critical sections (see `main.rs`'s comment: "faster than tokio RwLock
//! for short critical sections").

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::models::{EventType, WebhookId, WebhookRegistration};

/// Secrets live in a table separate from the public registration struct
/// (mirrors `webhook_store.py`'s `_webhooks`/`_secrets` split) so no read
/// path can accidentally return one.
#[derive(Default)]
pub struct WebhookStore {
    registrations: RwLock<HashMap<WebhookId, WebhookRegistration>>,
    secrets: RwLock<HashMap<WebhookId, String>>,
}

impl WebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: String, events: Vec<EventType>, secret: Option<String>) -> WebhookRegistration {
        let id = uuid::Uuid::new_v4();
        let registration = WebhookRegistration {
            id,
            url,
            events,
            created_at: Utc::now(),
            active: true,
        };
        self.registrations.write().insert(id, registration.clone());
        if let Some(secret) = secret {
            self.secrets.write().insert(id, secret);
        }
        registration
    }

    pub fn get(&self, id: WebhookId) -> Option<WebhookRegistration> {
        self.registrations.read().get(&id).cloned()
    }

    pub fn list_active(&self) -> Vec<WebhookRegistration> {
        self.registrations.read().values().filter(|r| r.active).cloned().collect()
    }

    pub fn list_for_event(&self, event_type: EventType) -> Vec<WebhookRegistration> {
        self.registrations
            .read()
            .values()
            .filter(|r| r.subscribes_to(event_type))
            .cloned()
            .collect()
    }

    pub fn get_secret(&self, id: WebhookId) -> Option<String> {
        self.secrets.read().get(&id).cloned()
    }

    /// Tombstones the registration (spec.md §3 lifecycle): the entry stays
    /// in the map with `active = false` rather than being erased, and its
    /// secret is dropped. Returns `true` only if this call is what flipped
    /// it inactive — a repeat call on an already-tombstoned or unknown id
    /// returns `false`.
    pub fn remove(&self, id: WebhookId) -> bool {
        let tombstoned = match self.registrations.write().get_mut(&id) {
            Some(registration) if registration.active => {
                registration.active = false;
                true
            }
            _ => false,
        };
        if tombstoned {
            self.secrets.write().remove(&id);
        }
        tombstoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_list_for_event_matches_subscription() {
        let store = WebhookStore::new();
        store.register("https://a.example".to_string(), vec![EventType::Settled], None);
        store.register("https://b.example".to_string(), vec![EventType::Disputed], None);

        let settled_hooks = store.list_for_event(EventType::Settled);
        assert_eq!(settled_hooks.len(), 1);
        assert_eq!(settled_hooks[0].url, "https://a.example");
    }

    #[test]
    fn secret_is_never_on_the_registration_struct() {
        let store = WebhookStore::new();
        let reg = store.register("https://a.example".to_string(), vec![EventType::Settled], Some("shh".to_string()));
        assert_eq!(store.get_secret(reg.id), Some("shh".to_string()));
        // WebhookRegistration has no secret field at all — this is a
        // compile-time guarantee, not just a runtime one.
    }

    #[test]
    fn remove_tombstones_and_drops_secret() {
        let store = WebhookStore::new();
        let reg = store.register("https://a.example".to_string(), vec![EventType::Settled], Some("shh".to_string()));
        assert!(store.remove(reg.id));

        let tombstoned = store.get(reg.id).expect("tombstoned registration is still present");
        assert!(!tombstoned.active);
        assert_eq!(store.get_secret(reg.id), None);

        // Already inactive: a repeat call makes no further change.
        assert!(!store.remove(reg.id));
    }

    #[test]
    fn inactive_registrations_are_excluded_from_list_active() {
        let store = WebhookStore::new();
        let reg = store.register("https://a.example".to_string(), vec![EventType::Settled], None);
        store.remove(reg.id);
        assert!(store.list_active().is_empty());
    }
}
