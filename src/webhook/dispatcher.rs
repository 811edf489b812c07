//! Webhook dispatcher: async fan-out, signing, retries with backoff
//! (spec.md §4.9).

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::SettlementEvent;
use crate::webhook::store::WebhookStore;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookDispatcher {
    http: reqwest::Client,
    store: Arc<WebhookStore>,
    timeout: Duration,
    max_retries: u32,
}

impl WebhookDispatcher {
    pub fn new(http: reqwest::Client, store: Arc<WebhookStore>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            http,
            store,
            timeout,
            max_retries,
        }
    }

    /// Fans the event out to every active registration subscribed to its
    /// type, concurrently (spec.md §4.9 "Fan-out"). Returns the count of
    /// successful deliveries.
    pub async fn dispatch(&self, event: SettlementEvent) -> usize {
        let registrations = self.store.list_for_event(event.event_type);
        if registrations.is_empty() {
            return 0;
        }

        let payload_bytes = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize webhook event");
                return 0;
            }
        };

        let deliveries = registrations.into_iter().map(|registration| {
            let http = self.http.clone();
            let secret = self.store.get_secret(registration.id);
            let payload_bytes = payload_bytes.clone();
            let event_id = event.event_id;
            let event_type = event.event_type.as_str();
            let timeout = self.timeout;
            let max_retries = self.max_retries;
            async move {
                deliver(
                    &http,
                    &registration.url,
                    event_type,
                    event_id,
                    &payload_bytes,
                    secret.as_deref(),
                    timeout,
                    max_retries,
                )
                .await
            }
        });

        let results = join_all(deliveries).await;
        results.into_iter().filter(|ok| *ok).count()
    }
}

fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Per-delivery protocol of spec.md §4.9: headers, optional signature,
/// retry policy with exponential backoff capped at 30s.
async fn deliver(
    http: &reqwest::Client,
    url: &str,
    event_type: &str,
    event_id: uuid::Uuid,
    payload: &[u8],
    secret: Option<&str>,
    timeout: Duration,
    max_retries: u32,
) -> bool {
    let mut backoff = Duration::from_secs(1);

    for attempt in 1..=max_retries.max(1) {
        let mut request = http
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("X-ATMX-Event", event_type)
            .header("X-ATMX-Delivery", event_id.to_string());

        if let Some(secret) = secret {
            let signature = sign_payload(payload, secret);
            request = request.header("X-ATMX-Signature", format!("sha256={signature}"));
        }

        match request.body(payload.to_vec()).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    tracing::info!(url, event_type, attempt, %status, "webhook delivered");
                    return true;
                }
                if status.as_u16() != 429 && status.is_client_error() {
                    tracing::warn!(url, event_type, %status, "webhook rejected, not retrying");
                    return false;
                }
                tracing::warn!(url, event_type, attempt, %status, "webhook delivery failed, will retry");
            }
            Err(err) => {
                tracing::warn!(url, event_type, attempt, error = %err, "webhook transport error, will retry");
            }
        }

        if attempt < max_retries {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }

    tracing::error!(url, event_type, "webhook delivery exhausted retries");
    false
}
