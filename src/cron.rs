//! Settlement cron: a background supervisor that discovers expired
//! contracts and drives them through settlement (spec.md §4.7).
//!
//! Owned explicitly by the process entry point via `start`/`stop`/`join`,
//! not tied to any web framework's lifespan hook (spec.md §9's redesign
//! flag) — mirroring the teacher's own practice of spawning background
//! tasks directly in `main.rs` rather than through axum extensions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::driver::SettlementDriver;
use crate::models::{EventType, Outcome, SettlementEvent};
use crate::store::RecordStore;
use crate::webhook::dispatcher::WebhookDispatcher;

pub struct SettlementCron {
    store: Arc<dyn RecordStore>,
    driver: Arc<SettlementDriver>,
    dispatcher: Arc<WebhookDispatcher>,
    interval: std::time::Duration,
    stop_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl SettlementCron {
    pub fn new(
        store: Arc<dyn RecordStore>,
        driver: Arc<SettlementDriver>,
        dispatcher: Arc<WebhookDispatcher>,
        interval: std::time::Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            driver,
            dispatcher,
            interval,
            stop_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: None,
        }
    }

    /// Spawns the cron loop. Idempotent no-op if already running.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let store = self.store.clone();
        let driver = self.driver.clone();
        let dispatcher = self.dispatcher.clone();
        let interval_duration = self.interval;
        let stop_flag = self.stop_flag.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval_duration);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if stop_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(err) = run_tick(&store, &driver, &dispatcher).await {
                            tracing::error!(error = %err, "settlement cron tick failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("settlement cron received shutdown signal");
                        break;
                    }
                }
            }
            tracing::info!("settlement cron stopped");
        });
        self.handle = Some(handle);
    }

    /// Signals the loop to stop after the in-flight tick completes.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Awaits loop termination. Consumes the handle; safe to call once.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "settlement cron task panicked");
            }
        }
    }
}

/// One pass over all expired, unsettled contracts. Settlements run
/// sequentially within the tick to keep the hash chain linearizable
/// (spec.md §5) — contrast with webhook fan-out, which is concurrent.
async fn run_tick(
    store: &Arc<dyn RecordStore>,
    driver: &Arc<SettlementDriver>,
    dispatcher: &Arc<WebhookDispatcher>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let expired = store.list_expired_contracts(now).await?;
    if expired.is_empty() {
        return Ok(());
    }
    tracing::info!(count = expired.len(), "settlement cron found expired contracts");

    for contract in expired {
        let record = match driver.settle(contract.id, None).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(contract_id = %contract.id, error = %err, "settlement attempt failed, will retry next tick");
                continue;
            }
        };

        let event_type = classify(&record.outcome);
        let event = SettlementEvent {
            event_id: uuid::Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            contract_id: record.contract_id,
            h3_index: contract.cell.clone(),
            risk_type: contract.metric.tag().to_string(),
            outcome: outcome_token(&record.outcome).to_string(),
            observed_value: record.observed_value,
            settled_at: Some(record.settled_at),
            record_hash: Some(record.record_hash.clone()),
        };

        let delivered = dispatcher.dispatch(event).await;
        tracing::info!(contract_id = %record.contract_id, delivered, "webhook dispatch complete");
    }

    Ok(())
}

/// `{YES, NO} → settled`, `DISPUTED → disputed` (spec.md §4.7). There is no
/// "anomalous fallback" path in this implementation's `Outcome` enum — every
/// variant is exhaustively one of the two documented cases.
fn classify(outcome: &Outcome) -> EventType {
    match outcome {
        Outcome::Yes | Outcome::No => EventType::Settled,
        Outcome::Disputed { .. } => EventType::Disputed,
    }
}

fn outcome_token(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Yes => "YES",
        Outcome::No => "NO",
        Outcome::Disputed { .. } => "DISPUTED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_yes_no_to_settled_and_disputed_to_disputed() {
        assert!(matches!(classify(&Outcome::Yes), EventType::Settled));
        assert!(matches!(classify(&Outcome::No), EventType::Settled));
        assert!(matches!(
            classify(&Outcome::Disputed {
                reason: "x".to_string()
            }),
            EventType::Disputed
        ));
    }
}
