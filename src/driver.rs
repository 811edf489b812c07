//! Settlement driver: orchestrates load → aggregate → resolve → hash →
//! persist (spec.md §4.6).

use std::sync::Arc;

use chrono::Utc;

use crate::aggregator::ObservationSource;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::hashchain;
use crate::models::{
    ContractId, ContractSnapshot, Determination, EvidencePayload, RawObservation, SettlementRecord,
    WindowSpec,
};
use crate::resolution::resolve;
use crate::store::{AppendOutcome, RecordStore};

pub struct SettlementDriver {
    store: Arc<dyn RecordStore>,
    observations: Arc<dyn ObservationSource>,
    config: AppConfig,
}

impl SettlementDriver {
    pub fn new(store: Arc<dyn RecordStore>, observations: Arc<dyn ObservationSource>, config: AppConfig) -> Self {
        Self {
            store,
            observations,
            config,
        }
    }

    /// The ten-step algorithm of spec.md §4.6. `injected_bundle` lets tests
    /// supply a fixed bundle without a network dependency.
    pub async fn settle(
        &self,
        contract_id: ContractId,
        injected_bundle: Option<crate::models::CellObservationBundle>,
    ) -> Result<SettlementRecord, AppError> {
        // 1. Load contract.
        let contract = self
            .store
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("contract {contract_id} not found")))?;

        // 2. Idempotency: return existing record unchanged.
        if let Some(existing) = self.store.get_settlement_by_contract(contract_id).await? {
            tracing::info!(%contract_id, outcome = ?existing.outcome, "contract already settled");
            return Ok(existing);
        }

        // 3. Window.
        let (window_start, window_end) = contract.window();

        // 4. Acquire the observation bundle.
        let bundle = match injected_bundle {
            Some(bundle) => bundle,
            None => {
                self.observations
                    .get_cell_observations(&contract.cell, window_start, window_end)
                    .await
            }
        };

        // 5. Resolve.
        let resolution = resolve(&contract, &bundle, &self.config);

        // 6. Build evidence payload.
        let evidence = EvidencePayload {
            contract: ContractSnapshot {
                contract_id: contract.id,
                cell: contract.cell.clone(),
                metric: contract.metric,
                threshold: contract.threshold,
                unit: contract.unit.clone(),
            },
            window: WindowSpec {
                start: window_start,
                end: window_end,
            },
            raw_observations: bundle.observations.iter().map(RawObservation::from).collect(),
            determination: Determination {
                outcome: resolution.outcome.clone(),
                observed_value: resolution.observed_value,
                per_station_readings: resolution.per_station_readings.clone(),
            },
        };

        // 7. Read latest hash for chaining.
        let previous_hash = self.store.latest_settlement_hash().await?;

        let settled_at = Utc::now();
        let record_id = uuid::Uuid::new_v4();

        // 8. Compute record hash over the canonical settlement payload.
        let hash_payload = crate::models::SettlementHashPayload {
            contract_id: contract.id,
            outcome: &resolution.outcome,
            observed_value: resolution.observed_value,
            threshold: contract.threshold,
            settled_at,
            per_station_readings: &resolution.per_station_readings,
        };
        let record_hash = hashchain::hash(&hash_payload, previous_hash.as_deref())
            .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;

        let record = SettlementRecord {
            id: record_id,
            contract_id: contract.id,
            outcome: resolution.outcome,
            observed_value: resolution.observed_value,
            threshold: contract.threshold,
            unit: contract.unit.clone(),
            station_count: bundle.station_count(),
            per_station_readings: resolution.per_station_readings,
            evidence,
            previous_hash,
            record_hash,
            settled_at,
        };

        // 9. Append atomically; the loser of a race returns the winner.
        match self.store.append_settlement(record).await? {
            AppendOutcome::Inserted(record) => {
                tracing::info!(
                    %contract_id,
                    outcome = ?record.outcome,
                    observed = ?record.observed_value,
                    "settled contract"
                );
                Ok(record)
            }
            AppendOutcome::AlreadyExists(existing) => {
                tracing::info!(%contract_id, "lost settlement race, returning winning record");
                Ok(existing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::IemAsosClient;
    use crate::models::{CellObservationBundle, ContractSpec, Metric, Observation, Outcome, SourceClass};
    use crate::store::SqliteRecordStore;
    use chrono::Duration;

    fn make_driver() -> (SettlementDriver, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open_memory().unwrap());
        let http = reqwest::Client::new();
        let source: Arc<dyn ObservationSource> = Arc::new(IemAsosClient::new(
            http,
            "https://example.invalid".to_string(),
            crate::aggregator::StationCatalogue::sample(),
            Box::new(crate::aggregator::GridCellIndexer::default()),
            std::time::Duration::from_secs(1),
        ));
        let driver = SettlementDriver::new(store.clone(), source, AppConfig::from_env());
        (driver, store)
    }

    #[tokio::test]
    async fn settle_not_found_contract_errors() {
        let (driver, _store) = make_driver();
        let result = driver.settle(uuid::Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn settle_is_idempotent() {
        let (driver, store) = make_driver();
        let spec = ContractSpec {
            cell: "cell-a".to_string(),
            metric: Metric::Precipitation,
            threshold: 25.0,
            unit: "mm".to_string(),
            window_hours: 24,
            expiry: Utc::now() + Duration::hours(1),
            description: None,
        };
        let contract = store.create_contract(spec).await.unwrap();

        let obs = Observation {
            station_id: "A".to_string(),
            source: SourceClass::Asos,
            cell: "cell-a".to_string(),
            lat: 0.0,
            lon: 0.0,
            instant: Utc::now(),
            precipitation_mm: Some(30.0),
            wind_speed_ms: None,
            temperature_c: None,
            snow_mm: None,
            quality_flag: None,
        };
        let bundle = CellObservationBundle {
            cell: "cell-a".to_string(),
            window_start: Some(Utc::now() - Duration::hours(24)),
            window_end: Some(Utc::now()),
            observations: vec![obs],
        };

        let first = driver.settle(contract.id, Some(bundle.clone())).await.unwrap();
        assert_eq!(first.outcome, Outcome::Yes);

        let second = driver.settle(contract.id, Some(bundle)).await.unwrap();
        assert_eq!(second.record_hash, first.record_hash);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn chain_links_across_three_contracts() {
        let (driver, store) = make_driver();
        let mut contract_ids = Vec::new();
        for i in 0..3 {
            let spec = ContractSpec {
                cell: "cell-a".to_string(),
                metric: Metric::Precipitation,
                threshold: 25.0,
                unit: "mm".to_string(),
                window_hours: 24,
                expiry: Utc::now() + Duration::hours(1) + Duration::seconds(i),
                description: None,
            };
            contract_ids.push(store.create_contract(spec).await.unwrap().id);
        }

        let obs = Observation {
            station_id: "A".to_string(),
            source: SourceClass::Asos,
            cell: "cell-a".to_string(),
            lat: 0.0,
            lon: 0.0,
            instant: Utc::now(),
            precipitation_mm: Some(10.0),
            wind_speed_ms: None,
            temperature_c: None,
            snow_mm: None,
            quality_flag: None,
        };
        let bundle = CellObservationBundle {
            cell: "cell-a".to_string(),
            window_start: Some(Utc::now() - Duration::hours(24)),
            window_end: Some(Utc::now()),
            observations: vec![obs],
        };

        let mut records = Vec::new();
        for id in contract_ids {
            records.push(driver.settle(id, Some(bundle.clone())).await.unwrap());
        }

        assert_eq!(records[0].previous_hash, None);
        assert_eq!(records[1].previous_hash.as_deref(), Some(records[0].record_hash.as_str()));
        assert_eq!(records[2].previous_hash.as_deref(), Some(records[1].record_hash.as_str()));

        for record in &records {
            let payload = record.hash_payload();
            assert!(hashchain::verify(&payload, record.previous_hash.as_deref(), &record.record_hash).unwrap());
        }
    }
}
