use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::observation::Observation;
use super::{ContractId, SettlementId};
use crate::models::Metric;

/// The verdict. A `Disputed` outcome always carries a human-readable reason
/// (spec.md §9's redesign flag on dynamic-typed settlement payloads — this
/// replaces a bare string status with a tagged variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Yes,
    No,
    Disputed { reason: String },
}

impl Outcome {
    pub fn is_disputed(&self) -> bool {
        matches!(self, Outcome::Disputed { .. })
    }

    /// Webhook/event-type classification token (spec.md §4.7).
    pub fn event_type_tag(&self) -> &'static str {
        match self {
            Outcome::Yes | Outcome::No => "settled",
            Outcome::Disputed { .. } => "disputed",
        }
    }
}

/// Immutable snapshot of the contract as it stood at settlement time,
/// embedded in the evidence payload so the record is self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSnapshot {
    pub contract_id: ContractId,
    pub cell: String,
    pub metric: Metric,
    pub threshold: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSpec {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A raw reading preserved verbatim in the evidence payload, distinct from
/// the full `Observation` type so only audit-relevant fields are embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub station_id: String,
    pub instant: DateTime<Utc>,
    pub precipitation_mm: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub temperature_c: Option<f64>,
    pub snow_mm: Option<f64>,
}

impl From<&Observation> for RawObservation {
    fn from(obs: &Observation) -> Self {
        Self {
            station_id: obs.station_id.clone(),
            instant: obs.instant,
            precipitation_mm: obs.precipitation_mm,
            wind_speed_ms: obs.wind_speed_ms,
            temperature_c: obs.temperature_c,
            snow_mm: obs.snow_mm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Determination {
    pub outcome: Outcome,
    pub observed_value: Option<f64>,
    pub per_station_readings: BTreeMap<String, Option<f64>>,
}

/// The structured record of every input used to reach a settlement
/// (spec.md §3's "structured evidence payload"). A struct hierarchy with a
/// dedicated canonical-JSON encoder, not an ad-hoc `serde_json::Value` tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePayload {
    pub contract: ContractSnapshot,
    pub window: WindowSpec,
    pub raw_observations: Vec<RawObservation>,
    pub determination: Determination,
}

/// The immutable verdict, as persisted. Never mutated after write
/// (spec.md §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: SettlementId,
    pub contract_id: ContractId,
    pub outcome: Outcome,
    pub observed_value: Option<f64>,
    pub threshold: f64,
    pub unit: String,
    pub station_count: usize,
    pub per_station_readings: BTreeMap<String, Option<f64>>,
    pub evidence: EvidencePayload,
    pub previous_hash: Option<String>,
    pub record_hash: String,
    pub settled_at: DateTime<Utc>,
}

/// The subset of a `SettlementRecord`'s fields that feed the hash chain,
/// per spec.md §4.6 step 8 ("contract id, outcome, observed value,
/// threshold, settled-at, per-station readings"). Kept as its own struct so
/// the hash input is exactly and only these fields, not the whole record
/// (which would make `record_hash` self-referential).
#[derive(Debug, Clone, Serialize)]
pub struct SettlementHashPayload<'a> {
    pub contract_id: ContractId,
    pub outcome: &'a Outcome,
    pub observed_value: Option<f64>,
    pub threshold: f64,
    pub settled_at: DateTime<Utc>,
    pub per_station_readings: &'a BTreeMap<String, Option<f64>>,
}

impl SettlementRecord {
    pub fn hash_payload(&self) -> SettlementHashPayload<'_> {
        SettlementHashPayload {
            contract_id: self.contract_id,
            outcome: &self.outcome,
            observed_value: self.observed_value,
            threshold: self.threshold,
            settled_at: self.settled_at,
            per_station_readings: &self.per_station_readings,
        }
    }
}
