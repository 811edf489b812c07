//! Rust-native data model: tagged enums and struct hierarchies in place of
//! the dynamically-typed payloads the original service used.

mod contract;
mod observation;
mod pricing;
mod settlement;
mod webhook;

pub use contract::{Contract, ContractSpec, Metric, TemperatureMode};
pub use observation::{CellObservationBundle, Observation, SourceClass};
pub use pricing::PricingQuote;
pub use settlement::{
    ContractSnapshot, Determination, EvidencePayload, Outcome, RawObservation, SettlementRecord,
    WindowSpec,
};
pub use webhook::{EventType, SettlementEvent, WebhookRegistration};

pub type ContractId = uuid::Uuid;
pub type SettlementId = uuid::Uuid;
pub type WebhookId = uuid::Uuid;
