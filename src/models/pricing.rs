use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transient result of a pricing request (spec.md §3). Never persisted by
/// the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingQuote {
    pub probability: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub premium: f64,
    pub b: f64,
    pub loading_factor: f64,
    pub notional: f64,
    pub computed_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}
