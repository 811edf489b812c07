use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContractId;
use crate::error::AppError;

/// Which aggregation rule applies to `Temperature` (spec.md §4.3): `Freeze`
/// takes the minimum non-missing reading, `Heat` the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureMode {
    Freeze,
    Heat,
}

/// The metric a contract is settled against. Carries its own aggregation
/// mode for `Temperature` rather than leaving it a separate string tag
/// (spec.md §9's redesign flag on dynamic-typed settlement payloads).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metric {
    Precipitation,
    WindSpeed,
    Temperature { mode: TemperatureMode },
    Snow,
}

impl Metric {
    /// Short tag used in webhook payloads and log lines (`risk_type` field).
    pub fn tag(&self) -> &'static str {
        match self {
            Metric::Precipitation => "precipitation",
            Metric::WindSpeed => "wind_speed",
            Metric::Temperature {
                mode: TemperatureMode::Freeze,
            } => "temp_freeze",
            Metric::Temperature {
                mode: TemperatureMode::Heat,
            } => "temp_heat",
            Metric::Snow => "snow",
        }
    }
}

/// Input to contract creation. Mirrors `Contract` minus server-assigned
/// fields (id, created_at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSpec {
    pub cell: String,
    pub metric: Metric,
    pub threshold: f64,
    pub unit: String,
    pub window_hours: u32,
    pub expiry: DateTime<Utc>,
    pub description: Option<String>,
}

impl ContractSpec {
    /// Validates the invariants spec.md §3 states for `Contract`: positive
    /// window bounded to a week, expiry strictly in the future, a finite
    /// positive threshold.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.window_hours == 0 || self.window_hours > 168 {
            return Err(AppError::Validation(format!(
                "window_hours must be in 1..=168, got {}",
                self.window_hours
            )));
        }
        if self.expiry <= now {
            return Err(AppError::Validation(
                "expiry must be strictly in the future".to_string(),
            ));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(AppError::Validation(
                "threshold must be a finite positive number".to_string(),
            ));
        }
        if self.cell.trim().is_empty() {
            return Err(AppError::Validation("cell must not be empty".to_string()));
        }
        Ok(())
    }
}

/// The question to be answered. Immutable once created (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub cell: String,
    pub metric: Metric,
    pub threshold: f64,
    pub unit: String,
    pub window_hours: u32,
    pub expiry: DateTime<Utc>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contract {
    pub fn from_spec(id: ContractId, spec: ContractSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            cell: spec.cell,
            metric: spec.metric,
            threshold: spec.threshold,
            unit: spec.unit,
            window_hours: spec.window_hours,
            expiry: spec.expiry,
            description: spec.description,
            created_at,
        }
    }

    /// `[window_start, window_end]` per spec.md §4.6 step 3.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.expiry - chrono::Duration::hours(self.window_hours as i64);
        (start, self.expiry)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> ContractSpec {
        ContractSpec {
            cell: "871f2a409ffffff".to_string(),
            metric: Metric::Precipitation,
            threshold: 25.0,
            unit: "mm".to_string(),
            window_hours: 24,
            expiry: Utc::now() + chrono::Duration::hours(1),
            description: None,
        }
    }

    #[test]
    fn rejects_zero_window() {
        let mut spec = base_spec();
        spec.window_hours = 0;
        assert!(spec.validate(Utc::now()).is_err());
    }

    #[test]
    fn rejects_window_over_168_hours() {
        let mut spec = base_spec();
        spec.window_hours = 169;
        assert!(spec.validate(Utc::now()).is_err());
    }

    #[test]
    fn rejects_past_expiry() {
        let mut spec = base_spec();
        spec.expiry = Utc::now() - chrono::Duration::hours(1);
        assert!(spec.validate(Utc::now()).is_err());
    }

    #[test]
    fn accepts_valid_spec() {
        let spec = base_spec();
        assert!(spec.validate(Utc::now()).is_ok());
    }

    #[test]
    fn temperature_tag_splits_by_mode() {
        let freeze = Metric::Temperature {
            mode: TemperatureMode::Freeze,
        };
        let heat = Metric::Temperature {
            mode: TemperatureMode::Heat,
        };
        assert_eq!(freeze.tag(), "temp_freeze");
        assert_eq!(heat.tag(), "temp_heat");
    }

    #[test]
    fn window_is_expiry_minus_hours() {
        let spec = base_spec();
        let contract = Contract::from_spec(uuid::Uuid::new_v4(), spec.clone(), Utc::now());
        let (start, end) = contract.window();
        assert_eq!(end, spec.expiry);
        assert_eq!(end - start, chrono::Duration::hours(24));
    }
}
