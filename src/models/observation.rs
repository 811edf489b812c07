use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Class of station a reading came from (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceClass {
    Asos,
    Awos,
    Manual,
}

/// A single station reading at an instant, already unit-converted and
/// mapped to a cell. Any metric slot may be absent — represented as `None`,
/// never as a sentinel numeric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    pub source: SourceClass,
    pub cell: String,
    pub lat: f64,
    pub lon: f64,
    pub instant: DateTime<Utc>,
    pub precipitation_mm: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub temperature_c: Option<f64>,
    pub snow_mm: Option<f64>,
    pub quality_flag: Option<String>,
}

impl Observation {
    /// True iff every metric slot is missing — such a row is otherwise
    /// dropped at parse time (spec.md §3 invariant).
    pub fn is_fully_missing(&self) -> bool {
        self.precipitation_mm.is_none()
            && self.wind_speed_ms.is_none()
            && self.temperature_c.is_none()
            && self.snow_mm.is_none()
    }
}

/// Every station observation in a window mapped to one cell (spec.md §4.2).
/// A pure data object once constructed — no further network dependency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellObservationBundle {
    pub cell: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub observations: Vec<Observation>,
}

impl CellObservationBundle {
    pub fn new(cell: impl Into<String>, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            cell: cell.into(),
            window_start: Some(window_start),
            window_end: Some(window_end),
            observations: Vec::new(),
        }
    }

    pub fn station_ids(&self) -> Vec<&str> {
        let mut seen = std::collections::BTreeSet::new();
        for obs in &self.observations {
            seen.insert(obs.station_id.as_str());
        }
        seen.into_iter().collect()
    }

    pub fn station_count(&self) -> usize {
        self.station_ids().len()
    }
}
