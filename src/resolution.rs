//! Pure resolution logic: contract + observation bundle → outcome
//! (spec.md §4.3). No I/O, no side effects, deterministic across runs.

use std::collections::BTreeMap;

use crate::config::AppConfig;
use crate::models::{CellObservationBundle, Contract, Metric, Observation, Outcome, TemperatureMode};

/// Everything `resolve` produces besides the outcome itself.
pub struct ResolutionResult {
    pub outcome: Outcome,
    pub observed_value: Option<f64>,
    pub per_station_readings: BTreeMap<String, Option<f64>>,
}

/// Implements the five resolution rules of spec.md §4.3, in order.
pub fn resolve(contract: &Contract, bundle: &CellObservationBundle, config: &AppConfig) -> ResolutionResult {
    // Rule 1: empty bundle.
    if bundle.station_count() == 0 {
        return ResolutionResult {
            outcome: Outcome::Disputed {
                reason: "no stations found in cell".to_string(),
            },
            observed_value: None,
            per_station_readings: BTreeMap::new(),
        };
    }

    let per_station = aggregate_by_station(contract.metric, &bundle.observations);
    let valid: BTreeMap<&String, f64> = per_station
        .iter()
        .filter_map(|(sid, val)| val.map(|v| (sid, v)))
        .collect();

    // Rule 2: full outage.
    if valid.is_empty() {
        return ResolutionResult {
            outcome: Outcome::Disputed {
                reason: "all station readings missing".to_string(),
            },
            observed_value: None,
            per_station_readings: per_station,
        };
    }

    // Rule 3: insufficient stations.
    if valid.len() < config.min_stations {
        return ResolutionResult {
            outcome: Outcome::Disputed {
                reason: format!(
                    "only {} valid station(s), minimum {} required",
                    valid.len(),
                    config.min_stations
                ),
            },
            observed_value: None,
            per_station_readings: per_station,
        };
    }

    // Values in station-id order for a fixed summation order (determinism,
    // spec.md §4.3 "Determinism").
    let values: Vec<f64> = valid.values().copied().collect();

    // Rule 4: station-level conflict (only checkable with >= 2 stations).
    if values.len() > 1 {
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let spread = max - min;
        let mean = values.iter().sum::<f64>() / values.len() as f64;

        if mean > 0.0 && (spread / mean) > config.disputed_spread_ratio {
            return ResolutionResult {
                outcome: Outcome::Disputed {
                    reason: format!(
                        "station readings conflict: spread={spread:.2}, mean={mean:.2}, ratio={:.2}%",
                        (spread / mean) * 100.0
                    ),
                },
                observed_value: Some(mean),
                per_station_readings: per_station,
            };
        }
    }

    // Rule 5: normal resolution.
    let observed = values.iter().sum::<f64>() / values.len() as f64;
    let outcome = if observed > contract.threshold {
        Outcome::Yes
    } else {
        Outcome::No
    };

    ResolutionResult {
        outcome,
        observed_value: Some(observed),
        per_station_readings: per_station,
    }
}

/// Per-station roll-up, dispatching on the contract metric (spec.md §4.3's
/// aggregation table). A station with zero non-missing readings for the
/// metric is recorded with value `None`.
fn aggregate_by_station(metric: Metric, observations: &[Observation]) -> BTreeMap<String, Option<f64>> {
    let mut by_station: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut all_stations: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for obs in observations {
        all_stations.insert(obs.station_id.clone());
        let value = match metric {
            Metric::Precipitation => obs.precipitation_mm,
            Metric::WindSpeed => obs.wind_speed_ms,
            Metric::Temperature { .. } => obs.temperature_c,
            Metric::Snow => obs.snow_mm,
        };
        if let Some(v) = value {
            by_station.entry(obs.station_id.clone()).or_default().push(v);
        }
    }

    let mut result = BTreeMap::new();
    for sid in all_stations {
        let agg = match by_station.get(&sid) {
            None => None,
            Some(vals) if vals.is_empty() => None,
            Some(vals) => Some(aggregate_values(metric, vals)),
        };
        result.insert(sid, agg);
    }
    result
}

fn aggregate_values(metric: Metric, values: &[f64]) -> f64 {
    match metric {
        Metric::Precipitation | Metric::Snow => values.iter().sum(),
        Metric::WindSpeed => values.iter().cloned().fold(f64::MIN, f64::max),
        Metric::Temperature {
            mode: TemperatureMode::Freeze,
        } => values.iter().cloned().fold(f64::MAX, f64::min),
        Metric::Temperature {
            mode: TemperatureMode::Heat,
        } => values.iter().cloned().fold(f64::MIN, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContractSpec, SourceClass};
    use chrono::{Duration, Utc};

    fn contract_with(metric: Metric, threshold: f64) -> Contract {
        let spec = ContractSpec {
            cell: "cell-a".to_string(),
            metric,
            threshold,
            unit: "mm".to_string(),
            window_hours: 24,
            expiry: Utc::now() + Duration::hours(1),
            description: None,
        };
        Contract::from_spec(uuid::Uuid::new_v4(), spec, Utc::now())
    }

    fn reading(station: &str, precip: Option<f64>, wind: Option<f64>) -> Observation {
        Observation {
            station_id: station.to_string(),
            source: SourceClass::Asos,
            cell: "cell-a".to_string(),
            lat: 0.0,
            lon: 0.0,
            instant: Utc::now(),
            precipitation_mm: precip,
            wind_speed_ms: wind,
            temperature_c: None,
            snow_mm: None,
            quality_flag: None,
        }
    }

    fn bundle(observations: Vec<Observation>) -> CellObservationBundle {
        CellObservationBundle {
            cell: "cell-a".to_string(),
            window_start: Some(Utc::now() - Duration::hours(24)),
            window_end: Some(Utc::now()),
            observations,
        }
    }

    #[test]
    fn precip_yes_sums_readings_above_threshold() {
        let contract = contract_with(Metric::Precipitation, 25.0);
        let b = bundle(vec![
            reading("A", Some(10.0), None),
            reading("A", Some(12.0), None),
            reading("A", Some(8.0), None),
        ]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        assert_eq!(result.outcome, Outcome::Yes);
        assert_eq!(result.observed_value, Some(30.0));
    }

    #[test]
    fn precip_no_sums_readings_below_threshold() {
        let contract = contract_with(Metric::Precipitation, 25.0);
        let b = bundle(vec![
            reading("A", Some(8.0), None),
            reading("A", Some(7.0), None),
            reading("A", Some(5.0), None),
        ]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        assert_eq!(result.outcome, Outcome::No);
        assert_eq!(result.observed_value, Some(20.0));
    }

    #[test]
    fn wind_peak_takes_max() {
        let contract = contract_with(Metric::WindSpeed, 15.0);
        let b = bundle(vec![
            reading("A", None, Some(10.0)),
            reading("A", None, Some(18.0)),
            reading("A", None, Some(12.0)),
        ]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        assert_eq!(result.outcome, Outcome::Yes);
        assert_eq!(result.observed_value, Some(18.0));
    }

    #[test]
    fn conflicting_stations_dispute_with_mean_observed() {
        let contract = contract_with(Metric::Precipitation, 25.0);
        let b = bundle(vec![
            reading("A", Some(30.0), None),
            reading("B", Some(10.0), None),
        ]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        match result.outcome {
            Outcome::Disputed { reason } => assert!(reason.contains("conflict")),
            other => panic!("expected disputed, got {other:?}"),
        }
        assert_eq!(result.observed_value, Some(20.0));
    }

    #[test]
    fn full_outage_disputes_with_null_value() {
        let contract = contract_with(Metric::Precipitation, 25.0);
        let b = bundle(vec![reading("A", None, None), reading("B", None, None)]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        match result.outcome {
            Outcome::Disputed { reason } => assert!(reason.contains("missing")),
            other => panic!("expected disputed, got {other:?}"),
        }
        assert_eq!(result.observed_value, None);
    }

    #[test]
    fn empty_bundle_disputes() {
        let contract = contract_with(Metric::Precipitation, 25.0);
        let b = bundle(vec![]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        match result.outcome {
            Outcome::Disputed { reason } => assert!(reason.contains("no stations")),
            other => panic!("expected disputed, got {other:?}"),
        }
    }

    #[test]
    fn equality_resolves_to_no_strict_inequality() {
        let contract = contract_with(Metric::Precipitation, 20.0);
        let b = bundle(vec![reading("A", Some(20.0), None)]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        assert_eq!(result.outcome, Outcome::No);
    }

    #[test]
    fn all_zero_readings_never_dispute_on_spread() {
        let contract = contract_with(Metric::Precipitation, 5.0);
        let b = bundle(vec![reading("A", Some(0.0), None), reading("B", Some(0.0), None)]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        assert_eq!(result.outcome, Outcome::No);
        assert_eq!(result.observed_value, Some(0.0));
    }

    #[test]
    fn single_valid_station_skips_spread_check() {
        let contract = contract_with(Metric::Precipitation, 5.0);
        let b = bundle(vec![reading("A", Some(100.0), None)]);
        let result = resolve(&contract, &b, &AppConfig::from_env());
        assert_eq!(result.outcome, Outcome::Yes);
        assert_eq!(result.observed_value, Some(100.0));
    }
}
