//! NWS gridded-forecast client (spec.md §6) feeding the pricing engine's
//! exceedance probability. Grounded on `services/forecast.py`: `points`
//! then `forecastGridData`, falling back to a latitude/season
//! climatological baseline when the upstream call fails or doesn't cover
//! the metric in question.
//!
//! The crate treats cells as opaque strings (see `aggregator::CellIndexer`),
//! so this client takes a lat/lon centroid directly rather than reversing a
//! cell index itself — callers resolve the centroid before calling in.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Metric, TemperatureMode};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ForecastSource {
    NwsApi,
    ClimatologicalBaseline,
}

impl ForecastSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastSource::NwsApi => "nws_api",
            ForecastSource::ClimatologicalBaseline => "climatological_baseline",
        }
    }
}

/// Exceedance probability + confidence bounds for a metric/window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastEstimate {
    pub probability: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub source: ForecastSource,
}

pub struct ForecastClient {
    http: reqwest::Client,
    base_url: String,
}

impl ForecastClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns an exceedance-probability estimate for `metric` over the
    /// window, at the given centroid. Never fails: any upstream error falls
    /// back to the climatological baseline, matching `get_risk_forecast`.
    pub async fn get_forecast(
        &self,
        lat: f64,
        lon: f64,
        metric: &Metric,
        threshold: f64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> ForecastEstimate {
        match self
            .fetch_nws_forecast(lat, lon, metric, threshold, start_time, end_time)
            .await
        {
            Ok(Some(estimate)) => estimate,
            Ok(None) => climatological_baseline(lat, metric, start_time),
            Err(err) => {
                tracing::warn!(lat, lon, error = %err, "NWS forecast fetch failed, falling back to climatology");
                climatological_baseline(lat, metric, start_time)
            }
        }
    }

    async fn fetch_nws_forecast(
        &self,
        lat: f64,
        lon: f64,
        metric: &Metric,
        threshold: f64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Option<ForecastEstimate>, reqwest::Error> {
        let points_resp = self
            .http
            .get(format!("{}/points/{lat:.4},{lon:.4}", self.base_url))
            .header("User-Agent", "(atmx-risk-api, contact@atmx.dev)")
            .header("Accept", "application/geo+json")
            .send()
            .await?;
        if !points_resp.status().is_success() {
            return Ok(None);
        }
        let points_body: Value = points_resp.json().await?;
        let Some(grid_url) = points_body
            .get("properties")
            .and_then(|p| p.get("forecastGridData"))
            .and_then(|v| v.as_str())
        else {
            return Ok(None);
        };

        let grid_resp = self
            .http
            .get(grid_url)
            .header("User-Agent", "(atmx-risk-api, contact@atmx.dev)")
            .header("Accept", "application/geo+json")
            .send()
            .await?;
        if !grid_resp.status().is_success() {
            return Ok(None);
        }
        let grid_body: Value = grid_resp.json().await?;
        let grid_data = grid_body.get("properties").cloned().unwrap_or(Value::Null);

        Ok(extract_probability(&grid_data, metric, threshold, start_time, end_time))
    }
}

fn values_in_window(series: &Value, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Vec<f64> {
    let Some(entries) = series.get("values").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for entry in entries {
        let Some(val) = entry.get("value").and_then(|v| v.as_f64()) else {
            continue;
        };
        let Some(valid_time) = entry.get("validTime").and_then(|v| v.as_str()) else {
            continue;
        };
        let iso_part = valid_time.split('/').next().unwrap_or("");
        let Ok(ts) = DateTime::parse_from_rfc3339(iso_part) else {
            continue;
        };
        let ts = ts.with_timezone(&Utc);
        if ts >= start_time && ts <= end_time {
            results.push(val);
        }
    }
    results
}

fn clamp(val: f64, lo: f64, hi: f64) -> f64 {
    val.max(lo).min(hi)
}

fn bounded(exceedance: f64, spread_fraction: f64, min_spread: f64) -> ForecastEstimate {
    let spread = (exceedance * spread_fraction).max(min_spread);
    ForecastEstimate {
        probability: clamp(exceedance, 0.001, 0.999),
        confidence_lower: clamp(exceedance - spread, 0.001, 0.999),
        confidence_upper: clamp(exceedance + spread, 0.001, 0.999),
        source: ForecastSource::NwsApi,
    }
}

fn extract_probability(
    grid_data: &Value,
    metric: &Metric,
    threshold: f64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Option<ForecastEstimate> {
    match metric {
        Metric::Precipitation => {
            let pop_values = values_in_window(
                grid_data.get("probabilityOfPrecipitation").unwrap_or(&Value::Null),
                start_time,
                end_time,
            );
            let qpf_values = values_in_window(
                grid_data.get("quantitativePrecipitation").unwrap_or(&Value::Null),
                start_time,
                end_time,
            );
            let max_pop = pop_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if !max_pop.is_finite() {
                return None;
            }
            let max_pop = max_pop / 100.0;
            let max_qpf = qpf_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let max_qpf = if max_qpf.is_finite() { max_qpf } else { 0.0 };

            let exceedance = if max_qpf > 0.0 {
                max_pop * (1.0_f64.min(max_qpf / threshold))
            } else {
                max_pop * 0.3
            };
            Some(bounded(exceedance, 0.3, 0.02))
        }
        Metric::WindSpeed => {
            let wind_values = values_in_window(
                grid_data.get("windSpeed").unwrap_or(&Value::Null),
                start_time,
                end_time,
            );
            let max_wind_kmh = wind_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if !max_wind_kmh.is_finite() {
                return None;
            }
            let max_wind_ms = max_wind_kmh / 3.6;
            let ratio = max_wind_ms / threshold;
            let exceedance = clamp(1.0 / (1.0 + (-4.0 * (ratio - 0.8)).exp()), 0.001, 0.999);
            Some(bounded(exceedance, 0.25, 0.02))
        }
        Metric::Temperature { mode } => {
            let temp_values = values_in_window(
                grid_data.get("temperature").unwrap_or(&Value::Null),
                start_time,
                end_time,
            );
            if temp_values.is_empty() {
                return None;
            }
            let exceedance = match mode {
                TemperatureMode::Freeze => {
                    let min_temp = temp_values.iter().cloned().fold(f64::INFINITY, f64::min);
                    clamp(1.0 / (1.0 + (2.0 * min_temp).exp()), 0.001, 0.999)
                }
                TemperatureMode::Heat => {
                    let max_temp = temp_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    clamp(1.0 / (1.0 + (-0.5 * (max_temp - 38.0)).exp()), 0.001, 0.999)
                }
            };
            Some(bounded(exceedance, 0.2, 0.02))
        }
        // The NWS gridpoint API has no snowfall-accumulation series in this
        // window-extraction scheme; callers fall straight to climatology.
        Metric::Snow => None,
    }
}

fn climatological_baseline(lat: f64, metric: &Metric, start_time: DateTime<Utc>) -> ForecastEstimate {
    let abs_lat = lat.abs();
    let month = start_time.month();
    let is_winter = matches!(month, 11 | 12 | 1 | 2 | 3);

    let p = match metric {
        Metric::Precipitation => {
            if abs_lat < 25.0 {
                0.12
            } else if is_winter {
                0.08
            } else {
                0.15
            }
        }
        Metric::WindSpeed => {
            if abs_lat < 30.0 {
                0.06
            } else {
                0.10
            }
        }
        Metric::Temperature { mode: TemperatureMode::Freeze } => {
            if abs_lat < 25.0 {
                0.01
            } else if is_winter {
                0.40
            } else {
                0.05
            }
        }
        Metric::Temperature { mode: TemperatureMode::Heat } => {
            if abs_lat < 30.0 {
                0.30
            } else {
                0.08
            }
        }
        Metric::Snow => {
            if abs_lat < 30.0 {
                0.01
            } else if is_winter {
                0.15
            } else {
                0.02
            }
        }
    };

    let spread = (p * 0.3_f64).max(0.02);
    ForecastEstimate {
        probability: clamp(p, 0.001, 0.999),
        confidence_lower: clamp(p - spread, 0.001, 0.999),
        confidence_upper: clamp(p + spread, 0.001, 0.999),
        source: ForecastSource::ClimatologicalBaseline,
    }
}
