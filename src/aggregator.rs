//! Observation aggregator: fetch station observations for a spatial cell and
//! normalize them for the settlement engine (spec.md §4.2).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::models::{CellObservationBundle, Observation, SourceClass};

const KNOTS_TO_MS: f64 = 0.514444;

pub fn knots_to_ms(knots: f64) -> f64 {
    knots * KNOTS_TO_MS
}

pub fn ms_to_knots(ms: f64) -> f64 {
    ms / KNOTS_TO_MS
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// Known coordinates for one station (spec.md §4.2 step 1's "in-memory
/// station catalogue"). Populated via an explicit constructor, never a
/// module-level side effect (spec.md §9's redesign flag).
#[derive(Debug, Clone, Copy)]
pub struct StationCoords {
    pub lat: f64,
    pub lon: f64,
}

/// Maps a station's coordinates to the opaque cell string that identifies
/// it. The cell resolution itself is out of this crate's scope — callers
/// supply whatever indexer fits their deployment (spec.md GLOSSARY: "the
/// core treats the string as opaque").
pub trait CellIndexer: Send + Sync {
    fn cell_for(&self, lat: f64, lon: f64) -> String;
}

/// A deterministic stand-in indexer for tests and small deployments: maps
/// coordinates rounded to one decimal degree into a synthetic cell string.
/// Not a substitute for a real H3 index.
pub struct GridCellIndexer {
    pub precision: i32,
}

impl Default for GridCellIndexer {
    fn default() -> Self {
        Self { precision: 1 }
    }
}

impl CellIndexer for GridCellIndexer {
    fn cell_for(&self, lat: f64, lon: f64) -> String {
        let scale = 10f64.powi(self.precision);
        let lat_bucket = (lat * scale).round() as i64;
        let lon_bucket = (lon * scale).round() as i64;
        format!("grid:{lat_bucket}:{lon_bucket}")
    }
}

/// In-memory station registry, built once at startup.
pub struct StationCatalogue {
    stations: HashMap<String, StationCoords>,
}

impl StationCatalogue {
    pub fn new(stations: HashMap<String, StationCoords>) -> Self {
        Self { stations }
    }

    /// A small representative sample, mirroring the original service's
    /// placeholder set — a real deployment would load this from a database
    /// table of FAA/NOAA station metadata.
    pub fn sample() -> Self {
        let mut stations = HashMap::new();
        stations.insert("KJFK".to_string(), StationCoords { lat: 40.6413, lon: -73.7781 });
        stations.insert("KLAX".to_string(), StationCoords { lat: 33.9425, lon: -118.4081 });
        stations.insert("KORD".to_string(), StationCoords { lat: 41.9742, lon: -87.9073 });
        stations.insert("KATL".to_string(), StationCoords { lat: 33.6407, lon: -84.4277 });
        stations.insert("KDEN".to_string(), StationCoords { lat: 39.8561, lon: -104.6737 });
        stations.insert("KDFW".to_string(), StationCoords { lat: 32.8998, lon: -97.0403 });
        stations.insert("KSFO".to_string(), StationCoords { lat: 37.6213, lon: -122.3790 });
        stations.insert("KBOS".to_string(), StationCoords { lat: 42.3656, lon: -71.0096 });
        stations.insert("KMIA".to_string(), StationCoords { lat: 25.7959, lon: -80.2870 });
        stations.insert("KSEA".to_string(), StationCoords { lat: 47.4502, lon: -122.3088 });
        Self::new(stations)
    }

    /// Every station whose coordinates map to `cell` under `indexer`.
    pub fn stations_in_cell(&self, cell: &str, indexer: &dyn CellIndexer) -> Vec<(String, StationCoords)> {
        self.stations
            .iter()
            .filter(|(_, coords)| indexer.cell_for(coords.lat, coords.lon) == cell)
            .map(|(id, coords)| (id.clone(), *coords))
            .collect()
    }
}

/// Source of cell observation bundles for the settlement driver. Injectable
/// so tests can supply a fixed bundle without a network dependency
/// (spec.md §4.6 step 4).
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn get_cell_observations(
        &self,
        cell: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> CellObservationBundle;
}

/// Client for the Iowa Environmental Mesonet (IEM) ASOS/AWOS archive
/// (spec.md §6). Holds a shared `reqwest::Client` built once and injected,
/// not instantiated per call (spec.md §9's redesign flag).
pub struct IemAsosClient {
    http: reqwest::Client,
    base_url: String,
    catalogue: StationCatalogue,
    indexer: Box<dyn CellIndexer>,
    request_timeout: Duration,
}

impl IemAsosClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        catalogue: StationCatalogue,
        indexer: Box<dyn CellIndexer>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            catalogue,
            indexer,
            request_timeout,
        }
    }

    async fn fetch_station_rows(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("station", station_id),
                ("data", "p01m,sknt,tmpf"),
                ("tz", "Etc/UTC"),
                ("format", "comma"),
                ("latlon", "yes"),
                ("year1", &start.format("%Y").to_string()),
                ("month1", &start.format("%m").to_string()),
                ("day1", &start.format("%d").to_string()),
                ("hour1", &start.format("%H").to_string()),
                ("year2", &end.format("%Y").to_string()),
                ("month2", &end.format("%m").to_string()),
                ("day2", &end.format("%d").to_string()),
                ("hour2", &end.format("%H").to_string()),
            ])
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ObservationSource for IemAsosClient {
    async fn get_cell_observations(
        &self,
        cell: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> CellObservationBundle {
        let mut bundle = CellObservationBundle::new(cell, window_start, window_end);
        let stations = self.catalogue.stations_in_cell(cell, self.indexer.as_ref());

        for (station_id, coords) in stations {
            let body = match self.fetch_station_rows(&station_id, window_start, window_end).await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(station = %station_id, error = %err, "failed to fetch ASOS observations");
                    continue;
                }
            };

            let rows = parse_iem_csv(&body, &station_id, coords, cell);
            bundle.observations.extend(rows);
        }

        tracing::info!(
            cell,
            observations = bundle.observations.len(),
            stations = bundle.station_count(),
            "assembled cell observation bundle"
        );
        bundle
    }
}

/// Parses an IEM Mesonet comma-format response. Comment lines (`#`-prefixed)
/// and the header row are skipped; a row that fails to parse is dropped
/// silently rather than failing the whole fetch (spec.md §4.2 step 3).
fn parse_iem_csv(
    body: &str,
    station_id: &str,
    coords: StationCoords,
    cell: &str,
) -> Vec<Observation> {
    let mut lines = body.lines().filter(|l| !l.starts_with('#'));
    let header = match lines.next() {
        Some(h) => h,
        None => return Vec::new(),
    };
    let columns: Vec<&str> = header.split(',').collect();
    let idx = |name: &str| columns.iter().position(|c| *c == name);

    let valid_idx = match idx("valid") {
        Some(i) => i,
        None => return Vec::new(),
    };
    let precip_idx = idx("p01m");
    let wind_idx = idx("sknt");
    let temp_idx = idx("tmpf");

    let mut observations = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        let Some(raw_valid) = fields.get(valid_idx) else {
            continue;
        };
        let instant = match parse_iem_timestamp(raw_valid) {
            Some(t) => t,
            None => continue,
        };

        let precipitation_mm = precip_idx.and_then(|i| fields.get(i)).and_then(|v| parse_missing_float(v));
        let wind_knots = wind_idx.and_then(|i| fields.get(i)).and_then(|v| parse_missing_float(v));
        let temp_f = temp_idx.and_then(|i| fields.get(i)).and_then(|v| parse_missing_float(v));

        let obs = Observation {
            station_id: station_id.to_string(),
            source: SourceClass::Asos,
            cell: cell.to_string(),
            lat: coords.lat,
            lon: coords.lon,
            instant,
            precipitation_mm,
            wind_speed_ms: wind_knots.map(knots_to_ms),
            temperature_c: temp_f.map(fahrenheit_to_celsius),
            snow_mm: None,
            quality_flag: None,
        };
        if !obs.is_fully_missing() {
            observations.push(obs);
        }
    }
    observations
}

/// Parses the IEM `YYYY-MM-DD HH:MM` timestamp as UTC-naive, then tags it
/// UTC (spec.md §4.2 step 3 — never an ambiguous local time).
fn parse_iem_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// `""`, `"M"` (missing), and `"T"` (trace) all map to "missing"
/// (spec.md §4.2 step 3 / §6).
fn parse_missing_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("M") || trimmed.eq_ignore_ascii_case("T") {
        return None;
    }
    trimmed.parse::<f64>().ok()
}
