//! Application configuration loaded from the environment.
//!
//! Follows the teacher's `Config::from_env` pattern: `dotenv` first, then
//! `std::env::var` with typed defaults, no panics on malformed input.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub port: u16,

    pub asos_base_url: String,
    pub nws_api_base: String,
    pub market_engine_url: String,

    /// Minimum number of stations with a valid aggregate required to settle
    /// without a dispute (spec.md §4.3, rule 3).
    pub min_stations: usize,
    /// Spread/mean ratio above which stations are considered in conflict
    /// (spec.md §4.3, rule 4).
    pub disputed_spread_ratio: f64,

    pub cron_interval: Duration,

    pub webhook_timeout: Duration,
    pub webhook_max_retries: u32,

    pub lmsr_b: f64,
    pub lmsr_loading_factor: f64,
    pub lmsr_notional: f64,

    pub price_validity_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            database_path: env_string("DATABASE_PATH", "./atmx_settlement.db"),
            port: env_parse("PORT", 8080),

            asos_base_url: env_string(
                "ASOS_BASE_URL",
                "https://mesonet.agron.iastate.edu/cgi-bin/request/asos.py",
            ),
            nws_api_base: env_string("NWS_API_BASE", "https://api.weather.gov"),
            market_engine_url: env_string("MARKET_ENGINE_URL", "http://localhost:8090"),

            min_stations: env_parse("MIN_STATIONS", 1),
            disputed_spread_ratio: env_parse("DISPUTED_SPREAD_RATIO", 0.20),

            cron_interval: Duration::from_secs(env_parse("CRON_INTERVAL", 30)),

            webhook_timeout: Duration::from_secs(env_parse("WEBHOOK_TIMEOUT", 10)),
            webhook_max_retries: env_parse("MAX_RETRIES", 3),

            lmsr_b: env_parse("LMSR_B", 100.0),
            lmsr_loading_factor: env_parse("LMSR_LOADING_FACTOR", 0.10),
            lmsr_notional: env_parse("LMSR_NOTIONAL", 10.0),

            price_validity_minutes: env_parse("PRICE_VALIDITY_MINUTES", 5),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
