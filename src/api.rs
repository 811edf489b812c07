//! Thin HTTP surface over the core operations (SPEC_FULL.md §10). No auth,
//! API-key, or rate-limiting middleware — those are out of scope. Mirrors
//! the route surface of `settlement-oracle/app/api/routes.py` and
//! `risk-api/app/api/v1/routes.py`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::driver::SettlementDriver;
use crate::error::AppError;
use crate::hashchain;
use crate::market_client::MarketEngineClient;
use crate::models::{Contract, ContractId, ContractSpec, EventType, PricingQuote, SettlementRecord, WebhookId};
use crate::pricing::PricingEngine;
use crate::store::RecordStore;
use crate::webhook::store::WebhookStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub driver: Arc<SettlementDriver>,
    pub webhooks: Arc<WebhookStore>,
    pub pricing: Arc<PricingEngine>,
    pub market: Arc<MarketEngineClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/contracts", post(create_contract))
        .route("/contracts/:id", get(get_contract))
        .route("/settle/:id", post(settle_contract))
        .route("/settlements/:id", get(get_settlement))
        .route("/settlements/:id/verify", post(verify_settlement))
        .route("/webhooks", post(register_webhook))
        .route("/webhooks/:id", delete(remove_webhook))
        .route("/price", get(price_quote))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_contract(
    State(state): State<AppState>,
    Json(spec): Json<ContractSpec>,
) -> Result<Json<Contract>, AppError> {
    spec.validate(Utc::now())?;
    let contract = state.store.create_contract(spec).await?;

    // Market creation is non-fatal (SPEC_FULL.md §4.10): a down market
    // engine must never block contract registration.
    if let Err(err) = state.market.create_market(contract.id, None).await {
        tracing::warn!(contract_id = %contract.id, error = %err, "market engine error (non-fatal)");
    }

    Ok(Json(contract))
}

async fn get_contract(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
) -> Result<Json<Contract>, AppError> {
    let contract = state
        .store
        .get_contract(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("contract {id} not found")))?;
    Ok(Json(contract))
}

async fn settle_contract(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
) -> Result<Json<SettlementRecord>, AppError> {
    let record = state.driver.settle(id, None).await?;
    Ok(Json(record))
}

async fn get_settlement(
    State(state): State<AppState>,
    Path(contract_id): Path<ContractId>,
) -> Result<Json<SettlementRecord>, AppError> {
    let record = state
        .store
        .get_settlement_by_contract(contract_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("settlement for contract {contract_id} not found")))?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    valid: bool,
}

async fn verify_settlement(
    State(state): State<AppState>,
    Path(contract_id): Path<ContractId>,
) -> Result<Json<VerifyResponse>, AppError> {
    let record = state
        .store
        .get_settlement_by_contract(contract_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("settlement for contract {contract_id} not found")))?;

    let payload = record.hash_payload();
    let valid = hashchain::verify(&payload, record.previous_hash.as_deref(), &record.record_hash)
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(VerifyResponse { valid }))
}

#[derive(Debug, Deserialize)]
struct WebhookRegistrationRequest {
    url: String,
    events: Vec<EventType>,
    secret: Option<String>,
}

async fn register_webhook(
    State(state): State<AppState>,
    Json(req): Json<WebhookRegistrationRequest>,
) -> Result<Json<crate::models::WebhookRegistration>, AppError> {
    if req.url.trim().is_empty() {
        return Err(AppError::Validation("url must not be empty".to_string()));
    }
    if req.events.is_empty() {
        return Err(AppError::Validation("events must not be empty".to_string()));
    }
    let registration = state.webhooks.register(req.url, req.events, req.secret);
    Ok(Json(registration))
}

async fn remove_webhook(State(state): State<AppState>, Path(id): Path<WebhookId>) -> Result<(), AppError> {
    if state.webhooks.remove(id) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("webhook {id} not found")))
    }
}

#[derive(Debug, Deserialize)]
struct PriceQuery {
    probability: f64,
    #[serde(default)]
    confidence_low: Option<f64>,
    #[serde(default)]
    confidence_high: Option<f64>,
}

async fn price_quote(
    State(state): State<AppState>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PricingQuote>, AppError> {
    if !query.probability.is_finite() || !(0.0..=1.0).contains(&query.probability) {
        return Err(AppError::Validation("probability must be in [0, 1]".to_string()));
    }
    let low = query.confidence_low.unwrap_or(query.probability);
    let high = query.confidence_high.unwrap_or(query.probability);
    let quote = state.pricing.quote(query.probability, low, high);
    Ok(Json(quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{GridCellIndexer, IemAsosClient, StationCatalogue};
    use crate::config::AppConfig;
    use crate::store::SqliteRecordStore;
    use crate::webhook::dispatcher::WebhookDispatcher;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn make_state() -> AppState {
        let config = AppConfig::from_env();
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open_memory().unwrap());
        let http = reqwest::Client::new();
        let source = Arc::new(IemAsosClient::new(
            http.clone(),
            "https://example.invalid".to_string(),
            StationCatalogue::sample(),
            Box::new(GridCellIndexer::default()),
            std::time::Duration::from_secs(1),
        ));
        let driver = Arc::new(SettlementDriver::new(store.clone(), source, config.clone()));
        let webhooks = Arc::new(WebhookStore::new());
        let _dispatcher = Arc::new(WebhookDispatcher::new(
            http,
            webhooks.clone(),
            config.webhook_timeout,
            config.webhook_max_retries,
        ));
        let pricing = Arc::new(PricingEngine::from_config(&config));
        let market = Arc::new(MarketEngineClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
        ));
        AppState {
            store,
            driver,
            webhooks,
            pricing,
            market,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_contract_round_trips() {
        let app = router(make_state());
        let body = serde_json::json!({
            "cell": "grid:1:1",
            "metric": {"type": "precipitation"},
            "threshold": 25.0,
            "unit": "mm",
            "window_hours": 24,
            "expiry": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            "description": null,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/contracts")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: Contract = serde_json::from_slice(&bytes).unwrap();

        let fetch = app
            .oneshot(
                Request::builder()
                    .uri(format!("/contracts/{}", created.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetch.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_missing_contract_is_404() {
        let app = router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/contracts/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn price_endpoint_rejects_out_of_range_probability() {
        let app = router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/price?probability=1.5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn price_endpoint_returns_a_premium() {
        let app = router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/price?probability=0.6")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let quote: PricingQuote = serde_json::from_slice(&bytes).unwrap();
        assert!(quote.premium >= 0.01);
    }

    #[tokio::test]
    async fn register_and_remove_webhook() {
        let app = router(make_state());
        let body = serde_json::json!({
            "url": "https://example.com/hook",
            "events": ["settled"],
            "secret": "shh",
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reg: crate::models::WebhookRegistration = serde_json::from_slice(&bytes).unwrap();

        let delete_response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/webhooks/{}", reg.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete_response.status(), StatusCode::OK);
    }
}
