//! Outbound RPC to the separate market microservice (spec.md §6, §4.10).
//! Only a create-market call is in scope per spec.md §1; the others mirror
//! the full original interface for completeness of the adapter.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ContractId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHandle {
    pub id: String,
    pub contract_id: ContractId,
    #[serde(default)]
    pub b: Option<f64>,
}

pub struct MarketEngineClient {
    http: reqwest::Client,
    base_url: String,
}

impl MarketEngineClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `POST /api/v1/markets {contract_id}`. Non-fatal on failure per
    /// spec.md §4.10 — callers log and continue rather than failing
    /// contract creation or settlement.
    pub async fn create_market(&self, contract_id: ContractId, liquidity_b: Option<f64>) -> Result<MarketHandle, AppError> {
        let mut body = serde_json::json!({ "contract_id": contract_id });
        if let Some(b) = liquidity_b {
            body["b"] = serde_json::json!(b);
        }

        let resp = self
            .http
            .post(format!("{}/api/v1/markets", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("cannot reach market engine: {err}")))?;

        if resp.status().is_client_error() || resp.status().is_server_error() {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::UpstreamClientError { status, detail });
        }

        resp.json::<MarketHandle>()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("malformed market engine response: {err}")))
    }

    pub async fn get_market(&self, market_id: &str) -> Result<Option<MarketHandle>, AppError> {
        let resp = self
            .http
            .get(format!("{}/api/v1/markets/{market_id}", self.base_url))
            .send()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("cannot reach market engine: {err}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if resp.status().is_client_error() || resp.status().is_server_error() {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::UpstreamClientError { status, detail });
        }
        let handle = resp
            .json::<MarketHandle>()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("malformed market engine response: {err}")))?;
        Ok(Some(handle))
    }

    pub async fn list_markets(&self) -> Result<Vec<MarketHandle>, AppError> {
        let resp = self
            .http
            .get(format!("{}/api/v1/markets", self.base_url))
            .send()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("cannot reach market engine: {err}")))?;

        if resp.status().is_client_error() || resp.status().is_server_error() {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::UpstreamClientError { status, detail });
        }
        resp.json::<Vec<MarketHandle>>()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("malformed market engine response: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn create_market_parses_handle_on_success() {
        let app = Router::new().route(
            "/api/v1/markets",
            post(|| async { axum::Json(serde_json::json!({"id": "m1", "contract_id": uuid::Uuid::nil()})) }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = MarketEngineClient::new(reqwest::Client::new(), format!("http://{addr}"));
        let handle = client.create_market(uuid::Uuid::nil(), None).await.unwrap();
        assert_eq!(handle.id, "m1");
    }

    #[tokio::test]
    async fn unreachable_engine_is_upstream_unavailable() {
        let client = MarketEngineClient::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string());
        let result = client.create_market(uuid::Uuid::nil(), None).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }
}
