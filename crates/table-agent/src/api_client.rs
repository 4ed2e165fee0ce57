//! HTTP implementation of the round API.
//!
//! | call         | request                                   |
//! |--------------|-------------------------------------------|
//! | start        | `POST {base}/tables/{table}/rounds`       |
//! | stop-bet/deal| `POST {base}/rounds/{round}/actions`      |
//! | finish       | `POST {base}/rounds/{round}/finish`       |
//! | pause        | `POST {base}/tables/{table}/pause`        |
//! | resume       | `POST {base}/tables/{table}/resume`       |
//! | pause status | `GET  {base}/tables/{table}/pause`        |
//!
//! Status mapping: 409 is a conflict, 408/429/5xx and transport failures are
//! transient, anything else (including undecodable bodies) is fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use round_coordination::{
    ApiError, BetDeadline, RoundApiClient, RoundId, RoundPayload, RoundStart, TableId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::BackendConfig;

/// Body returned by a successful `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub round_id: String,
    pub bet_deadline: DateTime<Utc>,
}

impl StartResponse {
    /// Convert the wall-clock deadline into a round start measured from `now`.
    pub fn into_round_start(self, now: DateTime<Utc>) -> RoundStart {
        let remaining = (self.bet_deadline - now).to_std().unwrap_or_default();
        RoundStart {
            round_id: RoundId::new(self.round_id),
            bet_deadline: BetDeadline::after(remaining),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PauseStatusResponse {
    paused: bool,
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::CONFLICT => ApiError::Conflict(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ApiError::Transient(detail),
        s if s.is_server_error() => ApiError::Transient(detail),
        _ => ApiError::Fatal(detail),
    }
}

/// Map a transport-level failure onto the error taxonomy.
pub fn classify_transport(error: &reqwest::Error) -> ApiError {
    if error.is_decode() {
        ApiError::Fatal(format!("undecodable response: {error}"))
    } else if error.is_builder() {
        ApiError::Fatal(format!("invalid request: {error}"))
    } else {
        ApiError::Transient(error.to_string())
    }
}

/// Send a prepared request and map failures. Shared with the health reporter.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body.trim()))
}

/// Round API client over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRoundApiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRoundApiClient {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<Response, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        send(self.authorize(self.http.post(&url).json(&body))).await
    }
}

#[async_trait]
impl RoundApiClient for HttpRoundApiClient {
    async fn start(&self, table: &TableId) -> Result<RoundStart, ApiError> {
        let response = self
            .post(&format!("tables/{table}/rounds"), json!({}))
            .await?;
        let body: StartResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Fatal(format!("malformed start response: {e}")))?;
        Ok(body.into_round_start(Utc::now()))
    }

    async fn stop_bet_or_deal(
        &self,
        round: &RoundId,
        payload: &RoundPayload,
    ) -> Result<(), ApiError> {
        let body = serde_json::to_value(payload)
            .map_err(|e| ApiError::Fatal(format!("unencodable payload: {e}")))?;
        self.post(&format!("rounds/{round}/actions"), body).await?;
        Ok(())
    }

    async fn finish(&self, round: &RoundId) -> Result<(), ApiError> {
        self.post(&format!("rounds/{round}/finish"), json!({}))
            .await?;
        Ok(())
    }

    async fn pause(&self, table: &TableId, reason: &str) -> Result<(), ApiError> {
        self.post(&format!("tables/{table}/pause"), json!({ "reason": reason }))
            .await?;
        Ok(())
    }

    async fn resume(&self, table: &TableId) -> Result<(), ApiError> {
        self.post(&format!("tables/{table}/resume"), json!({}))
            .await?;
        Ok(())
    }

    async fn pause_status(&self, table: &TableId) -> Result<bool, ApiError> {
        let url = self.url(&format!("tables/{table}/pause"));
        let response = send(self.authorize(self.http.get(&url))).await?;
        let body: PauseStatusResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Fatal(format!("malformed pause status: {e}")))?;
        Ok(body.paused)
    }
}
