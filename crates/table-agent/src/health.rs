//! Health channel implementations.

use async_trait::async_trait;
use reqwest::Client;
use round_coordination::{ApiError, HealthReporter, HealthSignal, Severity};
use tracing::{debug, error, warn};

use crate::api_client::send;
use crate::config::HealthConfig;

/// Posts each signal as JSON to the configured URL.
#[derive(Debug, Clone)]
pub struct HttpHealthReporter {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpHealthReporter {
    pub fn new(config: &HealthConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().build()?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl HealthReporter for HttpHealthReporter {
    async fn send_signal(&self, signal: HealthSignal) -> Result<(), ApiError> {
        debug!(table = %signal.table_id, category = %signal.category, severity = %signal.severity, "Sending health signal");
        let mut request = self.http.post(&self.url).json(&signal);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        send(request).await?;
        Ok(())
    }
}

/// Writes signals to the log only. Used when no health endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHealthReporter;

#[async_trait]
impl HealthReporter for LogHealthReporter {
    async fn send_signal(&self, signal: HealthSignal) -> Result<(), ApiError> {
        match signal.severity {
            Severity::Warn => warn!(
                table = %signal.table_id,
                category = %signal.category,
                "Health signal: {}",
                signal.content
            ),
            Severity::Error => error!(
                table = %signal.table_id,
                category = %signal.category,
                "Health signal: {}",
                signal.content
            ),
        }
        Ok(())
    }
}
