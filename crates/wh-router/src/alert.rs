//! Operator alerts
//!
//! Raised when an upload aborts or a column alteration fails.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// Timeout for a single alert request.
pub const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 10;

/// How long Alerta keeps an alert open without a repeat.
const ALERT_EXPIRY_SECS: u64 = 86400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub resource: String,
    pub event: String,
    pub severity: Severity,
    pub text: String,
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct AlertaRequest<'a> {
    resource: &'a str,
    event: &'a str,
    environment: &'a str,
    severity: Severity,
    service: [&'a str; 1],
    text: &'a str,
    tags: Vec<String>,
    timeout: u64,
}

/// Posts alerts to an Alerta API.
pub struct AlertaClient {
    client: Client,
    base_url: String,
    environment: String,
}

impl AlertaClient {
    pub fn new(base_url: impl Into<String>, environment: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_ALERT_TIMEOUT_SECS))
            .build()
            .context("Failed to build alert HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            environment: environment.into(),
        })
    }

    fn alert_url(&self) -> String {
        format!("{}/alert", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AlertSender for AlertaClient {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let request = AlertaRequest {
            resource: &alert.resource,
            event: &alert.event,
            environment: &self.environment,
            severity: alert.severity,
            service: ["warehouse"],
            text: &alert.text,
            tags: alert.tags.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            timeout: ALERT_EXPIRY_SECS,
        };

        self.client
            .post(self.alert_url())
            .json(&request)
            .send()
            .await
            .context("Failed to send alert")?
            .error_for_status()
            .context("Alert rejected")?;

        debug!(event = %alert.event, resource = %alert.resource, "Alert sent");
        Ok(())
    }
}
