//! Coordinator client
//!
//! Two exchanges with IPFSPodcasting.net, both form-encoded POSTs answered
//! with JSON:
//! 1. `/Request` carries the node status and returns a work item
//! 2. `/Response` carries the outcome and returns a status verdict
//!
//! Transport failures never escape this module: a failed request means "no
//! work", a failed report means `ReportStatus::Error`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::payload::{OutcomePayload, ReportResponse, ReportStatus, StatusPayload, WorkItem};

/// The remote side of the work cycle.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Ask for work. `None` when there is none or the exchange failed.
    async fn request_work(&self, status: &StatusPayload) -> Option<WorkItem>;

    /// Report an outcome. Always yields a status.
    async fn report_result(&self, outcome: &OutcomePayload) -> ReportStatus;
}

/// Coordinator errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// HTTP implementation of [`Coordinator`]
pub struct CoordinatorClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn request_url(&self) -> String {
        format!("{}/Request", self.base_url)
    }

    fn response_url(&self) -> String {
        format!("{}/Response", self.base_url)
    }

    /// POST `form` to `url` and return the body text, whatever the status
    /// code; the coordinator answers in JSON either way.
    async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<String, CoordinatorError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoordinatorError::Network(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| CoordinatorError::Network(e.to_string()))
    }

    async fn fetch_work(&self, status: &StatusPayload) -> Result<WorkItem, CoordinatorError> {
        let body = self.post_form(&self.request_url(), status).await?;
        serde_json::from_str(&body).map_err(|e| CoordinatorError::InvalidResponse(e.to_string()))
    }

    async fn send_report(
        &self,
        outcome: &OutcomePayload,
    ) -> Result<ReportStatus, CoordinatorError> {
        let body = self.post_form(&self.response_url(), outcome).await?;
        serde_json::from_str::<ReportResponse>(&body)
            .map(|r| r.status)
            .map_err(|e| CoordinatorError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Coordinator for CoordinatorClient {
    async fn request_work(&self, status: &StatusPayload) -> Option<WorkItem> {
        info!("Requesting work...");

        let work = match self.fetch_work(status).await {
            Ok(work) => work,
            Err(e) => {
                error!(error = %e, "Error requesting work from IPFSPodcasting.net (check internet / firewall / router)");
                return None;
            }
        };

        info!(
            message = %work.message,
            download = %work.download,
            filename = %work.filename,
            pin = %work.pin,
            delete = %work.delete,
            "Work received"
        );

        if work.is_no_work() {
            info!("No work.");
            return None;
        }

        Some(work)
    }

    async fn report_result(&self, outcome: &OutcomePayload) -> ReportStatus {
        info!("Reporting results...");

        let status = match self.send_report(outcome).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Error sending response");
                ReportStatus::Error
            }
        };

        info!(?status, "Report acknowledged");
        status
    }
}
