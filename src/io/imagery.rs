//! Remote imagery service: catalog queries and asynchronous export jobs

use crate::core::calibrate::PixelTransform;
use crate::types::{BoundingBox, CandidateImage, DateRange, PipelineError, PipelineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque handle of a submitted export job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
}

/// Job state as reported by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteState {
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One status observation of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: RemoteState,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Request materializing one image to a storage folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub image_id: String,
    pub band: String,
    /// Band math applied before export; `None` exports raw values
    pub transform: Option<PixelTransform>,
    pub region: BoundingBox,
    pub folder: String,
    pub file_name_prefix: String,
    pub crs: String,
    pub crs_transform: Vec<f64>,
}

/// Operations consumed from the imagery service
#[async_trait]
pub trait ImageryService: Send + Sync {
    /// Images of `collection_id`, restricted to `band` when given and
    /// optionally filtered by acquisition date. Order is the catalog's native order.
    async fn list_catalog(
        &self,
        collection_id: &str,
        band: Option<&str>,
        range: Option<DateRange>,
    ) -> PipelineResult<Vec<CandidateImage>>;

    /// Start an export job
    async fn submit_export(&self, request: &ExportRequest) -> PipelineResult<JobHandle>;

    /// Query the current state of a job. Never cached.
    async fn poll_status(&self, handle: &JobHandle) -> PipelineResult<StatusReport>;
}

/// Connection settings of the HTTP imagery service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            api_token: None,
            request_timeout_secs: 30,
        }
    }
}

/// JSON-over-HTTP client of the imagery service.
///
/// Endpoints, relative to `base_url`:
/// - `GET  catalog?collection=..[&band=..][&start=..&end=..]` -> `[CandidateImage]`
/// - `POST exports` with an `ExportRequest` body -> `JobHandle`
/// - `GET  exports/{id}` -> `StatusReport`
pub struct HttpImageryService {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpImageryService {
    pub fn new(config: &ServiceConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Processing(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ImageryService for HttpImageryService {
    async fn list_catalog(
        &self,
        collection_id: &str,
        band: Option<&str>,
        range: Option<DateRange>,
    ) -> PipelineResult<Vec<CandidateImage>> {
        let mut query = vec![("collection", collection_id.to_string())];
        if let Some(band) = band {
            query.push(("band", band.to_string()));
        }
        if let Some(range) = range {
            query.push(("start", range.start.format("%Y-%m-%d").to_string()));
            query.push(("end", range.end.format("%Y-%m-%d").to_string()));
        }

        log::debug!("Listing catalog {} ({:?})", collection_id, range);
        let response = self
            .authorize(self.client.get(self.url("catalog")).query(&query))
            .send()
            .await?
            .error_for_status()?;

        let images: Vec<CandidateImage> = response.json().await?;
        log::debug!("Catalog {} returned {} images", collection_id, images.len());
        Ok(images)
    }

    async fn submit_export(&self, request: &ExportRequest) -> PipelineResult<JobHandle> {
        let response = self
            .authorize(self.client.post(self.url("exports")).json(request))
            .send()
            .await?
            .error_for_status()?;

        let handle: JobHandle = response.json().await?;
        Ok(handle)
    }

    async fn poll_status(&self, handle: &JobHandle) -> PipelineResult<StatusReport> {
        let response = self
            .authorize(self.client.get(self.url(&format!("exports/{}", handle.id))))
            .send()
            .await?
            .error_for_status()?;

        let report: StatusReport = response.json().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_report_wire_format() {
        let report: StatusReport =
            serde_json::from_str(r#"{"state": "FAILED", "error_message": "Export too large"}"#).unwrap();
        assert_eq!(report.state, RemoteState::Failed);
        assert_eq!(report.error_message.as_deref(), Some("Export too large"));

        let running: StatusReport = serde_json::from_str(r#"{"state": "RUNNING"}"#).unwrap();
        assert_eq!(running.state, RemoteState::Running);
        assert!(running.error_message.is_none());
    }

    #[test]
    fn test_base_url_normalized() {
        let service = HttpImageryService::new(&ServiceConfig {
            base_url: "https://imagery.example.org/api/".to_string(),
            ..ServiceConfig::default()
        })
        .unwrap();
        assert_eq!(service.url("exports"), "https://imagery.example.org/api/exports");
    }
}
