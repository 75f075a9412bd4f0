//! Classification service client
//!
//! Submits one component image to the external marking-classification
//! endpoint and normalizes the response into a verdict + confidence.
//! Retry policy is the orchestrator's responsibility; this client fails
//! fast with a human-readable detail string.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use markscan_common::{ScanImage, ScanResult};

/// Label the classification model emits for counterfeit markings
pub const DEFECTIVE_LABEL: &str = "Defective";

const USER_AGENT: &str = concat!("MarkScan/", env!("CARGO_PKG_VERSION"));

/// Classifier client errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One detection from the classification model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Detection {
    pub label: String,
    /// Normalized confidence in [0, 1]
    pub confidence: f64,
}

/// Successful classification response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictResponse {
    pub detections: Vec<Detection>,
}

/// Error response body from the classification endpoint
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Metadata sent alongside every image
#[derive(Debug, Clone)]
pub struct ScanMetadata {
    pub vendor: String,
    pub lot_id: String,
    pub part_number: String,
    pub operator: String,
}

/// Normalized classification verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// Pass or Fail (Overridden is never produced by classification)
    pub result: ScanResult,
    /// Detection confidence in [0, 1]; 0 when nothing was detected
    pub confidence: f64,
}

/// Derive a verdict from a detection list.
///
/// The first detection decides: a "Defective" label fails the component,
/// anything else passes. Zero detections means authenticity could not be
/// confirmed and is treated as fail at zero confidence.
pub fn verdict_from_detections(detections: &[Detection]) -> Verdict {
    match detections.first() {
        Some(top) => Verdict {
            result: if top.label == DEFECTIVE_LABEL {
                ScanResult::Fail
            } else {
                ScanResult::Pass
            },
            confidence: top.confidence.clamp(0.0, 1.0),
        },
        None => Verdict {
            result: ScanResult::Fail,
            confidence: 0.0,
        },
    }
}

/// Seam for the classification call, so the orchestrator can be driven
/// by a scripted classifier in tests.
pub trait Classify: Send + Sync {
    fn classify(
        &self,
        image: &ScanImage,
        metadata: &ScanMetadata,
    ) -> impl std::future::Future<Output = Result<Verdict, ClassifierError>> + Send;
}

/// HTTP client for the classification endpoint
pub struct ClassifierClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ClassifierClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClassifierError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn predict(
        &self,
        image: &ScanImage,
        metadata: &ScanMetadata,
    ) -> Result<Verdict, ClassifierError> {
        let url = format!("{}/predict/", self.base_url);

        let file_part = reqwest::multipart::Part::bytes(image.data.clone())
            .file_name(image.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("vendor", metadata.vendor.clone())
            .text("lotId", metadata.lot_id.clone())
            .text("partNumber", metadata.part_number.clone())
            .text("operator", metadata.operator.clone());

        tracing::debug!(
            file = %image.file_name,
            vendor = %metadata.vendor,
            lot_id = %metadata.lot_id,
            "Submitting image to classifier"
        );

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The endpoint reports failures as {"detail": "..."}; fall back
            // to the raw body if it isn't JSON.
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.detail)
                .unwrap_or(body);
            return Err(ClassifierError::Api(status.as_u16(), detail));
        }

        let predict_response: PredictResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        let verdict = verdict_from_detections(&predict_response.detections);

        tracing::info!(
            file = %image.file_name,
            result = %verdict.result,
            confidence = verdict.confidence,
            detections = predict_response.detections.len(),
            "Classification complete"
        );

        Ok(verdict)
    }
}

impl Classify for ClassifierClient {
    async fn classify(
        &self,
        image: &ScanImage,
        metadata: &ScanMetadata,
    ) -> Result<Verdict, ClassifierError> {
        self.predict(image, metadata).await
    }
}
