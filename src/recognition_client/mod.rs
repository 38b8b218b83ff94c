//! RecognitionClient - Plate Reader Service Adapter
//!
//! ## Responsibilities
//!
//! - Send one frame per request to the external plate-reader service
//! - Parse the result list into a RecognitionAttempt
//! - Treat empty results as "no detection", never as an error

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Result of one recognition call for one frame.
///
/// Append-only within a run; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionAttempt {
    /// Detected plate text, None when the service saw no plate
    pub plate: Option<String>,
    /// Confidence score as returned by the service, unmodified
    pub confidence: f32,
    /// 1-based frame sequence index within the run
    pub frame_index: u32,
    /// 1-based attempt number for this frame
    pub attempt: u32,
}

impl RecognitionAttempt {
    /// Attempt recording that a frame yielded nothing, either because the
    /// service returned empty results or because its retries were exhausted.
    pub fn no_detection(frame_index: u32, attempt: u32) -> Self {
        Self {
            plate: None,
            confidence: 0.0,
            frame_index,
            attempt,
        }
    }
}

/// One detection in the service response
#[derive(Debug, Clone, Deserialize)]
pub struct PlateResult {
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub score: f32,
    #[serde(default, rename = "box")]
    pub bounding_box: Option<[f32; 4]>,
}

/// Plate reader response (matches the /v1/plate-reader schema)
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizeResponse {
    #[serde(default)]
    pub results: Vec<PlateResult>,
}

/// Recognition seam used by the coordinator
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize the plate in one frame.
    ///
    /// Transport and service failures are errors (the coordinator retries);
    /// an empty result set is a successful no-detection attempt.
    async fn recognize(
        &self,
        frame_path: &Path,
        region: &str,
        frame_index: u32,
        attempt: u32,
    ) -> Result<RecognitionAttempt>;
}

/// HTTP client for the external plate-reader service
pub struct PlateRecognizerClient {
    client: reqwest::Client,
    base_url: String,
}

/// Default per-request timeout for the plate-reader service
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

impl PlateRecognizerClient {
    /// Create new client with the default request timeout
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Create new client with a custom request timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check plate-reader health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Recognizer for PlateRecognizerClient {
    async fn recognize(
        &self,
        frame_path: &Path,
        region: &str,
        frame_index: u32,
        attempt: u32,
    ) -> Result<RecognitionAttempt> {
        let image = tokio::fs::read(frame_path)
            .await
            .map_err(|e| Error::Recognition(format!("frame read failed: {}", e)))?;

        let url = format!("{}/v1/plate-reader", self.base_url);
        let form = Form::new()
            .part(
                "upload",
                Part::bytes(image)
                    .file_name(format!("frame_{:02}.jpg", frame_index))
                    .mime_str("image/jpeg")?,
            )
            .text("regions", region.to_string());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("plate-reader request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "plate-reader returned {} - {}",
                status, body
            )));
        }

        let parsed: RecognizeResponse = resp
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("plate-reader response parse: {}", e)))?;

        // Top result only; absence of a plate field is a clean no-detection
        let attempt = match parsed.results.first() {
            Some(PlateResult {
                plate: Some(text),
                score,
                ..
            }) => RecognitionAttempt {
                plate: Some(text.clone()),
                confidence: *score,
                frame_index,
                attempt,
            },
            _ => RecognitionAttempt::no_detection(frame_index, attempt),
        };

        tracing::debug!(
            frame_index = frame_index,
            plate = attempt.plate.as_deref().unwrap_or("-"),
            confidence = attempt.confidence,
            "Recognition attempt resolved"
        );

        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_plate() {
        let json = r#"{"results":[{"plate":"ca1234x","score":0.91,"box":[10.0,20.0,110.0,60.0]}]}"#;
        let parsed: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].plate.as_deref(), Some("ca1234x"));
        assert!((parsed.results[0].score - 0.91).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_results_is_no_detection() {
        let json = r#"{"results":[]}"#;
        let parsed: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn test_score_taken_verbatim() {
        // Out-of-range scores from the service are passed through as-is
        let json = r#"{"results":[{"plate":"AB123","score":1.25}]}"#;
        let parsed: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert!((parsed.results[0].score - 1.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_plate_field_tolerated() {
        let json = r#"{"results":[{"score":0.4}]}"#;
        let parsed: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.results[0].plate.is_none());
    }

    #[test]
    fn test_no_detection_attempt() {
        let a = RecognitionAttempt::no_detection(2, 3);
        assert!(a.plate.is_none());
        assert_eq!(a.confidence, 0.0);
        assert_eq!(a.frame_index, 2);
        assert_eq!(a.attempt, 3);
    }
}
