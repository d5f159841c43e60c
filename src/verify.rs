//! Verification service client.
//!
//! The AI judge is an opaque synchronous endpoint: image reference plus a
//! task-specific instruction in, a verdict out. Every failure mode
//! (network, non-2xx, malformed body) surfaces as a typed [`VerifyError`]
//! so the workflow can offer the degraded-continue/abandon choice.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::VerifierConfig;
use crate::error::VerifyError;
use crate::model::VerificationResult;

/// Judge of proof images.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Ask whether the image at `image_ref` satisfies `instruction`.
    async fn verify(
        &self,
        image_ref: &str,
        instruction: &str,
    ) -> Result<VerificationResult, VerifyError>;
}

/// Wire shape of the service response.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    is_verified: bool,
    confidence: f64,
    #[serde(default)]
    reason: String,
    model: String,
}

/// Parse a verdict body, clamping confidence and bounding the reason.
fn parse_verdict(body: &str) -> Result<VerificationResult, VerifyError> {
    let raw: RawVerdict =
        serde_json::from_str(body).map_err(|e| VerifyError::MalformedResponse(e.to_string()))?;
    Ok(VerificationResult::new(
        raw.is_verified,
        raw.confidence,
        raw.reason,
        raw.model,
    ))
}

/// HTTP client for the verification service.
pub struct HttpVerifier {
    client: reqwest::Client,
    config: VerifierConfig,
}

impl HttpVerifier {
    pub fn new(config: VerifierConfig) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VerifyError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn verify(
        &self,
        image_ref: &str,
        instruction: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let body = serde_json::json!({
            "image_ref": image_ref,
            "instruction": instruction,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| VerifyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Verification service returned non-2xx");
            return Err(VerifyError::Status {
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| VerifyError::Http(e.to_string()))?;
        let verdict = parse_verdict(&text)?;

        debug!(
            is_verified = verdict.is_verified,
            confidence = verdict.confidence,
            model = %verdict.model,
            "Verification verdict received"
        );
        Ok(verdict)
    }
}
