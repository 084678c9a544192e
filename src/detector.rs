//! C3: Detector client — a typed call to the external YOLO detection
//! worker, mapping transport/HTTP errors onto a retry classification.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::model::BBox;

/// What the ingest pipeline is allowed to do in response to a failure.
#[derive(Debug, Error, Clone)]
pub enum DetectorError {
    /// Connection refused/reset, timeout, HTTP 429, or 5xx: worth retrying.
    #[error("transient detector failure: {0}")]
    Transient(String),
    /// Any other 4xx, or a response body that doesn't parse: not worth
    /// retrying.
    #[error("permanent detector failure: {0}")]
    Permanent(String),
}

impl DetectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DetectorError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            DetectorError::Transient(m) | DetectorError::Permanent(m) => m,
        }
    }
}

/// What bytes-or-URL the detector is asked to classify.
pub enum ImageRef<'a> {
    Bytes(&'a [u8]),
    Url(&'a str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub is_valid: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub detected_by: Option<String>,
    #[serde(default)]
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait DetectorClient: Send + Sync + 'static {
    async fn detect(&self, image_ref: ImageRef<'_>) -> Result<Verdict, DetectorError>;
}

/// HTTP-backed detector client, one `reqwest::Client` shared across the
/// worker pool so connection reuse and the concurrency cap stay together.
pub struct HttpDetectorClient {
    client: reqwest::Client,
    base_url: String,
    confidence_threshold: f64,
}

impl HttpDetectorClient {
    pub fn new(base_url: String, timeout: Duration, confidence_threshold: f64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url, confidence_threshold })
    }
}

#[async_trait]
impl DetectorClient for HttpDetectorClient {
    async fn detect(&self, image_ref: ImageRef<'_>) -> Result<Verdict, DetectorError> {
        let url = format!("{}/detect", self.base_url.trim_end_matches('/'));

        let request = match image_ref {
            ImageRef::Bytes(bytes) => {
                let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("image");
                let form = reqwest::multipart::Form::new()
                    .text("confidence_threshold", self.confidence_threshold.to_string())
                    .part("file", part);
                self.client.post(&url).multipart(form)
            }
            ImageRef::Url(image_url) => self.client.post(&url).json(&serde_json::json!({
                "url": image_url,
                "confidence_threshold": self.confidence_threshold,
            })),
        };

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(DetectorError::Transient(format!("detector responded {status}")));
        }
        if status.is_client_error() {
            return Err(DetectorError::Permanent(format!("detector responded {status}")));
        }

        response
            .json::<Verdict>()
            .await
            .map_err(|err| DetectorError::Permanent(format!("malformed detector response: {err}")))
    }
}

fn classify_transport_error(err: reqwest::Error) -> DetectorError {
    if err.is_timeout() || err.is_connect() {
        warn!(%err, "transient transport failure calling detector");
        DetectorError::Transient(err.to_string())
    } else {
        DetectorError::Permanent(err.to_string())
    }
}
