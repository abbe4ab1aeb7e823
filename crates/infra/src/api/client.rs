//! Collector client implementing the upload transport port.
//!
//! Each check-in is sent as two requests: a JSON metadata document and the
//! raw video bytes. The collector keys both on `session_id`, which makes
//! retries idempotent.

use async_trait::async_trait;
use moodlog_core::UploadTransport;
use moodlog_domain::{CollectorConfig, MoodlogError, QueueItem, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info, instrument};

const ERROR_BODY_SNIPPET: usize = 200;

/// HTTP client for the collector's ingestion endpoints.
pub struct CollectorClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataPayload<'a> {
    session_id: &'a str,
    timestamp: i64,
    emotion_score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
}

impl CollectorClient {
    /// Build a client from collector configuration.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|_| MoodlogError::Config(format!("invalid collector url: {}", config.base_url)))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| MoodlogError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn check_status(url: &str, response: Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        body.truncate(ERROR_BODY_SNIPPET);
        let message = if body.is_empty() {
            format!("{url} returned status {status}")
        } else {
            format!("{url} returned status {status}: {body}")
        };

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(MoodlogError::InvalidInput(message))
            }
            _ => Err(MoodlogError::Network(message)),
        }
    }
}

#[async_trait]
impl UploadTransport for CollectorClient {
    #[instrument(skip(self, item), fields(session_id = %item.session_id))]
    async fn upload_metadata(&self, item: &QueueItem) -> Result<()> {
        let url = format!("{}/sessions/{}/metadata", self.base_url, item.session_id);
        debug!(url = %url, "uploading metadata");

        let payload = MetadataPayload {
            session_id: &item.session_id,
            timestamp: item.timestamp,
            emotion_score: item.emotion_score,
            latitude: item.latitude,
            longitude: item.longitude,
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| MoodlogError::Network(format!("metadata upload failed: {e}")))?;

        Self::check_status(&url, response).await?;
        info!(session_id = %item.session_id, "metadata uploaded");
        Ok(())
    }

    #[instrument(skip(self, video_uri), fields(session_id = %session_id))]
    async fn upload_video(&self, session_id: &str, video_uri: &str) -> Result<()> {
        let path = video_uri.strip_prefix("file://").unwrap_or(video_uri);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| MoodlogError::InvalidInput(format!("cannot read video {path}: {e}")))?;

        let url = format!("{}/sessions/{}/video", self.base_url, session_id);
        debug!(url = %url, size_bytes = bytes.len(), "uploading video");

        let response = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| MoodlogError::Network(format!("video upload failed: {e}")))?;

        Self::check_status(&url, response).await?;
        info!(session_id = %session_id, "video uploaded");
        Ok(())
    }
}
