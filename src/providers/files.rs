//! Gemini File API: resumable upload and the wait for server-side processing.
//!
//! Attachments above the inline limit are uploaded once, then referenced by
//! URI. The processing wait is a plain future: it is bounded by a timeout and
//! stops as soon as the caller drops it.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::data::DataAttachment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub state: FileState,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: RemoteFile,
}

#[derive(Debug, Clone)]
pub struct FileClient {
    key: String,
    base: String,
    http: reqwest::Client,
}

impl FileClient {
    pub fn new(key: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base: base.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn upload(&self, data: &DataAttachment) -> Result<RemoteFile> {
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base))
            .header("x-goog-api-key", &self.key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", &data.mime)
            .json(&json!({"file": {"display_name": data.display_name()}}))
            .send()
            .await
            .with_context(|| "failed to start Gemini file upload")?;
        let status = start.status();
        if !status.is_success() {
            let body = start.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini file upload failed ({}): {}", status, body));
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .ok_or_else(|| anyhow!("Gemini file upload did not return an upload URL"))?;

        let finish = self
            .http
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data.bytes.clone())
            .send()
            .await
            .with_context(|| "failed to send Gemini file bytes")?;
        let status = finish.status();
        let body = finish.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("Gemini file upload failed ({}): {}", status, body));
        }
        let envelope: FileEnvelope = serde_json::from_str(&body)
            .with_context(|| "failed to parse Gemini file upload response")?;
        info!(
            "uploaded {} ({} bytes) as {}",
            data.display_name(),
            data.bytes.len(),
            envelope.file.name
        );
        Ok(envelope.file)
    }

    pub async fn get(&self, name: String) -> Result<RemoteFile> {
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base, name))
            .header("x-goog-api-key", &self.key)
            .send()
            .await
            .with_context(|| format!("failed to fetch Gemini file status: {}", name))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("Gemini file status failed ({}): {}", status, body));
        }
        serde_json::from_str(&body).with_context(|| "failed to parse Gemini file status")
    }

    pub async fn delete(&self, name: &str) {
        let result = self
            .http
            .delete(format!("{}/v1beta/{}", self.base, name))
            .header("x-goog-api-key", &self.key)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!("deleted remote file {}", name)
            }
            Ok(response) => warn!("failed to delete remote file {}: {}", name, response.status()),
            Err(err) => warn!("failed to delete remote file {}: {}", name, err),
        }
    }
}

/// Polls `fetch` every `interval` until the file is `ACTIVE`.
pub async fn wait_until_active<F, Fut>(
    initial: RemoteFile,
    interval: Duration,
    limit: Duration,
    mut fetch: F,
) -> Result<RemoteFile>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<RemoteFile>>,
{
    let poll = async {
        let mut current = initial;
        let mut polls = 0usize;
        loop {
            match current.state {
                FileState::Active => return Ok(current),
                FileState::Failed => {
                    let detail = current
                        .error
                        .as_ref()
                        .map(|value| value.to_string())
                        .unwrap_or_else(|| "no detail".to_string());
                    return Err(anyhow!(
                        "remote processing failed for {}: {}",
                        current.name,
                        detail
                    ));
                }
                state => debug!("{} is {:?}; poll {}", current.name, state, polls),
            }
            sleep(interval).await;
            polls += 1;
            current = fetch(current.name.clone()).await?;
        }
    };

    timeout(limit, poll).await.map_err(|_| {
        anyhow!(
            "timed out after {}s waiting for uploaded file to become active",
            limit.as_secs()
        )
    })?
}
