//! Call recording uploads.
//!
//! Runs independently of the call state machine: a failed or missing
//! recording never changes a queue entry. Each call record carries its own
//! upload status (`pending` → `uploaded` | `failed` | `deleted`), retried
//! until `max_upload_attempts`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::Engine;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;

const MAX_UPLOAD_ERROR_CHARS: usize = 500;
const RECORDING_GONE: &str = "recording no longer available at provider";

/// Downloads a recording from the telephony provider.
#[async_trait]
pub trait RecordingFetcher: Send + Sync {
    /// Fetch the recording bytes. A recording the provider no longer has
    /// must be reported as [`Error::RecordingUnavailable`].
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Durable destination for recordings.
#[async_trait]
pub trait RecordingSink: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// [`RecordingFetcher`] over HTTP.
pub struct HttpRecordingFetcher {
    client: reqwest::Client,
}

impl HttpRecordingFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RecordingFetcher for HttpRecordingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(Error::RecordingUnavailable(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::UpstreamProvider(format!(
                "recording fetch returned {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// [`RecordingSink`] writing under a local directory.
pub struct FsRecordingSink {
    root: PathBuf,
}

impl FsRecordingSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RecordingSink for FsRecordingSink {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}

/// Counts from one upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    pub deleted: usize,
    /// Non-HTTP recording URLs, counted as failed attempts.
    pub skipped: usize,
}

/// Storage key for a call recording.
pub fn recording_storage_key(provider_call_id: &str) -> String {
    let safe: String = provider_call_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("audio/cati/{safe}.mp3")
}

impl Engine {
    /// Try every due upload once.
    pub async fn process_recording_uploads(
        &self,
        fetcher: &dyn RecordingFetcher,
        sink: &dyn RecordingSink,
    ) -> Result<UploadReport> {
        let due = self
            .store
            .list_uploads_due(self.policy.max_upload_attempts, self.policy.upload_batch_size)
            .await?;
        let mut report = UploadReport::default();

        for call in due {
            let Some(url) = call.recording_url.as_deref() else {
                continue;
            };
            let mut upload = call.upload.clone();
            upload.attempts += 1;

            let result = if url.starts_with("http://") || url.starts_with("https://") {
                let key = recording_storage_key(&call.provider_call_id);
                match fetch_and_store(fetcher, sink, url, &key).await {
                    Ok(()) => {
                        upload.status = Some(UploadStatus::Uploaded);
                        upload.error = None;
                        upload.storage_key = Some(key);
                        upload.uploaded_at = Some(self.now());
                        report.uploaded += 1;
                        "uploaded"
                    }
                    Err(Error::RecordingUnavailable(detail)) => {
                        warn!(provider_call_id = %call.provider_call_id, %detail, "recording gone");
                        upload.status = Some(UploadStatus::Deleted);
                        upload.error = Some(RECORDING_GONE.to_string());
                        report.deleted += 1;
                        "deleted"
                    }
                    Err(e) => {
                        warn!(
                            provider_call_id = %call.provider_call_id,
                            attempt = upload.attempts,
                            "recording upload failed: {e}"
                        );
                        upload.status = Some(UploadStatus::Failed);
                        upload.error = Some(truncate(&e.to_string(), MAX_UPLOAD_ERROR_CHARS));
                        report.failed += 1;
                        "failed"
                    }
                }
            } else {
                upload.status = Some(UploadStatus::Failed);
                upload.error = Some(format!("unsupported recording url: {}", truncate(url, 200)));
                report.skipped += 1;
                "skipped"
            };

            self.store
                .set_upload_state(&call.provider_call_id, &upload, self.now())
                .await?;
            metrics::recording_uploads().add(1, &[KeyValue::new("result", result)]);
        }

        if report != UploadReport::default() {
            info!(
                uploaded = report.uploaded,
                failed = report.failed,
                deleted = report.deleted,
                skipped = report.skipped,
                "recording upload pass finished"
            );
        }
        Ok(report)
    }
}

async fn fetch_and_store(
    fetcher: &dyn RecordingFetcher,
    sink: &dyn RecordingSink,
    url: &str,
    key: &str,
) -> Result<()> {
    let bytes = fetcher.fetch(url).await?;
    sink.put(key, &bytes).await
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_path_safe() {
        assert_eq!(recording_storage_key("abc-123"), "audio/cati/abc-123.mp3");
        assert_eq!(recording_storage_key("../x/y"), "audio/cati/___x_y.mp3");
    }

    #[test]
    fn truncates_by_chars() {
        let long = "é".repeat(600);
        assert_eq!(truncate(&long, 500).chars().count(), 500);
    }

    #[tokio::test]
    async fn fs_sink_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsRecordingSink::new(dir.path());
        sink.put("audio/cati/c1.mp3", b"RIFF").await.unwrap();
        let written = std::fs::read(dir.path().join("audio/cati/c1.mp3")).unwrap();
        assert_eq!(written, b"RIFF");
    }
}
