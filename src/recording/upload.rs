//! Chunked, resumable recording upload.
//!
//! Uploads are keyed by the SHA-256 of the blob. Before sending anything the
//! uploader asks the server how many bytes it already holds for that key, so
//! uploading the same blob again continues where the last attempt stopped.
//! The uploader never retries on its own.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::encoder::RecordingBlob;

pub const DEFAULT_UPLOAD_CHUNK_BYTES: u64 = 5 * 1024 * 1024;

/// Receives upload progress, 0 to 100.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedRecording {
    pub file_url: String,
}

#[async_trait]
pub trait RecordingUploader: Send + Sync {
    async fn upload(
        &self,
        meeting_id: &str,
        blob: &RecordingBlob,
        progress: ProgressFn<'_>,
    ) -> Result<UploadedRecording>;
}

/// Wraps a progress callback so reported values never go backwards and
/// never exceed 100.
pub struct MonotonicProgress<'a> {
    sink: ProgressFn<'a>,
    last: Option<u8>,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(sink: ProgressFn<'a>) -> Self {
        Self { sink, last: None }
    }

    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        (self.sink)(percent);
    }

    pub fn report_bytes(&mut self, done: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        self.report(percent);
    }
}

#[derive(Debug, Deserialize)]
struct OffsetResponse {
    offset: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    meeting_id: &'a str,
    mime: &'a str,
    size: u64,
    sha256: &'a str,
}

/// Upload key: URL-safe base64 of the blob's SHA-256.
pub async fn blob_key(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open recording {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await.context("Failed to read recording")?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

pub struct ResumableUploader {
    client: reqwest::Client,
    base_url: String,
    chunk_bytes: u64,
}

impl ResumableUploader {
    pub fn new(client: reqwest::Client, base_url: &str, chunk_bytes: u64) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    fn upload_url(&self, key: &str) -> String {
        format!("{}/recordings/uploads/{}", self.base_url, key)
    }

    async fn committed_offset(&self, key: &str) -> Result<u64> {
        let response = self
            .client
            .get(self.upload_url(key))
            .send()
            .await
            .context("Failed to query upload offset")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Upload offset query failed ({}): {}", status, body);
        }
        let parsed: OffsetResponse =
            serde_json::from_str(&body).context("Failed to parse upload offset response")?;
        Ok(parsed.offset)
    }

    async fn put_chunk(
        &self,
        key: &str,
        mime: &str,
        start: u64,
        chunk: Vec<u8>,
        total: u64,
    ) -> Result<u64> {
        let end = start + chunk.len() as u64;
        let checksum = STANDARD.encode(Sha256::digest(&chunk));

        let response = self
            .client
            .put(self.upload_url(key))
            .header(header::CONTENT_TYPE, mime)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, end - 1, total),
            )
            .header("X-Chunk-Checksum", format!("sha-256={checksum}"))
            .body(chunk)
            .send()
            .await
            .with_context(|| format!("Failed to upload bytes {start}-{}", end - 1))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Chunk upload failed ({}): {}", status, body);
        }
        let parsed: OffsetResponse =
            serde_json::from_str(&body).context("Failed to parse chunk upload response")?;
        if parsed.offset != end {
            bail!(
                "Server committed offset {} after chunk ending at {}",
                parsed.offset,
                end
            );
        }
        Ok(parsed.offset)
    }

    async fn complete(
        &self,
        key: &str,
        meeting_id: &str,
        blob: &RecordingBlob,
    ) -> Result<UploadedRecording> {
        let request = CompleteRequest {
            meeting_id,
            mime: blob.mime(),
            size: blob.size,
            sha256: key,
        };
        let response = self
            .client
            .post(format!("{}/complete", self.upload_url(key)))
            .json(&request)
            .send()
            .await
            .context("Failed to finalize upload")?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Upload finalize failed ({}): {}", status, body);
        }
        serde_json::from_str(&body).context("Failed to parse upload finalize response")
    }
}

#[async_trait]
impl RecordingUploader for ResumableUploader {
    async fn upload(
        &self,
        meeting_id: &str,
        blob: &RecordingBlob,
        progress: ProgressFn<'_>,
    ) -> Result<UploadedRecording> {
        let mut progress = MonotonicProgress::new(progress);
        progress.report(0);

        let key = blob_key(&blob.path).await?;
        let total = blob.size;
        let mut offset = self.committed_offset(&key).await?.min(total);
        if offset > 0 {
            info!("Resuming upload of {:?} at byte {}/{}", blob.path, offset, total);
        } else {
            info!("Uploading {:?} ({} bytes, {})", blob.path, total, blob.mime());
        }
        progress.report_bytes(offset, total);

        let mut file = File::open(&blob.path)
            .await
            .with_context(|| format!("Failed to open recording {:?}", blob.path))?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        while offset < total {
            let len = self.chunk_bytes.min(total - offset) as usize;
            let mut chunk = vec![0u8; len];
            file.read_exact(&mut chunk)
                .await
                .context("Failed to read recording chunk")?;
            offset = self.put_chunk(&key, blob.mime(), offset, chunk, total).await?;
            debug!("Uploaded {}/{} bytes", offset, total);
            progress.report_bytes(offset, total);
        }

        let uploaded = self.complete(&key, meeting_id, blob).await?;
        progress.report(100);
        info!("Upload complete: {}", uploaded.file_url);
        Ok(uploaded)
    }
}
