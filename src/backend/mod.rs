//! HTTP client for the meeting backend: meeting lookup, join handshake and
//! begin/end recording.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::participants::ParticipantRole;
use crate::recording::{RecordingApi, RecordingFormat, RecordingOptions, RemoteRecording, ResumableUploader};
use crate::session::{JoinForm, JoinHandshake, JoinToken, MeetingDirectory, MeetingSession};
use crate::transport::TransportCredential;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    token: &'a str,
    email: &'a str,
    display_name: &'a str,
    role: ParticipantRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeginRecordingRequest {
    format: Option<RecordingFormat>,
    resolution: String,
    fps: u32,
    bitrate: u32,
}

#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(&config.base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Uploader sharing this client's connection pool.
    pub fn uploader(&self, chunk_bytes: u64) -> ResumableUploader {
        ResumableUploader::new(self.client.clone(), &self.base_url, chunk_bytes)
    }

    fn meeting_url(&self, meeting_id: &str, path: &str) -> String {
        format!("{}/meetings/{}{}", self.base_url, meeting_id, path)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("{} failed ({}): {}", what, status, body));
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", what))
    }
}

#[async_trait]
impl MeetingDirectory for BackendClient {
    async fn fetch(&self, meeting_id: &str) -> Result<MeetingSession> {
        let response = self
            .client
            .get(self.meeting_url(meeting_id, ""))
            .send()
            .await
            .context("Failed to fetch meeting")?;

        let session: MeetingSession = Self::read_json(response, "Meeting lookup").await?;
        debug!(
            "Meeting {} is {:?}, scheduled at {}",
            session.meeting_id, session.status, session.scheduled_at
        );
        Ok(session)
    }
}

#[async_trait]
impl JoinHandshake for BackendClient {
    async fn join(&self, token: &JoinToken, form: &JoinForm) -> Result<TransportCredential> {
        let request = JoinRequest {
            token: &token.raw,
            email: &form.email,
            display_name: &form.display_name,
            role: form.role,
        };

        let response = self
            .client
            .post(self.meeting_url(&token.meeting_id, "/join"))
            .json(&request)
            .send()
            .await
            .context("Failed to send join request")?;

        let credential: TransportCredential = Self::read_json(response, "Join handshake").await?;
        info!(
            "Join handshake accepted for meeting {}: channel {}",
            token.meeting_id, credential.channel_name
        );
        Ok(credential)
    }
}

#[async_trait]
impl RecordingApi for BackendClient {
    async fn begin(&self, meeting_id: &str, options: &RecordingOptions) -> Result<RemoteRecording> {
        let request = BeginRecordingRequest {
            format: options.format,
            resolution: format!("{}x{}", options.width, options.height),
            fps: options.fps,
            bitrate: options.bitrate,
        };

        let response = self
            .client
            .post(self.meeting_url(meeting_id, "/recordings/begin"))
            .json(&request)
            .send()
            .await
            .context("Failed to begin recording")?;

        Self::read_json(response, "Begin recording").await
    }

    async fn end(&self, meeting_id: &str) -> Result<RemoteRecording> {
        let response = self
            .client
            .post(self.meeting_url(meeting_id, "/recordings/end"))
            .send()
            .await
            .context("Failed to end recording")?;

        Self::read_json(response, "End recording").await
    }
}
