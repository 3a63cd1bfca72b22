//! Recording orchestrator.
//!
//! start: pick a video source → negotiate format → begin API → encoder loop
//! stop:  flush encoder → assemble blob → release compositor → end API → upload
//!
//! While compositing tiles, callers push `RecordingSources::from_call` tiles
//! through `update_tiles` whenever the roster or layout changes.
//!
//! The pipeline only reads taps it is handed; it never touches transport or
//! layout state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RecordingConfig;
use crate::error::RecordingError;
use crate::layout::{LayoutFrame, LayoutOptions};
use crate::participants::ParticipantRegistry;
use crate::transport::{AudioTap, MediaTransportAdapter, VideoTap};

use super::codec::{negotiate, RecordingFormat};
use super::compositor::{FrameCompositor, SurfaceRegistry};
use super::encoder::{ChunkSpool, EncoderPlatform, EncoderSettings, Recorder, RecordingBlob};
use super::mixer::{MixedAudioSource, MIX_SAMPLE_RATE};
use super::status::{RecordingPhase, RecordingSession, RecordingStatusHandle};
use super::upload::RecordingUploader;

/// Sent to the begin-recording API. `format` is filled from negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingOptions {
    pub format: Option<RecordingFormat>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
}

impl From<&RecordingConfig> for RecordingOptions {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            format: None,
            width: config.width,
            height: config.height,
            fps: config.fps,
            bitrate: config.bitrate,
        }
    }
}

/// Server-side view of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecording {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
}

#[async_trait]
pub trait RecordingApi: Send + Sync {
    async fn begin(&self, meeting_id: &str, options: &RecordingOptions) -> Result<RemoteRecording>;

    async fn end(&self, meeting_id: &str) -> Result<RemoteRecording>;
}

/// Media available to the recorder at start.
#[derive(Default)]
pub struct RecordingSources {
    /// The published screen share, preferred when present.
    pub screen_video: Option<Arc<dyn VideoTap>>,
    /// Rendered tiles in display order, for the compositor.
    pub tiles: Vec<(String, Arc<dyn VideoTap>)>,
    pub audio: Vec<Box<dyn AudioTap>>,
}

impl RecordingSources {
    /// Gathers the screen share, visible tiles (in roster order) and every
    /// audio track from the live call.
    pub async fn from_call(
        adapter: &MediaTransportAdapter,
        registry: &ParticipantRegistry,
        frame: &LayoutFrame,
    ) -> Self {
        let inputs = adapter.recording_inputs().await;
        let mut taps = adapter.video_taps().await;

        let mut tiles = Vec::new();
        for slot in frame.tile_slots(registry.ids()) {
            if !slot.visible {
                continue;
            }
            if let Some(index) = taps.iter().position(|(id, _)| *id == slot.participant_id) {
                tiles.push(taps.swap_remove(index));
            }
        }

        Self {
            screen_video: inputs.screen_video,
            tiles,
            audio: inputs.audio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub fps: u32,
    pub chunk_interval: Duration,
    pub spool_dir: PathBuf,
    pub layout: LayoutOptions,
}

impl PipelineSettings {
    pub fn from_config(config: &RecordingConfig, layout: LayoutOptions) -> Result<Self> {
        Ok(Self {
            fps: config.fps,
            chunk_interval: Duration::from_millis(config.chunk_interval_ms),
            spool_dir: config.spool_dir()?,
            layout,
        })
    }
}

struct ActiveRecording {
    meeting_id: String,
    format: RecordingFormat,
    compositor: Option<FrameCompositor>,
    cancel: CancellationToken,
    task: JoinHandle<Result<ChunkSpool, RecordingError>>,
}

pub struct RecordingPipeline {
    api: Arc<dyn RecordingApi>,
    uploader: Arc<dyn RecordingUploader>,
    platform: Arc<dyn EncoderPlatform>,
    settings: PipelineSettings,
    status: RecordingStatusHandle,
    progress: watch::Sender<u8>,
    active: Option<ActiveRecording>,
}

impl RecordingPipeline {
    pub fn new(
        api: Arc<dyn RecordingApi>,
        uploader: Arc<dyn RecordingUploader>,
        platform: Arc<dyn EncoderPlatform>,
        settings: PipelineSettings,
        status: RecordingStatusHandle,
    ) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            api,
            uploader,
            platform,
            settings,
            status,
            progress,
            active: None,
        }
    }

    pub fn status_handle(&self) -> RecordingStatusHandle {
        self.status.clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Hands the running compositor a new set of visible tiles. Returns false
    /// when nothing is being composited: no recording, or a screen share is
    /// the video source.
    pub fn update_tiles(&self, tiles: Vec<(String, Arc<dyn VideoTap>)>) -> bool {
        let Some(compositor) = self.active.as_ref().and_then(|a| a.compositor.as_ref()) else {
            return false;
        };
        compositor.retile(tiles, self.settings.layout);
        true
    }

    pub async fn start(
        &mut self,
        meeting_id: &str,
        sources: RecordingSources,
        options: RecordingOptions,
    ) -> Result<RecordingSession, RecordingError> {
        let phase = self.status.phase().await;
        if !matches!(
            phase,
            RecordingPhase::Idle | RecordingPhase::Completed | RecordingPhase::Failed
        ) {
            return Err(RecordingError::InvalidTransition {
                from: phase,
                to: RecordingPhase::Starting,
            });
        }
        if let Some(stale) = self.active.take() {
            stale.cancel.cancel();
        }

        // Fail fast: no source means no backend call and no phase change.
        let RecordingSources {
            screen_video,
            tiles,
            audio,
        } = sources;
        if screen_video.is_none() && tiles.is_empty() {
            warn!("Cannot record meeting {}: no video source", meeting_id);
            return Err(RecordingError::RecordingSourceUnavailable);
        }

        self.status.begin_new().await?;
        self.progress.send_replace(0);

        match self
            .launch(meeting_id, screen_video, tiles, audio, options)
            .await
        {
            Ok(active) => {
                let format = active.format;
                self.active = Some(active);
                self.status
                    .update(|s| s.format = Some(format))
                    .await;
                self.status.transition(RecordingPhase::Recording).await?;
                info!("Recording meeting {} as {}", meeting_id, format.mime());
                Ok(self.status.get().await)
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.status.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        meeting_id: &str,
        screen_video: Option<Arc<dyn VideoTap>>,
        tiles: Vec<(String, Arc<dyn VideoTap>)>,
        audio: Vec<Box<dyn AudioTap>>,
        mut options: RecordingOptions,
    ) -> Result<ActiveRecording, RecordingError> {
        let format = negotiate(self.platform.as_ref())?;
        options.format = Some(format);

        let remote = self
            .api
            .begin(meeting_id, &options)
            .await
            .map_err(|source| RecordingError::Backend {
                operation: "begin",
                source,
            })?;
        self.status.update(|s| s.id = Some(remote.id.clone())).await;

        let (video, compositor) = match screen_video {
            Some(screen) => {
                info!("Recording the active screen share");
                (screen, None)
            }
            None => {
                let registry = SurfaceRegistry::from_tiles(
                    options.width,
                    options.height,
                    tiles,
                    self.settings.layout,
                );
                let compositor =
                    FrameCompositor::start(registry, options.width, options.height, self.settings.fps);
                (compositor.stream(), Some(compositor))
            }
        };

        let encoder_settings = EncoderSettings {
            width: options.width,
            height: options.height,
            fps: self.settings.fps,
            bitrate: options.bitrate,
            sample_rate: MIX_SAMPLE_RATE,
        };
        let prepared = async {
            let encoder = self
                .platform
                .create(format, &encoder_settings)
                .map_err(RecordingError::Encoder)?;
            let spool = ChunkSpool::create(&self.settings.spool_dir).await?;
            Ok::<_, RecordingError>((encoder, spool))
        }
        .await;
        let (encoder, spool) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                if let Some(compositor) = compositor {
                    compositor.stop().await;
                }
                return Err(e);
            }
        };

        let recorder = Recorder {
            encoder,
            video,
            audio: (!audio.is_empty()).then(|| MixedAudioSource::new(audio, MIX_SAMPLE_RATE)),
            spool,
            fps: self.settings.fps,
            chunk_interval: self.settings.chunk_interval,
        };

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let status = self.status.clone();
            tokio::spawn(async move {
                let result = recorder.run(cancel.clone()).await;
                if let Err(e) = &result {
                    if !cancel.is_cancelled() {
                        status.fail(e.to_string()).await;
                    }
                }
                result
            })
        };

        Ok(ActiveRecording {
            meeting_id: meeting_id.to_string(),
            format,
            compositor,
            cancel,
            task,
        })
    }

    /// Stops, uploads and finalizes. Upload failures are returned verbatim
    /// and leave the session `failed`; a new `start` is required.
    pub async fn stop(&mut self) -> Result<RecordingSession, RecordingError> {
        let phase = self.status.phase().await;
        if phase != RecordingPhase::Recording {
            if phase == RecordingPhase::Failed {
                self.release().await;
            }
            return Err(RecordingError::InvalidTransition {
                from: phase,
                to: RecordingPhase::Stopping,
            });
        }
        let Some(active) = self.active.take() else {
            return Err(RecordingError::InvalidTransition {
                from: phase,
                to: RecordingPhase::Stopping,
            });
        };
        self.status.transition(RecordingPhase::Stopping).await?;

        let ActiveRecording {
            meeting_id,
            format,
            compositor,
            cancel,
            task,
        } = active;

        cancel.cancel();
        let flushed = match task.await {
            Ok(result) => result,
            Err(join_err) => Err(RecordingError::Encoder(anyhow::anyhow!(
                "encoder task panicked: {join_err}"
            ))),
        };

        if let Some(compositor) = compositor {
            compositor.stop().await;
        }

        let blob = match flushed {
            Ok(spool) => spool.assemble(format).await,
            Err(e) => Err(e),
        };
        let blob = match blob {
            Ok(blob) => blob,
            Err(e) => return self.finish_failed(e).await,
        };

        if let Err(e) = self.api.end(&meeting_id).await {
            warn!("End-recording call failed, uploading anyway: {:#}", e);
            self.status
                .update(|s| s.error = Some(format!("end recording: {e:#}")))
                .await;
        }

        self.upload(&meeting_id, blob).await
    }

    async fn upload(
        &mut self,
        meeting_id: &str,
        blob: RecordingBlob,
    ) -> Result<RecordingSession, RecordingError> {
        let progress = self.progress.clone();
        let sink = move |percent: u8| {
            progress.send_replace(percent);
        };

        match self.uploader.upload(meeting_id, &blob, &sink).await {
            Ok(uploaded) => {
                self.status.complete(uploaded.file_url).await?;
                if let Err(e) = tokio::fs::remove_file(&blob.path).await {
                    warn!("Failed to remove uploaded recording {:?}: {}", blob.path, e);
                }
                Ok(self.status.get().await)
            }
            Err(e) => {
                error!(
                    "Recording upload failed; blob kept at {:?}: {:#}",
                    blob.path, e
                );
                self.finish_failed(RecordingError::RecordingUploadFailure(format!("{e:#}")))
                    .await
            }
        }
    }

    async fn finish_failed(
        &mut self,
        e: RecordingError,
    ) -> Result<RecordingSession, RecordingError> {
        self.status.fail(e.to_string()).await;
        Err(e)
    }

    /// Drops the resources of a recording that failed mid-flight.
    async fn release(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            let _ = active.task.await;
            if let Some(compositor) = active.compositor {
                compositor.stop().await;
            }
        }
    }
}
