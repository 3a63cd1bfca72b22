//! Encoder loop and on-disk chunk spool.
//!
//! Encoded output is drained from the encoder once per chunk interval and
//! appended to a spool file, so a long recording never sits in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RecordingError;
use crate::transport::{VideoFrame, VideoTap};

use super::codec::{CodecSupport, RecordingFormat};
use super::mixer::MixedAudioSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub sample_rate: u32,
}

/// A running encoder instance.
pub trait EncoderBackend: Send {
    fn push_video(&mut self, frame: &VideoFrame) -> Result<()>;

    fn push_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;

    /// Encoded bytes produced since the previous call.
    fn take_chunk(&mut self) -> Result<Vec<u8>>;

    /// Flushes and returns the trailing bytes. The encoder is unusable after.
    fn finish(&mut self) -> Result<Vec<u8>>;
}

/// The platform's media encoder: capability probe plus factory.
pub trait EncoderPlatform: CodecSupport {
    fn create(
        &self,
        format: RecordingFormat,
        settings: &EncoderSettings,
    ) -> Result<Box<dyn EncoderBackend>>;
}

/// The assembled recording, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingBlob {
    pub path: PathBuf,
    pub format: RecordingFormat,
    pub size: u64,
}

impl RecordingBlob {
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    pub async fn from_file(path: &Path, format: RecordingFormat) -> Result<Self, RecordingError> {
        let size = fs::metadata(path).await?.len();
        Ok(Self {
            path: path.to_path_buf(),
            format,
            size,
        })
    }
}

#[derive(Debug)]
pub struct ChunkSpool {
    dir: PathBuf,
    id: Uuid,
    path: PathBuf,
    file: File,
    chunks: u64,
    bytes: u64,
}

impl ChunkSpool {
    pub async fn create(dir: &Path) -> Result<Self, RecordingError> {
        fs::create_dir_all(dir).await?;
        let id = Uuid::new_v4();
        let path = dir.join(format!("{id}.part"));
        let file = File::create(&path).await?;
        debug!("Spooling recording to {:?}", path);
        Ok(Self {
            dir: dir.to_path_buf(),
            id,
            path,
            file,
            chunks: 0,
            bytes: 0,
        })
    }

    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), RecordingError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.file.write_all(chunk).await?;
        self.chunks += 1;
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the spool and renames it after the negotiated container.
    pub async fn assemble(mut self, format: RecordingFormat) -> Result<RecordingBlob, RecordingError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        let target = self.dir.join(format!("{}.{}", self.id, format.extension()));
        fs::rename(&self.path, &target).await?;
        info!(
            "Assembled {} chunks ({} bytes) into {:?}",
            self.chunks, self.bytes, target
        );
        Ok(RecordingBlob {
            path: target,
            format,
            size: self.bytes,
        })
    }

    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!("Failed to discard recording spool {:?}: {}", self.path, e);
        } else {
            debug!("Discarded {} buffered chunks", self.chunks);
        }
    }
}

/// Feeds the encoder at the frame rate and drains it into the spool at the
/// chunk interval until cancelled.
pub struct Recorder {
    pub encoder: Box<dyn EncoderBackend>,
    pub video: Arc<dyn VideoTap>,
    pub audio: Option<MixedAudioSource>,
    pub spool: ChunkSpool,
    pub fps: u32,
    pub chunk_interval: Duration,
}

impl Recorder {
    /// Returns the spool with every chunk flushed. On any encoder or spool
    /// error the buffered chunks are discarded.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ChunkSpool, RecordingError> {
        let result = self.pump(&cancel).await;
        match result {
            Ok(()) => Ok(self.spool),
            Err(e) => {
                warn!("Recording aborted: {}", e);
                self.spool.discard().await;
                Err(e)
            }
        }
    }

    async fn pump(&mut self, cancel: &CancellationToken) -> Result<(), RecordingError> {
        let frame_period = Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)));
        let mut frames = tokio::time::interval(frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut chunks = tokio::time::interval(self.chunk_interval.max(Duration::from_millis(1)));
        chunks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        chunks.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = chunks.tick() => {
                    let chunk = self.encoder.take_chunk().map_err(RecordingError::Encoder)?;
                    self.spool.append(&chunk).await?;
                }
                _ = frames.tick() => self.feed()?,
            }
        }

        let chunk = self.encoder.take_chunk().map_err(RecordingError::Encoder)?;
        self.spool.append(&chunk).await?;
        let tail = self.encoder.finish().map_err(RecordingError::Encoder)?;
        self.spool.append(&tail).await?;
        debug!("Encoder flushed after {} chunks", self.spool.chunk_count());
        Ok(())
    }

    fn feed(&mut self) -> Result<(), RecordingError> {
        if let Some(frame) = self.video.latest_frame() {
            self.encoder
                .push_video(&frame)
                .map_err(RecordingError::Encoder)?;
        }
        if let Some(audio) = self.audio.as_mut() {
            let samples = audio.pull();
            if !samples.is_empty() {
                self.encoder
                    .push_audio(&samples, audio.sample_rate())
                    .map_err(RecordingError::Encoder)?;
            }
        }
        Ok(())
    }
}
