//! Track handles and the read-only taps the recorder consumes.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use super::TrackKind;

/// A decoded RGBA video frame.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rgba: Arc::new(rgba),
        }
    }

    /// Uniformly coloured frame, handy for placeholders.
    pub fn solid(width: u32, height: u32, pixel: [u8; 4]) -> Self {
        let rgba = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, rgba)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.rgba.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Pull-based audio reader attached to a live track.
///
/// Each `read` drains the samples captured since the previous call, so the
/// mixer can consume several taps at its own cadence.
pub trait AudioTap: Send {
    fn sample_rate(&self) -> u32;

    fn read(&mut self) -> Vec<f32>;
}

/// Read access to the most recent frame of a video track.
pub trait VideoTap: Send + Sync {
    fn latest_frame(&self) -> Option<VideoFrame>;
}

/// Native handle of a single media stream, as created by the devices layer
/// or handed out by the transport on subscribe.
pub trait TrackHandle: Send + Sync {
    fn set_enabled(&self, enabled: bool) -> Result<()>;

    /// Releases the underlying device or decoder. Must tolerate repeat calls.
    fn close(&self) -> Result<()>;

    fn is_live(&self) -> bool;

    fn audio_tap(&self) -> Option<Box<dyn AudioTap>> {
        None
    }

    fn video_tap(&self) -> Option<Arc<dyn VideoTap>> {
        None
    }
}

/// A locally created track. Cloning shares the same native handle.
#[derive(Clone)]
pub struct LocalTrack {
    id: Uuid,
    kind: TrackKind,
    handle: Arc<dyn TrackHandle>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, handle: Arc<dyn TrackHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn handle(&self) -> &Arc<dyn TrackHandle> {
        &self.handle
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("live", &self.handle.is_live())
            .finish()
    }
}

/// A subscribed remote track.
#[derive(Clone)]
pub struct RemoteTrack {
    pub participant_id: String,
    pub kind: TrackKind,
    pub handle: Arc<dyn TrackHandle>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("participant_id", &self.participant_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Published-state view of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaTrack {
    pub owner_participant_id: String,
    pub kind: TrackKind,
    pub published: bool,
}
