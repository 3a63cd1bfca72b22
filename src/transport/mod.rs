//! Real-time media transport coordination.
//!
//! The transport SDK and the capture devices are external collaborators,
//! modelled as the `TransportClient` and `MediaDevices` traits. The
//! `MediaTransportAdapter` owns every local device handle and turns raw SDK
//! callbacks into `TransportEvent`s on a broadcast bus.

pub mod adapter;
pub mod client;
pub mod devices;
pub mod tracks;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use adapter::{
    LocalMediaState, LocalTracks, MediaTransportAdapter, RecordingInputs, ScreenShareOutcome,
    StepOutcome, TeardownReport, TeardownStep,
};
pub use client::{SdkEvent, TransportClient};
pub use devices::{DeviceError, MediaDevices, ScreenCapture};
pub use tracks::{AudioTap, LocalTrack, MediaTrack, RemoteTrack, TrackHandle, VideoFrame, VideoTap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    CameraVideo,
    ScreenVideo,
}

impl TrackKind {
    pub fn is_video(&self) -> bool {
        matches!(self, Self::CameraVideo | Self::ScreenVideo)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::CameraVideo => "camera_video",
            Self::ScreenVideo => "screen_video",
        }
    }
}

/// Credentials returned by the external join handshake. Opaque to the
/// engine beyond being handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCredential {
    pub app_id: String,
    pub channel_name: String,
    pub account: String,
    pub token: String,
    /// Epoch seconds.
    pub expiration_time: i64,
}

/// Roster-level events emitted to the session controller and registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum TransportEvent {
    ParticipantJoined { participant_id: String },
    TrackPublished { participant_id: String, kind: TrackKind },
    TrackUnpublished { participant_id: String, kind: TrackKind },
    ParticipantLeft { participant_id: String },
}

impl TransportEvent {
    pub fn participant_id(&self) -> &str {
        match self {
            Self::ParticipantJoined { participant_id }
            | Self::TrackPublished { participant_id, .. }
            | Self::TrackUnpublished { participant_id, .. }
            | Self::ParticipantLeft { participant_id } => participant_id,
        }
    }
}

pub type EventSender = broadcast::Sender<TransportEvent>;
pub type EventReceiver = broadcast::Receiver<TransportEvent>;

pub fn create_event_bus() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}
