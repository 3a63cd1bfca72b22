//! Error taxonomy for the session engine.
//!
//! External seams (transport SDK, devices, encoder backend, HTTP) report
//! `anyhow::Error`; these enums wrap them at the boundary so callers can
//! match on what went wrong.

use thiserror::Error;

use crate::recording::RecordingPhase;
use crate::transport::TrackKind;

/// Why a join link was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("join link is invalid: {0}")]
    TokenInvalid(String),
    #[error("join link expired at {expires_at_ms} (now {now_ms})")]
    TokenExpired { expires_at_ms: i64, now_ms: i64 },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("camera/microphone permission denied")]
    PermissionDenied,
    #[error("failed to join transport channel: {0}")]
    TransportJoinFailure(#[source] anyhow::Error),
    #[error("a screen-share operation is already in flight")]
    ScreenShareInFlight,
    #[error("not joined to a transport channel")]
    NotJoined,
    #[error("no local {} track has been created", .0.as_str())]
    NoLocalTrack(TrackKind),
    #[error("cannot publish {}: another video track is already published", .0.as_str())]
    VideoSlotTaken(TrackKind),
    #[error("operation cancelled by leave")]
    Cancelled,
    #[error("transport operation '{operation}' failed: {source}")]
    Sdk {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("device error: {0}")]
    Device(#[source] anyhow::Error),
}

impl TransportError {
    pub fn sdk(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Sdk { operation, source }
    }
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("no video source available for recording")]
    RecordingSourceUnavailable,
    #[error("invalid recording transition {from} -> {to}")]
    InvalidTransition {
        from: RecordingPhase,
        to: RecordingPhase,
    },
    #[error("no supported recording container/codec")]
    NoSupportedFormat,
    #[error("encoder failed: {0}")]
    Encoder(#[source] anyhow::Error),
    #[error("recording backend call '{operation}' failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    /// Surfaced verbatim: the message carries the underlying transport error.
    #[error("recording upload failed: {0}")]
    RecordingUploadFailure(String),
    #[error("recording spool I/O failed: {0}")]
    Spool(#[from] std::io::Error),
}

/// Errors returned by `SessionController`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("cannot {action} while session is {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: crate::session::SessionPhase,
    },
    #[error("meeting {meeting_id} is not joinable: {reason}")]
    NotJoinable { meeting_id: String, reason: String },
    #[error("join handshake failed: {0}")]
    Handshake(#[source] anyhow::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("join cancelled by leave")]
    Cancelled,
}
