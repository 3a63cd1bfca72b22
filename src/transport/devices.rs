//! Seam to camera, microphone and screen capture.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use super::tracks::TrackHandle;
use super::TrackKind;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,
    /// The user dismissed the share picker.
    #[error("capture cancelled by user")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A freshly captured screen track.
pub struct ScreenCapture {
    pub handle: Arc<dyn TrackHandle>,
    /// Fires when the OS or browser ends the share on its own
    /// (e.g. the native "Stop sharing" button).
    pub ended: oneshot::Receiver<()>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Checks access for every kind without opening any device.
    async fn probe_permission(&self, kinds: &[TrackKind]) -> Result<(), DeviceError>;

    async fn create_track(&self, kind: TrackKind) -> Result<Arc<dyn TrackHandle>, DeviceError>;

    async fn create_screen_capture(&self) -> Result<ScreenCapture, DeviceError>;
}

impl From<DeviceError> for crate::error::TransportError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied => Self::PermissionDenied,
            DeviceError::Cancelled => Self::Device(anyhow::anyhow!("capture cancelled by user")),
            DeviceError::Other(e) => Self::Device(e),
        }
    }
}
