//! Seam to the real-time transport SDK.

use anyhow::Result;
use async_trait::async_trait;

use super::tracks::{LocalTrack, RemoteTrack};
use super::TrackKind;

/// Raw callbacks delivered by the SDK, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    UserJoined { uid: String },
    UserPublished { uid: String, kind: TrackKind },
    UserUnpublished { uid: String, kind: TrackKind },
    UserLeft { uid: String },
}

impl SdkEvent {
    pub fn uid(&self) -> &str {
        match self {
            Self::UserJoined { uid }
            | Self::UserPublished { uid, .. }
            | Self::UserUnpublished { uid, .. }
            | Self::UserLeft { uid } => uid,
        }
    }
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn join(&self, app_id: &str, channel: &str, token: &str, uid: &str) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    async fn publish(&self, track: &LocalTrack) -> Result<()>;

    async fn unpublish(&self, track: &LocalTrack) -> Result<()>;

    async fn subscribe(&self, uid: &str, kind: TrackKind) -> Result<RemoteTrack>;
}
