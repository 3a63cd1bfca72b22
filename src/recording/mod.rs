//! Local capture and upload of a meeting recording.

pub mod codec;
pub mod compositor;
pub mod encoder;
pub mod mixer;
pub mod pipeline;
pub mod status;
pub mod upload;

pub use codec::{negotiate, CodecSupport, RecordingFormat, FORMAT_PRIORITY};
pub use compositor::{FrameBuffer, FrameCompositor, Rect, SurfaceRegistry};
pub use encoder::{ChunkSpool, EncoderBackend, EncoderPlatform, EncoderSettings, RecordingBlob};
pub use mixer::MixedAudioSource;
pub use pipeline::{
    PipelineSettings, RecordingApi, RecordingOptions, RecordingPipeline, RecordingSources,
    RemoteRecording,
};
pub use status::{RecordingPhase, RecordingSession, RecordingStatusHandle};
pub use upload::{MonotonicProgress, RecordingUploader, ResumableUploader, UploadedRecording};
