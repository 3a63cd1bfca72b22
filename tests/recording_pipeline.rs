mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use common::{SilenceTap, StillTap};
use meeting_engine::layout::LayoutOptions;
use meeting_engine::recording::upload::ProgressFn;
use meeting_engine::recording::{
    CodecSupport, EncoderBackend, EncoderPlatform, EncoderSettings, PipelineSettings,
    RecordingApi, RecordingBlob, RecordingFormat, RecordingOptions, RecordingPhase,
    RecordingPipeline, RecordingSources, RecordingStatusHandle, RecordingUploader,
    RemoteRecording, UploadedRecording,
};
use meeting_engine::transport::{AudioTap, VideoFrame, VideoTap};
use meeting_engine::RecordingError;

struct FakePlatform {
    supported: Mutex<Vec<&'static str>>,
    fail_after_frames: Option<u64>,
    last_frame: Arc<Mutex<Option<VideoFrame>>>,
}

impl FakePlatform {
    fn supporting(mimes: &[&'static str]) -> Self {
        Self {
            supported: Mutex::new(mimes.to_vec()),
            fail_after_frames: None,
            last_frame: Arc::default(),
        }
    }

    fn last_frame(&self) -> Option<VideoFrame> {
        self.last_frame.lock().unwrap().clone()
    }
}

impl CodecSupport for FakePlatform {
    fn is_supported(&self, mime: &str) -> bool {
        self.supported.lock().unwrap().iter().any(|m| *m == mime)
    }
}

impl EncoderPlatform for FakePlatform {
    fn create(
        &self,
        _format: RecordingFormat,
        _settings: &EncoderSettings,
    ) -> Result<Box<dyn EncoderBackend>> {
        Ok(Box::new(FakeEncoder {
            frames: 0,
            pending: Vec::new(),
            fail_after_frames: self.fail_after_frames,
            last_frame: self.last_frame.clone(),
        }))
    }
}

struct FakeEncoder {
    frames: u64,
    pending: Vec<u8>,
    fail_after_frames: Option<u64>,
    last_frame: Arc<Mutex<Option<VideoFrame>>>,
}

impl EncoderBackend for FakeEncoder {
    fn push_video(&mut self, frame: &VideoFrame) -> Result<()> {
        self.frames += 1;
        *self.last_frame.lock().unwrap() = Some(frame.clone());
        if self.fail_after_frames.is_some_and(|limit| self.frames > limit) {
            bail!("hardware encoder lost");
        }
        self.pending.extend_from_slice(b"frame;");
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32], _sample_rate: u32) -> Result<()> {
        if !samples.is_empty() {
            self.pending.push(b'a');
        }
        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        Ok(b"trailer".to_vec())
    }
}

#[derive(Default)]
struct FakeApi {
    begun: Mutex<Vec<RecordingOptions>>,
    ended: Mutex<Vec<String>>,
    fail_end: AtomicBool,
}

#[async_trait]
impl RecordingApi for FakeApi {
    async fn begin(&self, _meeting_id: &str, options: &RecordingOptions) -> Result<RemoteRecording> {
        self.begun.lock().unwrap().push(options.clone());
        Ok(RemoteRecording {
            id: "rec-1".to_string(),
            status: Some("recording".to_string()),
            file_url: None,
        })
    }

    async fn end(&self, meeting_id: &str) -> Result<RemoteRecording> {
        self.ended.lock().unwrap().push(meeting_id.to_string());
        if self.fail_end.load(Ordering::SeqCst) {
            bail!("recording service timed out");
        }
        Ok(RemoteRecording {
            id: "rec-1".to_string(),
            status: Some("stopped".to_string()),
            file_url: None,
        })
    }
}

#[derive(Default)]
struct FakeUploader {
    fail_with: Option<String>,
    uploads: Mutex<Vec<(PathBuf, String, u64)>>,
}

#[async_trait]
impl RecordingUploader for FakeUploader {
    async fn upload(
        &self,
        meeting_id: &str,
        blob: &RecordingBlob,
        progress: ProgressFn<'_>,
    ) -> Result<UploadedRecording> {
        let on_disk = tokio::fs::metadata(&blob.path).await?.len();
        assert_eq!(on_disk, blob.size);
        self.uploads
            .lock()
            .unwrap()
            .push((blob.path.clone(), blob.mime().to_string(), blob.size));

        progress(10);
        progress(60);
        if let Some(message) = &self.fail_with {
            bail!("{}", message);
        }
        progress(100);
        Ok(UploadedRecording {
            file_url: format!("https://files.example.com/{meeting_id}.webm"),
        })
    }
}

struct Fixture {
    pipeline: RecordingPipeline,
    status: RecordingStatusHandle,
    platform: Arc<FakePlatform>,
    api: Arc<FakeApi>,
    uploader: Arc<FakeUploader>,
    spool: tempfile::TempDir,
}

fn fixture(platform: FakePlatform, uploader: FakeUploader) -> Fixture {
    let spool = tempfile::tempdir().unwrap();
    let platform = Arc::new(platform);
    let api = Arc::new(FakeApi::default());
    let uploader = Arc::new(uploader);
    let status = RecordingStatusHandle::default();
    let settings = PipelineSettings {
        fps: 50,
        chunk_interval: Duration::from_millis(20),
        spool_dir: spool.path().to_path_buf(),
        layout: LayoutOptions::default(),
    };
    let pipeline = RecordingPipeline::new(
        api.clone(),
        uploader.clone(),
        platform.clone(),
        settings,
        status.clone(),
    );
    Fixture {
        pipeline,
        status,
        platform,
        api,
        uploader,
        spool,
    }
}

fn options() -> RecordingOptions {
    RecordingOptions {
        format: None,
        width: 320,
        height: 180,
        fps: 50,
        bitrate: 1_000_000,
    }
}

fn still(pixel: [u8; 4]) -> Arc<dyn VideoTap> {
    Arc::new(StillTap(VideoFrame::solid(32, 18, pixel)))
}

fn screen_sources() -> RecordingSources {
    RecordingSources {
        screen_video: Some(still([0, 0, 255, 255])),
        tiles: Vec::new(),
        audio: vec![Box::new(SilenceTap { rate: 16_000 }) as Box<dyn AudioTap>],
    }
}

fn spool_files(dir: &tempfile::TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn test_negotiated_format_is_kept_for_the_whole_recording() {
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), FakeUploader::default());
    let mut progress = f.pipeline.subscribe_progress();

    let session = f
        .pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();
    assert_eq!(session.phase, RecordingPhase::Recording);
    assert_eq!(session.format, Some(RecordingFormat::Webm));
    assert_eq!(session.id.as_deref(), Some("rec-1"));
    assert_eq!(
        f.api.begun.lock().unwrap()[0].format,
        Some(RecordingFormat::Webm)
    );

    *f.platform.supported.lock().unwrap() = vec!["video/mp4"];
    tokio::time::sleep(Duration::from_millis(80)).await;

    let session = f.pipeline.stop().await.unwrap();
    assert_eq!(session.phase, RecordingPhase::Completed);
    assert_eq!(
        session.file_url.as_deref(),
        Some("https://files.example.com/m42.webm")
    );

    let uploads = f.uploader.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    let (path, mime, size) = &uploads[0];
    assert_eq!(mime, "video/webm");
    assert_eq!(path.extension().unwrap(), "webm");
    assert!(*size > 0);
    assert!(!path.exists());

    assert!(progress.has_changed().unwrap());
    assert_eq!(*progress.borrow_and_update(), 100);
    assert_eq!(*f.api.ended.lock().unwrap(), vec!["m42".to_string()]);
}

#[tokio::test]
async fn test_missing_video_source_changes_nothing() {
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), FakeUploader::default());
    let sources = RecordingSources {
        audio: vec![Box::new(SilenceTap { rate: 48_000 }) as Box<dyn AudioTap>],
        ..RecordingSources::default()
    };

    let result = f.pipeline.start("m42", sources, options()).await;

    assert!(matches!(
        result,
        Err(RecordingError::RecordingSourceUnavailable)
    ));
    assert_eq!(f.status.phase().await, RecordingPhase::Idle);
    assert!(f.api.begun.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_supported_format_fails_before_backend() {
    let mut f = fixture(FakePlatform::supporting(&[]), FakeUploader::default());

    let result = f.pipeline.start("m42", screen_sources(), options()).await;

    assert!(matches!(result, Err(RecordingError::NoSupportedFormat)));
    assert_eq!(f.status.phase().await, RecordingPhase::Failed);
    assert!(f.api.begun.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_surfaced_verbatim() {
    let uploader = FakeUploader {
        fail_with: Some("connection reset by peer".to_string()),
        ..FakeUploader::default()
    };
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), uploader);
    f.pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = f.pipeline.stop().await;

    match result {
        Err(RecordingError::RecordingUploadFailure(message)) => {
            assert!(message.contains("connection reset by peer"), "{message}")
        }
        other => panic!("expected upload failure, got {other:?}"),
    }
    let session = f.status.get().await;
    assert_eq!(session.phase, RecordingPhase::Failed);
    assert!(session
        .error
        .unwrap()
        .contains("connection reset by peer"));

    let (kept, _, _) = f.uploader.uploads.lock().unwrap()[0].clone();
    assert!(kept.exists());

    let restarted = f
        .pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();
    assert_eq!(restarted.phase, RecordingPhase::Recording);
    assert_eq!(restarted.error, None);
}

#[tokio::test]
async fn test_end_call_failure_does_not_block_upload() {
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), FakeUploader::default());
    f.api.fail_end.store(true, Ordering::SeqCst);
    f.pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();

    let session = f.pipeline.stop().await.unwrap();

    assert_eq!(session.phase, RecordingPhase::Completed);
    assert!(session.error.unwrap().contains("recording service timed out"));
    assert_eq!(f.uploader.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_composites_tiles_without_screen_share() {
    let mut f = fixture(
        FakePlatform::supporting(&["video/webm;codecs=vp8,opus", "video/webm"]),
        FakeUploader::default(),
    );
    let sources = RecordingSources {
        screen_video: None,
        tiles: vec![
            ("local-1".to_string(), still([255, 0, 0, 255])),
            ("remote-1".to_string(), still([0, 255, 0, 255])),
        ],
        audio: Vec::new(),
    };

    let session = f.pipeline.start("m42", sources, options()).await.unwrap();
    assert_eq!(session.format, Some(RecordingFormat::WebmVp8Opus));
    tokio::time::sleep(Duration::from_millis(60)).await;

    let session = f.pipeline.stop().await.unwrap();
    assert_eq!(session.phase, RecordingPhase::Completed);
    let (_, mime, size) = f.uploader.uploads.lock().unwrap()[0].clone();
    assert_eq!(mime, "video/webm;codecs=vp8,opus");
    assert!(size > 0);
}

#[tokio::test]
async fn test_encoder_failure_discards_chunks() {
    let platform = FakePlatform {
        fail_after_frames: Some(2),
        ..FakePlatform::supporting(&["video/webm"])
    };
    let mut f = fixture(platform, FakeUploader::default());
    f.pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();

    let mut phase = f.status.phase().await;
    for _ in 0..100 {
        if phase == RecordingPhase::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        phase = f.status.phase().await;
    }
    assert_eq!(phase, RecordingPhase::Failed);
    assert!(f
        .status
        .get()
        .await
        .error
        .unwrap()
        .contains("hardware encoder lost"));
    assert_eq!(spool_files(&f.spool), 0);

    let stop = f.pipeline.stop().await;
    assert!(matches!(
        stop,
        Err(RecordingError::InvalidTransition {
            from: RecordingPhase::Failed,
            ..
        })
    ));
    assert!(f.uploader.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_and_restart_out_of_order() {
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), FakeUploader::default());

    let stop = f.pipeline.stop().await;
    assert!(matches!(
        stop,
        Err(RecordingError::InvalidTransition {
            from: RecordingPhase::Idle,
            to: RecordingPhase::Stopping,
        })
    ));

    f.pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();
    let again = f.pipeline.start("m42", screen_sources(), options()).await;
    assert!(matches!(
        again,
        Err(RecordingError::InvalidTransition {
            from: RecordingPhase::Recording,
            ..
        })
    ));
    assert_eq!(f.api.begun.lock().unwrap().len(), 1);
}

fn encoded_shows(platform: &FakePlatform, px: [u8; 4]) -> bool {
    platform
        .last_frame()
        .is_some_and(|frame| frame.rgba.chunks_exact(4).any(|p| p == &px[..]))
}

#[tokio::test]
async fn test_tiles_follow_roster_while_recording() {
    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), FakeUploader::default());
    let local = still(RED);
    let sources = RecordingSources {
        screen_video: None,
        tiles: vec![("local-1".to_string(), local.clone())],
        audio: Vec::new(),
    };
    let wide = RecordingOptions {
        width: 640,
        height: 360,
        ..options()
    };
    f.pipeline.start("m42", sources, wide).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(encoded_shows(&f.platform, RED));
    assert!(!encoded_shows(&f.platform, GREEN));

    assert!(f.pipeline.update_tiles(vec![
        ("local-1".to_string(), local.clone()),
        ("remote-1".to_string(), still(GREEN)),
    ]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(encoded_shows(&f.platform, RED));
    assert!(encoded_shows(&f.platform, GREEN));

    assert!(f.pipeline.update_tiles(vec![("local-1".to_string(), local)]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!encoded_shows(&f.platform, GREEN));

    let session = f.pipeline.stop().await.unwrap();
    assert_eq!(session.phase, RecordingPhase::Completed);
    assert!(!f.pipeline.update_tiles(Vec::new()));
}

#[tokio::test]
async fn test_screen_recording_ignores_tile_updates() {
    let mut f = fixture(FakePlatform::supporting(&["video/webm"]), FakeUploader::default());
    f.pipeline
        .start("m42", screen_sources(), options())
        .await
        .unwrap();

    assert!(!f.pipeline.update_tiles(vec![("remote-1".to_string(), still([0, 255, 0, 255]))]));

    f.pipeline.stop().await.unwrap();
}
