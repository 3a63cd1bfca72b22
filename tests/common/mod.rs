//! In-memory fakes of the external seams shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Notify};

use meeting_engine::session::{
    JoinForm, JoinHandshake, JoinParams, JoinToken, MeetingDirectory, MeetingSession, MeetingStatus,
};
use meeting_engine::participants::ParticipantRole;
use meeting_engine::transport::{
    AudioTap, DeviceError, LocalTrack, MediaDevices, RemoteTrack, ScreenCapture, TrackHandle,
    TrackKind, TransportClient, TransportCredential, VideoFrame, VideoTap,
};

pub const LOCAL_ID: &str = "local-1";
pub const MEETING_ID: &str = "m42";

pub struct StillTap(pub VideoFrame);

impl VideoTap for StillTap {
    fn latest_frame(&self) -> Option<VideoFrame> {
        Some(self.0.clone())
    }
}

pub struct SilenceTap {
    pub rate: u32,
}

impl AudioTap for SilenceTap {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn read(&mut self) -> Vec<f32> {
        vec![0.0; (self.rate / 100) as usize]
    }
}

pub struct FakeHandle {
    pub kind: TrackKind,
    enabled: AtomicBool,
    closed: AtomicBool,
    fail_close: bool,
}

impl FakeHandle {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_close: false,
        })
    }

    pub fn failing_close(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_close: true,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl TrackHandle for FakeHandle {
    fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            bail!("device busy");
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        !self.is_closed()
    }

    fn audio_tap(&self) -> Option<Box<dyn AudioTap>> {
        (self.kind == TrackKind::Audio).then(|| Box::new(SilenceTap { rate: 48_000 }) as Box<dyn AudioTap>)
    }

    fn video_tap(&self) -> Option<Arc<dyn VideoTap>> {
        self.kind.is_video().then(|| {
            Arc::new(StillTap(VideoFrame::solid(16, 9, [200, 10, 10, 255]))) as Arc<dyn VideoTap>
        })
    }
}

/// Records every SDK call as `"<op>:<kind>"`.
#[derive(Default)]
pub struct FakeClient {
    pub calls: Mutex<Vec<String>>,
    pub fail_join: AtomicBool,
    pub fail_leave: AtomicBool,
    pub fail_publish_once: Mutex<Option<TrackKind>>,
}

impl FakeClient {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TransportClient for FakeClient {
    async fn join(&self, _app_id: &str, channel: &str, _token: &str, uid: &str) -> Result<()> {
        self.record(format!("join:{channel}:{uid}"));
        if self.fail_join.load(Ordering::SeqCst) {
            bail!("invalid transport token");
        }
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        self.record("leave".to_string());
        if self.fail_leave.load(Ordering::SeqCst) {
            bail!("already disconnected");
        }
        Ok(())
    }

    async fn publish(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("publish:{}", track.kind().as_str()));
        let mut fail = self.fail_publish_once.lock().unwrap();
        if *fail == Some(track.kind()) {
            *fail = None;
            bail!("publish rejected");
        }
        Ok(())
    }

    async fn unpublish(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("unpublish:{}", track.kind().as_str()));
        Ok(())
    }

    async fn subscribe(&self, uid: &str, kind: TrackKind) -> Result<RemoteTrack> {
        self.record(format!("subscribe:{uid}:{}", kind.as_str()));
        Ok(RemoteTrack {
            participant_id: uid.to_string(),
            kind,
            handle: FakeHandle::new(kind),
        })
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub deny_permission: AtomicBool,
    pub fail_close_audio: AtomicBool,
    pub cancel_picker: AtomicBool,
    pub probes: AtomicUsize,
    pub screen_prompts: AtomicUsize,
    pub created: Mutex<Vec<Arc<FakeHandle>>>,
    pub screens: Mutex<Vec<Arc<FakeHandle>>>,
    pub share_ended: Mutex<Option<oneshot::Sender<()>>>,
    /// When set, the screen picker waits for a notification.
    pub picker_hold: Option<Arc<Notify>>,
    /// The permission prompt never gets an answer.
    pub hang_permission: AtomicBool,
    /// Opening this kind of device never completes.
    pub hang_create: Mutex<Option<TrackKind>>,
}

impl FakeDevices {
    pub fn created(&self, kind: TrackKind) -> Vec<Arc<FakeHandle>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.kind == kind)
            .cloned()
            .collect()
    }

    /// Simulates the browser's native "Stop sharing" button.
    pub fn end_share_externally(&self) {
        if let Some(tx) = self.share_ended.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn probe_permission(&self, _kinds: &[TrackKind]) -> Result<(), DeviceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.hang_permission.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        Ok(())
    }

    async fn create_track(&self, kind: TrackKind) -> Result<Arc<dyn TrackHandle>, DeviceError> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        if *self.hang_create.lock().unwrap() == Some(kind) {
            std::future::pending::<()>().await;
        }
        let handle = if kind == TrackKind::Audio && self.fail_close_audio.load(Ordering::SeqCst) {
            FakeHandle::failing_close(kind)
        } else {
            FakeHandle::new(kind)
        };
        self.created.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn create_screen_capture(&self) -> Result<ScreenCapture, DeviceError> {
        self.screen_prompts.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.picker_hold {
            hold.notified().await;
        }
        if self.cancel_picker.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        let handle = FakeHandle::new(TrackKind::ScreenVideo);
        self.screens.lock().unwrap().push(handle.clone());
        let (tx, rx) = oneshot::channel();
        *self.share_ended.lock().unwrap() = Some(tx);
        Ok(ScreenCapture { handle, ended: rx })
    }
}

pub fn credential() -> TransportCredential {
    TransportCredential {
        app_id: "app".to_string(),
        channel_name: format!("channel-{MEETING_ID}"),
        account: LOCAL_ID.to_string(),
        token: "transport-token".to_string(),
        expiration_time: 4_102_444_800,
    }
}

/// Counters are shared so tests can keep a view after boxing the fake.
#[derive(Default)]
pub struct FakeHandshake {
    pub fail: Arc<AtomicBool>,
    pub hang: bool,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl JoinHandshake for FakeHandshake {
    async fn join(&self, _token: &JoinToken, _form: &JoinForm) -> Result<TransportCredential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("join service unavailable");
        }
        Ok(credential())
    }
}

pub struct FakeDirectory {
    pub session: Arc<Mutex<MeetingSession>>,
}

impl FakeDirectory {
    pub fn new(session: MeetingSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }
}

#[async_trait]
impl MeetingDirectory for FakeDirectory {
    async fn fetch(&self, meeting_id: &str) -> Result<MeetingSession> {
        let session = self.session.lock().unwrap().clone();
        if session.meeting_id != meeting_id {
            bail!("meeting {meeting_id} not found");
        }
        Ok(session)
    }
}

pub fn meeting(scheduled_at: DateTime<Utc>) -> MeetingSession {
    MeetingSession {
        meeting_id: MEETING_ID.to_string(),
        scheduled_at,
        duration_minutes: 30,
        status: MeetingStatus::Scheduled,
        max_participants: 4,
        current_participants: 0,
    }
}

/// A link valid from one hour ago to one hour from now.
pub fn valid_params() -> JoinParams {
    let now = Utc::now().timestamp_millis();
    params_with_window(now - 3_600_000, now + 3_600_000)
}

pub fn params_with_window(issued_at_ms: i64, expires_at_ms: i64) -> JoinParams {
    JoinParams {
        meeting_id: MEETING_ID.to_string(),
        token: Some(format!("{MEETING_ID}_{issued_at_ms}_c2ln")),
        email: Some("dana@example.com".to_string()),
        expires_at_ms: Some(expires_at_ms.to_string()),
    }
}

pub fn form(with_audio: bool, with_video: bool) -> JoinForm {
    JoinForm {
        display_name: "Dana".to_string(),
        email: "dana@example.com".to_string(),
        role: ParticipantRole::Candidate,
        with_audio,
        with_video,
    }
}
