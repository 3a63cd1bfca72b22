//! Owner of all local device handles and the published-track invariant.
//!
//! At most one local video track is published at a time: camera or screen,
//! never both. Screen-share start/stop run under a single-flight guard
//! because both mutate which video track is live.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;

use super::client::{SdkEvent, TransportClient};
use super::devices::{DeviceError, MediaDevices};
use super::tracks::{AudioTap, LocalTrack, MediaTrack, RemoteTrack, VideoTap};
use super::{create_event_bus, EventReceiver, EventSender, TrackKind, TransportCredential, TransportEvent};

/// Snapshot of the local media toggles, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LocalMediaState {
    pub joined: bool,
    pub muted: bool,
    pub camera_enabled: bool,
    pub camera_published: bool,
    pub screen_sharing: bool,
}

#[derive(Debug, Default)]
pub struct LocalTracks {
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenShareOutcome {
    /// A new capture was requested and published.
    Started,
    /// A still-live screen track was published without prompting again.
    Reused,
    AlreadyActive,
    /// The picker was dismissed. Nothing was unpublished.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    DisableAudio,
    CloseAudio,
    DisableVideo,
    CloseVideo,
    CloseScreenShare,
    LeaveChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Skipped,
    Failed(String),
}

/// Outcome of every teardown step, in execution order.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TeardownReport {
    pub steps: Vec<(TeardownStep, StepOutcome)>,
}

impl TeardownReport {
    fn record(&mut self, step: TeardownStep, result: Option<anyhow::Result<()>>) {
        let outcome = match result {
            None => StepOutcome::Skipped,
            Some(Ok(())) => StepOutcome::Done,
            Some(Err(e)) => {
                warn!("Teardown step {:?} failed: {}", step, e);
                StepOutcome::Failed(e.to_string())
            }
        };
        self.steps.push((step, outcome));
    }

    pub fn attempted(&self) -> Vec<TeardownStep> {
        self.steps.iter().map(|(step, _)| *step).collect()
    }

    pub fn failures(&self) -> Vec<TeardownStep> {
        self.steps
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StepOutcome::Failed(_)))
            .map(|(step, _)| *step)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Read-only media handed to the recorder.
#[derive(Default)]
pub struct RecordingInputs {
    /// Present only while a screen share is published.
    pub screen_video: Option<Arc<dyn VideoTap>>,
    /// Local microphone first, then every subscribed remote audio track.
    pub audio: Vec<Box<dyn AudioTap>>,
}

#[derive(Default)]
struct AdapterState {
    joined: bool,
    local_id: Option<String>,
    audio: Option<LocalTrack>,
    audio_enabled: bool,
    camera: Option<LocalTrack>,
    camera_enabled: bool,
    screen: Option<LocalTrack>,
    screen_ended: Option<oneshot::Receiver<()>>,
    share_watcher: Option<JoinHandle<()>>,
    share_active: bool,
    camera_published_before_share: bool,
    published: HashSet<TrackKind>,
    remote: HashMap<(String, TrackKind), RemoteTrack>,
}

impl AdapterState {
    fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::CameraVideo => self.camera.as_ref(),
            TrackKind::ScreenVideo => self.screen.as_ref(),
        }
    }

    fn snapshot(&self) -> LocalMediaState {
        LocalMediaState {
            joined: self.joined,
            muted: self.audio.is_some() && !self.audio_enabled,
            camera_enabled: self.camera.is_some() && self.camera_enabled,
            camera_published: self.published.contains(&TrackKind::CameraVideo),
            screen_sharing: self.share_active,
        }
    }
}

pub struct MediaTransportAdapter {
    client: Arc<dyn TransportClient>,
    devices: Arc<dyn MediaDevices>,
    state: Mutex<AdapterState>,
    share_guard: Semaphore,
    cancel: StdMutex<CancellationToken>,
    events: EventSender,
    local_state: watch::Sender<LocalMediaState>,
}

impl MediaTransportAdapter {
    pub fn new(client: Arc<dyn TransportClient>, devices: Arc<dyn MediaDevices>) -> Self {
        let (events, _) = create_event_bus();
        let (local_state, _) = watch::channel(LocalMediaState::default());
        Self {
            client,
            devices,
            state: Mutex::new(AdapterState::default()),
            share_guard: Semaphore::new(1),
            cancel: StdMutex::new(CancellationToken::new()),
            events,
            local_state,
        }
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn local_state(&self) -> watch::Receiver<LocalMediaState> {
        self.local_state.subscribe()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Cancels every pending SDK or device await and arms a fresh token.
    pub fn cancel_in_flight(&self) {
        let mut token = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *token, CancellationToken::new()).cancel();
    }

    fn publish_state(&self, state: &AdapterState) {
        self.local_state.send_replace(state.snapshot());
    }

    /// Joins the transport channel. Not retried here; callers decide.
    pub async fn join(
        &self,
        credential: &TransportCredential,
        local_id: &str,
    ) -> Result<(), TransportError> {
        info!(
            "Joining channel {} as {} (app {})",
            credential.channel_name, local_id, credential.app_id
        );

        let cancel = self.cancel_token();
        let joined = tokio::select! {
            result = self.client.join(
                &credential.app_id,
                &credential.channel_name,
                &credential.token,
                local_id,
            ) => result,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };
        joined.map_err(TransportError::TransportJoinFailure)?;

        let mut state = self.state.lock().await;
        state.joined = true;
        state.local_id = Some(local_id.to_string());
        self.publish_state(&state);

        info!("Joined channel {}", credential.channel_name);
        Ok(())
    }

    /// Creates local capture tracks. Permission is probed before anything is
    /// opened, so a denial leaves no half-created native resources behind.
    pub async fn create_local_tracks(
        &self,
        kinds: &[TrackKind],
    ) -> Result<LocalTracks, TransportError> {
        let mut wanted: Vec<TrackKind> = Vec::new();
        for kind in kinds {
            if *kind != TrackKind::ScreenVideo && !wanted.contains(kind) {
                wanted.push(*kind);
            }
        }
        if wanted.is_empty() {
            return Ok(LocalTracks::default());
        }

        let cancel = self.cancel_token();
        let probed = tokio::select! {
            result = self.devices.probe_permission(&wanted) => result,
            _ = cancel.cancelled() => {
                info!("Device permission prompt abandoned by leave");
                return Err(TransportError::Cancelled);
            }
        };
        match probed {
            Ok(()) => {}
            Err(DeviceError::PermissionDenied) => {
                warn!("Device permission denied for {:?}; no tracks created", wanted);
                return Err(TransportError::PermissionDenied);
            }
            Err(e) => return Err(e.into()),
        }

        let mut created = LocalTracks::default();
        for kind in wanted {
            let made = tokio::select! {
                result = self.devices.create_track(kind) => result.map_err(TransportError::from),
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
            };
            match made {
                Ok(handle) => {
                    let track = LocalTrack::new(kind, handle);
                    if kind == TrackKind::Audio {
                        created.audio = Some(track);
                    } else {
                        created.video = Some(track);
                    }
                }
                Err(e) => {
                    warn!("Failed to create {} track: {}", kind.as_str(), e);
                    for track in created.audio.iter().chain(created.video.iter()) {
                        close_quietly(track, "partial");
                    }
                    return Err(e);
                }
            }
        }

        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            for track in created.audio.iter().chain(created.video.iter()) {
                close_quietly(track, "partial");
            }
            return Err(TransportError::Cancelled);
        }
        if let Some(audio) = &created.audio {
            self.retire_local(&mut state, TrackKind::Audio).await;
            state.audio = Some(audio.clone());
            state.audio_enabled = true;
        }
        if let Some(video) = &created.video {
            self.retire_local(&mut state, TrackKind::CameraVideo).await;
            state.camera = Some(video.clone());
            state.camera_enabled = true;
        }
        self.publish_state(&state);

        debug!(
            "Created local tracks: audio={} video={}",
            created.audio.is_some(),
            created.video.is_some()
        );
        Ok(created)
    }

    /// Unpublishes and closes the current local track of `kind` before a
    /// replacement takes its slot, so the transport never keeps a dead track.
    async fn retire_local(&self, state: &mut AdapterState, kind: TrackKind) {
        if state.track(kind).is_none() {
            return;
        }
        if let Err(e) = self.unpublish_locked(state, kind).await {
            warn!("Failed to unpublish replaced {} track: {}", kind.as_str(), e);
            state.published.remove(&kind);
        }
        let old = match kind {
            TrackKind::Audio => state.audio.take(),
            TrackKind::CameraVideo => state.camera.take(),
            TrackKind::ScreenVideo => state.screen.take(),
        };
        if let Some(old) = old {
            close_quietly(&old, "replaced");
        }
    }

    /// Publishes the local tracks of the given kinds. Already-published
    /// tracks are skipped.
    pub async fn publish(&self, kinds: &[TrackKind]) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        for kind in kinds {
            self.publish_locked(&mut state, *kind).await?;
        }
        self.publish_state(&state);
        Ok(())
    }

    /// Unpublishes the local tracks of the given kinds. Tracks that are not
    /// published are skipped.
    pub async fn unpublish(&self, kinds: &[TrackKind]) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        for kind in kinds {
            self.unpublish_locked(&mut state, *kind).await?;
        }
        self.publish_state(&state);
        Ok(())
    }

    async fn publish_locked(
        &self,
        state: &mut AdapterState,
        kind: TrackKind,
    ) -> Result<bool, TransportError> {
        if !state.joined {
            return Err(TransportError::NotJoined);
        }
        if state.published.contains(&kind) {
            debug!("{} track already published", kind.as_str());
            return Ok(false);
        }
        if kind.is_video() && state.published.iter().any(|k| k.is_video()) {
            return Err(TransportError::VideoSlotTaken(kind));
        }
        let track = state
            .track(kind)
            .cloned()
            .ok_or(TransportError::NoLocalTrack(kind))?;

        let cancel = self.cancel_token();
        let result = tokio::select! {
            result = self.client.publish(&track) => result,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };
        result.map_err(|e| TransportError::sdk("publish", e))?;

        state.published.insert(kind);
        debug!("Published {} track {}", kind.as_str(), track.id());
        Ok(true)
    }

    async fn unpublish_locked(
        &self,
        state: &mut AdapterState,
        kind: TrackKind,
    ) -> Result<bool, TransportError> {
        if !state.published.contains(&kind) {
            return Ok(false);
        }
        let Some(track) = state.track(kind).cloned() else {
            state.published.remove(&kind);
            return Ok(false);
        };

        let cancel = self.cancel_token();
        let result = tokio::select! {
            result = self.client.unpublish(&track) => result,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };
        result.map_err(|e| TransportError::sdk("unpublish", e))?;

        state.published.remove(&kind);
        debug!("Unpublished {} track {}", kind.as_str(), track.id());
        Ok(true)
    }

    /// Flips the microphone. The audio track stays published so subscribers
    /// keep a stable track identity. Returns the new muted state.
    pub async fn toggle_mute(&self) -> Result<bool, TransportError> {
        let mut state = self.state.lock().await;
        let audio = state
            .audio
            .clone()
            .ok_or(TransportError::NoLocalTrack(TrackKind::Audio))?;
        let enable = !state.audio_enabled;
        audio
            .handle()
            .set_enabled(enable)
            .map_err(|e| TransportError::sdk("set_enabled", e))?;
        state.audio_enabled = enable;
        self.publish_state(&state);

        info!("Microphone {}", if enable { "unmuted" } else { "muted" });
        Ok(!enable)
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let camera = state
            .camera
            .clone()
            .ok_or(TransportError::NoLocalTrack(TrackKind::CameraVideo))?;
        camera
            .handle()
            .set_enabled(enabled)
            .map_err(|e| TransportError::sdk("set_enabled", e))?;
        state.camera_enabled = enabled;
        self.publish_state(&state);
        Ok(())
    }

    pub async fn start_screen_share(self: &Arc<Self>) -> Result<ScreenShareOutcome, TransportError> {
        let _permit = self
            .share_guard
            .try_acquire()
            .map_err(|_| TransportError::ScreenShareInFlight)?;

        let reusable = {
            let state = self.state.lock().await;
            if !state.joined {
                return Err(TransportError::NotJoined);
            }
            if state.share_active {
                return Ok(ScreenShareOutcome::AlreadyActive);
            }
            state
                .screen
                .as_ref()
                .is_some_and(|track| track.handle().is_live())
        };

        let outcome = if reusable {
            debug!("Reusing live screen track");
            ScreenShareOutcome::Reused
        } else {
            let cancel = self.cancel_token();
            let capture = tokio::select! {
                result = self.devices.create_screen_capture() => result,
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            };
            match capture {
                Ok(capture) => {
                    let mut state = self.state.lock().await;
                    if !state.joined {
                        let _ = capture.handle.close();
                        return Err(TransportError::NotJoined);
                    }
                    if let Some(stale) = state.screen.take() {
                        close_quietly(&stale, "stale");
                    }
                    state.screen = Some(LocalTrack::new(TrackKind::ScreenVideo, capture.handle));
                    state.screen_ended = Some(capture.ended);
                    ScreenShareOutcome::Started
                }
                Err(DeviceError::Cancelled) => {
                    info!("Screen share picker dismissed; camera left untouched");
                    return Ok(ScreenShareOutcome::Cancelled);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut state = self.state.lock().await;
        if !state.joined {
            if let Some(screen) = state.screen.take() {
                close_quietly(&screen, "unused");
            }
            return Err(TransportError::NotJoined);
        }

        let camera_was_published = state.published.contains(&TrackKind::CameraVideo);
        if camera_was_published {
            self.unpublish_locked(&mut state, TrackKind::CameraVideo).await?;
        }
        state.camera_published_before_share = camera_was_published;

        if let Err(e) = self.publish_locked(&mut state, TrackKind::ScreenVideo).await {
            warn!("Failed to publish screen track: {}", e);
            if camera_was_published {
                if let Err(restore) = self.publish_locked(&mut state, TrackKind::CameraVideo).await {
                    warn!("Failed to restore camera after screen share error: {}", restore);
                }
            }
            state.camera_published_before_share = false;
            self.publish_state(&state);
            return Err(e);
        }

        state.share_active = true;
        if let Some(ended) = state.screen_ended.take() {
            let adapter = Arc::downgrade(self);
            state.share_watcher = Some(tokio::spawn(async move {
                if ended.await.is_ok() {
                    if let Some(adapter) = adapter.upgrade() {
                        adapter.on_share_ended().await;
                    }
                }
            }));
        }
        self.publish_state(&state);

        info!(
            "Screen share started ({:?}); camera was published: {}",
            outcome, camera_was_published
        );
        Ok(outcome)
    }

    /// Stops the share and re-publishes the camera only if it was published
    /// right before the share started. Returns false if nothing was shared.
    pub async fn stop_screen_share(&self) -> Result<bool, TransportError> {
        let _permit = self
            .share_guard
            .try_acquire()
            .map_err(|_| TransportError::ScreenShareInFlight)?;
        self.stop_share_inner(true).await
    }

    async fn on_share_ended(self: Arc<Self>) {
        info!("Screen share ended by the system");
        let Ok(_permit) = self.share_guard.acquire().await else {
            return;
        };
        if let Err(e) = self.stop_share_inner(false).await {
            warn!("Failed to stop externally ended screen share: {}", e);
        }
    }

    async fn stop_share_inner(&self, abort_watcher: bool) -> Result<bool, TransportError> {
        let mut state = self.state.lock().await;
        if !state.share_active {
            return Ok(false);
        }

        if let Some(watcher) = state.share_watcher.take() {
            if abort_watcher {
                watcher.abort();
            }
        }

        if let Err(e) = self.unpublish_locked(&mut state, TrackKind::ScreenVideo).await {
            warn!("Failed to unpublish screen track: {}", e);
            state.published.remove(&TrackKind::ScreenVideo);
        }
        if let Some(screen) = state.screen.take() {
            if let Err(e) = screen.handle().close() {
                warn!("Failed to close screen track: {}", e);
            }
        }
        state.screen_ended = None;
        state.share_active = false;

        let restore_camera = std::mem::take(&mut state.camera_published_before_share);
        let restored = if restore_camera {
            self.publish_locked(&mut state, TrackKind::CameraVideo)
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        self.publish_state(&state);

        info!("Screen share stopped; camera restored: {}", restore_camera);
        restored.map(|_| true)
    }

    pub async fn is_screen_sharing(&self) -> bool {
        self.state.lock().await.share_active
    }

    /// Local tracks with their published flag.
    pub async fn local_tracks(&self) -> Vec<MediaTrack> {
        let state = self.state.lock().await;
        let owner = state.local_id.clone().unwrap_or_default();
        [TrackKind::Audio, TrackKind::CameraVideo, TrackKind::ScreenVideo]
            .into_iter()
            .filter(|kind| state.track(*kind).is_some())
            .map(|kind| MediaTrack {
                owner_participant_id: owner.clone(),
                kind,
                published: state.published.contains(&kind),
            })
            .collect()
    }

    pub async fn published_kinds(&self) -> Vec<TrackKind> {
        let state = self.state.lock().await;
        [TrackKind::Audio, TrackKind::CameraVideo, TrackKind::ScreenVideo]
            .into_iter()
            .filter(|kind| state.published.contains(kind))
            .collect()
    }

    /// Turns one SDK callback into a roster event. Subscription happens here,
    /// in reaction to "user-published", never ahead of it.
    pub async fn handle_sdk_event(
        &self,
        event: SdkEvent,
    ) -> Result<Option<TransportEvent>, TransportError> {
        let emitted = {
            let state = self.state.lock().await;
            if !state.joined {
                debug!("Ignoring SDK event while not joined: {:?}", event);
                return Ok(None);
            }
            if state.local_id.as_deref() == Some(event.uid()) {
                return Ok(None);
            }
            drop(state);

            match event {
                SdkEvent::UserJoined { uid } => TransportEvent::ParticipantJoined {
                    participant_id: uid,
                },
                SdkEvent::UserPublished { uid, kind } => {
                    let track = self
                        .client
                        .subscribe(&uid, kind)
                        .await
                        .map_err(|e| TransportError::sdk("subscribe", e))?;

                    let mut state = self.state.lock().await;
                    if !state.joined {
                        let _ = track.handle.close();
                        return Ok(None);
                    }
                    if let Some(old) = state.remote.insert((uid.clone(), kind), track) {
                        let _ = old.handle.close();
                    }
                    TransportEvent::TrackPublished {
                        participant_id: uid,
                        kind,
                    }
                }
                SdkEvent::UserUnpublished { uid, kind } => {
                    let mut state = self.state.lock().await;
                    if let Some(track) = state.remote.remove(&(uid.clone(), kind)) {
                        let _ = track.handle.close();
                    }
                    TransportEvent::TrackUnpublished {
                        participant_id: uid,
                        kind,
                    }
                }
                SdkEvent::UserLeft { uid } => {
                    let mut state = self.state.lock().await;
                    let keys: Vec<(String, TrackKind)> = state
                        .remote
                        .keys()
                        .filter(|(owner, _)| *owner == uid)
                        .cloned()
                        .collect();
                    for key in keys {
                        if let Some(track) = state.remote.remove(&key) {
                            let _ = track.handle.close();
                        }
                    }
                    TransportEvent::ParticipantLeft {
                        participant_id: uid,
                    }
                }
            }
        };

        let _ = self.events.send(emitted.clone());
        Ok(Some(emitted))
    }

    /// Drains SDK callbacks sequentially, preserving per-participant order.
    pub fn spawn_event_pump(self: &Arc<Self>, mut rx: mpsc::Receiver<SdkEvent>) -> JoinHandle<()> {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = adapter.handle_sdk_event(event).await {
                    warn!("Failed to handle transport event: {}", e);
                }
            }
            debug!("Transport event pump finished");
        })
    }

    /// Remote video taps keyed by participant, plus the local camera.
    pub async fn video_taps(&self) -> Vec<(String, Arc<dyn VideoTap>)> {
        let state = self.state.lock().await;
        let mut taps = Vec::new();
        if let (Some(local_id), Some(camera)) = (&state.local_id, &state.camera) {
            if let Some(tap) = camera.handle().video_tap() {
                taps.push((local_id.clone(), tap));
            }
        }
        for ((owner, kind), track) in &state.remote {
            if kind.is_video() {
                if let Some(tap) = track.handle.video_tap() {
                    taps.push((owner.clone(), tap));
                }
            }
        }
        taps
    }

    pub async fn recording_inputs(&self) -> RecordingInputs {
        let state = self.state.lock().await;
        let screen_video = if state.share_active && state.published.contains(&TrackKind::ScreenVideo) {
            state.screen.as_ref().and_then(|t| t.handle().video_tap())
        } else {
            None
        };

        let mut audio = Vec::new();
        if let Some(tap) = state.audio.as_ref().and_then(|t| t.handle().audio_tap()) {
            audio.push(tap);
        }
        for ((_, kind), track) in &state.remote {
            if *kind == TrackKind::Audio {
                if let Some(tap) = track.handle.audio_tap() {
                    audio.push(tap);
                }
            }
        }

        RecordingInputs {
            screen_video,
            audio,
        }
    }

    /// Ordered, best-effort release of every local resource. A failing step
    /// never stops the ones after it.
    pub async fn teardown(&self) -> TeardownReport {
        self.cancel_in_flight();

        let mut state = self.state.lock().await;
        let mut report = TeardownReport::default();

        let audio = state.audio.take();
        report.record(
            TeardownStep::DisableAudio,
            audio.as_ref().map(|t| t.handle().set_enabled(false)),
        );
        report.record(
            TeardownStep::CloseAudio,
            audio.as_ref().map(|t| t.handle().close()),
        );

        let camera = state.camera.take();
        report.record(
            TeardownStep::DisableVideo,
            camera.as_ref().map(|t| t.handle().set_enabled(false)),
        );
        report.record(
            TeardownStep::CloseVideo,
            camera.as_ref().map(|t| t.handle().close()),
        );

        if let Some(watcher) = state.share_watcher.take() {
            watcher.abort();
        }
        let screen = state.screen.take();
        report.record(
            TeardownStep::CloseScreenShare,
            screen.as_ref().map(|t| t.handle().close()),
        );

        let leave = if state.joined {
            Some(self.client.leave().await)
        } else {
            None
        };
        report.record(TeardownStep::LeaveChannel, leave);

        for (_, track) in state.remote.drain() {
            let _ = track.handle.close();
        }
        *state = AdapterState::default();
        self.publish_state(&state);

        info!(
            "Transport teardown finished ({} failed steps)",
            report.failures().len()
        );
        report
    }
}

fn close_quietly(track: &LocalTrack, what: &str) {
    if let Err(e) = track.handle().close() {
        warn!("Failed to close {} {} track: {}", what, track.kind().as_str(), e);
    }
}

/// Broadcast receivers may lag; this drains what is buffered without blocking.
pub fn drain_events(rx: &mut EventReceiver) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Transport event receiver lagged by {} events", skipped);
            }
            Err(_) => break,
        }
    }
    events
}
