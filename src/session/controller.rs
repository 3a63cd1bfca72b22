//! Join/leave orchestrator.
//!
//! AwaitingToken → Validating → {Denied | Expired}
//! Validating → CountdownPending → Joinable → Joining → InCall → Leaving → Left
//!
//! External collaborators (join handshake, meeting lookup, transport) are
//! injected; the controller owns phase changes and teardown ordering.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AccessError, SessionError, TransportError};
use crate::layout::{LayoutEngine, LayoutFrame, LayoutOptions};
use crate::participants::{Participant, ParticipantRegistry, ParticipantRole};
use crate::transport::adapter::drain_events;
use crate::transport::{
    EventReceiver, LocalMediaState, MediaTransportAdapter, ScreenShareOutcome, TeardownReport,
    TrackKind, TransportCredential,
};

use super::countdown::{CountdownTick, JoinGate};
use super::status::{MeetingSession, SessionPhase, SessionStatusHandle};
use super::token::{validate_access, AccessDecision, JoinParams, JoinToken};

/// What the participant typed into the pre-join form.
#[derive(Debug, Clone, Serialize)]
pub struct JoinForm {
    pub display_name: String,
    pub email: String,
    pub role: ParticipantRole,
    pub with_audio: bool,
    pub with_video: bool,
}

/// Local media outcome of a join. Device trouble never fails the join itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaOutcome {
    pub audio_published: bool,
    pub video_published: bool,
    pub permission_denied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinResult {
    pub participant_id: String,
    pub channel_name: String,
    pub media: MediaOutcome,
}

/// Exchanges a join token for transport credentials.
#[async_trait]
pub trait JoinHandshake: Send + Sync {
    async fn join(&self, token: &JoinToken, form: &JoinForm) -> Result<TransportCredential>;
}

#[async_trait]
pub trait MeetingDirectory: Send + Sync {
    async fn fetch(&self, meeting_id: &str) -> Result<MeetingSession>;
}

pub struct SessionController {
    adapter: Arc<MediaTransportAdapter>,
    handshake: Box<dyn JoinHandshake>,
    directory: Box<dyn MeetingDirectory>,
    registry: ParticipantRegistry,
    layout: LayoutEngine,
    status: SessionStatusHandle,
    phase: SessionPhase,
    session: Option<MeetingSession>,
    token: Option<JoinToken>,
    gate: Option<JoinGate>,
    events: EventReceiver,
    local_state: watch::Receiver<LocalMediaState>,
    cancel: CancellationToken,
}

impl SessionController {
    pub fn new(
        adapter: Arc<MediaTransportAdapter>,
        handshake: Box<dyn JoinHandshake>,
        directory: Box<dyn MeetingDirectory>,
        layout_options: LayoutOptions,
        status: SessionStatusHandle,
    ) -> Self {
        let events = adapter.subscribe_events();
        let local_state = adapter.local_state();
        Self {
            adapter,
            handshake,
            directory,
            registry: ParticipantRegistry::new(),
            layout: LayoutEngine::new(layout_options),
            status,
            phase: SessionPhase::AwaitingToken,
            session: None,
            token: None,
            gate: None,
            events,
            local_state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &LayoutEngine {
        &self.layout
    }

    pub fn session(&self) -> Option<&MeetingSession> {
        self.session.as_ref()
    }

    pub fn status_handle(&self) -> SessionStatusHandle {
        self.status.clone()
    }

    /// Cancelling this token aborts an in-flight `join`, which then tears
    /// down whatever it had acquired and ends in `Left`.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!("Session phase {} -> {}", self.phase, phase);
        }
        self.phase = phase;
        self.status.set_phase(phase).await;
    }

    fn require_phase(&self, action: &'static str, allowed: &[SessionPhase]) -> Result<(), SessionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }

    /// Looks the meeting up, then validates the link against it.
    pub async fn open(
        &mut self,
        params: &JoinParams,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, SessionError> {
        self.require_phase("open a join link", &[SessionPhase::AwaitingToken])?;
        let session = self
            .directory
            .fetch(&params.meeting_id)
            .await
            .map_err(|e| SessionError::NotJoinable {
                meeting_id: params.meeting_id.clone(),
                reason: format!("meeting lookup failed: {e:#}"),
            })?;
        self.validate(params, session, now).await
    }

    pub async fn validate(
        &mut self,
        params: &JoinParams,
        session: MeetingSession,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, SessionError> {
        self.require_phase("validate a join link", &[SessionPhase::AwaitingToken])?;
        self.set_phase(SessionPhase::Validating).await;
        self.status.set_meeting(&session.meeting_id).await;

        let decision = validate_access(params, &session.meeting_id, now.timestamp_millis());
        match &decision {
            AccessDecision::Allowed(token) => {
                info!("Join link accepted for meeting {}", session.meeting_id);
                self.token = Some(token.clone());
                self.gate = Some(JoinGate::new(session.scheduled_at));
                self.session = Some(session);
                self.tick(now).await;
            }
            AccessDecision::Denied(reason) => {
                self.status.set_error(reason.clone()).await;
                self.set_phase(SessionPhase::Denied).await;
            }
            AccessDecision::Expired => {
                self.status.set_error("join link expired".to_string()).await;
                self.set_phase(SessionPhase::Expired).await;
            }
        }
        Ok(decision)
    }

    /// Advances the countdown. Returns `None` when no gate is active.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<CountdownTick> {
        let tick = self.gate.as_mut()?.tick(now);
        self.status.set_countdown(tick.remaining.clone()).await;
        match (self.phase, tick.joinable) {
            (SessionPhase::Validating | SessionPhase::CountdownPending, true) => {
                self.set_phase(SessionPhase::Joinable).await;
            }
            (SessionPhase::Validating, false) => {
                self.set_phase(SessionPhase::CountdownPending).await;
            }
            _ => {}
        }
        Some(tick)
    }

    /// Re-reads the meeting. A new start time moves the countdown but cannot
    /// close a gate that has already opened.
    pub async fn refresh_session(&mut self) -> Result<(), SessionError> {
        let Some(meeting_id) = self.session.as_ref().map(|s| s.meeting_id.clone()) else {
            return Ok(());
        };
        let fresh = self
            .directory
            .fetch(&meeting_id)
            .await
            .map_err(|e| SessionError::NotJoinable {
                meeting_id: meeting_id.clone(),
                reason: format!("meeting lookup failed: {e:#}"),
            })?;
        if let Some(gate) = self.gate.as_mut() {
            if gate.scheduled_at() != fresh.scheduled_at {
                info!(
                    "Meeting {} rescheduled to {}",
                    meeting_id, fresh.scheduled_at
                );
                gate.reschedule(fresh.scheduled_at);
            }
        }
        self.session = Some(fresh);
        Ok(())
    }

    /// `now` re-checks the token window; the link may have expired while the
    /// participant sat on the countdown.
    pub async fn join(
        &mut self,
        form: JoinForm,
        now: DateTime<Utc>,
    ) -> Result<JoinResult, SessionError> {
        self.require_phase("join", &[SessionPhase::Joinable])?;

        if let Err(e) = self.refresh_session().await {
            warn!("Could not refresh meeting before join: {}", e);
        }
        if let Some(session) = &self.session {
            if let Some(reason) = session.join_blocker() {
                self.status.set_error(reason.clone()).await;
                return Err(SessionError::NotJoinable {
                    meeting_id: session.meeting_id.clone(),
                    reason,
                });
            }
        }

        let token = match &self.token {
            Some(token) => token.clone(),
            None => {
                return Err(SessionError::InvalidPhase {
                    action: "join",
                    phase: self.phase,
                })
            }
        };
        if let Err(e) = token.check_window(now.timestamp_millis()) {
            self.status.set_error(e.to_string()).await;
            if matches!(e, AccessError::TokenExpired { .. }) {
                self.set_phase(SessionPhase::Expired).await;
            }
            return Err(e.into());
        }

        self.set_phase(SessionPhase::Joining).await;
        let cancel = self.cancel.clone();

        let handshake = tokio::select! {
            result = self.handshake.join(&token, &form) => Some(result),
            _ = cancel.cancelled() => None,
        };
        let credential = match handshake {
            None => return self.abort_join().await,
            Some(Ok(credential)) => credential,
            Some(Err(e)) => {
                warn!("Join handshake failed: {:#}", e);
                self.status.set_error(format!("{e:#}")).await;
                self.set_phase(SessionPhase::Joinable).await;
                return Err(SessionError::Handshake(e));
            }
        };

        let local_id = credential.account.clone();
        let joined = tokio::select! {
            result = self.adapter.join(&credential, &local_id) => result,
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
        };
        match joined {
            Ok(()) => {}
            Err(TransportError::Cancelled) => return self.abort_join().await,
            Err(e) => {
                warn!("Transport join failed: {}", e);
                self.status.set_error(e.to_string()).await;
                self.set_phase(SessionPhase::Joinable).await;
                return Err(e.into());
            }
        }

        let media = {
            let pending = self.start_local_media(&form);
            tokio::pin!(pending);
            tokio::select! {
                media = &mut pending => Some(media),
                _ = cancel.cancelled() => {
                    // Let the adapter release whatever it opened before teardown runs.
                    self.adapter.cancel_in_flight();
                    pending.await;
                    None
                }
            }
        };
        let media = match media {
            Some(media) if !cancel.is_cancelled() => media,
            _ => return self.abort_join().await,
        };

        let mut local = Participant::local(local_id.clone(), form.display_name.clone(), Some(form.email.clone()));
        local.role = form.role;
        local.mic_enabled = media.audio_published;
        local.camera_enabled = media.video_published;
        self.registry.set_local(local);
        self.sync();

        self.status.joined(&local_id).await;
        self.set_phase(SessionPhase::InCall).await;
        info!(
            "Joined meeting channel {} as {}",
            credential.channel_name, local_id
        );

        Ok(JoinResult {
            participant_id: local_id,
            channel_name: credential.channel_name,
            media,
        })
    }

    async fn start_local_media(&self, form: &JoinForm) -> MediaOutcome {
        let mut kinds = Vec::new();
        if form.with_audio {
            kinds.push(TrackKind::Audio);
        }
        if form.with_video {
            kinds.push(TrackKind::CameraVideo);
        }

        let mut outcome = MediaOutcome::default();
        if kinds.is_empty() {
            return outcome;
        }

        let tracks = match self.adapter.create_local_tracks(&kinds).await {
            Ok(tracks) => tracks,
            Err(TransportError::PermissionDenied) => {
                warn!("Joined without local media: device permission denied");
                outcome.permission_denied = true;
                return outcome;
            }
            Err(e) => {
                warn!("Joined without local media: {}", e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let mut created = Vec::new();
        if tracks.audio.is_some() {
            created.push(TrackKind::Audio);
        }
        if tracks.video.is_some() {
            created.push(TrackKind::CameraVideo);
        }
        match self.adapter.publish(&created).await {
            Ok(()) => {
                outcome.audio_published = tracks.audio.is_some();
                outcome.video_published = tracks.video.is_some();
            }
            Err(e) => {
                warn!("Failed to publish local media: {}", e);
                let published = self.adapter.published_kinds().await;
                outcome.audio_published = published.contains(&TrackKind::Audio);
                outcome.video_published = published.contains(&TrackKind::CameraVideo);
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn abort_join<T>(&mut self) -> Result<T, SessionError> {
        info!("Join cancelled; releasing acquired resources");
        self.teardown().await;
        Err(SessionError::Cancelled)
    }

    /// Applies pending transport events and local media changes to the
    /// roster and layout. Returns true when the layout was recomputed.
    pub fn sync(&mut self) -> bool {
        let mut roster_changed = false;
        for event in drain_events(&mut self.events) {
            roster_changed |= self.registry.apply(&event);
        }

        let sharing = self.local_state.borrow_and_update().screen_sharing;
        let share_changed = sharing != self.layout.screen_share_active();
        if share_changed {
            self.layout.on_screen_share_toggled(sharing);
        }

        let tiles_changed = self.layout.total_tiles() != self.registry.len();
        if roster_changed || tiles_changed {
            self.layout.on_roster_changed(self.registry.len());
        }
        roster_changed || tiles_changed || share_changed
    }

    pub fn on_viewport_resized(&mut self, width_px: u32, height_px: u32) -> LayoutFrame {
        self.layout.on_viewport_resized(width_px, height_px)
    }

    /// Returns the new muted state.
    pub async fn toggle_mute(&mut self) -> Result<bool, SessionError> {
        self.require_phase("toggle mute", &[SessionPhase::InCall])?;
        let muted = self.adapter.toggle_mute().await?;
        if let Some(local) = self.registry.local_mut() {
            local.mic_enabled = !muted;
        }
        Ok(muted)
    }

    pub async fn set_camera_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.require_phase("toggle camera", &[SessionPhase::InCall])?;
        self.adapter.set_camera_enabled(enabled).await?;
        if let Some(local) = self.registry.local_mut() {
            local.camera_enabled = enabled;
        }
        Ok(())
    }

    pub async fn start_screen_share(&mut self) -> Result<ScreenShareOutcome, SessionError> {
        self.require_phase("share screen", &[SessionPhase::InCall])?;
        let outcome = self.adapter.start_screen_share().await?;
        self.sync();
        Ok(outcome)
    }

    pub async fn stop_screen_share(&mut self) -> Result<bool, SessionError> {
        self.require_phase("stop screen share", &[SessionPhase::InCall])?;
        let stopped = self.adapter.stop_screen_share().await?;
        self.sync();
        Ok(stopped)
    }

    /// Ordered, best-effort teardown. Individual step failures are recorded
    /// in the report and never stop later steps.
    pub async fn leave(&mut self) -> Result<TeardownReport, SessionError> {
        self.require_phase(
            "leave",
            &[
                SessionPhase::CountdownPending,
                SessionPhase::Joinable,
                SessionPhase::Joining,
                SessionPhase::InCall,
            ],
        )?;
        Ok(self.teardown().await)
    }

    async fn teardown(&mut self) -> TeardownReport {
        self.set_phase(SessionPhase::Leaving).await;
        self.cancel.cancel();

        let report = self.adapter.teardown().await;
        if !report.is_clean() {
            warn!("Teardown finished with failed steps: {:?}", report.failures());
        }

        drain_events(&mut self.events);
        self.registry.clear();
        self.layout.clear();
        self.gate = None;
        self.token = None;

        self.set_phase(SessionPhase::Left).await;
        info!("Left session");
        report
    }
}
