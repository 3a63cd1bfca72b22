//! Session phase, meeting metadata and the shared status handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Phase of the join/leave state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    AwaitingToken,
    Validating,
    Denied,
    Expired,
    CountdownPending,
    Joinable,
    Joining,
    InCall,
    Leaving,
    Left,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingToken => "awaiting_token",
            Self::Validating => "validating",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::CountdownPending => "countdown_pending",
            Self::Joinable => "joinable",
            Self::Joining => "joining",
            Self::InCall => "in_call",
            Self::Leaving => "leaving",
            Self::Left => "left",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Left)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the scheduled meeting, owned by the scheduling service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    #[default]
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

/// Read-only view of a scheduled meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSession {
    pub meeting_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub status: MeetingStatus,
    pub max_participants: u32,
    #[serde(default)]
    pub current_participants: u32,
}

impl MeetingSession {
    /// Reason the meeting cannot be joined right now, if any.
    pub fn join_blocker(&self) -> Option<String> {
        match self.status {
            MeetingStatus::Ended => Some("meeting has ended".to_string()),
            MeetingStatus::Cancelled => Some("meeting was cancelled".to_string()),
            _ if self.current_participants >= self.max_participants => Some(format!(
                "meeting is full ({}/{})",
                self.current_participants, self.max_participants
            )),
            _ => None,
        }
    }
}

/// Current session state, readable from outside the controller.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub meeting_id: Option<String>,
    pub participant_id: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub countdown: Option<String>,
    pub last_error: Option<String>,
}

impl SessionState {
    /// Time in the call, in seconds.
    pub fn duration_seconds(&self) -> Option<u64> {
        self.joined_at.map(|joined| {
            let elapsed = Utc::now() - joined;
            elapsed.num_seconds().max(0) as u64
        })
    }
}

#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    pub async fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.inner.lock().await;
        state.phase = phase;
    }

    pub async fn set_meeting(&self, meeting_id: &str) {
        let mut state = self.inner.lock().await;
        state.meeting_id = Some(meeting_id.to_string());
    }

    pub async fn set_countdown(&self, remaining: String) {
        let mut state = self.inner.lock().await;
        state.countdown = Some(remaining);
    }

    pub async fn joined(&self, participant_id: &str) {
        let mut state = self.inner.lock().await;
        state.phase = SessionPhase::InCall;
        state.participant_id = Some(participant_id.to_string());
        state.joined_at = Some(Utc::now());
        state.last_error = None;
    }

    /// Records an error without changing the phase.
    pub async fn set_error(&self, error: String) {
        let mut state = self.inner.lock().await;
        state.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(status: MeetingStatus, current: u32, max: u32) -> MeetingSession {
        MeetingSession {
            meeting_id: "m1".to_string(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            status,
            max_participants: max,
            current_participants: current,
        }
    }

    #[test]
    fn test_session_phase_display() {
        assert_eq!(SessionPhase::CountdownPending.to_string(), "countdown_pending");
        assert_eq!(SessionPhase::InCall.as_str(), "in_call");
        assert!(SessionPhase::Left.is_terminal());
        assert!(!SessionPhase::Joinable.is_terminal());
    }

    #[test]
    fn test_join_blocker() {
        assert!(session(MeetingStatus::Scheduled, 1, 4).join_blocker().is_none());
        assert!(session(MeetingStatus::Active, 3, 4).join_blocker().is_none());
        assert!(session(MeetingStatus::Active, 4, 4).join_blocker().is_some());
        assert!(session(MeetingStatus::Ended, 0, 4).join_blocker().is_some());
        assert!(session(MeetingStatus::Cancelled, 0, 4).join_blocker().is_some());
    }

    #[test]
    fn test_meeting_session_from_backend_json() {
        let json = r#"{
            "meetingId": "m9",
            "scheduledAt": "2026-03-01T10:00:00Z",
            "durationMinutes": 45,
            "status": "active",
            "maxParticipants": 6
        }"#;
        let session: MeetingSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.meeting_id, "m9");
        assert_eq!(session.status, MeetingStatus::Active);
        assert_eq!(session.current_participants, 0);
    }

    #[tokio::test]
    async fn test_status_handle_joined() {
        let handle = SessionStatusHandle::default();
        handle.set_meeting("m1").await;
        handle.joined("u1").await;

        let state = handle.get().await;
        assert_eq!(state.phase, SessionPhase::InCall);
        assert_eq!(state.participant_id.as_deref(), Some("u1"));
        assert!(state.joined_at.is_some());
    }
}
