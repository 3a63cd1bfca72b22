//! Recording lifecycle and the shared status handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RecordingError;

use super::codec::RecordingFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingPhase {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
    Completed,
    Failed,
}

impl RecordingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only legal edges. `Failed` is reachable from any non-terminal
    /// phase; nothing leaves a terminal phase except a reset to a new session.
    pub fn can_transition_to(&self, next: RecordingPhase) -> bool {
        use RecordingPhase::*;
        match (self, next) {
            (Idle, Starting)
            | (Starting, Recording)
            | (Recording, Stopping)
            | (Stopping, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RecordingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordingSession {
    /// Assigned by the begin-recording call.
    pub id: Option<String>,
    pub phase: RecordingPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub file_url: Option<String>,
    pub format: Option<RecordingFormat>,
    pub error: Option<String>,
}

impl RecordingSession {
    pub fn transition(&mut self, next: RecordingPhase) -> Result<(), RecordingError> {
        if !self.phase.can_transition_to(next) {
            return Err(RecordingError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!("Recording phase {} -> {}", self.phase, next);
        self.phase = next;
        match next {
            RecordingPhase::Recording => self.started_at = Some(Utc::now()),
            RecordingPhase::Completed | RecordingPhase::Failed => {
                if self.stopped_at.is_none() {
                    self.stopped_at = Some(Utc::now());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Thread-safe handle shared between the pipeline, its encoder task and readers.
#[derive(Clone, Default)]
pub struct RecordingStatusHandle {
    inner: Arc<Mutex<RecordingSession>>,
}

impl RecordingStatusHandle {
    pub async fn get(&self) -> RecordingSession {
        self.inner.lock().await.clone()
    }

    pub async fn phase(&self) -> RecordingPhase {
        self.inner.lock().await.phase
    }

    pub async fn transition(&self, next: RecordingPhase) -> Result<(), RecordingError> {
        self.inner.lock().await.transition(next)
    }

    /// Starts a fresh session, dropping a finished one.
    pub async fn begin_new(&self) -> Result<(), RecordingError> {
        let mut session = self.inner.lock().await;
        if session.phase.is_terminal() {
            *session = RecordingSession::default();
        }
        session.transition(RecordingPhase::Starting)
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut RecordingSession),
    {
        let mut session = self.inner.lock().await;
        f(&mut session);
    }

    /// Moves to `Failed` unless the session already finished. Returns false
    /// when the session was terminal.
    pub async fn fail(&self, error: String) -> bool {
        let mut session = self.inner.lock().await;
        if session.transition(RecordingPhase::Failed).is_err() {
            return false;
        }
        session.error = Some(error);
        true
    }

    pub async fn complete(&self, file_url: String) -> Result<(), RecordingError> {
        let mut session = self.inner.lock().await;
        session.transition(RecordingPhase::Completed)?;
        session.file_url = Some(file_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecordingPhase::*;

    const ALL: [RecordingPhase; 6] = [Idle, Starting, Recording, Stopping, Completed, Failed];

    #[test]
    fn test_only_graph_edges_are_allowed() {
        let allowed = [
            (Idle, Starting),
            (Starting, Recording),
            (Recording, Stopping),
            (Stopping, Completed),
            (Idle, Failed),
            (Starting, Failed),
            (Recording, Failed),
            (Stopping, Failed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_rejected_transition_leaves_phase() {
        let mut session = RecordingSession::default();
        let err = session.transition(Recording).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::InvalidTransition { from: Idle, to: Recording }
        ));
        assert_eq!(session.phase, Idle);
    }

    #[tokio::test]
    async fn test_handle_lifecycle() {
        let handle = RecordingStatusHandle::default();
        handle.begin_new().await.unwrap();
        handle.transition(Recording).await.unwrap();
        handle.transition(Stopping).await.unwrap();
        handle.complete("https://files/r1.webm".to_string()).await.unwrap();

        let session = handle.get().await;
        assert_eq!(session.phase, Completed);
        assert!(session.started_at.is_some());
        assert!(session.stopped_at.is_some());
        assert!(!handle.fail("late".to_string()).await);

        handle.begin_new().await.unwrap();
        let fresh = handle.get().await;
        assert_eq!(fresh.phase, Starting);
        assert!(fresh.file_url.is_none());
    }
}
