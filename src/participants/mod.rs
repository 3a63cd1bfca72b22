//! Roster of everyone in the call.
//!
//! Entries are kept in join order so tile positions stay stable. Every
//! operation is keyed by participant id, so events for different
//! participants may arrive interleaved without corrupting each other.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport::{TrackKind, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Recruiter,
    Candidate,
    #[default]
    Guest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: ParticipantRole,
    pub is_local: bool,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
}

impl Participant {
    pub fn local(id: impl Into<String>, display_name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email,
            role: ParticipantRole::Guest,
            is_local: true,
            mic_enabled: false,
            camera_enabled: false,
        }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            email: None,
            role: ParticipantRole::Guest,
            is_local: false,
            mic_enabled: false,
            camera_enabled: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the local participant, replacing any previous local entry.
    pub fn set_local(&mut self, participant: Participant) {
        self.participants.retain(|p| !p.is_local && p.id != participant.id);
        let participant = Participant {
            is_local: true,
            ..participant
        };
        self.participants.insert(0, participant);
    }

    pub fn local(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_local)
    }

    pub fn local_mut(&mut self) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.is_local)
    }

    /// Adds a remote participant if not already present. Returns true when added.
    pub fn add_remote(&mut self, id: &str) -> bool {
        if self.get(id).is_some() {
            return false;
        }
        self.participants.push(Participant::remote(id));
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn set_display_info(
        &mut self,
        id: &str,
        display_name: impl Into<String>,
        role: ParticipantRole,
    ) -> bool {
        match self.participants.iter_mut().find(|p| p.id == id) {
            Some(participant) => {
                participant.display_name = display_name.into();
                participant.role = role;
                true
            }
            None => false,
        }
    }

    /// Applies a transport event. Returns true when the tile count changed.
    pub fn apply(&mut self, event: &TransportEvent) -> bool {
        match event {
            TransportEvent::ParticipantJoined { participant_id } => {
                let added = self.add_remote(participant_id);
                if added {
                    debug!("Participant joined: {}", participant_id);
                }
                added
            }
            TransportEvent::TrackPublished {
                participant_id,
                kind,
            } => {
                // A publish can race ahead of the join event.
                let added = self.add_remote(participant_id);
                self.set_media_flag(participant_id, *kind, true);
                added
            }
            TransportEvent::TrackUnpublished {
                participant_id,
                kind,
            } => {
                self.set_media_flag(participant_id, *kind, false);
                false
            }
            TransportEvent::ParticipantLeft { participant_id } => {
                let removed = self.remove(participant_id).is_some();
                if !removed {
                    warn!("Leave event for unknown participant {}", participant_id);
                }
                removed
            }
        }
    }

    fn set_media_flag(&mut self, id: &str, kind: TrackKind, enabled: bool) {
        if let Some(participant) = self.participants.iter_mut().find(|p| p.id == id) {
            match kind {
                TrackKind::Audio => participant.mic_enabled = enabled,
                TrackKind::CameraVideo | TrackKind::ScreenVideo => {
                    participant.camera_enabled = enabled
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.id.as_str())
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(id: &str) -> TransportEvent {
        TransportEvent::ParticipantJoined {
            participant_id: id.to_string(),
        }
    }

    #[test]
    fn test_exactly_one_local_participant() {
        let mut registry = ParticipantRegistry::new();
        registry.set_local(Participant::local("me", "Me", None));
        registry.set_local(Participant::local("me-2", "Me again", None));

        assert_eq!(registry.iter().filter(|p| p.is_local).count(), 1);
        assert_eq!(registry.local().map(|p| p.id.as_str()), Some("me-2"));
    }

    #[test]
    fn test_join_and_leave_events() {
        let mut registry = ParticipantRegistry::new();
        assert!(registry.apply(&joined("a")));
        assert!(!registry.apply(&joined("a")));
        assert_eq!(registry.len(), 1);

        assert!(registry.apply(&TransportEvent::ParticipantLeft {
            participant_id: "a".to_string()
        }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_track_events_update_flags() {
        let mut registry = ParticipantRegistry::new();
        registry.apply(&joined("a"));
        registry.apply(&TransportEvent::TrackPublished {
            participant_id: "a".to_string(),
            kind: TrackKind::Audio,
        });
        registry.apply(&TransportEvent::TrackPublished {
            participant_id: "a".to_string(),
            kind: TrackKind::CameraVideo,
        });
        registry.apply(&TransportEvent::TrackUnpublished {
            participant_id: "a".to_string(),
            kind: TrackKind::CameraVideo,
        });

        let a = registry.get("a").unwrap();
        assert!(a.mic_enabled);
        assert!(!a.camera_enabled);
    }

    #[test]
    fn test_interleaved_participants_are_independent() {
        let mut registry = ParticipantRegistry::new();
        registry.apply(&joined("a"));
        registry.apply(&TransportEvent::TrackPublished {
            participant_id: "b".to_string(),
            kind: TrackKind::Audio,
        });
        registry.apply(&TransportEvent::ParticipantLeft {
            participant_id: "a".to_string(),
        });
        registry.apply(&joined("b"));

        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["b"]);
        assert!(registry.get("b").unwrap().mic_enabled);
    }

    #[test]
    fn test_display_info_for_remote() {
        let mut registry = ParticipantRegistry::new();
        registry.apply(&joined("42"));
        assert!(registry.set_display_info("42", "Dana", ParticipantRole::Recruiter));
        assert!(!registry.set_display_info("missing", "X", ParticipantRole::Guest));

        let dana = registry.get("42").unwrap();
        assert_eq!(dana.display_name, "Dana");
        assert_eq!(dana.role, ParticipantRole::Recruiter);
    }
}
