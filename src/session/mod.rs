//! Join-link validation, countdown gate and the join/leave controller.

pub mod controller;
pub mod countdown;
pub mod status;
pub mod token;

pub use controller::{
    JoinForm, JoinHandshake, JoinResult, MediaOutcome, MeetingDirectory, SessionController,
};
pub use countdown::{format_countdown, spawn_countdown, CountdownTick, JoinGate};
pub use status::{MeetingSession, MeetingStatus, SessionPhase, SessionState, SessionStatusHandle};
pub use token::{validate_access, AccessDecision, JoinParams, JoinToken};
