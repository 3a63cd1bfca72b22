//! Live meeting session engine.
//!
//! Gates joining behind a validated link and countdown, coordinates local
//! and remote media tracks through an external real-time transport, lays
//! participant tiles out responsively and records the call locally for
//! chunked upload.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod global;
pub mod layout;
pub mod participants;
pub mod recording;
pub mod session;
pub mod transport;

pub use error::{AccessError, RecordingError, SessionError, TransportError};
