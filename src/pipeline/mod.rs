//! Session pipeline: message types and the lifecycle coordinator.

pub mod coordinator;
pub mod messages;

pub use coordinator::{SessionInfo, StartRequest, VoiceSession};
