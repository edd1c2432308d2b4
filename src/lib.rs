//! Care Voice: live duplex voice sessions with a remote conversational agent.
//!
//! The crate captures microphone audio, streams it to the agent, plays the
//! agent's synthesized speech back gaplessly and routes agent tool calls
//! into the host application:
//! Microphone → Resample/Encode → Transport ⇄ Agent → Playback Scheduler → Speaker
//!
//! # Architecture
//!
//! - **Audio capture**: records from the microphone via `cpal`, regrouped
//!   into fixed blocks and converted to 16 kHz PCM16
//! - **Transport**: the Gemini Live WebSocket session (`tokio-tungstenite`)
//! - **Playback**: schedules 24 kHz agent audio on the output clock and
//!   flushes it on barge-in
//! - **Tool bridge**: dispatches tool calls to a live-bound host handler
//! - **Lifecycle**: [`VoiceSession`] ties it together as one state machine
//!   (`Idle → Listening ⇄ Speaking / Processing → Idle`)

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod tools;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use pipeline::{SessionInfo, StartRequest, VoiceSession};
pub use runtime::{EndReason, RuntimeEvent, Status};
pub use tools::{ActionCall, ActionHandler, CapabilitySet, HandlerCell};
