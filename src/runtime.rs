//! Runtime state and events published by a voice session for UI and
//! observability.
//!
//! Events are lightweight (no audio payloads) so the session loop can emit
//! them without slowing playback scheduling.

use crate::pipeline::messages::TranscriptFragment;
use serde::Serialize;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No session is open.
    #[default]
    Idle,
    /// Session open, no agent audio playing.
    Listening,
    /// Agent audio is playing.
    Speaking,
    /// A tool-call batch is being dispatched.
    Processing,
}

impl Status {
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Processing => "processing",
        };
        f.write_str(s)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The host called `stop()`.
    Stopped,
    /// The remote side closed the connection.
    TransportClosed,
    /// The connection failed.
    TransportError(String),
}

/// Events that describe what the session is doing right now.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    StatusChanged(Status),
    /// New transcript text from either speaker.
    Transcript(TranscriptFragment),
    /// Agent tool call request (for UI/telemetry).
    ToolCall {
        id: String,
        name: String,
        args_json: String,
    },
    /// Tool result sent back to the agent.
    ToolResult {
        id: String,
        name: String,
        success: bool,
    },
    /// Barge-in flushed this many playback units.
    Interrupted { flushed: usize },
    SessionEnded { reason: EndReason },
}
