//! Duplex session transport to the remote agent.
//!
//! A [`Connector`] opens a session and returns a [`TransportLink`]: the
//! [`SessionTransport`] handle for outbound traffic plus the receiver of
//! inbound [`TransportEvent`]s. The live implementation speaks the Gemini
//! Live WebSocket protocol ([`live`]); tests drive the same handle through
//! [`SessionTransport::channel`].

pub mod live;
pub mod protocol;

pub use live::LiveConnector;

use crate::error::{Result, SessionError};
use crate::pipeline::messages::{PcmChunk, TranscriptFragment};
use crate::tools::{ToolCall, ToolDeclaration, ToolResult};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Something the remote agent produced, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Raw PCM16 little-endian mono audio at the output rate.
    AudioReceived(Vec<u8>),
    Transcript(TranscriptFragment),
    /// Every call carried by one inbound message.
    ToolCallReceived(Vec<ToolCall>),
    /// The agent withdrew calls it issued earlier.
    ToolCallCancelled(Vec<String>),
    /// The user barged in; queued agent audio is stale.
    Interrupted,
    TurnComplete,
    /// The server announced it will close the connection soon.
    GoAway,
    Closed,
    Error(String),
}

/// Non-blocking outbound audio path, cloneable onto the capture thread.
#[derive(Debug, Clone)]
pub struct AudioSender {
    tx: mpsc::Sender<PcmChunk>,
}

impl AudioSender {
    /// Queue a chunk without waiting. Returns `false` if the chunk was
    /// dropped because the queue is full or the transport is gone.
    pub fn send(&self, chunk: PcmChunk) -> bool {
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("outbound audio queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Handle to an open session's outbound side.
///
/// Owned by the session loop. Closing is idempotent; the I/O task notices
/// the cancellation and shuts the connection down.
#[derive(Debug)]
pub struct SessionTransport {
    audio: AudioSender,
    tool_tx: mpsc::UnboundedSender<Vec<ToolResult>>,
    cancel: CancellationToken,
}

/// The far end of a [`SessionTransport`]: what an I/O task drains.
#[derive(Debug)]
pub struct TransportPeer {
    pub audio_rx: mpsc::Receiver<PcmChunk>,
    pub tool_rx: mpsc::UnboundedReceiver<Vec<ToolResult>>,
    pub cancel: CancellationToken,
}

impl SessionTransport {
    /// Create a handle and its peer. At most `audio_capacity` chunks wait
    /// for the network; more are dropped.
    pub fn channel(audio_capacity: usize) -> (Self, TransportPeer) {
        let (audio_tx, audio_rx) = mpsc::channel(audio_capacity.max(1));
        let (tool_tx, tool_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            Self {
                audio: AudioSender { tx: audio_tx },
                tool_tx,
                cancel: cancel.clone(),
            },
            TransportPeer {
                audio_rx,
                tool_rx,
                cancel,
            },
        )
    }

    /// A sender the capture callback can own.
    pub fn audio_sender(&self) -> AudioSender {
        self.audio.clone()
    }

    /// Fire-and-forget one audio chunk.
    pub fn send(&self, chunk: PcmChunk) -> bool {
        !self.cancel.is_cancelled() && self.audio.send(chunk)
    }

    /// Send the results for one inbound tool-call batch as a single reply.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the transport is closed.
    pub fn send_tool_results(&self, results: Vec<ToolResult>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Transport("transport is closed".into()));
        }
        self.tool_tx
            .send(results)
            .map_err(|_| SessionError::Transport("transport I/O task has exited".into()))
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("closing session transport");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// An opened session: outbound handle plus inbound events.
#[derive(Debug)]
pub struct TransportLink {
    pub transport: SessionTransport,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Everything the remote agent needs at session open.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    /// Prebuilt voice persona name.
    pub voice: String,
    /// Full system instruction, role already appended.
    pub instructions: String,
    pub tools: Vec<ToolDeclaration>,
}

impl SessionSetup {
    /// Compose the system instruction for a role.
    pub fn compose_instructions(base: &str, role: &str) -> String {
        format!("{base} Current role: {role}.")
    }
}

/// Opens sessions with the remote agent.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session and wait until the agent accepted the setup.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the connection cannot be
    /// established or the setup is not acknowledged.
    async fn open(&self, setup: SessionSetup) -> Result<TransportLink>;
}
