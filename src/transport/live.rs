//! Live WebSocket connector.
//!
//! Opens the bidirectional stream, sends the setup frame and waits for the
//! server to acknowledge it. After that a spawned I/O task pumps outbound
//! audio and tool replies onto the socket and parses inbound frames into
//! [`TransportEvent`]s. The task never reconnects: a close or error ends it.

use super::protocol::{ClientMessage, ServerMessage};
use super::{Connector, SessionSetup, SessionTransport, TransportEvent, TransportLink, TransportPeer};
use crate::config::{SessionConfig, TransportConfig};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Connects to the Gemini Live bidi endpoint.
#[derive(Debug, Clone)]
pub struct LiveConnector {
    config: TransportConfig,
    audio_queue_chunks: usize,
    api_key: Option<String>,
}

impl LiveConnector {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.transport.clone(),
            audio_queue_chunks: config.audio.outbound_queue_chunks,
            api_key: None,
        }
    }

    /// Use this key instead of reading `api_key_env`.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        match std::env::var(&self.config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(SessionError::Transport(format!(
                "API key not set: export {}",
                self.config.api_key_env
            ))),
        }
    }

    /// Endpoint with the API key attached as the `key` query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the endpoint is not a valid URL.
    pub fn session_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoint).map_err(|e| {
            SessionError::Config(format!("invalid endpoint '{}': {e}", self.config.endpoint))
        })?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn open(&self, setup: SessionSetup) -> Result<TransportLink> {
        // No-op once a provider is installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let url = self.session_url(&self.api_key()?)?;
        info!(
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            voice = %setup.voice,
            tools = setup.tools.len(),
            "opening live session"
        );

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Transport(format!("connect: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let frame = ClientMessage::setup(&self.config.model, &setup).to_json()?;
        write
            .send(Message::Text(frame))
            .await
            .map_err(|e| SessionError::Transport(format!("send setup: {e}")))?;

        let limit = Duration::from_millis(self.config.setup_timeout_ms);
        tokio::time::timeout(limit, wait_for_setup(&mut read))
            .await
            .map_err(|_| {
                SessionError::Transport(format!(
                    "setup not acknowledged within {}ms",
                    self.config.setup_timeout_ms
                ))
            })??;
        info!("live session ready");

        let (transport, peer) = SessionTransport::channel(self.audio_queue_chunks);
        let (events_tx, events) = mpsc::unbounded_channel();
        tokio::spawn(io_loop(write, read, peer, events_tx));

        Ok(TransportLink { transport, events })
    }
}

/// Read frames until `setupComplete`. Anything else before it is ignored.
async fn wait_for_setup<R>(read: &mut R) -> Result<()>
where
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let payload = match read.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                return Err(SessionError::Transport(format!(
                    "closed during setup: {reason}"
                )));
            }
            None => return Err(SessionError::Transport("closed during setup".into())),
            Some(Err(e)) => return Err(SessionError::Transport(format!("read during setup: {e}"))),
            Some(Ok(_)) => continue,
        };

        match ServerMessage::parse(&payload) {
            Ok(msg) if msg.is_setup_complete() => return Ok(()),
            Ok(_) => debug!("ignoring server message before setup completed"),
            Err(e) => debug!("{e}"),
        }
    }
}

/// Pump one session's socket until it closes, errors, or is cancelled.
async fn io_loop<W, R>(
    mut write: W,
    mut read: R,
    mut peer: TransportPeer,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let emit = |event: TransportEvent| {
        let _ = events.send(event);
    };

    loop {
        tokio::select! {
            biased;

            _ = peer.cancel.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!("close frame not sent: {e}");
                }
                debug!("live session I/O stopped by request");
                break;
            }

            msg = read.next() => {
                let payload = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(frame))) => {
                        let event = close_event(frame);
                        match event {
                            TransportEvent::Error(ref cause) => error!("live session closed: {cause}"),
                            _ => info!("live session closed by server"),
                        }
                        emit(event);
                        break;
                    }
                    None => {
                        info!("live session stream ended");
                        emit(TransportEvent::Closed);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("live session read error: {e}");
                        emit(TransportEvent::Error(format!("read: {e}")));
                        break;
                    }
                    Some(Ok(_)) => continue,
                };
                match ServerMessage::parse(&payload) {
                    Ok(msg) => msg.into_events().into_iter().for_each(emit),
                    Err(e) => warn!("{e}"),
                }
            }

            Some(chunk) = peer.audio_rx.recv() => {
                if let Err(e) = send_client(&mut write, &ClientMessage::audio(&chunk)).await {
                    error!("{e}");
                    emit(TransportEvent::Error(e.to_string()));
                    break;
                }
            }

            Some(results) = peer.tool_rx.recv() => {
                debug!(count = results.len(), "sending tool response");
                if let Err(e) = send_client(&mut write, &ClientMessage::tool_results(&results)).await {
                    error!("{e}");
                    emit(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    peer.cancel.cancel();
}

/// A normal or going-away close is a plain close; any other code is a
/// failure carrying the server's reason.
fn close_event(frame: Option<CloseFrame<'_>>) -> TransportEvent {
    match frame {
        Some(frame) if !matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
            let code = u16::from(frame.code);
            if frame.reason.is_empty() {
                TransportEvent::Error(format!("closed with code {code}"))
            } else {
                TransportEvent::Error(format!("closed with code {code}: {}", frame.reason))
            }
        }
        _ => TransportEvent::Closed,
    }
}

async fn send_client<W>(write: &mut W, msg: &ClientMessage) -> Result<()>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = msg.to_json()?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| SessionError::Transport(format!("send: {e}")))
}
