//! Session lifecycle: wires capture, transport, playback and tool dispatch
//! into one state machine.
//!
//! ```text
//!            start()                 audio queued
//!   Idle ───────────────► Listening ◄────────────► Speaking
//!    ▲                        │   ▲   last unit done   │
//!    │                        ▼   │                    ▼
//!    │                     Processing (tool batch) ◄───┘
//!    │
//!    └──── stop() / transport closed / transport error (from any state)
//! ```
//!
//! One spawned task owns every per-session resource and is the only place
//! the playback cursor, active set and status are mutated. The host talks to
//! it through [`VoiceSession`]; audio threads talk to it through channels.

use crate::audio::capture::CaptureHandle;
use crate::audio::device::{AudioDevices, PlaybackEvent, UnitId};
use crate::audio::playback::PlaybackScheduler;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::pipeline::messages::{Transcript, TranscriptFragment};
use crate::runtime::{EndReason, RuntimeEvent, Status};
use crate::tools::{ActionHandler, CapabilitySet, HandlerCell, ToolBridge, ToolCall};
use crate::transport::{Connector, SessionSetup, SessionTransport, TransportEvent};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runtime event buffer. Slow subscribers lag rather than stall the session.
const EVENT_CHANNEL_SIZE: usize = 256;

/// What the host supplies when opening a session.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Role context appended to the agent's instructions.
    pub role: String,
    /// Voice persona; falls back to the configured default.
    pub voice: Option<String>,
    pub capabilities: CapabilitySet,
}

impl StartRequest {
    pub fn new(role: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            role: role.into(),
            voice: None,
            capabilities,
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// Identity of an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub voice: String,
    pub role: String,
}

/// Host-facing handle for live voice sessions, one at a time.
pub struct VoiceSession {
    config: SessionConfig,
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn Connector>,
    handler: HandlerCell,
    publisher: Arc<Publisher>,
    /// Serializes `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
    /// Set while a `start` is acquiring; `stop` cancels it.
    pending_start: Mutex<Option<CancellationToken>>,
    active: Arc<Mutex<Option<ActiveSession>>>,
}

struct ActiveSession {
    info: SessionInfo,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn Connector>,
        handler: HandlerCell,
    ) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        let (transcript, _) = watch::channel(Transcript::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            config,
            devices,
            connector,
            handler,
            publisher: Arc::new(Publisher {
                status,
                transcript,
                events,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            pending_start: Mutex::new(None),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a session: microphone stream, output device, then the transport.
    ///
    /// Status moves to `Listening` only once everything is held. On any
    /// failure whatever was already acquired is released and status stays
    /// `Idle`. A [`stop`](Self::stop) issued while this is still acquiring
    /// abandons the start.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] if a session is open.
    /// - [`SessionError::Acquisition`] if an audio device cannot be opened.
    /// - [`SessionError::Transport`] if the agent connection fails.
    /// - [`SessionError::StartCancelled`] if `stop` was called meanwhile.
    pub async fn start(&self, request: StartRequest) -> Result<SessionInfo> {
        let _guard = self.lifecycle.lock().await;
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }

        let info = SessionInfo {
            id: Uuid::new_v4(),
            voice: request
                .voice
                .clone()
                .unwrap_or_else(|| self.config.persona.voice_name.clone()),
            role: request.role.clone(),
        };
        info!(session = %info.id, role = %info.role, voice = %info.voice, "starting voice session");

        let abort = CancellationToken::new();
        *self.lock_pending() = Some(abort.clone());
        let acquired = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(SessionError::StartCancelled),
            acquired = self.acquire(&info, request) => acquired,
        };
        self.lock_pending().take();

        // A stop that landed after acquisition finished still wins.
        let acquired = match acquired {
            Ok(_) if abort.is_cancelled() => Err(SessionError::StartCancelled),
            other => other,
        };

        let (resources, events, playback_rx) = match acquired {
            Ok(acquired) => acquired,
            Err(SessionError::StartCancelled) => {
                info!(session = %info.id, "session start cancelled");
                return Err(SessionError::StartCancelled);
            }
            Err(e) => {
                error!(session = %info.id, "session start failed: {e}");
                return Err(e);
            }
        };

        self.publisher.reset_transcript();
        self.publisher.set_status(Status::Listening);

        let cancel = CancellationToken::new();
        let session = SessionLoop {
            id: info.id,
            resources,
            events,
            playback_rx,
            bridge: ToolBridge::new(self.handler.clone(), self.config.dispatch.clone()),
            publisher: Arc::clone(&self.publisher),
            cancel: cancel.clone(),
            slot: Arc::clone(&self.active),
        };

        // Hold the slot while spawning so a session that ends at once
        // cannot try to clear the slot before it is filled.
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let task = tokio::spawn(session.run());
        *slot = Some(ActiveSession {
            info: info.clone(),
            cancel,
            task,
        });
        drop(slot);

        info!(session = %info.id, "voice session active");
        Ok(info)
    }

    async fn acquire(
        &self,
        info: &SessionInfo,
        request: StartRequest,
    ) -> Result<(
        SessionResources,
        mpsc::UnboundedReceiver<TransportEvent>,
        mpsc::UnboundedReceiver<PlaybackEvent>,
    )> {
        let audio = &self.config.audio;
        let mut resources = SessionResources::default();

        let input = self.devices.open_input(audio)?;
        resources
            .capture
            .insert(CaptureHandle::new(input))
            .start(audio)?;

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let output = self.devices.open_output(audio, playback_tx)?;
        resources.playback = Some(PlaybackScheduler::new(output));

        let setup = SessionSetup {
            voice: info.voice.clone(),
            instructions: SessionSetup::compose_instructions(
                &request.capabilities.instructions,
                &request.role,
            ),
            tools: request.capabilities.tools,
        };
        let link = self.connector.open(setup).await?;
        if let Some(capture) = resources.capture.as_ref() {
            capture.attach(link.transport.audio_sender());
        }
        resources.transport = Some(link.transport);

        Ok((resources, link.events, playback_rx))
    }

    /// Stop the open session and release everything it holds. Idempotent.
    ///
    /// A start still in progress is cancelled first.
    pub async fn stop(&self) {
        if let Some(abort) = self.lock_pending().take() {
            info!("stop requested during start, cancelling it");
            abort.cancel();
        }

        let _guard = self.lifecycle.lock().await;
        let Some(active) = self.take_active() else {
            debug!("stop: no active session");
            return;
        };

        info!(session = %active.info.id, "stopping voice session");
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            error!(session = %active.info.id, "session task failed: {e}");
            self.publisher.set_status(Status::Idle);
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.pending_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_active(&self) -> Option<ActiveSession> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Bind a new action handler. Applies to the next tool call, including
    /// calls in the session already open.
    pub fn set_action_handler(&self, handler: impl ActionHandler + 'static) {
        self.handler.replace(handler);
    }

    pub fn status(&self) -> Status {
        *self.publisher.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.publisher.status.subscribe()
    }

    /// Snapshot of the running transcript.
    pub fn transcript(&self) -> Transcript {
        self.publisher.transcript.borrow().clone()
    }

    pub fn watch_transcript(&self) -> watch::Receiver<Transcript> {
        self.publisher.transcript.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.publisher.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.info.clone())
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if let Some(active) = self.take_active() {
            active.cancel.cancel();
        }
    }
}

/// Observable state shared between the handle and the session task.
struct Publisher {
    status: watch::Sender<Status>,
    transcript: watch::Sender<Transcript>,
    events: broadcast::Sender<RuntimeEvent>,
}

impl Publisher {
    fn set_status(&self, next: Status) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(status = %next, "status changed");
            self.emit(RuntimeEvent::StatusChanged(next));
        }
    }

    fn reset_transcript(&self) {
        self.transcript.send_replace(Transcript::default());
    }

    fn push_transcript(&self, fragment: TranscriptFragment) {
        self.transcript.send_modify(|t| t.push(&fragment));
        self.emit(RuntimeEvent::Transcript(fragment));
    }

    fn emit(&self, event: RuntimeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Everything a session holds. Each release takes the handle out first, so
/// a repeated release finds nothing left to do.
#[derive(Default)]
struct SessionResources {
    capture: Option<CaptureHandle>,
    playback: Option<PlaybackScheduler>,
    transport: Option<SessionTransport>,
}

impl SessionResources {
    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.close();
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// The per-session event loop.
struct SessionLoop {
    id: Uuid,
    resources: SessionResources,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    bridge: ToolBridge,
    publisher: Arc<Publisher>,
    cancel: CancellationToken,
    slot: Arc<Mutex<Option<ActiveSession>>>,
}

impl SessionLoop {
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break EndReason::Stopped,

                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.on_transport_event(event) {
                            break reason;
                        }
                    }
                    None => break EndReason::TransportClosed,
                },

                Some(PlaybackEvent::Finished(unit)) = self.playback_rx.recv() => {
                    self.on_unit_finished(unit);
                }
            }
        };

        self.finish(reason);
    }

    /// Handle one inbound event. Returns the end reason if the session is over.
    fn on_transport_event(&mut self, event: TransportEvent) -> Option<EndReason> {
        match event {
            TransportEvent::AudioReceived(pcm) => self.on_audio(&pcm),
            TransportEvent::Transcript(fragment) => self.publisher.push_transcript(fragment),
            TransportEvent::ToolCallReceived(calls) => self.on_tool_calls(&calls),
            TransportEvent::ToolCallCancelled(ids) => {
                // Dispatch is synchronous, so every call already has its reply.
                debug!(?ids, "agent cancelled tool calls");
            }
            TransportEvent::Interrupted => self.on_interrupted(),
            TransportEvent::TurnComplete => debug!("agent turn complete"),
            TransportEvent::GoAway => warn!(session = %self.id, "server will close the session soon"),
            TransportEvent::Closed => return Some(EndReason::TransportClosed),
            TransportEvent::Error(cause) => {
                error!(session = %self.id, "transport failed: {cause}");
                return Some(EndReason::TransportError(cause));
            }
        }
        None
    }

    fn on_audio(&mut self, pcm: &[u8]) {
        let Some(playback) = self.resources.playback.as_mut() else {
            return;
        };
        match playback.enqueue(pcm) {
            Ok(Some(_)) => self.publisher.set_status(Status::Speaking),
            Ok(None) => {}
            Err(e) => warn!("dropping inbound audio buffer: {e}"),
        }
    }

    fn on_unit_finished(&mut self, unit: UnitId) {
        let drained = self
            .resources
            .playback
            .as_mut()
            .is_some_and(|p| p.on_finished(unit));
        if drained && *self.publisher.status.borrow() == Status::Speaking {
            self.publisher.set_status(Status::Listening);
        }
    }

    fn on_tool_calls(&mut self, calls: &[ToolCall]) {
        self.publisher.set_status(Status::Processing);

        for call in calls {
            info!(tool = %call.name, id = %call.id, "tool call");
            self.publisher.emit(RuntimeEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                args_json: serde_json::to_string(&call.args).unwrap_or_default(),
            });
        }

        let dispatched = self.bridge.dispatch_batch(calls);
        for d in &dispatched {
            self.publisher.emit(RuntimeEvent::ToolResult {
                id: d.result.id.clone(),
                name: d.result.name.clone(),
                success: d.outcome.is_success(),
            });
        }

        let results = dispatched.into_iter().map(|d| d.result).collect();
        if let Some(transport) = self.resources.transport.as_ref()
            && let Err(e) = transport.send_tool_results(results)
        {
            warn!("tool results not sent: {e}");
        }

        let playing = self
            .resources
            .playback
            .as_ref()
            .is_some_and(PlaybackScheduler::is_playing);
        self.publisher
            .set_status(if playing { Status::Speaking } else { Status::Listening });
    }

    fn on_interrupted(&mut self) {
        let flushed = self.resources.playback.as_mut().map_or(0, PlaybackScheduler::flush);
        info!(flushed, "agent interrupted, playback flushed");
        self.publisher.set_status(Status::Listening);
        self.publisher.emit(RuntimeEvent::Interrupted { flushed });
    }

    fn finish(mut self, reason: EndReason) {
        self.resources.release();

        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|a| a.info.id == self.id) {
                *slot = None;
            }
        }

        self.publisher.set_status(Status::Idle);
        info!(session = %self.id, ?reason, "voice session ended");
        self.publisher.emit(RuntimeEvent::SessionEnded { reason });
    }
}
