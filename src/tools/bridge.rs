//! Tool dispatch bridge.
//!
//! Inbound tool calls are run against the host's action handler and turned
//! into [`ToolResult`]s. The handler sits in a [`HandlerCell`] that the host
//! can swap at any time; each dispatch reads the cell at call time, so a
//! swap takes effect for the very next call even mid-session.
//!
//! Every call yields exactly one result carrying its own id. A handler that
//! errors or panics gets the configured failure text instead; one that
//! returns nothing gets the default text.

use super::{ToolArgs, ToolCall, ToolResult};
use crate::config::DispatchConfig;
use crate::error::{Result, SessionError};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// What the host's handler sees for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub id: String,
    /// Tool name as declared.
    pub name: String,
    /// Upper-cased tool name, the host's switch key.
    pub action: String,
    pub args: ToolArgs,
}

impl ActionCall {
    fn from_tool_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            action: call.name.to_uppercase(),
            args: call.args.clone(),
        }
    }

    /// String argument by key.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Host-side behavior for agent tool calls.
///
/// Runs on the session loop, so it must return promptly.
pub trait ActionHandler: Send + Sync {
    /// Perform the action. `Ok(None)` means "done, nothing to report".
    fn handle(&self, call: &ActionCall) -> anyhow::Result<Option<String>>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionCall) -> anyhow::Result<Option<String>> + Send + Sync,
{
    fn handle(&self, call: &ActionCall) -> anyhow::Result<Option<String>> {
        self(call)
    }
}

/// Handler used until the host installs one.
struct UnboundHandler;

impl ActionHandler for UnboundHandler {
    fn handle(&self, call: &ActionCall) -> anyhow::Result<Option<String>> {
        debug!(tool = %call.name, "no action handler bound");
        Ok(None)
    }
}

/// Live binding to the current action handler.
///
/// Clones share the same slot: the host keeps one clone and replaces the
/// handler through it, the bridge reads through another.
#[derive(Clone)]
pub struct HandlerCell {
    slot: Arc<RwLock<Arc<dyn ActionHandler>>>,
}

impl HandlerCell {
    pub fn new(handler: impl ActionHandler + 'static) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(handler))),
        }
    }

    /// A cell whose handler acknowledges every call without doing anything.
    pub fn unbound() -> Self {
        Self::new(UnboundHandler)
    }

    /// Replace the handler. Takes effect for the next dispatched call.
    pub fn replace(&self, handler: impl ActionHandler + 'static) {
        let handler: Arc<dyn ActionHandler> = Arc::new(handler);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// The handler bound right now.
    pub fn current(&self) -> Arc<dyn ActionHandler> {
        Arc::clone(&self.slot.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for HandlerCell {
    fn default() -> Self {
        Self::unbound()
    }
}

impl std::fmt::Debug for HandlerCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCell").finish_non_exhaustive()
    }
}

/// How a single dispatch went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler returned text.
    Completed,
    /// The handler returned nothing; the default text was sent.
    Defaulted,
    /// The handler failed; the failure text was sent.
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// A produced result plus how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub result: ToolResult,
    pub outcome: DispatchOutcome,
}

/// Runs tool calls through the live handler binding.
#[derive(Debug, Clone)]
pub struct ToolBridge {
    handler: HandlerCell,
    config: DispatchConfig,
}

impl ToolBridge {
    pub fn new(handler: HandlerCell, config: DispatchConfig) -> Self {
        Self { handler, config }
    }

    /// Dispatch one call. Always produces a result for `call.id`.
    pub fn dispatch(&self, call: &ToolCall) -> Dispatched {
        let action = ActionCall::from_tool_call(call);

        let (result, outcome) = match self.invoke(&action) {
            Ok(Some(text)) if !text.trim().is_empty() => (text, DispatchOutcome::Completed),
            Ok(_) => (self.config.default_result.clone(), DispatchOutcome::Defaulted),
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, "{e}");
                (
                    self.config.failure_result.clone(),
                    DispatchOutcome::Failed(e.to_string()),
                )
            }
        };

        Dispatched {
            result: ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                result,
            },
            outcome,
        }
    }

    /// Run the handler bound right now, containing errors and panics.
    fn invoke(&self, action: &ActionCall) -> Result<Option<String>> {
        let handler = self.handler.current();
        match catch_unwind(AssertUnwindSafe(|| handler.handle(action))) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(SessionError::Dispatch(format!("{e:#}"))),
            Err(panic) => Err(SessionError::Dispatch(panic_message(panic.as_ref()))),
        }
    }

    /// Dispatch every call of one inbound batch, in order.
    pub fn dispatch_batch(&self, calls: &[ToolCall]) -> Vec<Dispatched> {
        calls.iter().map(|call| self.dispatch(call)).collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_owned()
    }
}
