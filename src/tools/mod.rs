//! Tool capability declarations and agent-issued tool calls.
//!
//! The declarations are host data. The core forwards them to the agent at
//! session open and never interprets them.

pub mod bridge;

pub use bridge::{ActionCall, ActionHandler, DispatchOutcome, Dispatched, HandlerCell, ToolBridge};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Argument map carried by a tool call.
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// Type of a declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Boolean,
    /// A string restricted to the listed values.
    Enum { values: Vec<String> },
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(flatten)]
    pub kind: ParameterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::String,
            description: Some(description.into()),
            required: false,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::Boolean,
            description: Some(description.into()),
            required: false,
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ParameterKind::Enum {
                values: values.into_iter().map(Into::into).collect(),
            },
            description: None,
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A tool the agent may call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Names of required parameters, in key order.
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Everything the host hands the agent at session open besides the persona.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub tools: Vec<ToolDeclaration>,
    /// Behavioral instructions for the agent.
    pub instructions: String,
}

/// A request from the agent to run a named action.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlation id echoed back in the matching [`ToolResult`].
    pub id: String,
    pub name: String,
    pub args: ToolArgs,
}

/// The reply to exactly one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub result: String,
}
