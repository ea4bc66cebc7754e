//! Command requests produced by the planner.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Planner tool name for a single command.
pub const EXECUTE_COMMAND: &str = "execute_command";

/// Planner tool name for an ordered command sequence.
pub const EXECUTE_SEQUENCE: &str = "execute_command_sequence";

/// One command the planner wants to run.
///
/// `command` is transported verbatim; nothing in this workspace rewrites it
/// apart from the elevation wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    pub explanation: String,
    #[serde(default)]
    pub requires_elevation: bool,
    #[serde(default)]
    pub is_streaming: bool,
}

impl CommandRequest {
    #[must_use]
    pub fn new(command: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            explanation: explanation.into(),
            requires_elevation: false,
            is_streaming: false,
        }
    }

    /// Mark the request as needing elevated privileges.
    #[must_use]
    pub fn elevated(mut self) -> Self {
        self.requires_elevation = true;
        self
    }

    /// Mark the request as a never-terminating streaming command.
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.is_streaming = true;
        self
    }
}

/// Ordered list of commands executed strictly one after another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSequence {
    pub commands: Vec<CommandRequest>,
}

/// Decode error for planner tool calls.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The closed set of request shapes the planner may emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ExecuteCommand(CommandRequest),
    ExecuteSequence(CommandSequence),
}

impl ToolCall {
    /// Decode a named tool call.
    ///
    /// # Errors
    /// Returns `UnknownTool` for any name outside the closed set and
    /// `InvalidArguments` when the arguments do not match the shape.
    pub fn decode(name: &str, arguments: Value) -> Result<Self, DecodeError> {
        let invalid = |source| DecodeError::InvalidArguments {
            tool: name.to_string(),
            source,
        };
        match name {
            EXECUTE_COMMAND => serde_json::from_value(arguments)
                .map(Self::ExecuteCommand)
                .map_err(invalid),
            EXECUTE_SEQUENCE => serde_json::from_value(arguments)
                .map(Self::ExecuteSequence)
                .map_err(invalid),
            other => Err(DecodeError::UnknownTool(other.to_string())),
        }
    }

    /// Tool name this call was decoded from.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ExecuteCommand(_) => EXECUTE_COMMAND,
            Self::ExecuteSequence(_) => EXECUTE_SEQUENCE,
        }
    }

    /// The requests in execution order.
    #[must_use]
    pub fn requests(&self) -> &[CommandRequest] {
        match self {
            Self::ExecuteCommand(request) => std::slice::from_ref(request),
            Self::ExecuteSequence(sequence) => &sequence.commands,
        }
    }
}
