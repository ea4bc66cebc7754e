//! Operator interaction: confirmation, recovery decisions and cancellation.

use async_trait::async_trait;
use remote_ops_core::{CommandRequest, ExecutionResult, OutputChunk};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator's answer to a confirmation prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Approval {
    /// Run this command instance.
    Approved,
    /// Do not run it.
    Declined { reason: Option<String> },
}

impl Approval {
    #[must_use]
    pub const fn declined() -> Self {
        Self::Declined { reason: None }
    }
}

/// Operator error.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("Operator input unavailable")]
    Unavailable,
    #[error("Operator prompt failed: {0}")]
    PromptFailed(String),
}

/// The human in the loop.
///
/// Implement this trait to integrate with a terminal or other UI. The
/// orchestrator never runs a command without `confirm` answering
/// `Approval::Approved` for that exact request.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Show a command and its explanation before asking for confirmation.
    async fn present(&self, request: &CommandRequest);

    /// Ask whether to run `request`.
    ///
    /// # Errors
    /// Returns error if no answer can be obtained. The command is not run.
    async fn confirm(&self, request: &CommandRequest) -> Result<Approval, OperatorError>;

    /// Explain a failed command and ask whether to go on with the rest of
    /// the turn.
    ///
    /// # Errors
    /// Returns error if no answer can be obtained.
    async fn confirm_continue(
        &self,
        request: &CommandRequest,
        result: &ExecutionResult,
    ) -> Result<bool, OperatorError>;

    /// Display one chunk of streaming output.
    async fn show_output(&self, chunk: &OutputChunk);

    /// Resolves when the operator asks to stop the running streaming command.
    ///
    /// Polled only while a streaming command runs; must be cancel-safe.
    async fn cancel_requested(&self);
}
