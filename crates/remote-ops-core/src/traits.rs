//! Collaborator traits: command execution and planning.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{ChatMessage, CommandRequest, ElevationCredential, ExecutionContext, ExecutionResult};

/// Execution attempted with no live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Not connected to a remote host")]
pub struct NotConnected;

/// Per-command execution options.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions<'a> {
    /// Run through the elevation wrapper.
    pub elevate: bool,
    /// Credential for the wrapper; only read when `elevate` is set.
    pub credential: Option<&'a ElevationCredential>,
    /// One-shot timeout. Ignored for streaming executions.
    pub timeout: Duration,
}

impl<'a> ExecOptions<'a> {
    /// Options for an unprivileged command with the given timeout.
    #[must_use]
    pub const fn plain(timeout: Duration) -> Self {
        Self {
            elevate: false,
            credential: None,
            timeout,
        }
    }

    /// Options for `request` under `ctx`.
    #[must_use]
    pub fn for_request(ctx: &'a ExecutionContext, request: &CommandRequest) -> Self {
        Self {
            elevate: request.requires_elevation,
            credential: ctx.elevation(),
            timeout: ctx.default_timeout,
        }
    }
}

/// A piece of streaming output, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

impl OutputChunk {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Stdout(s) | Self::Stderr(s) => s,
        }
    }
}

/// Handle to a running streaming command.
///
/// Output arrives on a bounded channel; `cancel` asks the remote side to stop
/// and `finish` resolves once the execution has a result. Finishing always
/// yields a result, cancelled or not. Once cancel was requested the result is
/// an interrupted one, even if the command had already exited.
pub struct StreamingExecution {
    chunks: mpsc::Receiver<OutputChunk>,
    cancel_tx: Option<oneshot::Sender<()>>,
    cancelled: bool,
    completion: oneshot::Receiver<ExecutionResult>,
}

impl StreamingExecution {
    #[must_use]
    pub const fn new(
        chunks: mpsc::Receiver<OutputChunk>,
        cancel_tx: oneshot::Sender<()>,
        completion: oneshot::Receiver<ExecutionResult>,
    ) -> Self {
        Self {
            chunks,
            cancel_tx: Some(cancel_tx),
            cancelled: false,
            completion,
        }
    }

    /// An execution that already finished without producing output.
    #[must_use]
    pub fn completed(result: ExecutionResult) -> Self {
        let (_, chunks) = mpsc::channel(1);
        let (cancel_tx, _) = oneshot::channel();
        let (done_tx, completion) = oneshot::channel();
        let _ = done_tx.send(result);
        Self::new(chunks, cancel_tx, completion)
    }

    /// Next chunk, or `None` once the producer is done.
    pub async fn next_chunk(&mut self) -> Option<OutputChunk> {
        self.chunks.recv().await
    }

    /// Request cancellation. Returns false if already requested.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        // The producer may have finished already; the result is still rewritten.
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        true
    }

    /// Stop consuming output and wait for the final result.
    pub async fn finish(self) -> ExecutionResult {
        // Dropping the receiver unblocks a producer stuck on a full channel.
        drop(self.chunks);
        let cancel_tx = self.cancel_tx;
        let result = self.completion.await.unwrap_or_else(|_| {
            ExecutionResult::failure("Streaming execution ended without a result")
        });
        drop(cancel_tx);
        if self.cancelled && !result.aborted {
            return ExecutionResult::interrupted(result.stdout, result.stderr);
        }
        result
    }
}

/// Something that runs commands on the remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion or timeout.
    async fn execute(
        &self,
        command: &str,
        options: ExecOptions<'_>,
    ) -> Result<ExecutionResult, NotConnected>;

    /// Start a command that streams output until cancelled.
    async fn execute_streaming(
        &self,
        command: &str,
        options: ExecOptions<'_>,
    ) -> Result<StreamingExecution, NotConnected>;

    /// Release the connection, if the runner holds one.
    async fn shutdown(&self) {}
}

/// Raw tool call as emitted by the planner, decoded later into a `ToolCall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// What the planner answered.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerReply {
    Text(String),
    ToolCalls(Vec<RawToolCall>),
}

/// Planner error.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Planner unavailable")]
    Unavailable,
    #[error("Planner request failed: {0}")]
    RequestFailed(String),
}

/// External natural-language planner.
///
/// Prompt construction and model choice live behind this trait.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan the next step for `goal` given the dialogue so far.
    async fn plan(&self, messages: &[ChatMessage], goal: &str)
    -> Result<PlannerReply, PlannerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_resolves_after_cancel_with_full_channel() {
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let mut exec = StreamingExecution::new(chunk_rx, cancel_tx, done_rx);

        tokio::spawn(async move {
            chunk_tx.send(OutputChunk::Stdout("a".into())).await.ok();
            // Blocks until the consumer drops the receiver.
            chunk_tx.send(OutputChunk::Stdout("b".into())).await.ok();
            cancel_rx.await.ok();
            done_tx.send(ExecutionResult::interrupted("ab", "")).ok();
        });

        assert!(exec.cancel());
        assert!(!exec.cancel());
        let result = exec.finish().await;
        assert!(result.aborted);
    }

    #[tokio::test]
    async fn finish_maps_dropped_producer_to_failure() {
        let (_chunk_tx, chunk_rx) = mpsc::channel(1);
        let (cancel_tx, _cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel::<ExecutionResult>();
        drop(done_tx);

        let result = StreamingExecution::new(chunk_rx, cancel_tx, done_rx).finish().await;
        assert_eq!(result.exit_code, 1);
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn cancel_after_producer_finished_still_interrupts() {
        let (chunk_tx, chunk_rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        chunk_tx.send(OutputChunk::Stdout("a".into())).await.ok();
        drop(cancel_rx);
        done_tx.send(ExecutionResult::new("a", "", 0)).ok();

        let mut exec = StreamingExecution::new(chunk_rx, cancel_tx, done_rx);
        assert!(exec.cancel());
        let result = exec.finish().await;
        assert!(result.aborted);
        assert_eq!(result.exit_code, 130);
        assert_eq!(result.stdout, "a");
    }

    #[tokio::test]
    async fn completed_execution_has_no_output() {
        let mut exec = StreamingExecution::completed(ExecutionResult::failure("no credential"));
        assert!(exec.next_chunk().await.is_none());
        assert_eq!(exec.finish().await.stderr, "no credential");
    }

    #[test]
    fn options_follow_request_and_context() {
        let mut ctx = ExecutionContext::new("web-01").with_timeout(Duration::from_secs(5));
        ctx.set_elevation(ElevationCredential::new("pw"));
        let request = CommandRequest::new("whoami", "who").elevated();

        let options = ExecOptions::for_request(&ctx, &request);
        assert!(options.elevate);
        assert!(options.credential.is_some());
        assert_eq!(options.timeout, Duration::from_secs(5));
    }
}
