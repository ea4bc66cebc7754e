//! Confirm, execute, observe and recover for one planner turn.

use std::sync::Arc;

use remote_ops_core::{
    CommandRequest, CommandRunner, ContextStore, ExecOptions, ExecutionContext, ExecutionResult,
    NotConnected, Role, ToolCall,
};
use remote_ops_ssh::resolve_streaming;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::watch;

use crate::approvals::{Approval, Operator, OperatorError};

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    AwaitingConfirmation,
    Executing,
    Evaluating,
    Continue,
    AwaitingRecoveryDecision,
    Terminated,
}

/// What happened to one request of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Executed { result: ExecutionResult },
    Declined { reason: Option<String> },
    /// Not reached because the operator stopped the turn.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub request: CommandRequest,
    pub status: StepStatus,
}

impl StepOutcome {
    #[must_use]
    pub const fn result(&self) -> Option<&ExecutionResult> {
        match &self.status {
            StepStatus::Executed { result } => Some(result),
            _ => None,
        }
    }

    fn to_payload(&self) -> Value {
        let command = &self.request.command;
        match &self.status {
            StepStatus::Executed { result } => {
                let mut report = result.to_report();
                report["command"] = json!(command);
                report["status"] = json!("executed");
                report
            }
            StepStatus::Declined { reason } => json!({
                "command": command,
                "status": "declined",
                "declined": true,
                "reason": reason,
            }),
            StepStatus::Skipped => json!({
                "command": command,
                "status": "skipped",
                "skipped": true,
            }),
        }
    }
}

/// All outcomes of one tool call, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    pub tool: &'static str,
    pub steps: Vec<StepOutcome>,
    pub aborted_by_operator: bool,
}

impl TurnReport {
    /// JSON handed back to the planner.
    #[must_use]
    pub fn to_planner_payload(&self) -> Value {
        json!({
            "tool": self.tool,
            "results": self.steps.iter().map(StepOutcome::to_payload).collect::<Vec<_>>(),
            "aborted_by_operator": self.aborted_by_operator,
        })
    }
}

/// Orchestrator error.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    NotConnected(#[from] NotConnected),
    #[error("Operator error: {0}")]
    Operator(#[from] OperatorError),
}

/// Drives the operator through each request of a tool call.
pub struct ExecutionOrchestrator<R, O>
where
    R: CommandRunner,
    O: Operator,
{
    runner: Arc<R>,
    operator: Arc<O>,
    state: watch::Sender<OrchestratorState>,
}

impl<R, O> ExecutionOrchestrator<R, O>
where
    R: CommandRunner,
    O: Operator,
{
    #[must_use]
    pub fn new(runner: Arc<R>, operator: Arc<O>) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            runner,
            operator,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    #[must_use]
    pub const fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    #[must_use]
    pub const fn operator(&self) -> &Arc<O> {
        &self.operator
    }

    /// Run every request of `call`, recording results into `store`.
    ///
    /// # Errors
    /// Returns error if the session is not connected or the operator cannot
    /// be asked. Outcomes gathered so far are dropped; the planner sees the
    /// failure through the next turn's context.
    pub async fn run(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
        store: &ContextStore,
    ) -> Result<TurnReport, OrchestratorError> {
        let requests = call.requests();
        let mut steps = Vec::with_capacity(requests.len());
        let mut aborted_by_operator = false;

        for (index, request) in requests.iter().enumerate() {
            if aborted_by_operator {
                steps.push(StepOutcome {
                    request: request.clone(),
                    status: StepStatus::Skipped,
                });
                continue;
            }

            let (status, next) = match self.step(index, request, ctx, store).await {
                Ok(step) => step,
                Err(e) => {
                    self.set_state(OrchestratorState::Terminated);
                    return Err(e);
                }
            };
            aborted_by_operator = matches!(next, Step::Abort);
            steps.push(StepOutcome {
                request: request.clone(),
                status,
            });
        }

        self.set_state(OrchestratorState::Terminated);
        tracing::info!(
            tool = call.name(),
            steps = steps.len(),
            aborted_by_operator,
            "Turn finished"
        );
        Ok(TurnReport {
            tool: call.name(),
            steps,
            aborted_by_operator,
        })
    }

    async fn step(
        &self,
        index: usize,
        request: &CommandRequest,
        ctx: &ExecutionContext,
        store: &ContextStore,
    ) -> Result<(StepStatus, Step), OrchestratorError> {
        self.set_state(OrchestratorState::AwaitingConfirmation);
        self.operator.present(request).await;

        if let Approval::Declined { reason } = self.operator.confirm(request).await? {
            tracing::info!(index, command = %request.command, "Operator declined command");
            store.append_dialogue(
                Role::System,
                format!("Operator declined to run: {}", request.command),
            );
            self.set_state(OrchestratorState::Continue);
            return Ok((StepStatus::Declined { reason }, Step::Next));
        }

        self.set_state(OrchestratorState::Executing);
        let result = self.execute(request, ctx).await?;
        tracing::info!(
            index,
            host = %ctx.host,
            command = %request.command,
            exit_code = result.exit_code,
            aborted = result.aborted,
            "Command finished"
        );

        self.set_state(OrchestratorState::Evaluating);
        store.append_command_result(&request.command, result.combined_output(), result.exit_code);

        if result.is_success() || result.aborted {
            self.set_state(OrchestratorState::Continue);
            return Ok((StepStatus::Executed { result }, Step::Next));
        }

        self.set_state(OrchestratorState::AwaitingRecoveryDecision);
        let next = if self.operator.confirm_continue(request, &result).await? {
            self.set_state(OrchestratorState::Continue);
            Step::Next
        } else {
            tracing::info!(index, command = %request.command, "Operator stopped the turn");
            Step::Abort
        };
        Ok((StepStatus::Executed { result }, next))
    }

    async fn execute(
        &self,
        request: &CommandRequest,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NotConnected> {
        let options = ExecOptions::for_request(ctx, request);
        if !resolve_streaming(request.is_streaming, &request.command) {
            return self.runner.execute(&request.command, options).await;
        }

        let mut stream = self.runner.execute_streaming(&request.command, options).await?;
        let mut cancel = self.operator.cancel_requested();
        loop {
            tokio::select! {
                biased;
                () = &mut cancel => {
                    tracing::info!(command = %request.command, "Operator cancelled streaming command");
                    stream.cancel();
                    break;
                }
                chunk = stream.next_chunk() => match chunk {
                    Some(chunk) => self.operator.show_output(&chunk).await,
                    None => break,
                },
            }
        }
        Ok(stream.finish().await)
    }

    fn set_state(&self, state: OrchestratorState) {
        tracing::trace!(?state, "Orchestrator state");
        self.state.send_replace(state);
    }
}

enum Step {
    Next,
    Abort,
}
