//! Session manager: drives one operator goal to completion.

use std::sync::Arc;

use remote_ops_core::{
    CommandRunner, ContextStore, DecodeError, ExecutionContext, Planner, PlannerError,
    PlannerReply, Role, ToolCall,
};
use remote_ops_executor::{ExecutionOrchestrator, Operator, OrchestratorError};
use tracing::Instrument;
use uuid::Uuid;

use crate::storage::{LogSnapshot, LogStorage};

/// Marker appended when the operator stops a turn.
pub const ABORTED_BY_OPERATOR: &str = "Aborted by operator";

const DEFAULT_MAX_PLANNER_ROUNDS: usize = 8;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Context budget exhausted ({used} of {budget} tokens); clear the context to continue")]
    ContextExhausted { used: usize, budget: usize },
    #[error("Rejected tool call: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// How a goal ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalOutcome {
    /// The planner answered in text.
    Answered(String),
    /// The operator stopped a turn after a failure.
    AbortedByOperator,
    /// The planner kept asking for commands past the round limit.
    RoundLimit,
}

/// Drives goals through planner and orchestrator, flushing logs as it goes.
pub struct SessionManager<R, O, P, S>
where
    R: CommandRunner,
    O: Operator,
    P: Planner,
    S: LogStorage,
{
    orchestrator: ExecutionOrchestrator<R, O>,
    planner: P,
    storage: S,
    store: Arc<ContextStore>,
    ctx: ExecutionContext,
    max_planner_rounds: usize,
}

impl<R, O, P, S> SessionManager<R, O, P, S>
where
    R: CommandRunner,
    O: Operator,
    P: Planner,
    S: LogStorage,
{
    /// Create a new session manager.
    #[must_use]
    pub fn new(
        orchestrator: ExecutionOrchestrator<R, O>,
        planner: P,
        storage: S,
        store: Arc<ContextStore>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            orchestrator,
            planner,
            storage,
            store,
            ctx,
            max_planner_rounds: DEFAULT_MAX_PLANNER_ROUNDS,
        }
    }

    #[must_use]
    pub fn with_max_planner_rounds(mut self, rounds: usize) -> Self {
        self.max_planner_rounds = rounds.max(1);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Mutable context, for setting or clearing the elevation credential.
    pub const fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.ctx
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &ExecutionOrchestrator<R, O> {
        &self.orchestrator
    }

    /// Work on `goal` until the planner answers, the operator stops, or the
    /// round limit is hit. Logs are flushed before returning.
    ///
    /// # Errors
    /// Returns error if the context is over budget, the planner fails or
    /// emits a malformed tool call, or the session drops.
    pub async fn run_goal(&self, goal: &str) -> Result<GoalOutcome, ManagerError> {
        let turn_id = Uuid::new_v4();
        let span = tracing::info_span!("goal", %turn_id, host = %self.ctx.host);

        async {
            tracing::info!("Starting goal");
            self.store.append_dialogue(Role::User, goal);
            let outcome = self.cycle(goal).await;
            self.flush().await;
            match &outcome {
                Ok(outcome) => tracing::info!(?outcome, "Goal finished"),
                Err(e) => tracing::error!(error = %e, "Goal failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn cycle(&self, goal: &str) -> Result<GoalOutcome, ManagerError> {
        for round in 0..self.max_planner_rounds {
            let stats = self.store.stats();
            if stats.is_over_budget() {
                return Err(ManagerError::ContextExhausted {
                    used: stats.total_tokens,
                    budget: stats.budget_tokens,
                });
            }
            tracing::debug!(round, context = %stats.to_log_string(), "Asking planner");

            let calls = match self.planner.plan(&self.store.messages(), goal).await? {
                PlannerReply::Text(text) => {
                    self.store.append_dialogue(Role::Assistant, text.as_str());
                    return Ok(GoalOutcome::Answered(text));
                }
                PlannerReply::ToolCalls(calls) if calls.is_empty() => {
                    return Ok(GoalOutcome::Answered(String::new()));
                }
                PlannerReply::ToolCalls(calls) => calls,
            };

            for raw in calls {
                let call = match ToolCall::decode(&raw.name, raw.arguments) {
                    Ok(call) => call,
                    Err(e) => {
                        self.store
                            .append_dialogue(Role::System, format!("Rejected tool call: {e}"));
                        return Err(e.into());
                    }
                };

                let report = self.orchestrator.run(&call, &self.ctx, &self.store).await?;
                self.store
                    .append_dialogue(Role::Tool, report.to_planner_payload().to_string());
                self.flush().await;

                if report.aborted_by_operator {
                    self.store.append_dialogue(Role::System, ABORTED_BY_OPERATOR);
                    return Ok(GoalOutcome::AbortedByOperator);
                }
            }
        }

        tracing::warn!(rounds = self.max_planner_rounds, "Planner round limit reached");
        Ok(GoalOutcome::RoundLimit)
    }

    /// Write both logs to storage. Failures are logged and repaired by the
    /// next flush.
    pub async fn flush(&self) {
        if let Err(e) = self.storage.flush(&LogSnapshot::of(&self.store)).await {
            tracing::warn!(error = %e, "Failed to flush logs");
        }
    }

    /// Flush logs and release the connection.
    pub async fn shutdown(&self) {
        self.flush().await;
        self.orchestrator.runner().shutdown().await;
        tracing::info!("Session shut down");
    }
}
