//! Operator-confirmed execution of planner tool calls.
//!
//! Provides:
//! - `ExecutionOrchestrator` - Confirm / execute / observe / recover cycle
//! - `Operator` trait - Confirmation, recovery decisions and streaming cancel
//! - `TurnReport` - Per-request outcomes handed back to the planner

pub mod approvals;
pub mod orchestrator;

pub use approvals::{Approval, Operator, OperatorError};
pub use orchestrator::{
    ExecutionOrchestrator, OrchestratorError, OrchestratorState, StepOutcome, StepStatus,
    TurnReport,
};
