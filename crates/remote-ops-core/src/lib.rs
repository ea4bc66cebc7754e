//! Core abstractions for planner-driven remote operations.
//!
//! This crate provides the fundamental building blocks:
//! - `ContextStore` - Bounded dialogue + command logs with tiered compaction
//! - `LogEntry` - Typed log entries and their durable text form
//! - `CommandRequest` / `ToolCall` - What the planner asks for
//! - `ExecutionResult` - What a remote command produced
//! - `ExecutionContext` - Per-connection context (elevation slot, timeout)
//! - `CommandRunner` and `Planner` traits

pub mod context;
pub mod context_store;
pub mod log_entry;
pub mod request;
pub mod result;
pub mod traits;

pub use context::{ElevationCredential, ExecutionContext};
pub use context_store::{ContextConfig, ContextStats, ContextStore};
pub use log_entry::{ChatMessage, CommandLogEntry, DialogueEntry, LogEntry, Role};
pub use request::{CommandRequest, CommandSequence, DecodeError, ToolCall};
pub use result::ExecutionResult;
pub use traits::{
    CommandRunner, ExecOptions, NotConnected, OutputChunk, Planner, PlannerError, PlannerReply,
    RawToolCall, StreamingExecution,
};
