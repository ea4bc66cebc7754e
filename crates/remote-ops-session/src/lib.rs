//! Goal cycle driver and durable logs for remote operations.
//!
//! Provides:
//! - `SessionManager` - Drive one operator goal through planner and orchestrator
//! - `AppConfig` - JSON configuration file
//! - Log storage implementations (file, memory)

pub mod config;
pub mod manager;
pub mod storage;

pub use config::{AppConfig, ConfigError, OrchestratorConfig};
pub use manager::{GoalOutcome, ManagerError, SessionManager};
#[cfg(feature = "memory")]
pub use storage::MemoryLogStorage;
pub use storage::{FileLogStorage, LogSnapshot, LogStorage, StorageError};
