//! Durable log storage.

use std::path::PathBuf;

use async_trait::async_trait;
use remote_ops_core::ContextStore;
use thiserror::Error;

pub mod file;
#[cfg(feature = "memory")]
pub mod memory;

pub use file::FileLogStorage;
#[cfg(feature = "memory")]
pub use memory::MemoryLogStorage;

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rendered text of both logs at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSnapshot {
    pub dialogue: String,
    pub commands: String,
}

impl LogSnapshot {
    #[must_use]
    pub fn of(store: &ContextStore) -> Self {
        Self {
            dialogue: store.render_dialogue(),
            commands: store.render_commands(),
        }
    }
}

/// Where flushed logs go.
///
/// Every flush carries the full current logs, so a failed flush is repaired
/// by the next successful one.
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Replace the stored logs with `snapshot`.
    async fn flush(&self, snapshot: &LogSnapshot) -> Result<(), StorageError>;
}
