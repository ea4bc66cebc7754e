//! In-memory log storage.

use std::sync::RwLock;

use async_trait::async_trait;

use super::{LogSnapshot, LogStorage, StorageError};

/// In-memory storage implementation.
///
/// Keeps every flushed snapshot. Useful for tests and for runs that should
/// leave nothing on disk.
#[derive(Debug, Default)]
pub struct MemoryLogStorage {
    snapshots: RwLock<Vec<LogSnapshot>>,
}

impl MemoryLogStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent snapshot, if any flush happened.
    #[must_use]
    pub fn last(&self) -> Option<LogSnapshot> {
        self.snapshots.read().ok()?.last().cloned()
    }

    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.snapshots.read().map_or(0, |s| s.len())
    }
}

#[async_trait]
impl LogStorage for MemoryLogStorage {
    async fn flush(&self, snapshot: &LogSnapshot) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_ok, block_on};

    use super::*;

    #[test]
    fn keeps_every_snapshot() {
        let storage = MemoryLogStorage::new();
        assert!(storage.last().is_none());

        let first = LogSnapshot {
            dialogue: "first".into(),
            commands: String::new(),
        };
        let second = LogSnapshot {
            dialogue: "second".into(),
            commands: "df -h".into(),
        };
        assert_ok!(block_on(storage.flush(&first)));
        assert_ok!(block_on(storage.flush(&second)));

        assert_eq!(storage.flush_count(), 2);
        assert_eq!(storage.last(), Some(second));
    }
}
