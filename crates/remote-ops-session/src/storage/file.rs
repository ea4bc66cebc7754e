//! Plain-text log files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{LogSnapshot, LogStorage, StorageError};

pub const DIALOGUE_FILE: &str = "dialogue.log";
pub const COMMANDS_FILE: &str = "commands.log";

/// Writes `dialogue.log` and `commands.log` into one directory.
///
/// Each flush rewrites both files through a temporary file and a rename, so
/// a reader never sees a half-written log.
#[derive(Debug, Clone)]
pub struct FileLogStorage {
    dir: PathBuf,
}

impl FileLogStorage {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn dialogue_path(&self) -> PathBuf {
        self.dir.join(DIALOGUE_FILE)
    }

    #[must_use]
    pub fn commands_path(&self) -> PathBuf {
        self.dir.join(COMMANDS_FILE)
    }
}

async fn replace(path: PathBuf, contents: &str) -> Result<(), StorageError> {
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(source) = tokio::fs::write(&tmp, contents).await {
        return Err(StorageError::Io { path: tmp, source });
    }
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|source| StorageError::Io { path, source })
}

#[async_trait]
impl LogStorage for FileLogStorage {
    async fn flush(&self, snapshot: &LogSnapshot) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Io {
                path: self.dir.clone(),
                source,
            })?;

        replace(self.dialogue_path(), &snapshot.dialogue).await?;
        replace(self.commands_path(), &snapshot.commands).await?;

        tracing::debug!(dir = %self.dir.display(), "Flushed logs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use remote_ops_core::{ContextStore, Role, log_entry::LOG_DELIMITER};

    use super::*;

    #[tokio::test]
    async fn writes_both_logs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path().join("logs"));
        let store = ContextStore::default();
        store.append_dialogue(Role::User, "check disk");
        store.append_dialogue(Role::Assistant, "running df");
        store.append_command_result("df -h", "/dev/sda1 40%", 0);

        storage.flush(&LogSnapshot::of(&store)).await.unwrap();

        let dialogue = std::fs::read_to_string(storage.dialogue_path()).unwrap();
        assert!(dialogue.contains("] User:\ncheck disk"));
        assert!(dialogue.contains(&format!("\n{LOG_DELIMITER}\n")));
        let commands = std::fs::read_to_string(storage.commands_path()).unwrap();
        assert!(commands.contains("✓ $ df -h\nExit: 0\n/dev/sda1 40%"));
    }

    #[tokio::test]
    async fn flush_rewrites_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path());

        let first = LogSnapshot {
            dialogue: "first\n".into(),
            commands: String::new(),
        };
        let second = LogSnapshot {
            dialogue: "second\n".into(),
            commands: "cmd\n".into(),
        };
        storage.flush(&first).await.unwrap();
        storage.flush(&second).await.unwrap();

        assert_eq!(std::fs::read_to_string(storage.dialogue_path()).unwrap(), "second\n");
        assert_eq!(std::fs::read_to_string(storage.commands_path()).unwrap(), "cmd\n");
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .is_ok_and(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn unwritable_dir_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let storage = FileLogStorage::new(file.path().join("nested"));

        let err = storage.flush(&LogSnapshot::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
