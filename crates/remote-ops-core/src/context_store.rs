//! Bounded dialogue + command-output logs with tiered compaction.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::log_entry::{
    ChatMessage, CommandLogEntry, DEFAULT_CHARS_PER_TOKEN, DialogueEntry, LogEntry, Role,
    render_blocks,
};

/// Default model context budget in tokens.
pub const DEFAULT_BUDGET_TOKENS: usize = 128_000;

/// Dialogue entries always kept by compaction.
pub const DEFAULT_DIALOGUE_FLOOR: usize = 20;

/// Budget policy for a [`ContextStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub budget_tokens: usize,
    pub dialogue_floor: usize,
    pub chars_per_token: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: DEFAULT_BUDGET_TOKENS,
            dialogue_floor: DEFAULT_DIALOGUE_FLOOR,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextConfig {
    #[must_use]
    pub fn with_budget(mut self, budget_tokens: usize) -> Self {
        self.budget_tokens = budget_tokens;
        self
    }
}

/// Occupancy snapshot, recomputed from the logs on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextStats {
    pub dialogue_tokens: usize,
    pub command_tokens: usize,
    pub total_tokens: usize,
    pub budget_tokens: usize,
    pub percent_used: f64,
}

impl ContextStats {
    #[must_use]
    pub const fn is_over_budget(&self) -> bool {
        self.total_tokens > self.budget_tokens
    }

    /// Format as a short log-friendly string.
    #[must_use]
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {}; dialogue {}, commands {})",
            self.total_tokens,
            self.percent_used,
            self.budget_tokens,
            self.dialogue_tokens,
            self.command_tokens,
        )
    }
}

/// What one compaction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Compaction {
    commands_dropped: usize,
    dialogue_dropped: usize,
}

#[derive(Clone)]
struct Stored<T> {
    entry: T,
    tokens: usize,
}

#[derive(Default)]
struct Inner {
    dialogue: VecDeque<Stored<DialogueEntry>>,
    messages: VecDeque<ChatMessage>,
    commands: VecDeque<Stored<CommandLogEntry>>,
}

impl Inner {
    fn dialogue_tokens(&self) -> usize {
        self.dialogue.iter().map(|s| s.tokens).sum()
    }

    fn command_tokens(&self) -> usize {
        self.commands.iter().map(|s| s.tokens).sum()
    }

    /// Tiered compaction. Only ever drops from the oldest end.
    fn compact(&mut self, config: &ContextConfig) -> Compaction {
        let mut done = Compaction::default();

        let command_tokens = self.command_tokens();
        if self.dialogue_tokens() + command_tokens > config.budget_tokens / 2 {
            let target = command_tokens / 2;
            let mut current = command_tokens;
            while current > target && self.commands.len() > 1 {
                if let Some(front) = self.commands.pop_front() {
                    current = current.saturating_sub(front.tokens);
                    done.commands_dropped += 1;
                }
            }
        }

        if self.dialogue_tokens() > config.budget_tokens / 3
            && self.dialogue.len() > config.dialogue_floor
        {
            let excess = self.dialogue.len() - config.dialogue_floor;
            self.dialogue.drain(..excess);
            let message_excess = self.messages.len().saturating_sub(config.dialogue_floor);
            self.messages.drain(..message_excess);
            done.dialogue_dropped = excess;
        }

        done
    }
}

/// Dialogue log, command-output log and planner message list under one
/// token budget.
///
/// Appends and compactions each run to completion under a single write
/// guard. New entries are also broadcast to live listeners.
pub struct ContextStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<LogEntry>,
    config: ContextConfig,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl ContextStore {
    /// Create an empty store with the given budget policy.
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner::default()),
            sender,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a dialogue entry and its planner message, then compact.
    pub fn append_dialogue(&self, role: Role, text: impl Into<String>) {
        let entry = DialogueEntry::new(role, text);
        let tokens = entry.approx_tokens(self.config.chars_per_token);

        let mut inner = self.write();
        inner.messages.push_back(ChatMessage::from(&entry));
        // Sent under the guard so listeners see the stored order.
        let _ = self.sender.send(LogEntry::Dialogue(entry.clone()));
        inner.dialogue.push_back(Stored { entry, tokens });
        self.compact_locked(&mut inner);
    }

    /// Append an executed command with its combined output, then compact.
    pub fn append_command_result(
        &self,
        command: impl Into<String>,
        output: impl Into<String>,
        exit_code: i32,
    ) {
        let entry = CommandLogEntry::new(command, output, exit_code);
        let tokens = entry.approx_tokens(self.config.chars_per_token);

        let mut inner = self.write();
        let _ = self.sender.send(LogEntry::Command(entry.clone()));
        inner.commands.push_back(Stored { entry, tokens });
        self.compact_locked(&mut inner);
    }

    fn compact_locked(&self, inner: &mut Inner) {
        let done = inner.compact(&self.config);
        if done != Compaction::default() {
            tracing::debug!(
                commands_dropped = done.commands_dropped,
                dialogue_dropped = done.dialogue_dropped,
                dialogue_tokens = inner.dialogue_tokens(),
                command_tokens = inner.command_tokens(),
                "Compacted context"
            );
        }
    }

    /// Current occupancy, recomputed from the logs.
    #[must_use]
    pub fn stats(&self) -> ContextStats {
        let inner = self.read();
        let dialogue_tokens = inner.dialogue_tokens();
        let command_tokens = inner.command_tokens();
        let total_tokens = dialogue_tokens + command_tokens;
        let budget_tokens = self.config.budget_tokens;
        #[allow(clippy::cast_precision_loss)]
        let percent_used = if budget_tokens > 0 {
            total_tokens as f64 / budget_tokens as f64 * 100.0
        } else {
            100.0
        };
        ContextStats {
            dialogue_tokens,
            command_tokens,
            total_tokens,
            budget_tokens,
            percent_used,
        }
    }

    /// Reset both logs and the message list.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.dialogue.clear();
        inner.messages.clear();
        inner.commands.clear();
    }

    /// Snapshot of the planner message list.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read().messages.iter().cloned().collect()
    }

    /// Snapshot of the dialogue log.
    #[must_use]
    pub fn dialogue(&self) -> Vec<DialogueEntry> {
        self.read().dialogue.iter().map(|s| s.entry.clone()).collect()
    }

    /// Snapshot of the command log.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandLogEntry> {
        self.read().commands.iter().map(|s| s.entry.clone()).collect()
    }

    /// Durable text form of the dialogue log.
    #[must_use]
    pub fn render_dialogue(&self) -> String {
        render_blocks(self.read().dialogue.iter().map(|s| s.entry.render()))
    }

    /// Durable text form of the command log.
    #[must_use]
    pub fn render_commands(&self) -> String {
        render_blocks(self.read().commands.iter().map(|s| s.entry.render()))
    }

    /// Get a receiver for entries appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(budget: usize) -> ContextStore {
        ContextStore::new(ContextConfig::default().with_budget(budget))
    }

    /// Text worth exactly `tokens` estimated tokens.
    fn text(tokens: usize) -> String {
        "x".repeat(tokens * DEFAULT_CHARS_PER_TOKEN)
    }

    fn seed(store: &ContextStore, dialogue: &[usize], commands: &[usize]) {
        let mut inner = store.write();
        for &tokens in dialogue {
            let entry = DialogueEntry::new(Role::User, text(tokens));
            inner.messages.push_back(ChatMessage::from(&entry));
            inner.dialogue.push_back(Stored { entry, tokens });
        }
        for &tokens in commands {
            let entry = CommandLogEntry::new("", text(tokens), 0);
            inner.commands.push_back(Stored { entry, tokens });
        }
    }

    #[test]
    fn appends_are_ordered_and_counted() {
        let store = store(100_000);
        store.append_dialogue(Role::User, "check disk");
        store.append_dialogue(Role::Assistant, "running df");
        store.append_command_result("df -h", "/dev/sda1 50%", 0);

        let dialogue = store.dialogue();
        assert_eq!(dialogue.len(), 2);
        assert_eq!(dialogue[0].text, "check disk");
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[1].role, Role::Assistant);

        let commands = store.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].success());

        let stats = store.stats();
        assert_eq!(stats.total_tokens, stats.dialogue_tokens + stats.command_tokens);
        assert!(stats.percent_used > 0.0);
        assert!(!stats.is_over_budget());
    }

    #[test]
    fn overflow_halves_command_log_then_trims_dialogue_to_floor() {
        let store = store(1000);
        // 30 dialogue entries of 20 tokens (600) and 5 commands of 100 (500).
        seed(&store, &[20; 30], &[100; 5]);

        let mut inner = store.write();
        let done = inner.compact(&store.config);
        drop(inner);

        let stats = store.stats();
        assert!(stats.command_tokens <= 250);
        assert_eq!(done.commands_dropped, 3);
        assert_eq!(store.dialogue().len(), DEFAULT_DIALOGUE_FLOOR);
        assert_eq!(store.messages().len(), DEFAULT_DIALOGUE_FLOOR);
        assert_eq!(stats.dialogue_tokens, 400);
    }

    #[test]
    fn dialogue_under_a_third_is_left_alone() {
        let store = store(1000);
        seed(&store, &[10; 30], &[100; 5]);

        let mut inner = store.write();
        let done = inner.compact(&store.config);
        drop(inner);

        assert_eq!(done.dialogue_dropped, 0);
        assert_eq!(store.dialogue().len(), 30);
    }

    #[test]
    fn command_log_never_drops_its_last_entry() {
        let store = store(10);
        store.append_command_result("cat huge.log", text(500), 0);
        store.append_command_result("cat bigger.log", text(900), 0);

        let commands = store.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "cat bigger.log");
    }

    #[test]
    fn compaction_never_increases_command_tokens() {
        let store = store(400);
        for i in 0..40 {
            let command = format!("cmd{i}");
            let added = CommandLogEntry::new(command.as_str(), text(30), 0)
                .approx_tokens(DEFAULT_CHARS_PER_TOKEN);
            let before = store.stats().command_tokens;
            store.append_command_result(command, text(30), 0);
            assert!(store.stats().command_tokens <= before + added);
            assert!(!store.commands().is_empty());
        }
    }

    #[test]
    fn dialogue_never_drops_below_floor_and_messages_follow() {
        let store = store(100);
        for i in 0..60 {
            store.append_dialogue(Role::User, format!("{i}: {}", text(10)));
            let len = store.dialogue().len();
            assert!(len >= DEFAULT_DIALOGUE_FLOOR.min(i + 1));
            assert_eq!(store.messages().len(), len);
        }
        let dialogue = store.dialogue();
        assert_eq!(dialogue.len(), DEFAULT_DIALOGUE_FLOOR);
        assert!(dialogue.last().unwrap().text.starts_with("59:"));
        assert!(dialogue[0].text.starts_with("40:"));
    }

    #[test]
    fn clear_resets_everything() {
        let store = store(1000);
        store.append_dialogue(Role::User, "hello");
        store.append_command_result("true", "", 0);
        store.clear();

        assert!(store.dialogue().is_empty());
        assert!(store.messages().is_empty());
        assert!(store.commands().is_empty());
        assert_eq!(store.stats().total_tokens, 0);
    }

    #[test]
    fn renders_durable_blocks() {
        let store = store(100_000);
        store.append_command_result("true", "", 0);
        store.append_command_result("false", "", 1);
        let rendered = store.render_commands();
        assert!(rendered.contains("✓ $ true"));
        assert!(rendered.contains("✗ $ false"));
        assert!(rendered.contains(crate::log_entry::LOG_DELIMITER));
    }

    #[tokio::test]
    async fn subscribers_see_new_entries() {
        let store = store(100_000);
        let mut rx = store.subscribe();
        store.append_dialogue(Role::User, "status?");
        store.append_command_result("uptime", "up 3 days", 0);

        assert!(matches!(rx.recv().await.unwrap(), LogEntry::Dialogue(d) if d.text == "status?"));
        assert!(matches!(rx.recv().await.unwrap(), LogEntry::Command(c) if c.command == "uptime"));
    }

    #[test]
    fn concurrent_appends_broadcast_in_stored_order() {
        let store = store(1_000_000);
        let mut rx = store.subscribe();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..50 {
                        store.append_dialogue(Role::User, format!("{worker}-{i}"));
                    }
                });
            }
        });

        let mut seen = Vec::new();
        while let Ok(LogEntry::Dialogue(entry)) = rx.try_recv() {
            seen.push(entry.text);
        }
        let stored: Vec<String> = store.dialogue().into_iter().map(|e| e.text).collect();
        assert_eq!(seen.len(), 200);
        assert_eq!(seen, stored);
    }
}
