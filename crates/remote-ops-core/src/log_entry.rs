//! Typed log entries and their durable text form.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Line separating blocks in both durable log files.
pub const LOG_DELIMITER: &str = "----------------------------------------";

/// Default characters-per-token ratio for the token estimate.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Cheap token estimate proportional to text length.
#[must_use]
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

/// Speaker of a dialogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The operator.
    User,
    /// The planner.
    Assistant,
    /// Command outcomes reported back to the planner.
    Tool,
    /// Markers written by the system itself.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::Tool => "Tool",
            Self::System => "System",
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One operator/planner dialogue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueEntry {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,
}

impl DialogueEntry {
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn approx_tokens(&self, chars_per_token: usize) -> usize {
        estimate_tokens(&self.text, chars_per_token)
    }

    /// `[<timestamp>] <Role>:\n<text>`
    #[must_use]
    pub fn render(&self) -> String {
        format!("[{}] {}:\n{}", format_timestamp(&self.timestamp), self.role, self.text)
    }
}

/// One executed command and what it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLogEntry {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub output: String,
    pub exit_code: i32,
}

impl CommandLogEntry {
    #[must_use]
    pub fn new(command: impl Into<String>, output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            output: output.into(),
            exit_code,
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `[<timestamp>] <✓|✗> $ <command>\nExit: <code>\n<output>`
    #[must_use]
    pub fn render(&self) -> String {
        let mark = if self.success() { '✓' } else { '✗' };
        format!(
            "[{}] {mark} $ {}\nExit: {}\n{}",
            format_timestamp(&self.timestamp),
            self.command,
            self.exit_code,
            self.output
        )
    }

    /// Command text and output both count toward the estimate.
    #[must_use]
    pub fn approx_tokens(&self, chars_per_token: usize) -> usize {
        (self.command.chars().count() + self.output.chars().count())
            .div_ceil(chars_per_token.max(1))
    }
}

/// Entry in either log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Dialogue(DialogueEntry),
    Command(CommandLogEntry),
}

/// Machine-readable mirror of a dialogue entry for the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&DialogueEntry> for ChatMessage {
    fn from(entry: &DialogueEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.text.clone(),
        }
    }
}

/// Join rendered blocks with the delimiter line.
pub fn render_blocks<I>(blocks: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut out = String::new();
    for (i, block) in blocks.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str(LOG_DELIMITER);
            out.push('\n');
        }
        out.push_str(&block);
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abc", 4), 1);
        assert_eq!(estimate_tokens("abcdefgh", 4), 2);
        assert_eq!(estimate_tokens("abcdefghi", 4), 3);
    }

    #[test]
    fn dialogue_block_format() {
        let entry = DialogueEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            role: Role::User,
            text: "restart nginx".to_string(),
        };
        assert_eq!(entry.render(), "[2026-03-01T12:00:00.000Z] User:\nrestart nginx");
    }

    #[test]
    fn command_block_format() {
        let mut entry = CommandLogEntry::new("systemctl restart nginx", "", 0);
        entry.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            entry.render(),
            "[2026-03-01T12:00:00.000Z] ✓ $ systemctl restart nginx\nExit: 0\n"
        );

        let failed = CommandLogEntry::new("false", "nope", 1);
        assert!(failed.render().contains("✗ $ false\nExit: 1\nnope"));
    }

    #[test]
    fn blocks_are_delimited() {
        let rendered = render_blocks(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rendered, format!("a\n{LOG_DELIMITER}\nb\n"));
        assert_eq!(render_blocks(Vec::<String>::new()), "");
    }
}
