//! Structured outcome of one remote command.

use serde::{Deserialize, Serialize};

/// Exit code reported for operator-cancelled streaming commands.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Exit code reported when a one-shot command exceeds its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code used for failures that never reached a remote status.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Result of a remote command. Always populated, even on internal failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// True only for operator-cancelled streaming executions.
    #[serde(default)]
    pub aborted: bool,
}

impl ExecutionResult {
    #[must_use]
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            aborted: false,
        }
    }

    /// A failure that produced no remote output.
    #[must_use]
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self::new(String::new(), stderr, FAILURE_EXIT_CODE)
    }

    /// An operator-cancelled streaming execution.
    ///
    /// The exit code is always 130, whatever the remote side reported.
    #[must_use]
    pub fn interrupted(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            aborted: true,
            ..Self::new(stdout, stderr, INTERRUPTED_EXIT_CODE)
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, as written to the command log.
    #[must_use]
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let sep = if self.stdout.ends_with('\n') { "" } else { "\n" };
                format!("{}{sep}{}", self.stdout, self.stderr)
            }
        }
    }

    /// JSON form reported back to the planner, with the derived `success` flag.
    #[must_use]
    pub fn to_report(&self) -> serde_json::Value {
        serde_json::json!({
            "stdout": self.stdout,
            "stderr": self.stderr,
            "exit_code": self.exit_code,
            "aborted": self.aborted,
            "success": self.is_success(),
        })
    }
}
