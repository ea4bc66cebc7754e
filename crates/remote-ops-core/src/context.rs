//! Execution context for a connected session.

use std::{fmt, time::Duration};

use zeroize::Zeroizing;

/// Default time a one-shot command may run before it is killed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// In-memory secret used to authorize privileged execution.
///
/// Deliberately not `Serialize` or `Clone`. The buffer is zeroed on drop and
/// formatting never prints the value.
pub struct ElevationCredential(Zeroizing<String>);

impl ElevationCredential {
    /// Wrap an operator-supplied secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Borrow the raw secret. Only the elevation wrapper should call this.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ElevationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ElevationCredential(<redacted>)")
    }
}

impl fmt::Display for ElevationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Context for one connected period.
///
/// Owns the single elevation credential slot and is handed explicitly to
/// whatever needs it instead of living on a long-lived coordinator.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Host label used in log fields.
    pub host: String,

    /// Timeout applied to one-shot commands.
    pub default_timeout: Duration,

    elevation: Option<ElevationCredential>,
}

impl ExecutionContext {
    /// Create a context for `host` with the default timeout and no credential.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            elevation: None,
        }
    }

    /// Override the one-shot command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Store the elevation credential, replacing any previous one.
    pub fn set_elevation(&mut self, credential: ElevationCredential) {
        self.elevation = Some(credential);
    }

    /// Drop the elevation credential.
    pub fn clear_elevation(&mut self) {
        self.elevation = None;
    }

    #[must_use]
    pub fn elevation(&self) -> Option<&ElevationCredential> {
        self.elevation.as_ref()
    }

    #[must_use]
    pub fn has_elevation(&self) -> bool {
        self.elevation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_is_redacted_in_formatting() {
        let cred = ElevationCredential::new("hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
        assert!(!format!("{cred}").contains("hunter2"));
        assert_eq!(cred.expose(), "hunter2");
    }

    #[test]
    fn context_debug_hides_credential() {
        let mut ctx = ExecutionContext::new("db-01");
        ctx.set_elevation(ElevationCredential::new("s3cret"));
        assert!(ctx.has_elevation());
        assert!(!format!("{ctx:?}").contains("s3cret"));

        ctx.clear_elevation();
        assert!(ctx.elevation().is_none());
    }
}
