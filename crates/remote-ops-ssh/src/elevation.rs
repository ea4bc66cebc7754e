//! Privilege elevation wrapper.
//!
//! The command runs under `sudo -S` and the credential travels on the remote
//! process's standard input. It never appears in the command line, so it is
//! invisible to other users listing processes on the host.

use remote_ops_core::ElevationCredential;
use thiserror::Error;
use zeroize::Zeroizing;

/// Shown when elevation is requested but no credential is held.
pub const ELEVATION_NOT_CONFIGURED: &str = "This command requires elevated privileges but no \
     elevation credential is configured. Reconnect and supply one to run privileged commands.";

/// Elevation error.
#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("Elevation credential contains a line break and cannot be sent on standard input")]
    UnframeableCredential,
    #[error("Failed to quote command for elevation: {0}")]
    Quote(#[from] shlex::QuoteError),
}

/// Wrapped command line plus the bytes to write on its standard input.
pub struct ElevatedCommand {
    pub command: String,
    pub stdin: Zeroizing<Vec<u8>>,
}

/// Wrap `command` for non-interactive `sudo`.
///
/// `-k` makes sudo ignore cached timestamps so it always consumes the
/// credential line, and the inner shell detaches stdin before running the
/// command so a passwordless sudo can never hand the credential to it.
///
/// # Errors
/// Returns error if the credential cannot be framed as one stdin line or the
/// command contains a NUL byte.
pub fn wrap(command: &str, credential: &ElevationCredential) -> Result<ElevatedCommand, ElevationError> {
    let secret = credential.expose();
    if secret.contains(['\n', '\r']) {
        return Err(ElevationError::UnframeableCredential);
    }

    let script = format!("exec 0</dev/null\n{command}");
    let quoted = shlex::try_quote(&script)?;

    let mut stdin = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
    stdin.extend_from_slice(secret.as_bytes());
    stdin.push(b'\n');

    Ok(ElevatedCommand {
        command: format!("sudo -S -k -p '' -- sh -c {quoted}"),
        stdin,
    })
}
