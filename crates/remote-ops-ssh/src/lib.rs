//! Remote SSH session management.
//!
//! Provides:
//! - `RemoteSession` - One transport, one-shot / streaming / elevated execution
//! - `SessionConfig` - Host, user and exactly one credential mode
//! - Elevation wrapping and the streaming-command heuristic
//! - `RusshConnector` - Production transport built on `russh`

pub mod classify;
pub mod config;
pub mod elevation;
pub mod session;
pub mod ssh;
pub mod transport;

pub use classify::{looks_streaming, resolve_streaming};
pub use config::{ConfigError, Credential, SessionConfig};
pub use session::{RemoteSession, SessionError, SessionState};
pub use ssh::RusshConnector;
pub use transport::{ChannelEvent, Connection, Connector, ExecChannel, RemoteSignal, TransportError};
