//! Remote session: one transport, many commands.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use remote_ops_core::{
    CommandRunner, ExecOptions, ExecutionResult, NotConnected, OutputChunk, StreamingExecution,
    result::{FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE},
};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use zeroize::Zeroizing;

use crate::{
    SessionConfig,
    elevation::{self, ELEVATION_NOT_CONFIGURED},
    transport::{ChannelEvent, Connection, Connector, ExecChannel, RemoteSignal, TransportError},
};

/// How long a cancelled stream may keep producing before it is closed.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// How often a live transport is checked for remote closure.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

const STREAM_BUFFER: usize = 256;

/// Connection state, observable through `RemoteSession::subscribe_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// Last connection attempt failed. Counts as not connected.
    Failed(String),
}

impl SessionState {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: TransportError,
    },
    #[error("Failed to close session: {0}")]
    Disconnect(#[source] TransportError),
}

struct Active {
    connection: Box<dyn Connection>,
    endpoint: String,
}

struct Live {
    active: Arc<Active>,
    /// Dropping this stops the closure monitor.
    _monitor_stop: oneshot::Sender<()>,
}

/// Remote shell session over a pluggable transport.
///
/// At most one transport is live. Every execution yields an
/// `ExecutionResult` unless no transport is live.
pub struct RemoteSession {
    connector: Arc<dyn Connector>,
    slot: Mutex<Option<Live>>,
    state: Arc<watch::Sender<SessionState>>,
}

impl RemoteSession {
    #[must_use]
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            slot: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Open and authenticate a transport, replacing any live one.
    ///
    /// # Errors
    /// Returns error if the host is unreachable or rejects the credential. The
    /// session is then in `SessionState::Failed`.
    pub async fn connect(&self, config: &SessionConfig) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.take() {
            tracing::debug!(endpoint = %old.active.endpoint, "Closing previous session");
            if let Err(e) = old.active.connection.close().await {
                tracing::warn!(endpoint = %old.active.endpoint, error = %e, "Failed to close previous session");
            }
        }

        let endpoint = config.endpoint();
        let connection = match self.connector.connect(config).await {
            Ok(connection) => connection,
            Err(source) => {
                tracing::error!(endpoint = %endpoint, error = %source, "Connection failed");
                self.state.send_replace(SessionState::Failed(source.to_string()));
                return Err(SessionError::Connection { endpoint, source });
            }
        };

        let active = Arc::new(Active {
            connection,
            endpoint,
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        spawn_monitor(Arc::clone(&active), Arc::clone(&self.state), stop_rx);

        tracing::info!(endpoint = %active.endpoint, "Connected");
        *slot = Some(Live {
            active,
            _monitor_stop: stop_tx,
        });
        self.state.send_replace(SessionState::Connected);
        Ok(())
    }

    /// Close the live transport. Closing an already closed session is a no-op.
    ///
    /// # Errors
    /// Returns error if the transport fails to close cleanly. The session is
    /// disconnected either way.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let live = self.slot.lock().await.take();
        self.state.send_replace(SessionState::Disconnected);
        let Some(live) = live else {
            return Ok(());
        };
        tracing::info!(endpoint = %live.active.endpoint, "Disconnecting");
        live.active
            .connection
            .close()
            .await
            .map_err(SessionError::Disconnect)
    }

    /// Run `commands` in order, stopping after the first non-zero exit.
    ///
    /// # Errors
    /// Returns error if the session is not connected.
    pub async fn execute_many<S: AsRef<str> + Sync>(
        &self,
        commands: &[S],
        options: ExecOptions<'_>,
    ) -> Result<Vec<ExecutionResult>, NotConnected> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let result = self.execute(command.as_ref(), options).await?;
            let failed = !result.is_success();
            results.push(result);
            if failed {
                break;
            }
        }
        Ok(results)
    }

    /// Live transport, clearing it if the remote side has gone away.
    async fn live(&self) -> Result<Arc<Active>, NotConnected> {
        let mut slot = self.slot.lock().await;
        let Some(live) = slot.as_ref() else {
            return Err(NotConnected);
        };
        if live.active.connection.is_closed() {
            tracing::warn!(endpoint = %live.active.endpoint, "Session closed by remote host");
            *slot = None;
            self.state.send_replace(SessionState::Disconnected);
            return Err(NotConnected);
        }
        Ok(Arc::clone(&live.active))
    }

    /// Open a channel for `command` and send its stdin payload.
    ///
    /// The inner error is a result to report instead of running.
    async fn open(
        &self,
        active: &Arc<Active>,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<Result<Box<dyn ExecChannel>, ExecutionResult>, NotConnected> {
        let mut channel = match active.connection.open_exec(command).await {
            Ok(channel) => channel,
            Err(e) if active.connection.is_closed() => {
                tracing::warn!(endpoint = %active.endpoint, error = %e, "Session lost while opening channel");
                self.forget(active).await;
                return Err(NotConnected);
            }
            Err(e) => {
                tracing::error!(endpoint = %active.endpoint, error = %e, "Failed to open channel");
                return Ok(Err(ExecutionResult::failure(format!("Failed to open channel: {e}"))));
            }
        };

        if let Some(data) = stdin {
            if let Err(e) = channel.write_stdin(data).await {
                let _ = channel.close().await;
                return Ok(Err(ExecutionResult::failure(format!("Failed to write to command: {e}"))));
            }
        }
        if let Err(e) = channel.close_stdin().await {
            tracing::debug!(error = %e, "Failed to close command stdin");
        }
        Ok(Ok(channel))
    }

    async fn forget(&self, active: &Arc<Active>) {
        let mut slot = self.slot.lock().await;
        if slot
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(&live.active, active))
        {
            *slot = None;
            self.state.send_replace(SessionState::Disconnected);
        }
    }
}

#[async_trait]
impl CommandRunner for RemoteSession {
    async fn execute(
        &self,
        command: &str,
        options: ExecOptions<'_>,
    ) -> Result<ExecutionResult, NotConnected> {
        let active = self.live().await?;
        let (command, stdin) = match prepare(command, &options) {
            Prepared::Run { command, stdin } => (command, stdin),
            Prepared::Refused(result) => return Ok(result),
        };

        let mut channel = match self.open(&active, &command, stdin.as_deref().map(Vec::as_slice)).await? {
            Ok(channel) => channel,
            Err(result) => return Ok(result),
        };

        let mut out = Collected::default();
        let finished = tokio::time::timeout(options.timeout, out.read_all(channel.as_mut())).await;
        if finished.is_err() {
            tracing::warn!(timeout = ?options.timeout, "Command timed out");
            if let Err(e) = channel.signal(RemoteSignal::Kill).await {
                tracing::debug!(error = %e, "Failed to signal timed out command");
            }
            let _ = channel.close().await;
            return Ok(out.into_timed_out(options.timeout));
        }
        let _ = channel.close().await;
        Ok(out.into_result(true))
    }

    async fn execute_streaming(
        &self,
        command: &str,
        options: ExecOptions<'_>,
    ) -> Result<StreamingExecution, NotConnected> {
        let active = self.live().await?;
        let (command, stdin) = match prepare(command, &options) {
            Prepared::Run { command, stdin } => (command, stdin),
            Prepared::Refused(result) => return Ok(StreamingExecution::completed(result)),
        };

        let channel = match self.open(&active, &command, stdin.as_deref().map(Vec::as_slice)).await? {
            Ok(channel) => channel,
            Err(result) => return Ok(StreamingExecution::completed(result)),
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(pump(channel, chunk_tx, cancel_rx, done_tx));
        Ok(StreamingExecution::new(chunk_rx, cancel_tx, done_rx))
    }

    async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::warn!(error = %e, "Failed to disconnect cleanly");
        }
    }
}

enum Prepared {
    Run {
        command: String,
        stdin: Option<Zeroizing<Vec<u8>>>,
    },
    Refused(ExecutionResult),
}

fn prepare(command: &str, options: &ExecOptions<'_>) -> Prepared {
    if !options.elevate {
        return Prepared::Run {
            command: command.to_owned(),
            stdin: None,
        };
    }
    let Some(credential) = options.credential.filter(|c| !c.is_empty()) else {
        tracing::warn!("Elevated command refused: no elevation credential");
        return Prepared::Refused(ExecutionResult::failure(ELEVATION_NOT_CONFIGURED));
    };
    match elevation::wrap(command, credential) {
        Ok(wrapped) => Prepared::Run {
            command: wrapped.command,
            stdin: Some(wrapped.stdin),
        },
        Err(e) => Prepared::Refused(ExecutionResult::failure(e.to_string())),
    }
}

/// Forward channel events until the command ends or is cancelled.
async fn pump(
    mut channel: Box<dyn ExecChannel>,
    chunk_tx: mpsc::Sender<OutputChunk>,
    mut cancel_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<ExecutionResult>,
) {
    let mut out = Collected::default();
    let mut watch_cancel = true;

    let cancelled = loop {
        tokio::select! {
            biased;
            signal = &mut cancel_rx, if watch_cancel => {
                if signal.is_ok() {
                    break true;
                }
                // Handle dropped without cancelling.
                watch_cancel = false;
            }
            event = channel.next_event() => {
                let Some(event) = event else {
                    break false;
                };
                if let Some(chunk) = out.push(event) {
                    let _ = chunk_tx.send(chunk).await;
                }
            }
        }
    };

    let result = if cancelled {
        drop(chunk_tx);
        if let Err(e) = channel.signal(RemoteSignal::Interrupt).await {
            tracing::debug!(error = %e, "Failed to interrupt streaming command");
        }
        let drained = tokio::time::timeout(CANCEL_GRACE, async {
            while channel.next_event().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::debug!("Streaming command ignored interrupt, closing channel");
        }
        ExecutionResult::interrupted(lossy(&out.stdout), lossy(&out.stderr))
    } else {
        out.into_result(false)
    };

    let _ = channel.close().await;
    let _ = done_tx.send(result);
}

#[derive(Default)]
struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    signal: Option<String>,
}

impl Collected {
    fn push(&mut self, event: ChannelEvent) -> Option<OutputChunk> {
        match event {
            ChannelEvent::Stdout(data) => {
                self.stdout.extend_from_slice(&data);
                Some(OutputChunk::Stdout(lossy(&data)))
            }
            ChannelEvent::Stderr(data) => {
                self.stderr.extend_from_slice(&data);
                Some(OutputChunk::Stderr(lossy(&data)))
            }
            ChannelEvent::ExitStatus(code) => {
                self.exit_code = Some(code);
                None
            }
            ChannelEvent::ExitSignal(name) => {
                self.signal = Some(name);
                None
            }
            ChannelEvent::Eof => None,
        }
    }

    async fn read_all(&mut self, channel: &mut dyn ExecChannel) {
        while let Some(event) = channel.next_event().await {
            self.push(event);
        }
    }

    fn into_result(self, trim: bool) -> ExecutionResult {
        let mut stdout = lossy(&self.stdout);
        let mut stderr = lossy(&self.stderr);
        if trim {
            trim_trailing_newlines(&mut stdout);
            trim_trailing_newlines(&mut stderr);
        }
        if let Some(signal) = self.signal {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("Terminated by signal {signal}"));
        }
        ExecutionResult::new(stdout, stderr, self.exit_code.unwrap_or(FAILURE_EXIT_CODE))
    }

    fn into_timed_out(self, timeout: Duration) -> ExecutionResult {
        let mut stderr = lossy(&self.stderr);
        trim_trailing_newlines(&mut stderr);
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        stderr.push_str(&format!("Command timed out after {}s", timeout.as_secs_f32()));
        let mut stdout = lossy(&self.stdout);
        trim_trailing_newlines(&mut stdout);
        ExecutionResult::new(stdout, stderr, TIMEOUT_EXIT_CODE)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn trim_trailing_newlines(text: &mut String) {
    let len = text.trim_end_matches(['\n', '\r']).len();
    text.truncate(len);
}

fn spawn_monitor(
    active: Arc<Active>,
    state: Arc<watch::Sender<SessionState>>,
    mut stop: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => return,
                _ = ticker.tick() => {
                    if active.connection.is_closed() {
                        tracing::warn!(endpoint = %active.endpoint, "Session closed by remote host");
                        state.send_replace(SessionState::Disconnected);
                        return;
                    }
                }
            }
        }
    });
}
