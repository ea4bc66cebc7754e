//! Transport seam between `RemoteSession` and the SSH library.

use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::SessionConfig;

/// Transport-level error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Authentication rejected for {0}")]
    AuthRejected(String),
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Event read from an exec channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(i32),
    /// Remote process was killed by the named signal.
    ExitSignal(String),
    Eof,
}

/// Signals the session sends to a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSignal {
    Interrupt,
    Kill,
}

/// One remote process on an open session.
#[async_trait]
pub trait ExecChannel: Send {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError>;

    async fn close_stdin(&mut self) -> Result<(), TransportError>;

    /// Next event, or `None` once the channel is closed.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn signal(&mut self, signal: RemoteSignal) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An authenticated transport to one host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a channel running `command`.
    async fn open_exec(&self, command: &str) -> Result<Box<dyn ExecChannel>, TransportError>;

    /// True once the remote side or the network has dropped the transport.
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Establishes connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SessionConfig) -> Result<Box<dyn Connection>, TransportError>;
}

/// Scripted in-memory transport for tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use tokio::sync::Notify;

    use super::*;

    /// What a channel does once its scripted events run out.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Then {
        /// Report closure.
        End,
        /// Never produce another event.
        Hang,
        /// Hang until interrupted, then exit 130.
        HangUntilInterrupt,
        /// Hang and ignore every signal.
        HangIgnoringSignals,
    }

    #[derive(Debug, Clone)]
    pub struct Script {
        pub events: Vec<ChannelEvent>,
        pub then: Then,
    }

    impl Script {
        pub fn exits(stdout: &str, stderr: &str, code: i32) -> Self {
            let mut events = Vec::new();
            if !stdout.is_empty() {
                events.push(ChannelEvent::Stdout(stdout.as_bytes().to_vec()));
            }
            if !stderr.is_empty() {
                events.push(ChannelEvent::Stderr(stderr.as_bytes().to_vec()));
            }
            events.push(ChannelEvent::ExitStatus(code));
            events.push(ChannelEvent::Eof);
            Self {
                events,
                then: Then::End,
            }
        }

        pub fn streams(chunks: &[&str], then: Then) -> Self {
            Self {
                events: chunks
                    .iter()
                    .map(|c| ChannelEvent::Stdout(c.as_bytes().to_vec()))
                    .collect(),
                then,
            }
        }
    }

    /// Everything a channel was asked to do.
    #[derive(Debug, Default, Clone)]
    pub struct ExecRecord {
        pub command: String,
        pub stdin: Vec<u8>,
        pub stdin_closed: bool,
        pub signals: Vec<RemoteSignal>,
        pub closed: bool,
    }

    #[derive(Default)]
    pub struct FakeState {
        scripts: Mutex<VecDeque<Script>>,
        pub execs: Mutex<Vec<Arc<Mutex<ExecRecord>>>>,
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
        pub remote_closed: AtomicBool,
        pub refuse: AtomicBool,
    }

    impl FakeState {
        pub fn push(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        pub fn exec(&self, index: usize) -> ExecRecord {
            self.execs.lock().unwrap()[index].lock().unwrap().clone()
        }

        pub fn exec_count(&self) -> usize {
            self.execs.lock().unwrap().len()
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub state: Arc<FakeState>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            config: &SessionConfig,
        ) -> Result<Box<dyn Connection>, TransportError> {
            if self.state.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::AuthRejected(config.username.clone()));
            }
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            self.state.remote_closed.store(false, Ordering::SeqCst);
            Ok(Box::new(FakeConnection {
                state: Arc::clone(&self.state),
                closed: AtomicBool::new(false),
            }))
        }
    }

    struct FakeConnection {
        state: Arc<FakeState>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn open_exec(&self, command: &str) -> Result<Box<dyn ExecChannel>, TransportError> {
            let script = self
                .state
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Script::exits("", "", 0));
            let record = Arc::new(Mutex::new(ExecRecord {
                command: command.to_owned(),
                ..ExecRecord::default()
            }));
            self.state.execs.lock().unwrap().push(Arc::clone(&record));
            Ok(Box::new(FakeChannel {
                events: script.events.into(),
                then: script.then,
                record,
                interrupted: Arc::new(Notify::new()),
                finished: false,
            }))
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst) || self.state.remote_closed.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeChannel {
        events: VecDeque<ChannelEvent>,
        then: Then,
        record: Arc<Mutex<ExecRecord>>,
        interrupted: Arc<Notify>,
        finished: bool,
    }

    #[async_trait]
    impl ExecChannel for FakeChannel {
        async fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.record.lock().unwrap().stdin.extend_from_slice(data);
            Ok(())
        }

        async fn close_stdin(&mut self) -> Result<(), TransportError> {
            self.record.lock().unwrap().stdin_closed = true;
            Ok(())
        }

        async fn next_event(&mut self) -> Option<ChannelEvent> {
            tokio::task::yield_now().await;
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            match self.then {
                Then::End => None,
                Then::Hang | Then::HangIgnoringSignals => std::future::pending().await,
                Then::HangUntilInterrupt => {
                    self.interrupted.notified().await;
                    self.finished = true;
                    Some(ChannelEvent::ExitStatus(130))
                }
            }
        }

        async fn signal(&mut self, signal: RemoteSignal) -> Result<(), TransportError> {
            self.record.lock().unwrap().signals.push(signal);
            if self.then == Then::HangUntilInterrupt {
                self.interrupted.notify_one();
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.record.lock().unwrap().closed = true;
            Ok(())
        }
    }
}
