//! `russh`-backed transport.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{
    ChannelMsg, Disconnect, Sig,
    client::{self, Handle, Msg},
    keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey, decode_secret_key},
};

use crate::{
    Credential, SessionConfig,
    transport::{ChannelEvent, Connection, Connector, ExecChannel, RemoteSignal, TransportError},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSH extended data type for stderr.
const EXTENDED_STDERR: u32 = 1;

/// Opens SSH connections with `russh`.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self {
            config: Arc::new(client::Config {
                keepalive_interval: Some(KEEPALIVE_INTERVAL),
                ..client::Config::default()
            }),
        }
    }
}

impl RusshConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Accepts any host key and records its fingerprint.
struct ClientHandler {
    endpoint: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        // TODO: verify against a known_hosts store once one is configurable.
        tracing::info!(
            endpoint = %self.endpoint,
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "Accepting server host key"
        );
        Ok(true)
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<Box<dyn Connection>, TransportError> {
        let endpoint = config.endpoint();
        let handler = ClientHandler {
            endpoint: endpoint.clone(),
        };

        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(Arc::clone(&self.config), (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "SSH handshake timed out"))??;

        let auth = match &config.credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(config.username.as_str(), password.as_str())
                    .await?
            }
            Credential::PrivateKey { key, passphrase } => {
                let text = std::str::from_utf8(key)
                    .map_err(|_| TransportError::InvalidKey("key is not UTF-8 text".into()))?;
                let key = decode_secret_key(text, passphrase.as_ref().map(|p| p.as_str()))
                    .map_err(|e| TransportError::InvalidKey(e.to_string()))?;
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        config.username.as_str(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?
            }
        };

        if !auth.success() {
            return Err(TransportError::AuthRejected(endpoint));
        }

        tracing::debug!(endpoint = %endpoint, "SSH session authenticated");
        Ok(Box::new(RusshConnection { handle }))
    }
}

struct RusshConnection {
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl Connection for RusshConnection {
    async fn open_exec(&self, command: &str) -> Result<Box<dyn ExecChannel>, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        Ok(Box::new(RusshChannel { channel }))
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

struct RusshChannel {
    channel: russh::Channel<Msg>,
}

#[async_trait]
impl ExecChannel for RusshChannel {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.channel.data(data).await?;
        Ok(())
    }

    async fn close_stdin(&mut self) -> Result<(), TransportError> {
        self.channel.eof().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.channel.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext } if ext == EXTENDED_STDERR => {
                    ChannelEvent::Stderr(data.to_vec())
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    ChannelEvent::ExitStatus(i32::try_from(exit_status).unwrap_or(i32::MAX))
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    ChannelEvent::ExitSignal(format!("{signal_name:?}"))
                }
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => return None,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn signal(&mut self, signal: RemoteSignal) -> Result<(), TransportError> {
        let sig = match signal {
            RemoteSignal::Interrupt => Sig::INT,
            RemoteSignal::Kill => Sig::KILL,
        };
        self.channel.signal(sig).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.channel.close().await?;
        Ok(())
    }
}
