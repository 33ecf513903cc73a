//! TCP client for the device side of a JT/T808 link.
//!
//! Thin transport over `Framed<TcpStream, Jt808Codec>` with per-operation
//! timeouts. Session logic (register, authenticate, serial numbers) lives
//! in the caller.
//!
//! # Example
//!
//! ```no_run
//! use tracklink_core::PhoneId;
//! use tracklink_network::{TcpClient, TcpClientConfig};
//! use tracklink_protocol::{Body, MessageRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = TcpClient::new(TcpClientConfig::default());
//! client.connect().await?;
//!
//! let phone = PhoneId::new("123456789012")?;
//! client.send(MessageRegistry::build(phone, 0, &Body::Heartbeat)?).await?;
//! let reply = client.recv().await?;
//! println!("{reply}");
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};
use tracklink_protocol::{HexId, Jt808Codec, Message};

#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    pub server_addr: SocketAddr,

    /// Applies separately to connect, each send and each receive.
    pub timeout: Duration,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8808)),
            timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Error)]
pub enum TcpClientError {
    #[error("No open connection")]
    NotConnected,

    #[error("Connecting to {addr} timed out after {ms}ms")]
    ConnectionTimeout { addr: SocketAddr, ms: u64 },

    #[error("No reply within {0}ms")]
    ReadTimeout(u64),

    #[error("Frame not written within {0}ms")]
    WriteTimeout(u64),

    #[error("Server {0} closed the connection")]
    ConnectionLost(SocketAddr),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tracklink_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Connection = Framed<TcpStream, Jt808Codec>;

const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct TcpClient {
    config: TcpClientConfig,
    conn: Option<Connection>,
}

impl TcpClient {
    pub fn new(config: TcpClientConfig) -> Self {
        Self { config, conn: None }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }

    /// Open the socket. An existing connection is replaced.
    pub async fn connect(&mut self) -> Result<(), TcpClientError> {
        let addr = self.config.server_addr;
        debug!(server = %addr, "Connecting");

        let stream = tokio::time::timeout(self.config.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TcpClientError::ConnectionTimeout {
                addr,
                ms: self.timeout_ms(),
            })?
            .inspect_err(|e| debug!(server = %addr, error = %e, "Connect failed"))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }

        self.conn = Some(Framed::new(stream, Jt808Codec::new()));
        info!(server = %addr, "Connected");
        Ok(())
    }

    pub async fn send(&mut self, message: Message) -> Result<(), TcpClientError> {
        let ms = self.timeout_ms();
        let timeout = self.config.timeout;
        let conn = self.conn.as_mut().ok_or(TcpClientError::NotConnected)?;
        trace!(
            message_id = %HexId(message.message_id),
            serial = message.serial,
            "tx"
        );

        match tokio::time::timeout(timeout, conn.send(message)).await {
            Ok(result) => result.map_err(|e| {
                self.conn = None;
                TcpClientError::from(e)
            }),
            Err(_) => Err(TcpClientError::WriteTimeout(ms)),
        }
    }

    /// Next well-formed message from the server.
    ///
    /// Corrupt frames are logged and skipped; the timeout covers the whole
    /// wait, not each frame.
    pub async fn recv(&mut self) -> Result<Message, TcpClientError> {
        let ms = self.timeout_ms();
        let addr = self.config.server_addr;
        let deadline = Instant::now() + self.config.timeout;
        let conn = self.conn.as_mut().ok_or(TcpClientError::NotConnected)?;

        let result = loop {
            let Ok(item) = tokio::time::timeout_at(deadline, conn.next()).await else {
                return Err(TcpClientError::ReadTimeout(ms));
            };
            match item {
                Some(Ok(Ok(message))) => {
                    trace!(
                        message_id = %HexId(message.message_id),
                        serial = message.serial,
                        "rx"
                    );
                    return Ok(message);
                }
                Some(Ok(Err(e))) => warn!(error = %e, "Skipping undecodable frame from server"),
                Some(Err(e)) => break Err(TcpClientError::Protocol(e)),
                None => break Err(TcpClientError::ConnectionLost(addr)),
            }
        };

        // Stream errors and EOF leave nothing to read from.
        debug!(server = %addr, "Dropping connection");
        self.conn = None;
        result
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Flush and shut down the socket; a no-op when not connected.
    pub async fn close(&mut self) -> Result<(), TcpClientError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        debug!(server = %self.config.server_addr, "Closing connection");

        if !matches!(tokio::time::timeout(CLOSE_TIMEOUT, conn.flush()).await, Ok(Ok(()))) {
            debug!("Pending frames not flushed before close");
        }
        let mut stream = conn.into_inner();
        match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
            Ok(result) => result?,
            Err(_) => debug!("Socket shutdown timed out"),
        }
        Ok(())
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if self.conn.is_some() {
            debug!(server = %self.config.server_addr, "Client dropped with an open connection");
        }
    }
}
