//! TCP server for JT/T808 devices.
//!
//! # Architecture
//!
//! ```text
//! Device A ┐                         ┌─> DeviceSession ─┐
//!          ├──> ProtocolServer ──────┤                  ├──> EventSink
//! Device B ┘        │                └─> DeviceSession ─┘
//!                   └──> SessionDirectory (phone id → connection)
//! ```
//!
//! Every accepted socket gets its own task running a [`DeviceSession`].
//! The task reads one frame, hands it to the session, writes the reply and
//! forwards the domain event, strictly in that order. The directory is the
//! only state shared between tasks.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use tracklink_network::{ProtocolServer, ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let server = ProtocolServer::bind(ServerConfig::default(), Arc::new(tx)).await?;
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//! server.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

use crate::directory::{SessionDirectory, SessionHandle};
use crate::session::{DeviceSession, SessionConfig};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tracklink_core::{
    PhoneId,
    constants::{
        DEFAULT_HEARTBEAT_SECS, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_SUBPACKAGES,
        DEFAULT_SUBPACKAGE_TIMEOUT_SECS,
    },
};
use tracklink_protocol::{DomainEvent, HexId, Jt808Codec, StatusReason, codec::DEFAULT_MAX_FRAME_SIZE};

/// How long a new registration waits for the connection it superseded to
/// emit its offline event.
const SUPERSEDE_GRACE: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    /// Maximum number of simultaneous connections
    pub max_connections: usize,

    /// Silence after which a session is closed
    pub idle_timeout: Duration,

    /// Heartbeat period devices are expected to use
    pub heartbeat_period: Duration,

    pub subpackage_timeout: Duration,
    pub max_subpackages: u16,

    /// Largest escaped frame accepted on a connection
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8808)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            heartbeat_period: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            subpackage_timeout: Duration::from_secs(DEFAULT_SUBPACKAGE_TIMEOUT_SECS),
            max_subpackages: DEFAULT_MAX_SUBPACKAGES,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// # Errors
    /// Returns `ServerError::Config` if the idle timeout is shorter than two
    /// heartbeat periods or a limit is zero.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.idle_timeout < self.heartbeat_period * 2 {
            return Err(ServerError::Config(format!(
                "idle timeout {:?} must be at least twice the heartbeat period {:?}",
                self.idle_timeout, self.heartbeat_period
            )));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be > 0".into()));
        }
        if self.max_subpackages == 0 {
            return Err(ServerError::Config("max_subpackages must be > 0".into()));
        }
        if self.max_frame_size == 0 {
            return Err(ServerError::Config("max_frame_size must be > 0".into()));
        }
        Ok(())
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            subpackage_timeout: self.subpackage_timeout,
            max_subpackages: self.max_subpackages,
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receiver of domain events produced by sessions.
///
/// Must not block; the connection task calls it inline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

impl EventSink for mpsc::UnboundedSender<DomainEvent> {
    fn emit(&self, event: DomainEvent) {
        if self.send(event).is_err() {
            warn!("Event receiver dropped, discarding event");
        }
    }
}

struct Shared {
    config: ServerConfig,
    directory: SessionDirectory,
    sink: Arc<dyn EventSink>,
    active: AtomicUsize,
}

/// Decrements the live connection count when the task ends.
struct ConnectionGuard(Arc<Shared>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ProtocolServer {
    listener: TcpListener,
    shared: Arc<Shared>,
    tracker: TaskTracker,
    next_connection_id: AtomicU64,
}

impl ProtocolServer {
    /// # Errors
    /// Returns an error if the configuration is invalid or the address
    /// cannot be bound.
    pub async fn bind(config: ServerConfig, sink: Arc<dyn EventSink>) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;

        info!(
            addr = %listener.local_addr()?,
            max_connections = config.max_connections,
            idle_timeout = ?config.idle_timeout,
            "JT/T808 server listening"
        );

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                config,
                directory: SessionDirectory::new(),
                sink,
                active: AtomicUsize::new(0),
            }),
            tracker: TaskTracker::new(),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of open connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of phone ids with a live session.
    pub fn session_count(&self) -> usize {
        self.shared.directory.len()
    }

    pub fn is_online(&self, phone: &PhoneId) -> bool {
        self.shared.directory.contains(phone)
    }

    /// Accept connections until `shutdown` is cancelled, then wait for every
    /// connection task to close its session.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        // Per-socket accept failures (EMFILE, aborted handshakes)
                        // should not stop the listener.
                        error!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let active = self.shared.active.load(Ordering::SeqCst);
            if active >= self.shared.config.max_connections {
                error!(
                    addr = %addr,
                    max_connections = self.shared.config.max_connections,
                    current_connections = active,
                    "Connection rejected: maximum connections reached"
                );
                drop(stream);
                continue;
            }
            self.shared.active.fetch_add(1, Ordering::SeqCst);

            if let Err(e) = stream.set_nodelay(true) {
                warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            debug!(addr = %addr, connection_id, "Accepted connection");

            let guard = ConnectionGuard(Arc::clone(&self.shared));
            let shutdown = shutdown.clone();
            self.tracker.spawn(async move {
                serve_connection(stream, addr, connection_id, shutdown, guard).await;
            });
        }

        info!(
            open_connections = self.connection_count(),
            "Server shutting down, closing sessions"
        );
        self.tracker.close();
        self.tracker.wait().await;
        info!("Server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: u64,
    shutdown: CancellationToken,
    guard: ConnectionGuard,
) {
    let shared = Arc::clone(&guard.0);
    let config = &shared.config;
    let mut framed = Framed::new(stream, Jt808Codec::with_max_frame_size(config.max_frame_size));
    let mut session = DeviceSession::new(&config.session_config());
    let handle = SessionHandle::new(connection_id);
    let mut bound: Option<PhoneId> = None;

    let reason = loop {
        let idle_deadline = session.last_activity() + config.idle_timeout;

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break StatusReason::ServerShutdown,
            _ = handle.superseded() => break StatusReason::Superseded,
            _ = tokio::time::sleep_until(idle_deadline) => {
                info!(addr = %addr, phone = ?session.phone(), "Idle timeout");
                break StatusReason::IdleTimeout;
            }
            item = framed.next() => match item {
                None => break StatusReason::Disconnect,
                Some(Err(e)) => {
                    warn!(addr = %addr, error = %e, "Connection error");
                    break StatusReason::Disconnect;
                }
                Some(Ok(Err(e))) => {
                    warn!(addr = %addr, error = %e, "Dropping undecodable frame");
                }
                Some(Ok(Ok(msg))) => {
                    debug!(
                        addr = %addr,
                        phone = %msg.phone,
                        message_id = %HexId(msg.message_id),
                        serial = msg.serial,
                        "rx"
                    );
                    let outcome = session.handle(&msg, Instant::now());

                    if let Some(phone) = outcome.registered {
                        bound = Some(phone);
                        if let Some(previous) = shared.directory.install(phone, handle.clone())
                            && tokio::time::timeout(SUPERSEDE_GRACE, previous.closed()).await.is_err()
                        {
                            warn!(phone = %phone, "Superseded connection did not close in time");
                        }
                    }
                    if let Some(reply) = outcome.reply
                        && let Err(e) = framed.send(reply).await
                    {
                        warn!(addr = %addr, error = %e, "Failed to send reply");
                        if let Some(event) = outcome.event {
                            shared.sink.emit(event);
                        }
                        break StatusReason::Disconnect;
                    }
                    if let Some(event) = outcome.event {
                        shared.sink.emit(event);
                    }
                    if outcome.close {
                        break StatusReason::Logout;
                    }
                }
            }
        }
    };

    match session.close(reason) {
        Some(event) => shared.sink.emit(event),
        None if bound.is_none() => debug!(addr = %addr, %reason, "Unregistered connection closed"),
        None => {}
    }
    if let Some(phone) = bound {
        shared.directory.remove_if(phone, connection_id);
    }
    handle.mark_closed();

    match tokio::time::timeout(CLOSE_TIMEOUT, framed.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error flushing during close"),
        Err(_) => debug!("Flush timeout during close"),
    }
    let mut stream = framed.into_inner();
    match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error during socket shutdown"),
        Err(_) => debug!("Shutdown timeout during close"),
    }
    debug!(addr = %addr, connection_id, %reason, "Connection closed");
}
