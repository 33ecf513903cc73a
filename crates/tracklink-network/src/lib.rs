//! Network layer: the per-connection device session, the concurrent
//! JT/T808 server and the device-side TCP client.

pub mod client;
pub mod directory;
pub mod reassembly;
pub mod server;
pub mod session;

pub use client::{TcpClient, TcpClientConfig, TcpClientError};
pub use directory::{SessionDirectory, SessionHandle};
pub use reassembly::{Reassembler, Reassembly};
pub use server::{EventSink, ProtocolServer, ServerConfig, ServerError};
pub use session::{DeviceSession, SessionConfig, SessionOutcome, SessionState};
