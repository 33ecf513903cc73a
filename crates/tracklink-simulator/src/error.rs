use thiserror::Error;
use tracklink_network::TcpClientError;

pub type Result<T> = std::result::Result<T, GeneratorError>;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TcpClientError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tracklink_core::Error),

    /// The server answered with a non-success result.
    #[error("Server rejected message 0x{message_id:04x} with result {result}")]
    Rejected { message_id: u16, result: u8 },

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GeneratorError {
    /// Whether the link is gone and a reconnect is needed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GeneratorError::Transport(_) | GeneratorError::NotAuthenticated
        )
    }
}
