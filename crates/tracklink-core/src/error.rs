use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Framing errors
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Invalid escape sequence 0x7d 0x{byte:02x} at offset {offset}")]
    EscapeSequence { offset: usize, byte: u8 },

    #[error("Checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Truncated {context}: need {needed} bytes, have {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Body length mismatch: header declares {declared} bytes, frame carries {actual}")]
    BodyLengthMismatch { declared: usize, actual: usize },

    #[error("Body too large: {0} bytes (max 1023)")]
    BodyTooLarge(usize),

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    // Field errors
    #[error("Invalid BCD byte 0x{0:02x}")]
    InvalidBcd(u8),

    #[error("Invalid phone id: {0}")]
    InvalidPhoneId(String),

    #[error("Invalid body for message 0x{message_id:04x}: {reason}")]
    InvalidBody { message_id: u16, reason: String },

    // Session errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Errors raised before the header could be trusted.
    ///
    /// Frames failing this way are dropped at the transport boundary with no
    /// reply, because the sender identity cannot be established.
    pub fn is_untrusted_frame(&self) -> bool {
        matches!(
            self,
            Error::Framing(_)
                | Error::EscapeSequence { .. }
                | Error::ChecksumMismatch { .. }
                | Error::Truncated { .. }
                | Error::BodyLengthMismatch { .. }
                | Error::FrameTooLarge { .. }
        )
    }

    pub fn invalid_body(message_id: u16, reason: impl Into<String>) -> Self {
        Error::InvalidBody {
            message_id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrusted_classification() {
        assert!(Error::Framing("missing start".into()).is_untrusted_frame());
        assert!(Error::EscapeSequence { offset: 3, byte: 0x05 }.is_untrusted_frame());
        assert!(
            Error::ChecksumMismatch {
                expected: 0x87,
                actual: 0x86
            }
            .is_untrusted_frame()
        );
        assert!(!Error::invalid_body(0x0200, "short").is_untrusted_frame());
        assert!(!Error::InvalidBcd(0xAB).is_untrusted_frame());
    }

    #[test]
    fn test_display_formats_hex() {
        let err = Error::ChecksumMismatch {
            expected: 0x0c,
            actual: 0xff,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0x0c, got 0xff");

        let err = Error::invalid_body(0x0704, "item count is zero");
        assert_eq!(
            err.to_string(),
            "Invalid body for message 0x0704: item count is zero"
        );
    }
}
