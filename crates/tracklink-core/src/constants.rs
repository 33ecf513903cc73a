//! Core constants for the JT/T808-2013 protocol implementation.
//!
//! # Frame Structure
//!
//! ```text
//! 0x7e | header (12 or 16 bytes) | body (0..=1023 bytes) | checksum | 0x7e
//! ```
//!
//! Everything between the two flag bytes is byte-stuffed: `0x7e` is sent as
//! `0x7d 0x02` and `0x7d` is sent as `0x7d 0x01`. The checksum is the XOR of
//! the unescaped header and body.
//!
//! # Header Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | message id |
//! | 2 | 2 | body attributes (length / encryption / sub-package flag) |
//! | 4 | 6 | terminal phone number, BCD |
//! | 10 | 2 | serial number |
//! | 12 | 2 | total packages (only with sub-package flag) |
//! | 14 | 2 | package sequence (only with sub-package flag) |
//!
//! Modifying these values breaks compatibility with real devices.

// ============================================================================
// Framing
// ============================================================================

/// Frame delimiter, present at both ends of every frame.
pub const FLAG_BYTE: u8 = 0x7e;

/// Escape byte introducing a two-byte stuffing sequence.
pub const ESCAPE_BYTE: u8 = 0x7d;

/// Second byte of the sequence standing for [`FLAG_BYTE`].
pub const ESCAPED_FLAG: u8 = 0x02;

/// Second byte of the sequence standing for [`ESCAPE_BYTE`].
pub const ESCAPED_ESCAPE: u8 = 0x01;

/// Number of delimiter bytes wrapping a frame.
pub const FRAME_OVERHEAD: usize = 2;

/// Size of the trailing checksum.
pub const CHECKSUM_LENGTH: usize = 1;

// ============================================================================
// Header
// ============================================================================

/// Header size without sub-package fields.
pub const HEADER_LENGTH: usize = 12;

/// Extra header bytes present when the sub-package flag is set.
pub const SUBPACKAGE_FIELDS_LENGTH: usize = 4;

/// Number of BCD bytes carrying the terminal phone number.
pub const PHONE_BCD_LENGTH: usize = 6;

/// Number of decimal digits in a terminal phone number.
pub const PHONE_DIGITS: usize = PHONE_BCD_LENGTH * 2;

/// Bits 0-9 of the body attributes.
pub const BODY_LENGTH_MASK: u16 = 0x03ff;

/// Bits 10-12 of the body attributes.
pub const ENCRYPTION_MASK: u16 = 0x1c00;

/// Shift applied to the encryption bits.
pub const ENCRYPTION_SHIFT: u16 = 10;

/// Bit 13 of the body attributes.
pub const SUBPACKAGE_FLAG: u16 = 0x2000;

/// Largest body a single frame can declare.
pub const MAX_BODY_LENGTH: usize = BODY_LENGTH_MASK as usize;

/// Largest escaped frame a well-formed sender can produce.
///
/// Every plaintext byte may double when stuffed, plus the two delimiters.
pub const MAX_ESCAPED_FRAME_LENGTH: usize =
    (HEADER_LENGTH + SUBPACKAGE_FIELDS_LENGTH + MAX_BODY_LENGTH + CHECKSUM_LENGTH) * 2
        + FRAME_OVERHEAD;

// ============================================================================
// Message Identifiers
// ============================================================================

/// Message identifiers handled by the bridge.
pub mod message_id {
    pub const TERMINAL_GENERAL_RESPONSE: u16 = 0x0001;
    pub const HEARTBEAT: u16 = 0x0002;
    pub const LOGOUT: u16 = 0x0003;
    pub const REGISTRATION: u16 = 0x0100;
    pub const AUTHENTICATION: u16 = 0x0102;
    pub const LOCATION_REPORT: u16 = 0x0200;
    pub const BATCH_LOCATION_UPLOAD: u16 = 0x0704;

    pub const PLATFORM_GENERAL_RESPONSE: u16 = 0x8001;
    pub const REGISTRATION_RESPONSE: u16 = 0x8100;
}

// ============================================================================
// Location Report
// ============================================================================

/// Size of the fixed part of a location report.
///
/// alarm(4) + status(4) + latitude(4) + longitude(4) + altitude(2) +
/// speed(2) + direction(2) + BCD time(6).
pub const LOCATION_BASE_LENGTH: usize = 28;

/// Scale of latitude/longitude on the wire (millionths of a degree).
pub const COORDINATE_SCALE: f64 = 1_000_000.0;

// ============================================================================
// Registration
// ============================================================================

pub const MANUFACTURER_ID_LENGTH: usize = 5;
pub const TERMINAL_MODEL_LENGTH: usize = 20;
pub const TERMINAL_ID_LENGTH: usize = 7;

/// province(2) + city(2) + manufacturer(5) + model(20) + terminal id(7) + plate color(1).
pub const REGISTRATION_FIXED_LENGTH: usize =
    4 + MANUFACTURER_ID_LENGTH + TERMINAL_MODEL_LENGTH + TERMINAL_ID_LENGTH + 1;

// ============================================================================
// Timing
// ============================================================================

/// Heartbeat period devices are expected to keep, in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Idle timeout applied to a session without traffic, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = DEFAULT_HEARTBEAT_SECS * 2;

/// How long an incomplete sub-package set is kept, in seconds.
pub const DEFAULT_SUBPACKAGE_TIMEOUT_SECS: u64 = 30;

/// Largest sub-package count accepted for reassembly.
pub const DEFAULT_MAX_SUBPACKAGES: u16 = 64;

/// Incomplete sub-package sets a session buffers at once; the oldest is
/// evicted beyond this.
pub const DEFAULT_MAX_PENDING_SETS: usize = 4;
