//! Typed body schemas.

pub mod batch;
pub mod location;
pub mod registration;
pub mod response;

pub use batch::BatchLocationUpload;
pub use location::{AlarmFlags, ExtraItem, LocationReport, StatusFlags};
pub use registration::{Authentication, RegistrationRequest, RegistrationResponse};
pub use response::GeneralResponse;

use tracklink_core::{Error, Result};

/// Fail with `InvalidBody` unless `buf` holds at least `needed` bytes.
pub(crate) fn require(message_id: u16, buf: &[u8], needed: usize, field: &str) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::invalid_body(
            message_id,
            format!("{field} needs {needed} bytes, {} left", buf.len()),
        ));
    }
    Ok(())
}
