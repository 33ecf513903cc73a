//! Shared types for the tracklink JT/T808 crates.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
