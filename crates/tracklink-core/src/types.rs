use crate::{
    Result,
    constants::{PHONE_BCD_LENGTH, PHONE_DIGITS},
    error::Error,
};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal phone number, carried as 6 BCD bytes in every header.
///
/// The raw bytes are kept as received so that a frame with a malformed
/// number still round-trips; [`PhoneId::is_valid`] tells whether every
/// nibble is a decimal digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhoneId([u8; PHONE_BCD_LENGTH]);

impl PhoneId {
    /// Create a phone id from exactly 12 decimal digits.
    ///
    /// # Errors
    /// Returns `Error::InvalidPhoneId` if the input is not 12 ASCII digits.
    pub fn new(digits: &str) -> Result<Self> {
        if digits.len() != PHONE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPhoneId(format!(
                "expected {PHONE_DIGITS} decimal digits, got {digits:?}"
            )));
        }

        let mut bcd = [0u8; PHONE_BCD_LENGTH];
        for (slot, pair) in bcd.iter_mut().zip(digits.as_bytes().chunks(2)) {
            *slot = ((pair[0] - b'0') << 4) | (pair[1] - b'0');
        }
        Ok(PhoneId(bcd))
    }

    /// Create a phone id from a shorter digit string, left-padded with zeros.
    ///
    /// Eleven-digit mobile numbers are commonly configured this way.
    pub fn from_short(digits: &str) -> Result<Self> {
        if digits.len() > PHONE_DIGITS {
            return Err(Error::InvalidPhoneId(format!(
                "more than {PHONE_DIGITS} digits: {digits:?}"
            )));
        }
        Self::new(&format!("{digits:0>PHONE_DIGITS$}"))
    }

    /// Wrap raw header bytes without validation.
    pub fn from_bcd(bytes: [u8; PHONE_BCD_LENGTH]) -> Self {
        PhoneId(bytes)
    }

    /// Raw BCD bytes as they appear on the wire.
    #[must_use]
    pub fn as_bcd(&self) -> &[u8; PHONE_BCD_LENGTH] {
        &self.0
    }

    /// Whether every nibble is a decimal digit.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|&b| is_bcd_byte(b))
    }
}

impl fmt::Display for PhoneId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PhoneId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PhoneId::new(s)
    }
}

impl Serialize for PhoneId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PhoneId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PhoneId::from_short(&s).map_err(serde::de::Error::custom)
    }
}

/// Device clock reading as 6 BCD bytes: `YY MM DD hh mm ss`.
///
/// Devices report UTC here; the century is always 20xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BcdTimestamp([u8; 6]);

impl BcdTimestamp {
    pub fn from_bcd(bytes: [u8; 6]) -> Self {
        BcdTimestamp(bytes)
    }

    #[must_use]
    pub fn as_bcd(&self) -> &[u8; 6] {
        &self.0
    }

    /// Encode a UTC instant. Years outside 2000-2099 wrap on the two digits.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let fields = [
            (at.year().rem_euclid(100)) as u8,
            at.month() as u8,
            at.day() as u8,
            at.hour() as u8,
            at.minute() as u8,
            at.second() as u8,
        ];
        BcdTimestamp(fields.map(to_bcd_byte))
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Decode into a calendar instant.
    ///
    /// # Errors
    /// Returns `Error::InvalidBcd` for non-decimal nibbles or an impossible
    /// calendar date.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>> {
        let mut fields = [0u32; 6];
        for (slot, &b) in fields.iter_mut().zip(self.0.iter()) {
            *slot = u32::from(from_bcd_byte(b)?);
        }
        let [yy, month, day, hour, minute, second] = fields;

        NaiveDate::from_ymd_opt(2000 + yy as i32, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or(Error::InvalidBcd(self.0[1]))
    }
}

impl fmt::Display for BcdTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

fn is_bcd_byte(b: u8) -> bool {
    (b >> 4) <= 9 && (b & 0x0f) <= 9
}

/// Pack a value in `0..=99` into one BCD byte.
#[must_use]
pub fn to_bcd_byte(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Unpack one BCD byte.
///
/// # Errors
/// Returns `Error::InvalidBcd` if either nibble is above 9.
pub fn from_bcd_byte(b: u8) -> Result<u8> {
    if !is_bcd_byte(b) {
        return Err(Error::InvalidBcd(b));
    }
    Ok((b >> 4) * 10 + (b & 0x0f))
}

/// Result field of the 0x0001 / 0x8001 general responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    Failure,
    MessageError,
    Unsupported,
    AlarmAcknowledged,
    Other(u8),
}

impl ResultCode {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Failure => 1,
            ResultCode::MessageError => 2,
            ResultCode::Unsupported => 3,
            ResultCode::AlarmAcknowledged => 4,
            ResultCode::Other(code) => *code,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }
}

impl From<u8> for ResultCode {
    fn from(code: u8) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::Failure,
            2 => ResultCode::MessageError,
            3 => ResultCode::Unsupported,
            4 => ResultCode::AlarmAcknowledged,
            other => ResultCode::Other(other),
        }
    }
}

/// Result field of the 0x8100 registration response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationResult {
    Success,
    VehicleAlreadyRegistered,
    VehicleNotFound,
    TerminalAlreadyRegistered,
    TerminalNotFound,
    Other(u8),
}

impl RegistrationResult {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            RegistrationResult::Success => 0,
            RegistrationResult::VehicleAlreadyRegistered => 1,
            RegistrationResult::VehicleNotFound => 2,
            RegistrationResult::TerminalAlreadyRegistered => 3,
            RegistrationResult::TerminalNotFound => 4,
            RegistrationResult::Other(code) => *code,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, RegistrationResult::Success)
    }
}

impl From<u8> for RegistrationResult {
    fn from(code: u8) -> Self {
        match code {
            0 => RegistrationResult::Success,
            1 => RegistrationResult::VehicleAlreadyRegistered,
            2 => RegistrationResult::VehicleNotFound,
            3 => RegistrationResult::TerminalAlreadyRegistered,
            4 => RegistrationResult::TerminalNotFound,
            other => RegistrationResult::Other(other),
        }
    }
}
