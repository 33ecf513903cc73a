use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracklink_core::{
    Error, PhoneId, Result,
    constants::{
        BODY_LENGTH_MASK, ENCRYPTION_MASK, ENCRYPTION_SHIFT, HEADER_LENGTH, MAX_BODY_LENGTH,
        SUBPACKAGE_FIELDS_LENGTH, SUBPACKAGE_FLAG,
    },
};

/// Bits 14-15 of the body attributes, reserved by the standard.
const RESERVED_MASK: u16 = 0xc000;
const RESERVED_SHIFT: u16 = 14;

/// Renders a message id as `0x0200` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexId(pub u16);

impl fmt::Display for HexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Decoded body attribute bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyAttributes {
    pub body_length: u16,
    pub encryption: u8,
    pub has_subpackage: bool,
    /// Kept so that a received frame re-encodes byte for byte.
    pub reserved: u8,
}

impl BodyAttributes {
    pub fn from_u16(raw: u16) -> Self {
        BodyAttributes {
            body_length: raw & BODY_LENGTH_MASK,
            encryption: ((raw & ENCRYPTION_MASK) >> ENCRYPTION_SHIFT) as u8,
            has_subpackage: raw & SUBPACKAGE_FLAG != 0,
            reserved: ((raw & RESERVED_MASK) >> RESERVED_SHIFT) as u8,
        }
    }

    pub fn to_u16(&self) -> u16 {
        let mut raw = self.body_length & BODY_LENGTH_MASK;
        raw |= (u16::from(self.encryption) << ENCRYPTION_SHIFT) & ENCRYPTION_MASK;
        if self.has_subpackage {
            raw |= SUBPACKAGE_FLAG;
        }
        raw | ((u16::from(self.reserved) << RESERVED_SHIFT) & RESERVED_MASK)
    }
}

/// Position of one frame inside a split message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpackageInfo {
    pub total: u16,
    /// 1-based.
    pub seq: u16,
}

/// One JT/T808 message: header fields plus the raw (unescaped) body.
///
/// Body bytes stay opaque here; [`crate::MessageRegistry`] turns them into a
/// typed [`crate::Body`].
///
/// # Example
///
/// ```
/// use tracklink_core::PhoneId;
/// use tracklink_protocol::Message;
///
/// let phone = PhoneId::new("999999999118").unwrap();
/// let msg = Message::new(0x0002, phone, 12, Vec::new()).unwrap();
/// assert_eq!(msg.checksum, 0x87);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: u16,
    pub attributes: BodyAttributes,
    pub phone: PhoneId,
    pub serial: u16,
    pub subpackage: Option<SubpackageInfo>,
    pub body: Bytes,
    /// XOR of header and body.
    pub checksum: u8,
}

impl Message {
    /// Build a single-frame, unencrypted message.
    ///
    /// # Errors
    /// Returns `Error::BodyTooLarge` if the body does not fit the 10-bit length.
    pub fn new(message_id: u16, phone: PhoneId, serial: u16, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        if body.len() > MAX_BODY_LENGTH {
            return Err(Error::BodyTooLarge(body.len()));
        }

        let mut msg = Message {
            message_id,
            attributes: BodyAttributes {
                body_length: body.len() as u16,
                ..BodyAttributes::default()
            },
            phone,
            serial,
            subpackage: None,
            body,
            checksum: 0,
        };
        msg.seal();
        Ok(msg)
    }

    /// Mark this message as part `seq` of `total`.
    pub fn with_subpackage(mut self, total: u16, seq: u16) -> Self {
        self.attributes.has_subpackage = true;
        self.subpackage = Some(SubpackageInfo { total, seq });
        self.seal();
        self
    }

    pub fn with_encryption(mut self, kind: u8) -> Self {
        self.attributes.encryption = kind & 0b111;
        self.seal();
        self
    }

    pub fn header_length(&self) -> usize {
        if self.attributes.has_subpackage {
            HEADER_LENGTH + SUBPACKAGE_FIELDS_LENGTH
        } else {
            HEADER_LENGTH
        }
    }

    /// Header and body as they are checksummed, before stuffing.
    pub fn plaintext(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.header_length() + self.body.len() + 1);
        buf.put_u16(self.message_id);
        buf.put_u16(self.attributes.to_u16());
        buf.put_slice(self.phone.as_bcd());
        buf.put_u16(self.serial);
        if self.attributes.has_subpackage {
            let info = self.subpackage.unwrap_or(SubpackageInfo { total: 0, seq: 0 });
            buf.put_u16(info.total);
            buf.put_u16(info.seq);
        }
        buf.put_slice(&self.body);
        buf
    }

    /// Recompute the checksum after a field change.
    pub fn seal(&mut self) {
        self.checksum = crate::frame::checksum(&self.plaintext());
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message[id=0x{:04x}, phone={}, serial={}, body={}B",
            self.message_id,
            self.phone,
            self.serial,
            self.body.len()
        )?;
        if let Some(info) = self.subpackage {
            write!(f, ", part={}/{}", info.seq, info.total)?;
        }
        write!(f, "]")
    }
}
