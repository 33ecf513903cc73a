//! Message id → body codec lookup table.
//!
//! Supporting a new message kind means adding a [`Body`] variant and one
//! [`BodyCodec`] row to [`CODECS`].

use crate::{
    body::{
        Authentication, BatchLocationUpload, GeneralResponse, LocationReport,
        RegistrationRequest, RegistrationResponse,
    },
    message::Message,
};
use bytes::{Bytes, BytesMut};
use tracklink_core::{Error, PhoneId, Result, constants::message_id as id};

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    TerminalResponse(GeneralResponse),
    Heartbeat,
    Logout,
    Registration(RegistrationRequest),
    Authentication(Authentication),
    Location(LocationReport),
    BatchLocation(BatchLocationUpload),
    PlatformResponse(GeneralResponse),
    RegistrationResponse(RegistrationResponse),
    /// Any id without a table entry; the body is kept verbatim.
    Unknown { message_id: u16, body: Bytes },
}

impl Body {
    pub fn message_id(&self) -> u16 {
        match self {
            Body::TerminalResponse(_) => id::TERMINAL_GENERAL_RESPONSE,
            Body::Heartbeat => id::HEARTBEAT,
            Body::Logout => id::LOGOUT,
            Body::Registration(_) => id::REGISTRATION,
            Body::Authentication(_) => id::AUTHENTICATION,
            Body::Location(_) => id::LOCATION_REPORT,
            Body::BatchLocation(_) => id::BATCH_LOCATION_UPLOAD,
            Body::PlatformResponse(_) => id::PLATFORM_GENERAL_RESPONSE,
            Body::RegistrationResponse(_) => id::REGISTRATION_RESPONSE,
            Body::Unknown { message_id, .. } => *message_id,
        }
    }
}

type DecodeFn = fn(&[u8]) -> Result<Body>;
type EncodeFn = fn(&Body, &mut BytesMut) -> Result<()>;

/// Encode/decode rules for one message id.
#[derive(Debug, Clone, Copy)]
pub struct BodyCodec {
    pub message_id: u16,
    pub name: &'static str,
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

pub static CODECS: &[BodyCodec] = &[
    BodyCodec {
        message_id: id::TERMINAL_GENERAL_RESPONSE,
        name: "terminal_general_response",
        decode: |b| GeneralResponse::decode(id::TERMINAL_GENERAL_RESPONSE, b).map(Body::TerminalResponse),
        encode: |body, dst| match body {
            Body::TerminalResponse(r) => {
                r.encode(dst);
                Ok(())
            }
            other => Err(kind_mismatch(id::TERMINAL_GENERAL_RESPONSE, other)),
        },
    },
    BodyCodec {
        message_id: id::HEARTBEAT,
        name: "heartbeat",
        decode: |b| empty(id::HEARTBEAT, b).map(|()| Body::Heartbeat),
        encode: |body, _| match body {
            Body::Heartbeat => Ok(()),
            other => Err(kind_mismatch(id::HEARTBEAT, other)),
        },
    },
    BodyCodec {
        message_id: id::LOGOUT,
        name: "logout",
        decode: |b| empty(id::LOGOUT, b).map(|()| Body::Logout),
        encode: |body, _| match body {
            Body::Logout => Ok(()),
            other => Err(kind_mismatch(id::LOGOUT, other)),
        },
    },
    BodyCodec {
        message_id: id::REGISTRATION,
        name: "registration",
        decode: |b| RegistrationRequest::decode(b).map(Body::Registration),
        encode: |body, dst| match body {
            Body::Registration(r) => r.encode(dst),
            other => Err(kind_mismatch(id::REGISTRATION, other)),
        },
    },
    BodyCodec {
        message_id: id::AUTHENTICATION,
        name: "authentication",
        decode: |b| Authentication::decode(b).map(Body::Authentication),
        encode: |body, dst| match body {
            Body::Authentication(a) => {
                a.encode(dst);
                Ok(())
            }
            other => Err(kind_mismatch(id::AUTHENTICATION, other)),
        },
    },
    BodyCodec {
        message_id: id::LOCATION_REPORT,
        name: "location_report",
        decode: |b| LocationReport::decode(b).map(Body::Location),
        encode: |body, dst| match body {
            Body::Location(r) => r.encode(dst),
            other => Err(kind_mismatch(id::LOCATION_REPORT, other)),
        },
    },
    BodyCodec {
        message_id: id::BATCH_LOCATION_UPLOAD,
        name: "batch_location_upload",
        decode: |b| BatchLocationUpload::decode(b).map(Body::BatchLocation),
        encode: |body, dst| match body {
            Body::BatchLocation(r) => r.encode(dst),
            other => Err(kind_mismatch(id::BATCH_LOCATION_UPLOAD, other)),
        },
    },
    BodyCodec {
        message_id: id::PLATFORM_GENERAL_RESPONSE,
        name: "platform_general_response",
        decode: |b| GeneralResponse::decode(id::PLATFORM_GENERAL_RESPONSE, b).map(Body::PlatformResponse),
        encode: |body, dst| match body {
            Body::PlatformResponse(r) => {
                r.encode(dst);
                Ok(())
            }
            other => Err(kind_mismatch(id::PLATFORM_GENERAL_RESPONSE, other)),
        },
    },
    BodyCodec {
        message_id: id::REGISTRATION_RESPONSE,
        name: "registration_response",
        decode: |b| RegistrationResponse::decode(b).map(Body::RegistrationResponse),
        encode: |body, dst| match body {
            Body::RegistrationResponse(r) => {
                r.encode(dst);
                Ok(())
            }
            other => Err(kind_mismatch(id::REGISTRATION_RESPONSE, other)),
        },
    },
];

fn empty(message_id: u16, body: &[u8]) -> Result<()> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(Error::invalid_body(
            message_id,
            format!("expected empty body, got {} bytes", body.len()),
        ))
    }
}

fn kind_mismatch(message_id: u16, body: &Body) -> Error {
    Error::invalid_body(
        message_id,
        format!("body belongs to message 0x{:04x}", body.message_id()),
    )
}

/// Stateless front for [`CODECS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageRegistry;

impl MessageRegistry {
    pub fn lookup(message_id: u16) -> Option<&'static BodyCodec> {
        CODECS.iter().find(|c| c.message_id == message_id)
    }

    /// Name for logs; `"unknown"` for ids without an entry.
    pub fn name(message_id: u16) -> &'static str {
        Self::lookup(message_id).map_or("unknown", |c| c.name)
    }

    /// Decode a body. Unknown ids yield [`Body::Unknown`] rather than an error.
    pub fn decode(message_id: u16, body: &[u8]) -> Result<Body> {
        match Self::lookup(message_id) {
            Some(codec) => (codec.decode)(body),
            None => Ok(Body::Unknown {
                message_id,
                body: Bytes::copy_from_slice(body),
            }),
        }
    }

    pub fn decode_message(msg: &Message) -> Result<Body> {
        Self::decode(msg.message_id, &msg.body)
    }

    pub fn encode(body: &Body) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        match Self::lookup(body.message_id()) {
            Some(codec) => (codec.encode)(body, &mut dst)?,
            None => match body {
                Body::Unknown { body, .. } => dst.extend_from_slice(body),
                other => return Err(kind_mismatch(other.message_id(), other)),
            },
        }
        Ok(dst.freeze())
    }

    /// Encode `body` and wrap it in a single-frame message.
    pub fn build(phone: PhoneId, serial: u16, body: &Body) -> Result<Message> {
        let bytes = Self::encode(body)?;
        Message::new(body.message_id(), phone, serial, bytes)
    }
}
