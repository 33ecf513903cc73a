//! Byte-level frame codec.
//!
//! ```text
//! 0x7e | escape(header | body | checksum) | 0x7e
//! ```
//!
//! [`encode`] and [`decode`] are exact inverses: any [`Message`] built through
//! its constructors survives `decode(encode(m))` unchanged, and any frame
//! accepted by [`decode`] re-encodes to the same bytes.

use crate::message::{BodyAttributes, Message, SubpackageInfo};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracklink_core::{
    Error, PhoneId, Result,
    constants::{
        CHECKSUM_LENGTH, ESCAPE_BYTE, ESCAPED_ESCAPE, ESCAPED_FLAG, FLAG_BYTE, FRAME_OVERHEAD,
        HEADER_LENGTH, MAX_BODY_LENGTH, PHONE_BCD_LENGTH, SUBPACKAGE_FIELDS_LENGTH,
    },
};

/// Lowercase hex rendering for logs.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// XOR of every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Apply byte stuffing to `src`, appending to `dst`.
pub fn escape_into(src: &[u8], dst: &mut BytesMut) {
    for &b in src {
        match b {
            FLAG_BYTE => dst.put_slice(&[ESCAPE_BYTE, ESCAPED_FLAG]),
            ESCAPE_BYTE => dst.put_slice(&[ESCAPE_BYTE, ESCAPED_ESCAPE]),
            other => dst.put_u8(other),
        }
    }
}

/// Reverse byte stuffing.
///
/// # Errors
/// Returns `Error::EscapeSequence` when `0x7d` is followed by anything other
/// than `0x01` or `0x02`, or ends the input.
pub fn unescape(src: &[u8]) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(src.len());
    let mut iter = src.iter().copied().enumerate();

    while let Some((offset, b)) = iter.next() {
        if b != ESCAPE_BYTE {
            out.put_u8(b);
            continue;
        }
        match iter.next() {
            Some((_, ESCAPED_FLAG)) => out.put_u8(FLAG_BYTE),
            Some((_, ESCAPED_ESCAPE)) => out.put_u8(ESCAPE_BYTE),
            Some((_, byte)) => return Err(Error::EscapeSequence { offset, byte }),
            None => {
                return Err(Error::EscapeSequence {
                    offset,
                    byte: ESCAPE_BYTE,
                });
            }
        }
    }

    Ok(out)
}

/// Decode one delimited frame.
///
/// # Errors
/// - `Error::Framing` for a missing or interior delimiter
/// - `Error::EscapeSequence` for an undefined stuffing sequence
/// - `Error::ChecksumMismatch` when the trailing byte disagrees with the XOR
/// - `Error::Truncated` when the header is incomplete
/// - `Error::BodyLengthMismatch` when the body is not exactly the declared length
pub fn decode(raw: &[u8]) -> Result<Message> {
    if raw.len() < FRAME_OVERHEAD || raw[0] != FLAG_BYTE || raw[raw.len() - 1] != FLAG_BYTE {
        return Err(Error::Framing("frame must start and end with 0x7e".into()));
    }

    let inner = &raw[1..raw.len() - 1];
    if let Some(pos) = inner.iter().position(|&b| b == FLAG_BYTE) {
        return Err(Error::Framing(format!(
            "unexpected delimiter at offset {}",
            pos + 1
        )));
    }

    let plain = unescape(inner)?;
    if plain.len() < HEADER_LENGTH + CHECKSUM_LENGTH {
        return Err(Error::Truncated {
            context: "header",
            needed: HEADER_LENGTH + CHECKSUM_LENGTH,
            available: plain.len(),
        });
    }

    let (data, tail) = plain.split_at(plain.len() - CHECKSUM_LENGTH);
    let received = tail[0];
    let computed = checksum(data);
    if received != computed {
        return Err(Error::ChecksumMismatch {
            expected: computed,
            actual: received,
        });
    }

    let mut cursor = data;
    let message_id = cursor.get_u16();
    let attributes = BodyAttributes::from_u16(cursor.get_u16());
    let mut phone = [0u8; PHONE_BCD_LENGTH];
    cursor.copy_to_slice(&mut phone);
    let serial = cursor.get_u16();

    let subpackage = if attributes.has_subpackage {
        if cursor.len() < SUBPACKAGE_FIELDS_LENGTH {
            return Err(Error::Truncated {
                context: "sub-package header",
                needed: SUBPACKAGE_FIELDS_LENGTH,
                available: cursor.len(),
            });
        }
        Some(SubpackageInfo {
            total: cursor.get_u16(),
            seq: cursor.get_u16(),
        })
    } else {
        None
    };

    let declared = usize::from(attributes.body_length);
    if cursor.len() != declared {
        return Err(Error::BodyLengthMismatch {
            declared,
            actual: cursor.len(),
        });
    }

    Ok(Message {
        message_id,
        attributes,
        phone: PhoneId::from_bcd(phone),
        serial,
        subpackage,
        body: Bytes::copy_from_slice(cursor),
        checksum: received,
    })
}

/// Encode a message into a delimited, stuffed frame.
///
/// # Errors
/// Returns `Error::BodyTooLarge` if the body exceeds 1023 bytes and
/// `Error::BodyLengthMismatch` if the attributes disagree with the body.
pub fn encode(msg: &Message) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_into(msg, &mut dst)?;
    Ok(dst.freeze())
}

/// Append the encoded frame for `msg` to `dst`.
pub fn encode_into(msg: &Message, dst: &mut BytesMut) -> Result<()> {
    if msg.body.len() > MAX_BODY_LENGTH {
        return Err(Error::BodyTooLarge(msg.body.len()));
    }
    if usize::from(msg.attributes.body_length) != msg.body.len() {
        return Err(Error::BodyLengthMismatch {
            declared: usize::from(msg.attributes.body_length),
            actual: msg.body.len(),
        });
    }

    let mut plain = msg.plaintext();
    let sum = checksum(&plain);
    plain.put_u8(sum);

    dst.reserve(plain.len() * 2 + FRAME_OVERHEAD);
    dst.put_u8(FLAG_BYTE);
    escape_into(&plain, dst);
    dst.put_u8(FLAG_BYTE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HEARTBEAT: [u8; 15] = [
        0x7e, 0x00, 0x02, 0x00, 0x00, 0x99, 0x99, 0x99, 0x99, 0x91, 0x18, 0x00, 0x0c, 0x87, 0x7e,
    ];

    #[test]
    fn test_decode_heartbeat_vector() {
        let msg = decode(&HEARTBEAT).unwrap();
        assert_eq!(msg.message_id, 0x0002);
        assert_eq!(msg.phone.to_string(), "999999999118");
        assert_eq!(msg.serial, 0x000c);
        assert!(msg.body.is_empty());
        assert_eq!(msg.checksum, 0x87);
        assert!(msg.subpackage.is_none());
    }

    #[test]
    fn test_encode_heartbeat_vector() {
        let phone = PhoneId::new("999999999118").unwrap();
        let msg = Message::new(0x0002, phone, 12, Vec::new()).unwrap();
        assert_eq!(&encode(&msg).unwrap()[..], &HEARTBEAT[..]);
    }

    #[rstest]
    #[case(&[0x30, 0x7e, 0x08], &[0x30, 0x7d, 0x02, 0x08])]
    #[case(&[0x30, 0x7d, 0x08], &[0x30, 0x7d, 0x01, 0x08])]
    #[case(&[0x7e, 0x7d], &[0x7d, 0x02, 0x7d, 0x01])]
    #[case(&[0x01, 0x02], &[0x01, 0x02])]
    fn test_escape_table(#[case] plain: &[u8], #[case] stuffed: &[u8]) {
        let mut out = BytesMut::new();
        escape_into(plain, &mut out);
        assert_eq!(&out[..], stuffed);
        assert_eq!(&unescape(stuffed).unwrap()[..], plain);
    }

    #[rstest]
    #[case(&[0x7d, 0x03], 0)]
    #[case(&[0x01, 0x7d, 0x00], 1)]
    #[case(&[0x01, 0x02, 0x7d], 2)]
    fn test_unescape_rejects_undefined_sequence(#[case] input: &[u8], #[case] offset: usize) {
        match unescape(input) {
            Err(Error::EscapeSequence { offset: got, .. }) => assert_eq!(got, offset),
            other => panic!("expected escape error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_missing_delimiter() {
        assert!(matches!(decode(&HEARTBEAT[..14]), Err(Error::Framing(_))));
        assert!(matches!(decode(&HEARTBEAT[1..]), Err(Error::Framing(_))));
        assert!(matches!(decode(&[]), Err(Error::Framing(_))));
    }

    #[test]
    fn test_decode_interior_delimiter() {
        let mut raw = HEARTBEAT.to_vec();
        raw.insert(5, 0x7e);
        assert!(matches!(decode(&raw), Err(Error::Framing(_))));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut raw = HEARTBEAT;
        raw[13] = 0x86;
        assert!(matches!(
            decode(&raw),
            Err(Error::ChecksumMismatch {
                expected: 0x87,
                actual: 0x86
            })
        ));
    }

    #[test]
    fn test_decode_short_header() {
        let raw = [0x7e, 0x00, 0x02, 0x00, 0x02, 0x7e];
        assert!(matches!(decode(&raw), Err(Error::Truncated { .. })));
    }

    #[test]
    fn test_decode_body_length_mismatch() {
        // Header declares 4 bytes of body, frame carries 2.
        let phone = PhoneId::new("123456789012").unwrap();
        let mut msg = Message::new(0x0102, phone, 1, vec![b'a', b'b']).unwrap();
        msg.attributes.body_length = 4;
        let mut plain = msg.plaintext();
        let sum = checksum(&plain);
        plain.put_u8(sum);
        let mut raw = BytesMut::new();
        raw.put_u8(FLAG_BYTE);
        escape_into(&plain, &mut raw);
        raw.put_u8(FLAG_BYTE);

        assert!(matches!(
            decode(&raw),
            Err(Error::BodyLengthMismatch {
                declared: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_encode_rejects_inconsistent_length() {
        let phone = PhoneId::new("123456789012").unwrap();
        let mut msg = Message::new(0x0102, phone, 1, vec![b'a']).unwrap();
        msg.attributes.body_length = 3;
        assert!(matches!(encode(&msg), Err(Error::BodyLengthMismatch { .. })));
    }

    #[test]
    fn test_subpackage_roundtrip() {
        let phone = PhoneId::new("013800138000").unwrap();
        let msg = Message::new(0x0704, phone, 0x7e7d, vec![0x7e, 0x00, 0x7d])
            .unwrap()
            .with_subpackage(3, 2);
        let raw = encode(&msg).unwrap();
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.subpackage, Some(SubpackageInfo { total: 3, seq: 2 }));
    }

    #[test]
    fn test_checksum_that_needs_escaping() {
        // Choose a serial so the checksum itself is 0x7e.
        let phone = PhoneId::new("000000000000").unwrap();
        let msg = Message::new(0x0002, phone, 0x007c, Vec::new()).unwrap();
        assert_eq!(msg.checksum, 0x7e);
        let raw = encode(&msg).unwrap();
        assert_eq!(&raw[raw.len() - 3..], &[0x7d, 0x02, 0x7e]);
        assert_eq!(decode(&raw).unwrap(), msg);
    }
}
