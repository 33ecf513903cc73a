use super::require;
use bytes::{Buf, BufMut, BytesMut};
use tracklink_core::{Error, Result, ResultCode};

const BODY_LENGTH: usize = 5;

/// Body of 0x0001 (terminal) and 0x8001 (platform) general responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralResponse {
    /// Serial number of the message being answered.
    pub serial: u16,
    /// Id of the message being answered.
    pub message_id: u16,
    pub result: ResultCode,
}

impl GeneralResponse {
    pub fn new(serial: u16, message_id: u16, result: ResultCode) -> Self {
        GeneralResponse {
            serial,
            message_id,
            result,
        }
    }

    pub fn decode(message_id: u16, mut buf: &[u8]) -> Result<Self> {
        require(message_id, buf, BODY_LENGTH, "general response")?;
        if buf.len() > BODY_LENGTH {
            return Err(Error::invalid_body(
                message_id,
                format!("general response is {} bytes, expected 5", buf.len()),
            ));
        }
        Ok(GeneralResponse {
            serial: buf.get_u16(),
            message_id: buf.get_u16(),
            result: ResultCode::from(buf.get_u8()),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.serial);
        dst.put_u16(self.message_id);
        dst.put_u8(self.result.as_u8());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let resp = GeneralResponse::new(0x0102, 0x0200, ResultCode::Success);
        let mut buf = BytesMut::new();
        resp.encode(&mut buf);
        assert_eq!(&buf[..], &[0x01, 0x02, 0x02, 0x00, 0x00]);
        assert_eq!(GeneralResponse::decode(0x8001, &buf).unwrap(), resp);
    }

    #[test]
    fn test_rejects_wrong_size() {
        assert!(GeneralResponse::decode(0x0001, &[0, 1, 0, 2]).is_err());
        assert!(GeneralResponse::decode(0x0001, &[0, 1, 0, 2, 0, 9]).is_err());
    }
}
