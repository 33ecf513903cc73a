use super::require;
use bytes::{Buf, BufMut, BytesMut};
use tracklink_core::{
    Error, RegistrationResult, Result,
    constants::{
        MANUFACTURER_ID_LENGTH, REGISTRATION_FIXED_LENGTH, TERMINAL_ID_LENGTH,
        TERMINAL_MODEL_LENGTH, message_id,
    },
};

/// Body of 0x0100.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationRequest {
    pub province: u16,
    pub city: u16,
    pub manufacturer_id: String,
    pub terminal_model: String,
    pub terminal_id: String,
    /// 0 when the vehicle is not plated.
    pub plate_color: u8,
    pub plate: String,
}

impl RegistrationRequest {
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let id = message_id::REGISTRATION;
        require(id, buf, REGISTRATION_FIXED_LENGTH, "registration")?;

        let province = buf.get_u16();
        let city = buf.get_u16();
        let manufacturer_id = read_padded(&mut buf, MANUFACTURER_ID_LENGTH);
        let terminal_model = read_padded(&mut buf, TERMINAL_MODEL_LENGTH);
        let terminal_id = read_padded(&mut buf, TERMINAL_ID_LENGTH);
        let plate_color = buf.get_u8();
        let plate = String::from_utf8_lossy(buf)
            .trim_end_matches('\0')
            .to_string();

        Ok(RegistrationRequest {
            province,
            city,
            manufacturer_id,
            terminal_model,
            terminal_id,
            plate_color,
            plate,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let id = message_id::REGISTRATION;
        dst.put_u16(self.province);
        dst.put_u16(self.city);
        write_padded(dst, id, "manufacturer id", &self.manufacturer_id, MANUFACTURER_ID_LENGTH)?;
        write_padded(dst, id, "terminal model", &self.terminal_model, TERMINAL_MODEL_LENGTH)?;
        write_padded(dst, id, "terminal id", &self.terminal_id, TERMINAL_ID_LENGTH)?;
        dst.put_u8(self.plate_color);
        dst.put_slice(self.plate.as_bytes());
        Ok(())
    }
}

fn read_padded(buf: &mut &[u8], len: usize) -> String {
    let field = &buf[..len];
    buf.advance(len);
    String::from_utf8_lossy(field)
        .trim_end_matches('\0')
        .to_string()
}

fn write_padded(dst: &mut BytesMut, id: u16, name: &str, value: &str, len: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > len {
        return Err(Error::invalid_body(
            id,
            format!("{name} is {} bytes, field holds {len}", bytes.len()),
        ));
    }
    dst.put_slice(bytes);
    dst.put_bytes(0, len - bytes.len());
    Ok(())
}

/// Body of 0x8100.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub serial: u16,
    pub result: RegistrationResult,
    /// Present only when `result` is success.
    pub auth_code: Option<String>,
}

impl RegistrationResponse {
    pub fn success(serial: u16, auth_code: impl Into<String>) -> Self {
        RegistrationResponse {
            serial,
            result: RegistrationResult::Success,
            auth_code: Some(auth_code.into()),
        }
    }

    pub fn failure(serial: u16, result: RegistrationResult) -> Self {
        RegistrationResponse {
            serial,
            result,
            auth_code: None,
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let id = message_id::REGISTRATION_RESPONSE;
        require(id, buf, 3, "registration response")?;
        let serial = buf.get_u16();
        let result = RegistrationResult::from(buf.get_u8());
        let auth_code = if buf.is_empty() {
            None
        } else {
            Some(
                String::from_utf8(buf.to_vec())
                    .map_err(|_| Error::invalid_body(id, "auth code is not UTF-8"))?,
            )
        };
        Ok(RegistrationResponse {
            serial,
            result,
            auth_code,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.serial);
        dst.put_u8(self.result.as_u8());
        if let Some(code) = &self.auth_code {
            dst.put_slice(code.as_bytes());
        }
    }
}

/// Body of 0x0102: the auth code issued at registration, echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub auth_code: String,
}

impl Authentication {
    pub fn new(auth_code: impl Into<String>) -> Self {
        Authentication {
            auth_code: auth_code.into(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let auth_code = String::from_utf8(buf.to_vec()).map_err(|_| {
            Error::invalid_body(message_id::AUTHENTICATION, "auth code is not UTF-8")
        })?;
        Ok(Authentication { auth_code })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(self.auth_code.as_bytes());
    }
}
