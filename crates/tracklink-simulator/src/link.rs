//! Device side of one connection: register, authenticate, then strictly
//! request/response traffic with incrementing serial numbers.

use crate::error::{GeneratorError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracklink_core::{PhoneId, constants::message_id};
use tracklink_network::{SessionState, TcpClient, TcpClientConfig};
use tracklink_protocol::{Authentication, Body, HexId, MessageRegistry, RegistrationRequest};

pub struct DeviceLink {
    client: TcpClient,
    phone: PhoneId,
    next_serial: u16,
    state: SessionState,
    auth_code: Option<String>,
}

impl DeviceLink {
    pub fn new(server_addr: SocketAddr, timeout: Duration, phone: PhoneId) -> Self {
        Self {
            client: TcpClient::new(TcpClientConfig {
                server_addr,
                timeout,
            }),
            phone,
            next_serial: 0,
            state: SessionState::Closed,
            auth_code: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref()
    }

    /// Connect, register and authenticate.
    pub async fn open(&mut self, registration: &RegistrationRequest) -> Result<()> {
        self.client.connect().await?;
        self.state = SessionState::Connecting;

        let response = match self
            .exchange(&Body::Registration(registration.clone()))
            .await?
        {
            Body::RegistrationResponse(response) => response,
            other => return Err(GeneratorError::UnexpectedReply(format!("{other:?}"))),
        };
        if !response.result.is_success() {
            return Err(GeneratorError::Rejected {
                message_id: message_id::REGISTRATION,
                result: response.result.as_u8(),
            });
        }
        let code = response
            .auth_code
            .ok_or_else(|| GeneratorError::UnexpectedReply("registration without auth code".into()))?;
        self.state = SessionState::Registered;
        debug!(phone = %self.phone, "Registered");

        self.expect_success(&Body::Authentication(Authentication::new(code.clone())))
            .await?;
        self.auth_code = Some(code);
        self.state = SessionState::Authenticated;
        info!(phone = %self.phone, "Authenticated");
        Ok(())
    }

    /// Send a telemetry message and wait for its success acknowledgement.
    pub async fn request(&mut self, body: &Body) -> Result<()> {
        if !self.is_authenticated() {
            return Err(GeneratorError::NotAuthenticated);
        }
        self.expect_success(body).await
    }

    pub async fn logout(&mut self) -> Result<()> {
        let result = self.request(&Body::Logout).await;
        self.state = SessionState::Closed;
        result
    }

    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        if let Err(e) = self.client.close().await {
            debug!(error = %e, "Error closing link");
        }
    }

    async fn expect_success(&mut self, body: &Body) -> Result<()> {
        match self.exchange(body).await? {
            Body::PlatformResponse(ack) if ack.result.is_success() => Ok(()),
            Body::PlatformResponse(ack) => Err(GeneratorError::Rejected {
                message_id: ack.message_id,
                result: ack.result.as_u8(),
            }),
            other => Err(GeneratorError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Send `body` and return the reply that references its serial.
    async fn exchange(&mut self, body: &Body) -> Result<Body> {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);

        let msg = MessageRegistry::build(self.phone, serial, body)?;
        let sent_id = msg.message_id;
        if let Err(e) = self.client.send(msg).await {
            self.state = SessionState::Closed;
            return Err(e.into());
        }

        loop {
            let reply = match self.client.recv().await {
                Ok(reply) => reply,
                Err(e) => {
                    self.state = SessionState::Closed;
                    return Err(e.into());
                }
            };
            let decoded = match MessageRegistry::decode_message(&reply) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(message_id = %HexId(reply.message_id), error = %e, "Undecodable reply");
                    continue;
                }
            };
            let answers = match &decoded {
                Body::PlatformResponse(ack) => ack.serial == serial && ack.message_id == sent_id,
                Body::RegistrationResponse(resp) => resp.serial == serial,
                _ => false,
            };
            if answers {
                return Ok(decoded);
            }
            debug!(
                message_id = %HexId(reply.message_id),
                waiting_for = serial,
                "Ignoring unrelated server message"
            );
        }
    }
}
