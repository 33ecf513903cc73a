//! Per-connection device session.
//!
//! # States
//!
//! - `Connecting`: socket accepted, nothing known about the device
//! - `Registered`: 0x0100 accepted, auth code issued
//! - `Authenticated`: auth code echoed back; telemetry is accepted
//! - `Closed`: terminal
//!
//! # Valid Transitions
//!
//! - Connecting → Registered → Authenticated → Closed
//! - any state → Closed (disconnect, idle timeout, superseded, shutdown)
//!
//! [`DeviceSession::handle`] is synchronous and owns no I/O: it takes one
//! decoded frame and returns the reply, the domain event and whether the
//! connection should close. The server loop does the reading and writing.

use crate::reassembly::{Reassembler, Reassembly};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracklink_core::{
    Error, PhoneId, RegistrationResult, Result, ResultCode,
    constants::{
        DEFAULT_MAX_PENDING_SETS, DEFAULT_MAX_SUBPACKAGES, DEFAULT_SUBPACKAGE_TIMEOUT_SECS,
        message_id,
    },
};
use tracklink_protocol::{
    Body, DomainEvent, EventKind, GeneralResponse, HexId, Message, MessageRegistry,
    RegistrationResponse, StatusReason,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Registered,
    Authenticated,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "Connecting",
            SessionState::Registered => "Registered",
            SessionState::Authenticated => "Authenticated",
            SessionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Connecting, SessionState::Registered)
                | (SessionState::Registered, SessionState::Authenticated)
                | (
                    SessionState::Connecting | SessionState::Registered | SessionState::Authenticated,
                    SessionState::Closed
                )
        )
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub subpackage_timeout: Duration,
    pub max_subpackages: u16,
    pub max_pending_sets: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subpackage_timeout: Duration::from_secs(DEFAULT_SUBPACKAGE_TIMEOUT_SECS),
            max_subpackages: DEFAULT_MAX_SUBPACKAGES,
            max_pending_sets: DEFAULT_MAX_PENDING_SETS,
        }
    }
}

/// Result of handling one frame.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    pub reply: Option<Message>,
    pub event: Option<DomainEvent>,
    /// Set when this frame completed a registration; the server installs
    /// the session in its directory under this phone id.
    pub registered: Option<PhoneId>,
    pub close: bool,
}

pub struct DeviceSession {
    state: SessionState,
    phone: Option<PhoneId>,
    auth_code: Option<String>,
    last_activity: Instant,
    reassembler: Reassembler,
    next_serial: u16,
}

impl DeviceSession {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: SessionState::Connecting,
            phone: None,
            auth_code: None,
            last_activity: Instant::now(),
            reassembler: Reassembler::new(config.subpackage_timeout, config.max_subpackages)
                .with_max_sets(config.max_pending_sets),
            next_serial: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Phone id bound at registration.
    pub fn phone(&self) -> Option<PhoneId> {
        self.phone
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Incomplete sub-package sets currently buffered.
    pub fn pending_subpackages(&self) -> usize {
        self.reassembler.pending_sets()
    }

    /// # Errors
    /// Returns `Error::InvalidStateTransition` for moves outside the table.
    pub fn transition_to(&mut self, target: SessionState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        debug!(from = %self.state, to = %target, "Session transition");
        self.state = target;
        Ok(())
    }

    /// Close the session; yields the offline event unless it was already
    /// closed or never identified itself.
    pub fn close(&mut self, reason: StatusReason) -> Option<DomainEvent> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        let phone = self.phone?;
        info!(phone = %phone, reason = %reason, "Session closed");
        Some(DomainEvent::offline(phone, reason))
    }

    pub fn handle(&mut self, msg: &Message, now: Instant) -> SessionOutcome {
        if self.state == SessionState::Closed {
            return SessionOutcome {
                close: true,
                ..SessionOutcome::default()
            };
        }

        self.last_activity = now;
        self.reassembler.purge_expired(now);

        // Only an authenticated terminal may make the session buffer parts.
        if msg.subpackage.is_some() && self.state != SessionState::Authenticated {
            warn!(
                state = %self.state,
                message_id = %HexId(msg.message_id),
                "Sub-package before authentication"
            );
            return self.general_reply(msg, ResultCode::Failure);
        }

        let body = match self.reassembler.push(msg, now) {
            Reassembly::Complete(body) => body,
            Reassembly::Pending { received, total } => {
                debug!(
                    message_id = %HexId(msg.message_id),
                    received,
                    total,
                    "Buffered sub-package"
                );
                return self.general_reply(msg, ResultCode::Success);
            }
            Reassembly::Rejected(reason) => {
                warn!(message_id = %HexId(msg.message_id), %reason, "Sub-package rejected");
                return self.general_reply(msg, ResultCode::Failure);
            }
        };

        if let Some(bound) = self.phone
            && bound != msg.phone
        {
            warn!(bound = %bound, got = %msg.phone, "Frame for a different phone id");
            return self.general_reply(msg, ResultCode::Failure);
        }

        let decoded = MessageRegistry::decode(msg.message_id, &body);
        match (self.state, decoded) {
            (_, Err(e)) if msg.message_id == message_id::REGISTRATION => {
                warn!(phone = %msg.phone, error = %e, "Malformed registration");
                self.registration_reply(msg, RegistrationResponse::failure(
                    msg.serial,
                    RegistrationResult::VehicleNotFound,
                ))
            }
            (_, Err(e)) => {
                warn!(message_id = %HexId(msg.message_id), error = %e, "Malformed body");
                self.general_reply(msg, ResultCode::MessageError)
            }

            (SessionState::Connecting, Ok(Body::Registration(request))) => {
                if !msg.phone.is_valid() {
                    warn!(phone = %msg.phone, "Registration with non-decimal phone id");
                    return self.registration_reply(
                        msg,
                        RegistrationResponse::failure(msg.serial, RegistrationResult::TerminalNotFound),
                    );
                }
                let code = uuid::Uuid::new_v4().simple().to_string();
                self.phone = Some(msg.phone);
                self.auth_code = Some(code.clone());
                self.state = SessionState::Registered;
                info!(phone = %msg.phone, terminal_id = %request.terminal_id, "Device registered");

                let mut outcome =
                    self.registration_reply(msg, RegistrationResponse::success(msg.serial, code));
                outcome.event = Some(DomainEvent::new(msg.phone, EventKind::Registration(request)));
                outcome.registered = Some(msg.phone);
                outcome
            }
            (SessionState::Registered, Ok(Body::Registration(_))) => {
                // Lost 0x8100: hand out the same code again.
                let code = self.auth_code.clone().unwrap_or_default();
                debug!(phone = %msg.phone, "Repeated registration, reissuing auth code");
                self.registration_reply(msg, RegistrationResponse::success(msg.serial, code))
            }
            (SessionState::Authenticated, Ok(Body::Registration(_))) => self.registration_reply(
                msg,
                RegistrationResponse::failure(msg.serial, RegistrationResult::TerminalAlreadyRegistered),
            ),

            (
                SessionState::Registered | SessionState::Authenticated,
                Ok(Body::Authentication(auth)),
            ) => {
                if self.auth_code.as_deref() != Some(auth.auth_code.as_str()) {
                    warn!(phone = %msg.phone, "Authentication code mismatch");
                    return self.general_reply(msg, ResultCode::Failure);
                }
                let mut outcome = self.general_reply(msg, ResultCode::Success);
                if self.state == SessionState::Registered {
                    self.state = SessionState::Authenticated;
                    info!(phone = %msg.phone, "Device authenticated");
                    outcome.event = Some(DomainEvent::new(msg.phone, EventKind::Authentication));
                }
                outcome
            }

            (SessionState::Authenticated, Ok(Body::Heartbeat)) => {
                self.accept(msg, EventKind::Heartbeat)
            }
            (SessionState::Authenticated, Ok(Body::Location(report))) => {
                self.accept(msg, EventKind::Location(report))
            }
            (SessionState::Authenticated, Ok(Body::BatchLocation(batch))) => {
                self.accept(msg, EventKind::BatchLocation(batch))
            }
            (SessionState::Authenticated, Ok(Body::Logout)) => {
                let mut outcome = self.general_reply(msg, ResultCode::Success);
                outcome.event = self.close(StatusReason::Logout);
                outcome.close = true;
                outcome
            }
            (SessionState::Authenticated, Ok(Body::TerminalResponse(resp))) => {
                debug!(
                    phone = %msg.phone,
                    answered = %HexId(resp.message_id),
                    result = ?resp.result,
                    "Terminal response"
                );
                SessionOutcome::default()
            }
            (SessionState::Authenticated, Ok(_)) => {
                warn!(message_id = %HexId(msg.message_id), "Unsupported message");
                self.general_reply(msg, ResultCode::Unsupported)
            }

            (state, Ok(_)) => {
                warn!(
                    %state,
                    message_id = %HexId(msg.message_id),
                    "Message out of sequence"
                );
                self.general_reply(msg, ResultCode::Failure)
            }
        }
    }

    fn accept(&mut self, msg: &Message, kind: EventKind) -> SessionOutcome {
        debug!(phone = %msg.phone, kind = kind.name(), "Accepted");
        let mut outcome = self.general_reply(msg, ResultCode::Success);
        outcome.event = Some(DomainEvent::new(msg.phone, kind));
        outcome
    }

    fn next_serial(&mut self) -> u16 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        serial
    }

    fn general_reply(&mut self, to: &Message, result: ResultCode) -> SessionOutcome {
        let body = Body::PlatformResponse(GeneralResponse::new(to.serial, to.message_id, result));
        self.reply(to, &body)
    }

    fn registration_reply(&mut self, to: &Message, response: RegistrationResponse) -> SessionOutcome {
        self.reply(to, &Body::RegistrationResponse(response))
    }

    fn reply(&mut self, to: &Message, body: &Body) -> SessionOutcome {
        let serial = self.next_serial();
        let reply = match MessageRegistry::build(to.phone, serial, body) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(error = %e, "Failed to build reply");
                None
            }
        };
        SessionOutcome {
            reply,
            ..SessionOutcome::default()
        }
    }
}
