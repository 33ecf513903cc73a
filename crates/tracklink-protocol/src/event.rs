use crate::body::{BatchLocationUpload, LocationReport, RegistrationRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracklink_core::PhoneId;

/// Something a device session observed, ready for translation.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub phone: PhoneId,
    pub received_at: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Registration(RegistrationRequest),
    Authentication,
    Heartbeat,
    Location(LocationReport),
    BatchLocation(BatchLocationUpload),
    Status(StatusChange),
}

impl EventKind {
    /// Topic suffix for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Registration(_) => "registration",
            EventKind::Authentication => "authentication",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Location(_) => "location",
            EventKind::BatchLocation(_) => "batch_location",
            EventKind::Status(_) => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub online: bool,
    pub reason: StatusReason,
}

impl StatusChange {
    pub fn offline(reason: StatusReason) -> Self {
        StatusChange {
            online: false,
            reason,
        }
    }

    pub fn online(reason: StatusReason) -> Self {
        StatusChange {
            online: true,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
    Authenticated,
    Logout,
    Disconnect,
    IdleTimeout,
    /// Another connection registered the same phone id.
    Superseded,
    ServerShutdown,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::Authenticated => "authenticated",
            StatusReason::Logout => "logout",
            StatusReason::Disconnect => "disconnect",
            StatusReason::IdleTimeout => "idle_timeout",
            StatusReason::Superseded => "superseded",
            StatusReason::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainEvent {
    pub fn new(phone: PhoneId, kind: EventKind) -> Self {
        DomainEvent {
            phone,
            received_at: Utc::now(),
            kind,
        }
    }

    pub fn offline(phone: PhoneId, reason: StatusReason) -> Self {
        Self::new(phone, EventKind::Status(StatusChange::offline(reason)))
    }
}
