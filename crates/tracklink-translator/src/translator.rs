//! Domain event → topic-addressed JSON.
//!
//! Topics are `{prefix}/{device_id}/{kind}`. A location report is also
//! mirrored to `{prefix}/tracking`, and a successful authentication is
//! followed by a `status` document marking the device online.

use crate::payload::{
    BatchLocationPayload, EventPayload, LocationPayload, RegistrationPayload, StatusPayload,
    TrackingPayload, iso_timestamp,
};
use crate::publisher::{Document, PublishError, Publisher};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use tracklink_network::EventSink;
use tracklink_protocol::{DomainEvent, EventKind, StatusChange, StatusReason};

pub const DEFAULT_TOPIC_PREFIX: &str = "jt808";

pub fn topic(prefix: &str, device_id: &str, kind: &str) -> String {
    format!("{prefix}/{device_id}/{kind}")
}

fn document(topic: String, payload: &impl Serialize) -> Result<Document, PublishError> {
    Ok(Document::new(topic, serde_json::to_value(payload)?))
}

fn status_document(
    prefix: &str,
    event: &DomainEvent,
    change: StatusChange,
) -> Result<Document, PublishError> {
    let device_id = event.phone.to_string();
    let payload = StatusPayload {
        device_id: device_id.clone(),
        timestamp: iso_timestamp(event.received_at),
        status: if change.online { "online" } else { "offline" },
        reason: change.reason.as_str(),
    };
    document(topic(prefix, &device_id, "status"), &payload)
}

/// The primary document for `event`.
pub fn translate(prefix: &str, event: &DomainEvent) -> Result<Document, PublishError> {
    let device_id = event.phone.to_string();
    let timestamp = iso_timestamp(event.received_at);
    let topic = topic(prefix, &device_id, event.kind.name());

    match &event.kind {
        EventKind::Registration(request) => {
            document(topic, &RegistrationPayload::new(device_id, timestamp, request))
        }
        EventKind::Authentication | EventKind::Heartbeat => document(
            topic,
            &EventPayload {
                device_id,
                timestamp,
                event: event.kind.name(),
            },
        ),
        EventKind::Location(report) => document(
            topic,
            &LocationPayload::new(device_id, event.received_at, report),
        ),
        EventKind::BatchLocation(batch) => document(
            topic,
            &BatchLocationPayload::new(device_id, event.received_at, batch),
        ),
        EventKind::Status(change) => status_document(prefix, event, *change),
    }
}

/// Documents published after the primary one.
pub fn companions(prefix: &str, event: &DomainEvent) -> Result<Vec<Document>, PublishError> {
    match &event.kind {
        EventKind::Location(report) => {
            let payload = TrackingPayload::new(
                event.phone.to_string(),
                iso_timestamp(event.received_at),
                report,
            );
            Ok(vec![document(format!("{prefix}/tracking"), &payload)?])
        }
        EventKind::Authentication => Ok(vec![status_document(
            prefix,
            event,
            StatusChange::online(StatusReason::Authenticated),
        )?]),
        _ => Ok(Vec::new()),
    }
}

/// Turns events into documents and hands them to a [`Publisher`].
///
/// Failures are counted and logged; they never reach the session.
pub struct Translator {
    prefix: String,
    publisher: Arc<dyn Publisher>,
    published: AtomicU64,
    failures: AtomicU64,
}

impl Translator {
    pub fn new(prefix: impl Into<String>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            prefix: prefix.into(),
            publisher,
            published: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn handle(&self, event: &DomainEvent) {
        let documents = translate(&self.prefix, event).and_then(|primary| {
            let mut all = vec![primary];
            all.extend(companions(&self.prefix, event)?);
            Ok(all)
        });

        let documents = match documents {
            Ok(documents) => documents,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(phone = %event.phone, kind = event.kind.name(), error = %e, "Failed to translate event");
                return;
            }
        };

        for document in documents {
            let topic = document.topic.clone();
            match self.publisher.publish(document) {
                Ok(()) => {
                    self.published.fetch_add(1, Ordering::Relaxed);
                    debug!(%topic, "Published");
                }
                Err(e) => {
                    let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(%topic, error = %e, failures, "Publish failed");
                }
            }
        }
    }
}

impl EventSink for Translator {
    fn emit(&self, event: DomainEvent) {
        self.handle(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::ChannelPublisher;
    use tracklink_core::PhoneId;

    fn phone() -> PhoneId {
        PhoneId::new("013800138000").unwrap()
    }

    #[test]
    fn test_topic_format() {
        assert_eq!(topic("jt808", "013800138000", "location"), "jt808/013800138000/location");
    }

    #[test]
    fn test_heartbeat_document() {
        let event = DomainEvent::new(phone(), EventKind::Heartbeat);
        let doc = translate("fleet", &event).unwrap();
        assert_eq!(doc.topic, "fleet/013800138000/heartbeat");
        assert_eq!(doc.payload["event"], "heartbeat");
        assert_eq!(doc.payload["device_id"], "013800138000");
        assert!(companions("fleet", &event).unwrap().is_empty());
    }

    #[test]
    fn test_offline_status_document() {
        let event = DomainEvent::offline(phone(), StatusReason::IdleTimeout);
        let doc = translate("jt808", &event).unwrap();
        assert_eq!(doc.topic, "jt808/013800138000/status");
        assert_eq!(doc.payload["status"], "offline");
        assert_eq!(doc.payload["reason"], "idle_timeout");
    }

    #[test]
    fn test_authentication_marks_online() {
        let event = DomainEvent::new(phone(), EventKind::Authentication);
        let extra = companions("jt808", &event).unwrap();
        assert_eq!(extra.len(), 1);
        assert_eq!(extra[0].topic, "jt808/013800138000/status");
        assert_eq!(extra[0].payload["status"], "online");
        assert_eq!(extra[0].payload["reason"], "authenticated");
    }

    #[test]
    fn test_failures_are_counted_not_raised() {
        let (publisher, rx) = ChannelPublisher::new(1);
        drop(rx);
        let translator = Translator::new("jt808", Arc::new(publisher));

        translator.emit(DomainEvent::new(phone(), EventKind::Heartbeat));
        translator.emit(DomainEvent::new(phone(), EventKind::Authentication));

        assert_eq!(translator.published(), 0);
        assert_eq!(translator.failures(), 3);
    }

    #[tokio::test]
    async fn test_handle_publishes_primary_then_companions() {
        let (publisher, mut rx) = ChannelPublisher::new(8);
        let translator = Translator::new("jt808", Arc::new(publisher));

        translator.handle(&DomainEvent::new(phone(), EventKind::Authentication));

        assert_eq!(rx.recv().await.unwrap().topic, "jt808/013800138000/authentication");
        assert_eq!(rx.recv().await.unwrap().topic, "jt808/013800138000/status");
        assert_eq!(translator.published(), 2);
        assert_eq!(translator.failures(), 0);
    }
}
