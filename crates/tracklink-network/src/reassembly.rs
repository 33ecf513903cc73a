//! Sub-package reassembly.
//!
//! Parts are buffered per message id until every sequence number
//! `1..=total` has arrived, then concatenated in ascending order. Sets that
//! stay incomplete past the timeout are discarded, and at most `max_sets`
//! incomplete sets are held; a new set evicts the oldest.

use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;
use tracklink_core::constants::DEFAULT_MAX_PENDING_SETS;
use tracklink_protocol::{HexId, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// Part stored, more are expected.
    Pending { received: usize, total: u16 },
    /// All parts present; the concatenated body.
    Complete(Bytes),
    /// Part refused; nothing was buffered for it.
    Rejected(String),
}

#[derive(Debug)]
struct PartialBody {
    total: u16,
    parts: BTreeMap<u16, Bytes>,
    started: Instant,
}

#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<u16, PartialBody>,
    timeout: Duration,
    max_parts: u16,
    max_sets: usize,
}

impl Reassembler {
    pub fn new(timeout: Duration, max_parts: u16) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            max_parts,
            max_sets: DEFAULT_MAX_PENDING_SETS,
        }
    }

    pub fn with_max_sets(mut self, max_sets: usize) -> Self {
        self.max_sets = max_sets.max(1);
        self
    }

    /// Buffer one part of a split message.
    ///
    /// Messages without sub-package info complete immediately.
    pub fn push(&mut self, msg: &Message, now: Instant) -> Reassembly {
        let Some(info) = msg.subpackage else {
            return Reassembly::Complete(msg.body.clone());
        };

        if info.total == 0 || info.seq == 0 || info.seq > info.total {
            return Reassembly::Rejected(format!("part {}/{} out of range", info.seq, info.total));
        }
        if info.total > self.max_parts {
            return Reassembly::Rejected(format!(
                "{} parts exceeds the limit of {}",
                info.total, self.max_parts
            ));
        }

        if !self.pending.contains_key(&msg.message_id) {
            self.evict_for_new_set();
        }

        let entry = self
            .pending
            .entry(msg.message_id)
            .or_insert_with(|| PartialBody {
                total: info.total,
                parts: BTreeMap::new(),
                started: now,
            });

        if entry.total != info.total {
            warn!(
                message_id = %HexId(msg.message_id),
                buffered = entry.parts.len(),
                old_total = entry.total,
                new_total = info.total,
                "Sub-package total changed, restarting reassembly"
            );
            *entry = PartialBody {
                total: info.total,
                parts: BTreeMap::new(),
                started: now,
            };
        }

        entry.parts.insert(info.seq, msg.body.clone());
        if entry.parts.len() < usize::from(entry.total) {
            return Reassembly::Pending {
                received: entry.parts.len(),
                total: entry.total,
            };
        }

        let Some(done) = self.pending.remove(&msg.message_id) else {
            return Reassembly::Rejected("reassembly buffer vanished".into());
        };
        let mut body = BytesMut::with_capacity(done.parts.values().map(Bytes::len).sum());
        for part in done.parts.values() {
            body.extend_from_slice(part);
        }
        Reassembly::Complete(body.freeze())
    }

    /// Drop sets older than the timeout; returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.pending.len();
        self.pending.retain(|message_id, partial| {
            let keep = now.saturating_duration_since(partial.started) < timeout;
            if !keep {
                warn!(
                    message_id = %HexId(*message_id),
                    received = partial.parts.len(),
                    total = partial.total,
                    "Discarding incomplete sub-package set"
                );
            }
            keep
        });
        before - self.pending.len()
    }

    pub fn pending_sets(&self) -> usize {
        self.pending.len()
    }

    /// Bytes held across all incomplete sets.
    pub fn buffered_bytes(&self) -> usize {
        self.pending
            .values()
            .flat_map(|partial| partial.parts.values())
            .map(Bytes::len)
            .sum()
    }

    fn evict_for_new_set(&mut self) {
        while self.pending.len() >= self.max_sets {
            let Some(oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, partial)| partial.started)
                .map(|(id, _)| *id)
            else {
                return;
            };
            if let Some(partial) = self.pending.remove(&oldest) {
                warn!(
                    message_id = %HexId(oldest),
                    received = partial.parts.len(),
                    total = partial.total,
                    "Evicting oldest incomplete sub-package set"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklink_core::PhoneId;

    fn part(total: u16, seq: u16, body: &[u8]) -> Message {
        part_of(0x0704, total, seq, body)
    }

    fn part_of(message_id: u16, total: u16, seq: u16, body: &[u8]) -> Message {
        let phone = PhoneId::new("123456789012").unwrap();
        Message::new(message_id, phone, seq, body.to_vec())
            .unwrap()
            .with_subpackage(total, seq)
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(Duration::from_secs(30), 8)
    }

    #[test]
    fn test_in_order() {
        let mut r = reassembler();
        let now = Instant::now();
        assert_eq!(
            r.push(&part(3, 1, b"ab"), now),
            Reassembly::Pending { received: 1, total: 3 }
        );
        assert!(matches!(r.push(&part(3, 2, b"cd"), now), Reassembly::Pending { .. }));
        assert_eq!(
            r.push(&part(3, 3, b"e"), now),
            Reassembly::Complete(Bytes::from_static(b"abcde"))
        );
        assert_eq!(r.pending_sets(), 0);
    }

    #[test]
    fn test_out_of_order_arrival_is_sorted() {
        let mut r = reassembler();
        let now = Instant::now();
        r.push(&part(2, 2, b"world"), now);
        assert_eq!(
            r.push(&part(2, 1, b"hello "), now),
            Reassembly::Complete(Bytes::from_static(b"hello world"))
        );
    }

    #[test]
    fn test_rejects_bad_sequence() {
        let mut r = reassembler();
        let now = Instant::now();
        assert!(matches!(r.push(&part(2, 0, b"x"), now), Reassembly::Rejected(_)));
        assert!(matches!(r.push(&part(2, 3, b"x"), now), Reassembly::Rejected(_)));
        assert!(matches!(r.push(&part(9, 1, b"x"), now), Reassembly::Rejected(_)));
        assert_eq!(r.pending_sets(), 0);
    }

    #[test]
    fn test_total_change_restarts() {
        let mut r = reassembler();
        let now = Instant::now();
        r.push(&part(3, 1, b"old"), now);
        r.push(&part(2, 1, b"new"), now);
        assert_eq!(
            r.push(&part(2, 2, b"!"), now),
            Reassembly::Complete(Bytes::from_static(b"new!"))
        );
    }

    #[test]
    fn test_expired_sets_are_discarded() {
        let mut r = reassembler();
        let start = Instant::now();
        r.push(&part(2, 1, b"a"), start);
        assert_eq!(r.purge_expired(start + Duration::from_secs(10)), 0);
        assert_eq!(r.purge_expired(start + Duration::from_secs(31)), 1);

        // The late second half starts a new set instead of completing.
        assert!(matches!(
            r.push(&part(2, 2, b"b"), start + Duration::from_secs(32)),
            Reassembly::Pending { .. }
        ));
    }

    #[test]
    fn test_pending_sets_are_capped_oldest_first() {
        let mut r = reassembler().with_max_sets(2);
        let start = Instant::now();
        r.push(&part_of(0x0900, 2, 1, &[0; 100]), start);
        r.push(&part_of(0x0901, 2, 1, &[0; 100]), start + Duration::from_millis(1));
        r.push(&part_of(0x0902, 2, 1, &[0; 100]), start + Duration::from_millis(2));
        assert_eq!(r.pending_sets(), 2);
        assert_eq!(r.buffered_bytes(), 200);

        // 0x0900 was evicted: its second half starts over.
        assert!(matches!(
            r.push(&part_of(0x0900, 2, 2, b"x"), start + Duration::from_millis(3)),
            Reassembly::Pending { received: 1, .. }
        ));
        // 0x0902 survived and completes.
        assert!(matches!(
            r.push(&part_of(0x0902, 2, 2, b"x"), start + Duration::from_millis(4)),
            Reassembly::Complete(_)
        ));
    }

    #[test]
    fn test_parts_of_an_existing_set_do_not_evict() {
        let mut r = reassembler().with_max_sets(1);
        let now = Instant::now();
        r.push(&part(3, 1, b"a"), now);
        r.push(&part(3, 2, b"b"), now);
        assert_eq!(r.pending_sets(), 1);
        assert_eq!(
            r.push(&part(3, 3, b"c"), now),
            Reassembly::Complete(Bytes::from_static(b"abc"))
        );
    }
}
