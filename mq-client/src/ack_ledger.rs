//! Per-session acknowledgement ledger (spec ss3, ss4.6, ss8). Tracks every
//! delivered-but-not-yet-acknowledged `(consumerId, systemMessageId)` pair
//! so `ClientAck`/`Transacted` sessions can build `ACKNOWLEDGE` and
//! `REDELIVER` frame bodies.

use parking_lot::Mutex;

use mq_protocol::SysMessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub consumer_id: u64,
    pub sys_message_id: SysMessageId,
}

#[derive(Default)]
pub struct AckLedger {
    entries: Mutex<Vec<DeliveredMessage>>,
}

impl AckLedger {
    pub fn new() -> Self {
        AckLedger {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, consumer_id: u64, sys_message_id: SysMessageId) {
        self.entries.lock().push(DeliveredMessage {
            consumer_id,
            sys_message_id,
        });
    }

    /// Removes and returns every entry up to and including the first match
    /// for `(consumer_id, sys_message_id)`. Per spec ss4.6, client-ack
    /// acknowledges every message delivered before the acknowledged one
    /// through *any* consumer, not just the same one.
    pub fn flush_through(
        &self,
        consumer_id: u64,
        sys_message_id: SysMessageId,
    ) -> Vec<DeliveredMessage> {
        let mut entries = self.entries.lock();
        let cutoff = entries
            .iter()
            .position(|e| e.consumer_id == consumer_id && e.sys_message_id == sys_message_id);
        match cutoff {
            Some(idx) => entries.drain(..=idx).collect(),
            None => Vec::new(),
        }
    }

    /// Removes and returns the entire ledger, e.g. at commit/rollback time.
    pub fn flush_all(&self) -> Vec<DeliveredMessage> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn snapshot(&self) -> Vec<DeliveredMessage> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Serializes a redeliver frame body: a concatenation of
/// `(consumerId:64, systemMessageId)` entries (spec ss4.6).
pub fn encode_redeliver_body(entries: &[DeliveredMessage]) -> Vec<u8> {
    use byteorder::{BigEndian, WriteBytesExt};
    let mut buf = Vec::with_capacity(entries.len() * (8 + mq_protocol::sysid::SYS_MESSAGE_ID_SIZE));
    for entry in entries {
        buf.write_u64::<BigEndian>(entry.consumer_id).unwrap();
        entry.sys_message_id.encode(&mut buf).unwrap();
    }
    buf
}

/// Serializes an acknowledge frame body with the same layout as redeliver
/// (spec ss4.6, ss8 scenario 3).
pub fn encode_acknowledge_body(entries: &[DeliveredMessage]) -> Vec<u8> {
    encode_redeliver_body(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn sys_id(seq: u32) -> SysMessageId {
        SysMessageId {
            sequence: seq,
            ip: Ipv6Addr::LOCALHOST.octets(),
            port: 7676,
            timestamp: 1,
        }
    }

    #[test]
    fn flush_through_clears_every_prior_entry_across_consumers() {
        let ledger = AckLedger::new();
        ledger.record(1, sys_id(1));
        ledger.record(2, sys_id(2));
        ledger.record(1, sys_id(3));

        let flushed = ledger.flush_through(1, sys_id(3));
        assert_eq!(flushed.len(), 3);
        assert!(ledger.is_empty());
    }

    #[test]
    fn flush_through_leaves_later_entries_untouched() {
        let ledger = AckLedger::new();
        ledger.record(1, sys_id(1));
        ledger.record(1, sys_id(2));
        ledger.record(1, sys_id(3));

        let flushed = ledger.flush_through(1, sys_id(2));
        assert_eq!(flushed.len(), 2);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn redeliver_body_concatenates_fixed_width_entries() {
        let entries = vec![DeliveredMessage {
            consumer_id: 7,
            sys_message_id: sys_id(1),
        }];
        let body = encode_redeliver_body(&entries);
        assert_eq!(
            body.len(),
            8 + mq_protocol::sysid::SYS_MESSAGE_ID_SIZE
        );
    }
}
