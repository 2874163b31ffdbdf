//! Connection-scoped lookup tables (spec ss3): producer flow by producer
//! id, receive queue by consumer id, ack queue by ack id, and pending
//! (not-yet-acknowledged) `ADD_CONSUMER` requests by ack id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::flow::ProducerFlow;
use crate::receive_queue::ReceiveQueue;

#[derive(Default)]
pub struct ProducerFlowTable {
    entries: Mutex<HashMap<u64, Arc<ProducerFlow>>>,
}

impl ProducerFlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, producer_id: u64, flow: Arc<ProducerFlow>) {
        self.entries.lock().insert(producer_id, flow);
    }

    pub fn get(&self, producer_id: u64) -> Option<Arc<ProducerFlow>> {
        self.entries.lock().get(&producer_id).cloned()
    }

    pub fn remove(&self, producer_id: u64) -> Option<Arc<ProducerFlow>> {
        self.entries.lock().remove(&producer_id)
    }

    /// Wakes every blocked sender with `reason`, e.g. on a hard abort (spec
    /// ss4.5's `exitConnection`).
    pub fn close_all(&self, reason: mq_protocol::MqError) {
        let entries = self.entries.lock();
        for flow in entries.values() {
            flow.close(reason.clone());
        }
    }
}

#[derive(Default)]
pub struct ReceiveQueueTable {
    entries: Mutex<HashMap<u64, Arc<ReceiveQueue>>>,
}

impl ReceiveQueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, consumer_id: u64, queue: Arc<ReceiveQueue>) {
        self.entries.lock().insert(consumer_id, queue);
    }

    pub fn get(&self, consumer_id: u64) -> Option<Arc<ReceiveQueue>> {
        self.entries.lock().get(&consumer_id).cloned()
    }

    pub fn remove(&self, consumer_id: u64) -> Option<Arc<ReceiveQueue>> {
        self.entries.lock().remove(&consumer_id)
    }

    /// Closes and removes every queue, e.g. on hard abort (spec ss8
    /// scenario 5).
    pub fn close_all(&self) {
        let mut entries = self.entries.lock();
        for (_, queue) in entries.drain() {
            queue.close(false);
        }
    }
}

#[derive(Default)]
pub struct AckQueueTable {
    entries: Mutex<HashMap<u64, Arc<ReceiveQueue>>>,
}

impl AckQueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ack_id: u64, queue: Arc<ReceiveQueue>) {
        self.entries.lock().insert(ack_id, queue);
    }

    pub fn get(&self, ack_id: u64) -> Option<Arc<ReceiveQueue>> {
        self.entries.lock().get(&ack_id).cloned()
    }

    pub fn remove(&self, ack_id: u64) -> Option<Arc<ReceiveQueue>> {
        self.entries.lock().remove(&ack_id)
    }

    pub fn close_all(&self) {
        let mut entries = self.entries.lock();
        for (_, queue) in entries.drain() {
            queue.close(false);
        }
    }
}

/// A one-shot rendezvous between `ProtocolEngine::register_consumer`
/// (blocked on the caller's thread) and `ReadDispatcher` (which observes
/// `ADD_CONSUMER_REPLY` and resolves it with the broker-assigned consumer
/// id, or an error mapped from its status) (spec ss4.4).
#[derive(Default)]
pub struct PendingConsumerSlot {
    result: Mutex<Option<std::result::Result<u64, mq_protocol::MqError>>>,
    ready: Condvar,
}

impl PendingConsumerSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn complete(&self, result: std::result::Result<u64, mq_protocol::MqError>) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.ready.notify_all();
    }

    pub fn wait(&self, timeout: Option<std::time::Duration>) -> std::result::Result<u64, mq_protocol::MqError> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            let timed_out = match timeout {
                Some(d) => self.ready.wait_for(&mut slot, d).timed_out(),
                None => {
                    self.ready.wait(&mut slot);
                    false
                }
            };
            if timed_out {
                return Err(mq_protocol::MqError::Timeout);
            }
        }
    }
}

/// A consumer awaiting its broker-assigned id from `ADD_CONSUMER_REPLY`
/// (spec ss4.4).
#[derive(Default)]
pub struct PendingConsumerTable {
    entries: Mutex<HashMap<u64, Arc<PendingConsumerSlot>>>,
}

impl PendingConsumerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ack_id: u64, slot: Arc<PendingConsumerSlot>) {
        self.entries.lock().insert(ack_id, slot);
    }

    pub fn get(&self, ack_id: u64) -> Option<Arc<PendingConsumerSlot>> {
        self.entries.lock().get(&ack_id).cloned()
    }

    pub fn remove(&self, ack_id: u64) -> Option<Arc<PendingConsumerSlot>> {
        self.entries.lock().remove(&ack_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_queue_table_round_trips() {
        let table = ReceiveQueueTable::new();
        let queue = Arc::new(ReceiveQueue::new());
        table.insert(1, queue.clone());
        assert!(table.get(1).is_some());
        assert!(table.remove(1).is_some());
        assert!(table.get(1).is_none());
    }

    #[test]
    fn pending_consumer_table_round_trips() {
        let table = PendingConsumerTable::new();
        let slot = PendingConsumerSlot::new();
        table.insert(7, slot.clone());
        assert!(table.get(7).is_some());
        slot.complete(Ok(42));
        let removed = table.remove(7).expect("slot still present");
        assert_eq!(removed.wait(None), Ok(42));
        assert!(table.remove(7).is_none());
    }

    #[test]
    fn producer_flow_table_close_all_wakes_every_blocked_sender() {
        let table = ProducerFlowTable::new();
        let flow = Arc::new(ProducerFlow::new(0, -1));
        table.insert(1, flow.clone());
        let flow2 = flow.clone();
        let handle = std::thread::spawn(move || flow2.check_flow_control(10));
        std::thread::sleep(std::time::Duration::from_millis(50));
        table.close_all(mq_protocol::MqError::BrokerConnectionClosed);
        assert_eq!(handle.join().unwrap(), Err(mq_protocol::MqError::BrokerConnectionClosed));
    }

    #[test]
    fn pending_consumer_slot_times_out_when_never_completed() {
        let slot = PendingConsumerSlot::new();
        let result = slot.wait(Some(std::time::Duration::from_millis(20)));
        assert_eq!(result, Err(mq_protocol::MqError::Timeout));
    }
}
