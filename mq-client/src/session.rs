//! `Session`: an ordered scope for one acknowledgement discipline, owning
//! its consumers, producers, and (for `Async`) the delivery thread (spec
//! ss4.6). Grounded in `Session.cpp`'s ack-mode dispatch and close
//! sequence, adapted from its raw-thread-pointer reentrancy check to
//! `parking_lot::ReentrantMutex`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;
use parking_lot::{Mutex, ReentrantMutex};

use mq_protocol::{MqError, Result, SysMessageId};

use crate::ack_ledger::{encode_acknowledge_body, encode_redeliver_body, AckLedger, DeliveredMessage};
use crate::connection::Connection;
use crate::consumer::MessageConsumer;
use crate::engine::{ConsumerRegistration, Destination, TransactionScope};
use crate::message::Message;
use crate::producer::MessageProducer;
use crate::receive_queue::{ReceiveQueue, Timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Transacted,
    AutoAck,
    ClientAck,
    DupsOkAck,
}

impl AckMode {
    /// Matches the wire values this protocol shares with the JMS ack-mode
    /// constants (`SESSION_TRANSACTED=0`, `AUTO_ACKNOWLEDGE=1`,
    /// `CLIENT_ACKNOWLEDGE=2`, `DUPS_OK_ACKNOWLEDGE=3`).
    pub fn as_i32(self) -> i32 {
        match self {
            AckMode::Transacted => 0,
            AckMode::AutoAck => 1,
            AckMode::ClientAck => 2,
            AckMode::DupsOkAck => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    Sync,
    Async,
}

pub struct Session {
    connection: Arc<Connection>,
    session_id: u64,
    ack_mode: AckMode,
    receive_mode: ReceiveMode,
    dups_ok_limit: usize,
    /// Reentrant so the async delivery thread can hold it across an
    /// `onMessage` callback that itself calls back into `acknowledge`/
    /// `recover` (spec ss4.6, ss5).
    session_mutex: ReentrantMutex<()>,
    transaction_id: Mutex<Option<u64>>,
    is_xa: AtomicBool,
    ack_ledger: AckLedger,
    /// `Some` for `Async`: one queue shared by every consumer this session
    /// owns. `None` for `Sync`, where each consumer owns its own queue.
    session_queue: Option<Arc<ReceiveQueue>>,
    consumers: Mutex<Vec<Arc<MessageConsumer>>>,
    producers: Mutex<Vec<Arc<MessageProducer>>>,
    delivery_thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn open(
        connection: Arc<Connection>,
        ack_mode: AckMode,
        receive_mode: ReceiveMode,
    ) -> Result<Arc<Self>> {
        let session_id = connection.engine.register_session(ack_mode.as_i32())?;
        let transaction_id = if matches!(ack_mode, AckMode::Transacted) {
            Some(connection.engine.start_transaction(&TransactionScope::Session(session_id))?)
        } else {
            None
        };
        let session_queue = match receive_mode {
            ReceiveMode::Async => Some(Arc::new(ReceiveQueue::new())),
            ReceiveMode::Sync => None,
        };
        let dups_ok_limit = connection.config.dups_ok_limit;

        let session = Arc::new(Session {
            connection,
            session_id,
            ack_mode,
            receive_mode,
            dups_ok_limit,
            session_mutex: ReentrantMutex::new(()),
            transaction_id: Mutex::new(transaction_id),
            is_xa: AtomicBool::new(false),
            ack_ledger: AckLedger::new(),
            session_queue,
            consumers: Mutex::new(Vec::new()),
            producers: Mutex::new(Vec::new()),
            delivery_thread: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if let Some(queue) = session.session_queue.clone() {
            queue.start();
            let delivery_session = session.clone();
            let handle = std::thread::Builder::new()
                .name(format!("mq-session-{session_id}-delivery"))
                .spawn(move || delivery_session.delivery_loop(queue))
                .map_err(|_| MqError::CouldNotCreateThread)?;
            *session.delivery_thread.lock() = Some(handle);
        }

        Ok(session)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn receive_mode(&self) -> ReceiveMode {
        self.receive_mode
    }

    pub(crate) fn current_transaction_id(&self) -> u64 {
        self.transaction_id.lock().unwrap_or(0)
    }

    pub(crate) fn set_xa(&self, is_xa: bool) {
        self.is_xa.store(is_xa, Ordering::SeqCst);
    }

    /// Lets an `XaResource` point this session's in-flight transaction at
    /// the id a transaction manager is driving, instead of the one
    /// `Session::open`/`begin_new_transaction` would otherwise manage.
    pub(crate) fn set_current_transaction_id(&self, transaction_id: Option<u64>) {
        *self.transaction_id.lock() = transaction_id;
    }

    pub(crate) fn engine(&self) -> &Arc<crate::engine::ProtocolEngine> {
        &self.connection.engine
    }

    pub fn start(&self) {
        if let Some(queue) = &self.session_queue {
            queue.start();
        }
        for consumer in self.consumers.lock().iter() {
            consumer.queue.start();
        }
    }

    pub fn stop(&self) {
        if let Some(queue) = &self.session_queue {
            queue.stop();
        }
        for consumer in self.consumers.lock().iter() {
            consumer.queue.stop();
        }
    }

    pub fn create_consumer(self: &Arc<Self>, reg: ConsumerRegistration) -> Result<Arc<MessageConsumer>> {
        if reg.durable_name.is_some() && reg.destination.is_queue {
            return Err(MqError::QueueConsumerCannotBeDurable);
        }
        if reg.shared_subscription_name.is_some() && reg.destination.is_queue {
            return Err(MqError::SharedSubscriptionNotTopic);
        }

        let consumer_id = self.connection.engine.register_consumer(self.session_id, &reg)?;
        let queue = match &self.session_queue {
            Some(shared) => shared.clone(),
            None => Arc::new(ReceiveQueue::new()),
        };
        self.connection.receive_queues.insert(consumer_id, queue.clone());
        if let Some(name) = &reg.durable_name {
            self.connection.register_active_durable(name.clone());
        }

        let consumer = MessageConsumer::new(
            Arc::downgrade(self),
            consumer_id,
            reg.destination,
            reg.selector,
            reg.durable_name,
            reg.shared_subscription_name,
            reg.no_local,
            queue,
        );
        self.consumers.lock().push(consumer.clone());
        Ok(consumer)
    }

    pub fn create_producer(self: &Arc<Self>, destination: Option<Destination>) -> Result<Arc<MessageProducer>> {
        let registration_destination = destination.clone().unwrap_or_default();
        let reg = self.connection.engine.register_producer(self.session_id, &registration_destination)?;
        let flow = Arc::new(crate::flow::ProducerFlow::new(reg.chunk_size, reg.chunk_bytes));
        self.connection.producer_flows.insert(reg.producer_id, flow.clone());

        let producer = MessageProducer::new(
            Arc::downgrade(self),
            self.connection.engine.clone(),
            self.connection.producer_flows.clone(),
            reg.producer_id,
            flow,
            destination,
        );
        self.producers.lock().push(producer.clone());
        Ok(producer)
    }

    /// `Sync` sessions only; `Async` sessions deliver through
    /// `MessageConsumer::set_message_listener` instead (spec ss4.6).
    pub(crate) fn receive_sync(&self, consumer: &MessageConsumer, timeout: Timeout) -> Result<Option<Message>> {
        if matches!(self.receive_mode, ReceiveMode::Async) {
            return Err(MqError::InvalidArgument("receive() is not valid on an Async session".into()));
        }
        let packet = match consumer.queue.dequeue_wait(timeout) {
            Some(p) => p,
            None => return Ok(None),
        };
        let consumer_id = packet.consumer_id;
        let sys_id = packet.sys_message_id;
        let message = Message::from_packet(packet);
        self.after_delivery(consumer_id, sys_id);
        consumer.queue.receive_done();
        Ok(Some(message))
    }

    fn delivery_loop(self: Arc<Self>, queue: Arc<ReceiveQueue>) {
        loop {
            let packet = match queue.dequeue_wait(Timeout::Forever) {
                Some(p) => p,
                None => break,
            };
            let guard = self.session_mutex.lock();
            if self.closed.load(Ordering::SeqCst) {
                drop(guard);
                queue.receive_done();
                break;
            }
            let consumer_id = packet.consumer_id;
            let sys_id = packet.sys_message_id;
            let message = Message::from_packet(packet);
            match self.find_consumer(consumer_id) {
                Some(consumer) if consumer.has_listener() => consumer.invoke_listener(message),
                _ => debug!("async delivery: no listener for consumer {consumer_id} in session {}", self.session_id),
            }
            drop(guard);
            self.after_delivery(consumer_id, sys_id);
            queue.receive_done();
        }
    }

    fn find_consumer(&self, consumer_id: u64) -> Option<Arc<MessageConsumer>> {
        self.consumers.lock().iter().find(|c| c.consumer_id() == consumer_id).cloned()
    }

    /// Per-ack-mode bookkeeping after one message has been handed to the
    /// application, whether via sync `receive()` or the async listener
    /// (spec ss4.6).
    fn after_delivery(&self, consumer_id: u64, sys_message_id: SysMessageId) {
        let _guard = self.session_mutex.lock();
        self.connection.flow_controller.message_delivered(self.connection.engine.as_ref());
        match self.ack_mode {
            AckMode::AutoAck => {
                self.ack_ledger.record(consumer_id, sys_message_id);
                if let Err(e) = self.flush_through(consumer_id, sys_message_id, false) {
                    debug!("auto-ack send failed: {e}");
                }
            }
            AckMode::DupsOkAck => {
                self.ack_ledger.record(consumer_id, sys_message_id);
                let queue_drained = self.session_queue.as_ref().map(|q| q.len() == 0).unwrap_or(true);
                if self.ack_ledger.len() >= self.dups_ok_limit || queue_drained {
                    if let Err(e) = self.flush_all(false) {
                        debug!("dups-ok flush failed: {e}");
                    }
                }
            }
            AckMode::ClientAck | AckMode::Transacted => {
                self.ack_ledger.record(consumer_id, sys_message_id);
            }
        }
    }

    fn flush_through(&self, consumer_id: u64, sys_message_id: SysMessageId, block: bool) -> Result<()> {
        let entries = self.ack_ledger.flush_through(consumer_id, sys_message_id);
        if entries.is_empty() {
            return Ok(());
        }
        let body = encode_acknowledge_body(&entries);
        self.connection.engine.acknowledge(self.session_id, self.current_transaction_id(), body, block)
    }

    fn flush_all(&self, block: bool) -> Result<()> {
        let entries = self.ack_ledger.flush_all();
        if entries.is_empty() {
            return Ok(());
        }
        let body = encode_acknowledge_body(&entries);
        self.connection.engine.acknowledge(self.session_id, self.current_transaction_id(), body, block)
    }

    /// `ClientAck` only: flushes every unacked message up to and including
    /// `(consumer_id, sys_message_id)`, across every consumer in this
    /// session (spec ss4.6, ss7).
    pub fn acknowledge(&self, consumer_id: u64, sys_message_id: SysMessageId) -> Result<()> {
        let _guard = self.session_mutex.lock();
        if matches!(self.ack_mode, AckMode::Transacted) {
            return Err(MqError::TransactedSession);
        }
        self.flush_through(consumer_id, sys_message_id, true)
    }

    pub fn commit(&self) -> Result<()> {
        let _guard = self.session_mutex.lock();
        if !matches!(self.ack_mode, AckMode::Transacted) {
            return Err(MqError::NotTransactedSession);
        }
        self.flush_all(true)?;
        self.connection.engine.commit_transaction(self.current_transaction_id(), None, false)?;
        self.begin_new_transaction()
    }

    pub fn rollback(&self) -> Result<()> {
        let _guard = self.session_mutex.lock();
        if !matches!(self.ack_mode, AckMode::Transacted) {
            return Err(MqError::NotTransactedSession);
        }
        self.recover_locked()?;
        self.connection.engine.rollback_transaction(self.current_transaction_id(), None)?;
        self.begin_new_transaction()
    }

    /// Non-transacted sessions only; transacted sessions recover
    /// implicitly via `rollback` (spec ss4.6).
    pub fn recover(&self) -> Result<()> {
        let _guard = self.session_mutex.lock();
        if matches!(self.ack_mode, AckMode::Transacted) {
            return Err(MqError::TransactedSession);
        }
        self.recover_locked()
    }

    fn begin_new_transaction(&self) -> Result<()> {
        loop {
            match self.connection.engine.start_transaction(&TransactionScope::Session(self.session_id)) {
                Ok(id) => {
                    *self.transaction_id.lock() = Some(id);
                    return Ok(());
                }
                Err(MqError::TransactionIdInUse) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Stops broker delivery, builds the redeliver block from the session
    /// queue or every consumer's queue plus the ack ledger, sends one
    /// `REDELIVER`, then restarts (spec ss4.6). Shared by `recover()` and
    /// `rollback()`'s implicit recovery; this crate applies the same
    /// unconditional `CLIENT_ACKNOWLEDGE`-shaped redeliver body regardless
    /// of ack mode, matching an ambiguity the original leaves unresolved
    /// (see DESIGN.md).
    fn recover_locked(&self) -> Result<()> {
        self.connection.engine.stop(Some(self.session_id))?;
        let mut entries = self.ack_ledger.flush_all();
        entries.extend(self.drain_queued_packets());
        if !entries.is_empty() {
            let body = encode_redeliver_body(&entries);
            self.connection.engine.redeliver(self.session_id, body, true, true)?;
        }
        self.connection.engine.start(Some(self.session_id))
    }

    fn drain_queued_packets(&self) -> Vec<DeliveredMessage> {
        let mut collected = Vec::new();
        if let Some(queue) = &self.session_queue {
            while let Some(packet) = queue.dequeue_wait(Timeout::NoWait) {
                collected.push(DeliveredMessage {
                    consumer_id: packet.consumer_id,
                    sys_message_id: packet.sys_message_id,
                });
                queue.receive_done();
            }
        } else {
            for consumer in self.consumers.lock().iter() {
                while let Some(packet) = consumer.queue.dequeue_wait(Timeout::NoWait) {
                    collected.push(DeliveredMessage {
                        consumer_id: packet.consumer_id,
                        sys_message_id: packet.sys_message_id,
                    });
                    consumer.queue.receive_done();
                }
            }
        }
        collected
    }

    pub(crate) fn forget_producer(&self, producer_id: u64) {
        self.producers.lock().retain(|p| p.producer_id() != producer_id);
    }

    /// Unregisters from the broker and removes the consumer's queue from
    /// the connection's receive-queue table, unless it's the shared async
    /// session queue other consumers still feed (spec ss4.6).
    pub(crate) fn close_consumer(&self, consumer_id: u64) -> Result<()> {
        let durable_name = self
            .consumers
            .lock()
            .iter()
            .find(|c| c.consumer_id() == consumer_id)
            .and_then(|c| c.durable_name().map(str::to_string));
        self.consumers.lock().retain(|c| c.consumer_id() != consumer_id);
        if let Some(queue) = self.connection.receive_queues.remove(consumer_id) {
            let is_shared = self.session_queue.as_ref().map(|sq| Arc::ptr_eq(sq, &queue)).unwrap_or(false);
            if !is_shared {
                queue.close(false);
            }
        }
        if let Some(durable_name) = durable_name {
            self.connection.unregister_active_durable(&durable_name);
        }
        crate::tolerate_broker_closed(self.connection.engine.unregister_consumer(consumer_id))
    }

    /// Close all producers; stop the session (awaiting in-flight async
    /// delivery); close all consumers; roll back an open non-XA
    /// transaction; stop the delivery thread; `DESTROY_SESSION`. Each step
    /// tolerates a connection already gone (spec ss4.6).
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let producers: Vec<_> = self.producers.lock().drain(..).collect();
        for producer in producers {
            crate::tolerate_broker_closed(producer.close())?;
        }

        self.stop();

        let consumers: Vec<_> = self.consumers.lock().drain(..).collect();
        for consumer in consumers {
            crate::tolerate_broker_closed(self.close_consumer(consumer.consumer_id()))?;
        }

        if matches!(self.ack_mode, AckMode::Transacted) && !self.is_xa.load(Ordering::SeqCst) {
            crate::tolerate_broker_closed(
                self.connection.engine.rollback_transaction(self.current_transaction_id(), None),
            )?;
        }

        if let Some(queue) = &self.session_queue {
            queue.close(false);
        }
        if let Some(handle) = self.delivery_thread.lock().take() {
            let _ = handle.join();
        }

        crate::tolerate_broker_closed(self.connection.engine.unregister_session(self.session_id))
    }
}

