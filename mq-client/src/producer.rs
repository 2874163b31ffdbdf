//! `MessageProducer`: a send handle owned exclusively by one `Session`
//! (spec ss4.6, ss4.8). Flow-controlled per producer credit, replenished by
//! `RESUME_FLOW` frames the dispatcher routes by producer id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use mq_protocol::{MqError, Result};

use crate::engine::{Destination, OutboundMessage, ProtocolEngine};
use crate::flow::ProducerFlow;
use crate::session::Session;
use crate::tables::ProducerFlowTable;

pub struct MessageProducer {
    pub(crate) session: Weak<Session>,
    engine: Arc<ProtocolEngine>,
    producer_flows: Arc<ProducerFlowTable>,
    producer_id: u64,
    flow: Arc<ProducerFlow>,
    destination: Mutex<Option<Destination>>,
    closed: AtomicBool,
}

impl MessageProducer {
    pub(crate) fn new(
        session: Weak<Session>,
        engine: Arc<ProtocolEngine>,
        producer_flows: Arc<ProducerFlowTable>,
        producer_id: u64,
        flow: Arc<ProducerFlow>,
        destination: Option<Destination>,
    ) -> Arc<Self> {
        Arc::new(MessageProducer {
            session,
            engine,
            producer_flows,
            producer_id,
            flow,
            destination: Mutex::new(destination),
            closed: AtomicBool::new(false),
        })
    }

    pub fn producer_id(&self) -> u64 {
        self.producer_id
    }

    /// `None` means this producer was created without a destination and
    /// every `send` must supply one on `message.destination` (spec ss4.6).
    pub fn destination(&self) -> Option<Destination> {
        self.destination.lock().clone()
    }

    /// Blocks on per-producer flow-control credit, then writes the message
    /// under the session's current transaction (or `0` outside a
    /// transaction).
    pub fn send(&self, mut message: OutboundMessage, request_ack: bool) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MqError::ProducerClosed);
        }
        let session = self.session.upgrade().ok_or(MqError::SessionClosed)?;
        if let Some(dest) = self.destination.lock().clone() {
            message.destination = dest;
        }
        self.flow.check_flow_control(message.body.len() as i32)?;
        self.engine.write_jms_message(
            session.session_id(),
            self.producer_id,
            session.current_transaction_id(),
            &message,
            request_ack,
        )
    }

    /// Unregisters from the broker and drops this producer's flow-control
    /// state (spec ss4.6).
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flow.close(MqError::ProducerClosed);
        self.producer_flows.remove(self.producer_id);
        if let Some(session) = self.session.upgrade() {
            session.forget_producer(self.producer_id);
        }
        crate::tolerate_broker_closed(self.engine.unregister_producer(self.producer_id))
    }
}
