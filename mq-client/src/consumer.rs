//! `MessageConsumer`: a subscription handle owned exclusively by one
//! `Session` (spec ss4.6). Delivery and acknowledgement bookkeeping live on
//! `Session`; this module only holds the registration the broker assigned
//! and the queue the dispatcher feeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use mq_protocol::{MqError, Result};

use crate::engine::Destination;
use crate::message::Message;
use crate::receive_queue::{ReceiveQueue, Timeout};
use crate::session::Session;

/// Installed by the application for `Async` sessions; invoked by the
/// delivery thread, never by the caller's own thread (spec ss4.6).
pub type MessageListener = Box<dyn Fn(Message) + Send + Sync>;

pub struct MessageConsumer {
    pub(crate) session: Weak<Session>,
    consumer_id: u64,
    destination: Destination,
    selector: Option<String>,
    durable_name: Option<String>,
    shared_subscription_name: Option<String>,
    no_local: bool,
    pub(crate) queue: Arc<ReceiveQueue>,
    listener: Mutex<Option<MessageListener>>,
    closed: AtomicBool,
}

impl MessageConsumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Weak<Session>,
        consumer_id: u64,
        destination: Destination,
        selector: Option<String>,
        durable_name: Option<String>,
        shared_subscription_name: Option<String>,
        no_local: bool,
        queue: Arc<ReceiveQueue>,
    ) -> Arc<Self> {
        Arc::new(MessageConsumer {
            session,
            consumer_id,
            destination,
            selector,
            durable_name,
            shared_subscription_name,
            no_local,
            queue,
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn consumer_id(&self) -> u64 {
        self.consumer_id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn durable_name(&self) -> Option<&str> {
        self.durable_name.as_deref()
    }

    pub fn shared_subscription_name(&self) -> Option<&str> {
        self.shared_subscription_name.as_deref()
    }

    pub fn no_local(&self) -> bool {
        self.no_local
    }

    /// Installs the callback the delivery thread invokes per message.
    /// Ignored on a `Sync` session's consumer (spec ss4.6).
    pub fn set_message_listener(&self, listener: MessageListener) {
        *self.listener.lock() = Some(listener);
    }

    pub(crate) fn invoke_listener(&self, message: Message) {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(message);
        }
    }

    pub(crate) fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Blocks up to `timeout` for the next message on this consumer's own
    /// queue. `Sync` sessions only (spec ss4.6).
    pub fn receive(&self, timeout: Timeout) -> Result<Option<Message>> {
        let session = self.session.upgrade().ok_or(MqError::ConsumerClosed)?;
        session.receive_sync(self, timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Unregisters from the broker and removes this consumer's queue from
    /// the receive-queue table (spec ss4.6).
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(session) = self.session.upgrade() {
            return session.close_consumer(self.consumer_id);
        }
        Ok(())
    }
}
