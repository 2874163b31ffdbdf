//! `Connection`: owns the transport, the read dispatcher, the optional ping
//! thread, and every session opened on it (spec ss4.5). The teacher's own
//! connection-establishment code is tokio/futures-based and has no
//! directly reusable counterpart for this crate's OS-thread model; this
//! module is grounded instead in `Connection.cpp`'s `openConnection`/
//! `exitConnection` state machine (see DESIGN.md).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use log::warn;
use parking_lot::Mutex;

use mq_protocol::{MqError, Result};

use crate::config::ConnectionConfig;
use crate::dispatcher::{MessageSink, ReadDispatcher};
use crate::engine::ProtocolEngine;
use crate::flow::FlowController;
use crate::ping::{ActivityFlag, PingTimer};
use crate::session::{AckMode, ReceiveMode, Session};
use crate::tables::{AckQueueTable, PendingConsumerTable, ProducerFlowTable, ReceiveQueueTable};
use crate::transport::{self, TransportHandle};

pub type ExceptionListener = Box<dyn Fn(MqError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Opening,
    Running,
    Stopped,
    Closed,
    Aborted,
}

/// `getMetaData` (spec ss4.5, ss6): product name/version, not negotiated
/// with the broker so this crate reports its own identity.
#[derive(Debug, Clone)]
pub struct ConnectionMetaData {
    pub product_name: &'static str,
    pub major_version: u32,
    pub minor_version: u32,
    pub micro_version: u32,
}

impl Default for ConnectionMetaData {
    fn default() -> Self {
        ConnectionMetaData {
            product_name: "mq-client-rs",
            major_version: 1,
            minor_version: 0,
            micro_version: 0,
        }
    }
}

/// Feeds `ReadDispatcher`'s generic notification hooks back into the
/// connection without `ReadDispatcher` needing to know about `Connection`
/// itself. `message_arrived`/`flow_paused_signalled` are no-ops here: the
/// connection-wide undelivered-count bump they might otherwise perform is
/// already done unconditionally by `dispatch_one` against the shared
/// `FlowController` (spec ss4.4, ss4.8).
struct ConnectionMessageSink {
    engine: Arc<ProtocolEngine>,
}

impl MessageSink for ConnectionMessageSink {
    fn message_arrived(&self) {}

    fn flow_paused_signalled(&self) {}

    fn consumer_flow_paused_signalled(&self, consumer_id: u64) {
        if let Err(e) = self.engine.resume_flow(Some(consumer_id)) {
            warn!("failed to resume flow for consumer {consumer_id}: {e}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub struct Connection {
    pub(crate) config: ConnectionConfig,
    pub(crate) engine: Arc<ProtocolEngine>,
    transport: Arc<TransportHandle>,
    pub(crate) flow_controller: Arc<FlowController>,
    pub(crate) producer_flows: Arc<ProducerFlowTable>,
    pub(crate) receive_queues: Arc<ReceiveQueueTable>,
    ack_queues: Arc<AckQueueTable>,
    active_durable_names: Mutex<HashSet<String>>,
    state: Mutex<ConnectionState>,
    start_stop_monitor: Mutex<()>,
    exit_monitor: Mutex<()>,
    terminated: AtomicBool,
    dispatcher: Mutex<Option<ReadDispatcher>>,
    reader_thread_id: Mutex<Option<ThreadId>>,
    ping_timer: Mutex<Option<PingTimer>>,
    sessions: Mutex<Vec<Weak<Session>>>,
    exception_listener: Mutex<Option<ExceptionListener>>,
    client_id: Mutex<Option<String>>,
}

impl Connection {
    /// `openConnection` (spec ss4.5): connect transport, stand up the
    /// engine, wire the dispatcher and optional ping thread, then `HELLO`
    /// and (if supplied) `SET_CLIENTID`. Leaves the connection `Stopped` —
    /// the caller must still call `start()`.
    pub fn open(
        config: ConnectionConfig,
        user: &str,
        pass: &str,
        client_id: Option<String>,
        exception_listener: Option<ExceptionListener>,
    ) -> Result<Arc<Connection>> {
        let halves = transport::connect(&config)?;
        let transport = Arc::new(TransportHandle::new(halves));

        let ack_queues = Arc::new(AckQueueTable::new());
        let pending_consumers = Arc::new(PendingConsumerTable::new());
        let producer_flows = Arc::new(ProducerFlowTable::new());
        let receive_queues = Arc::new(ReceiveQueueTable::new());
        let activity = Arc::new(ActivityFlag::default());
        let flow_controller = Arc::new(FlowController::new(&config));

        // A zero timeout in the configuration means "wait forever", not
        // "fail instantly" (spec ss4.3 is silent on zero; see DESIGN.md).
        let ack_timeout = (!config.ack_timeout.is_zero()).then_some(config.ack_timeout);
        let write_timeout = (!config.write_timeout.is_zero()).then_some(config.write_timeout);

        let engine = Arc::new(ProtocolEngine::new(
            transport.clone(),
            ack_timeout,
            write_timeout,
            ack_queues.clone(),
            pending_consumers.clone(),
            activity.clone(),
        ));

        let connection = Arc::new(Connection {
            config: config.clone(),
            engine: engine.clone(),
            transport: transport.clone(),
            flow_controller: flow_controller.clone(),
            producer_flows: producer_flows.clone(),
            receive_queues: receive_queues.clone(),
            ack_queues: ack_queues.clone(),
            active_durable_names: Mutex::new(HashSet::new()),
            state: Mutex::new(ConnectionState::Opening),
            start_stop_monitor: Mutex::new(()),
            exit_monitor: Mutex::new(()),
            terminated: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
            reader_thread_id: Mutex::new(None),
            ping_timer: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
            exception_listener: Mutex::new(exception_listener),
            client_id: Mutex::new(None),
        });

        let message_sink: Arc<dyn MessageSink> = Arc::new(ConnectionMessageSink { engine: engine.clone() });
        let weak_connection = Arc::downgrade(&connection);
        let dispatcher = ReadDispatcher::start(
            transport.clone(),
            ack_queues,
            pending_consumers,
            producer_flows,
            receive_queues,
            flow_controller,
            engine.clone() as Arc<dyn crate::flow::ResumeFlowSender>,
            message_sink,
            activity.clone(),
            move |err, unexpected| {
                if let Some(conn) = weak_connection.upgrade() {
                    conn.exit_connection(err, true, unexpected);
                }
            },
        );
        *connection.reader_thread_id.lock() = dispatcher.thread_id();
        *connection.dispatcher.lock() = Some(dispatcher);

        if config.ping_enabled() {
            let timer = PingTimer::start(config.ping_interval, activity, engine.clone() as Arc<dyn crate::ping::Pinger>);
            *connection.ping_timer.lock() = Some(timer);
        }

        if let Err(e) = engine.hello(user, pass) {
            connection.exit_connection(Some(e.clone()), false, false);
            return Err(e);
        }

        if let Some(id) = &client_id {
            if let Err(e) = engine.set_client_id(id) {
                connection.exit_connection(Some(e.clone()), false, false);
                return Err(e);
            }
            *connection.client_id.lock() = Some(id.clone());
        }

        *connection.state.lock() = ConnectionState::Stopped;
        Ok(connection)
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    pub fn meta_data(&self) -> ConnectionMetaData {
        ConnectionMetaData::default()
    }

    fn check_usable(&self) -> Result<()> {
        match *self.state.lock() {
            ConnectionState::Aborted | ConnectionState::Closed => Err(MqError::BrokerConnectionClosed),
            _ => Ok(()),
        }
    }

    pub fn create_session(self: &Arc<Self>, ack_mode: AckMode, receive_mode: ReceiveMode) -> Result<Arc<Session>> {
        self.check_usable()?;
        let session = Session::open(self.clone(), ack_mode, receive_mode)?;
        if *self.state.lock() == ConnectionState::Running {
            session.start();
        }
        self.sessions.lock().push(Arc::downgrade(&session));
        Ok(session)
    }

    pub(crate) fn register_active_durable(&self, name: String) {
        self.active_durable_names.lock().insert(name);
    }

    pub(crate) fn unregister_active_durable(&self, name: &str) {
        self.active_durable_names.lock().remove(name);
    }

    /// Rejected locally with `CannotUnsubscribeActiveConsumer` while any
    /// consumer on this connection still holds that durable name open
    /// (spec ss4.6, ss8 scenario 4).
    pub fn unsubscribe_durable(&self, durable_name: &str) -> Result<()> {
        self.check_usable()?;
        if self.active_durable_names.lock().contains(durable_name) {
            return Err(MqError::CannotUnsubscribeActiveConsumer);
        }
        self.engine.unsubscribe_durable(durable_name)
    }

    pub fn start(&self) -> Result<()> {
        let _guard = self.start_stop_monitor.lock();
        {
            let state = *self.state.lock();
            match state {
                ConnectionState::Aborted | ConnectionState::Closed => {
                    return Err(MqError::BrokerConnectionClosed)
                }
                ConnectionState::Running => return Ok(()),
                _ => {}
            }
        }
        self.engine.start(None)?;
        for session in self.sessions.lock().iter().filter_map(Weak::upgrade) {
            session.start();
        }
        *self.state.lock() = ConnectionState::Running;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let _guard = self.start_stop_monitor.lock();
        {
            let state = *self.state.lock();
            match state {
                ConnectionState::Aborted | ConnectionState::Closed => {
                    return Err(MqError::BrokerConnectionClosed)
                }
                ConnectionState::Stopped => return Ok(()),
                _ => {}
            }
        }
        for session in self.sessions.lock().iter().filter_map(Weak::upgrade) {
            session.stop();
        }
        self.engine.stop(None)?;
        *self.state.lock() = ConnectionState::Stopped;
        Ok(())
    }

    /// Orderly shutdown: close every session, `GOODBYE`, tear down the
    /// ping timer and dispatcher. Idempotent and always reports success
    /// once past the reader-thread deadlock check (spec ss4.5).
    pub fn close(&self) -> Result<()> {
        if let Some(reader_id) = *self.reader_thread_id.lock() {
            if std::thread::current().id() == reader_id {
                return Err(MqError::ConcurrentDeadlock);
            }
        }

        let _guard = self.exit_monitor.lock();
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.state.lock() = ConnectionState::Closed;

        let sessions: Vec<_> = self.sessions.lock().drain(..).collect();
        for session in sessions.into_iter().filter_map(|w| w.upgrade()) {
            let _ = session.close();
        }

        let _ = self.engine.good_bye(true);

        if let Some(mut timer) = self.ping_timer.lock().take() {
            timer.terminate();
        }
        self.transport.shutdown().ok();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.join();
        }
        self.receive_queues.close_all();
        self.ack_queues.close_all();
        self.producer_flows.close_all(MqError::BrokerConnectionClosed);
        Ok(())
    }

    /// Hard-abort path (spec ss4.5): idempotent per connection lifetime,
    /// wakes every blocked queue/flow with `err`, tears down the ping
    /// timer, and — only when not already running on the reader thread —
    /// joins the dispatcher. Invokes the exception listener exactly once,
    /// and only when `abort` is set.
    pub(crate) fn exit_connection(&self, err: Option<MqError>, from_reader: bool, abort: bool) {
        let _guard = self.exit_monitor.lock();
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = ConnectionState::Aborted;
        let reason = err.unwrap_or(MqError::BrokerConnectionClosed);

        self.receive_queues.close_all();
        self.ack_queues.close_all();
        self.producer_flows.close_all(reason.clone());

        let sessions: Vec<_> = self.sessions.lock().drain(..).collect();
        for session in sessions.into_iter().filter_map(|w| w.upgrade()) {
            let _ = session.close();
        }

        if let Some(mut timer) = self.ping_timer.lock().take() {
            timer.terminate();
        }
        self.transport.shutdown().ok();
        if !from_reader {
            if let Some(dispatcher) = self.dispatcher.lock().take() {
                dispatcher.join();
            }
        }

        if abort {
            if let Some(listener) = self.exception_listener.lock().as_ref() {
                listener(reason);
            }
        }
    }
}
