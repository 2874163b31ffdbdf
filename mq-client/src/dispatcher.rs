//! The read dispatcher (spec ss4.4): a single thread per connection that owns
//! all socket reads and routes every inbound packet by type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};

use mq_protocol::constants::*;
use mq_protocol::status::STATUS_OK;
use mq_protocol::{status_to_error, Packet, PacketType};

use crate::flow::{FlowController, ResumeFlowSender};
use crate::ping::ActivityFlag;
use crate::tables::{AckQueueTable, PendingConsumerTable, ProducerFlowTable, ReceiveQueueTable};
use crate::transport::TransportHandle;

/// What the dispatcher does after a `TEXT_MESSAGE`/`BYTES_MESSAGE`/`MESSAGE`
/// packet is routed to a receive queue: bumping the connection-wide
/// undelivered count and resuming a per-consumer pause both require state
/// the dispatcher itself doesn't own (spec ss4.4, ss4.8). `Connection` wires
/// these callbacks in; `ReadDispatcher` never reaches into `Connection`
/// directly to keep the module testable in isolation.
pub trait MessageSink: Send + Sync {
    fn message_arrived(&self);
    fn flow_paused_signalled(&self);
    fn consumer_flow_paused_signalled(&self, consumer_id: u64);
}

pub struct ReadDispatcher {
    exit: Arc<AtomicBool>,
    goodbye_received: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// A single dispatch pass over one inbound packet; exposed as a free
/// function so both the live thread loop and tests can drive it directly
/// without standing up a whole `ReadDispatcher`.
#[allow(clippy::too_many_arguments)]
fn dispatch_one(
    packet: Packet,
    ack_queues: &AckQueueTable,
    pending_consumers: &PendingConsumerTable,
    producer_flows: &ProducerFlowTable,
    receive_queues: &ReceiveQueueTable,
    flow_controller: &FlowController,
    resume_sender: &dyn ResumeFlowSender,
    message_sink: &dyn MessageSink,
    goodbye_received: &AtomicBool,
) {
    match packet.packet_type {
        PacketType::Ping | PacketType::Debug => {}

        PacketType::HelloReply => {
            // connection id extraction happens in ProtocolEngine::hello,
            // which reads this same reply off its own ack queue; fall
            // through to the generic reply path below.
            route_generic_reply(packet, ack_queues);
        }

        PacketType::AuthenticateRequest => {
            // Not a `*_REPLY` packet (no `is_reply()`), but `hello`'s
            // challenge/response loop waits on it on the same ack-id as
            // HELLO/AUTHENTICATE, so it's routed through the same table.
            route_generic_reply(packet, ack_queues);
        }

        PacketType::AddConsumerReply => {
            if let Some(slot) = pending_consumers.remove(packet.consumer_id) {
                let status = packet.properties.get_i32(JMQ_STATUS).unwrap_or(STATUS_OK);
                let resolved = match status_to_error(status) {
                    Some(err) => Err(err),
                    None => packet
                        .properties
                        .get_i64(JMQ_CONSUMER_ID)
                        .map(|v| v as u64)
                        .ok_or(mq_protocol::MqError::InvalidPacket(
                            "ADD_CONSUMER_REPLY missing JMQConsumerID".into(),
                        )),
                };
                slot.complete(resolved);
            } else {
                info!("ADD_CONSUMER_REPLY for unknown ack-id {}", packet.consumer_id);
            }
        }

        PacketType::Goodbye | PacketType::GoodbyeReply => {
            goodbye_received.store(true, Ordering::SeqCst);
        }

        PacketType::ResumeFlow => {
            if packet.producer_id != 0 {
                match producer_flows.get(packet.producer_id) {
                    Some(flow) => {
                        let bytes = packet.properties.get_i32(JMQ_BYTES).unwrap_or(-1);
                        let size = packet.properties.get_i32(JMQ_SIZE).unwrap_or(-1);
                        flow.resume_flow(bytes, size);
                    }
                    None => info!("RESUME_FLOW for unknown producer {}", packet.producer_id),
                }
            }
        }

        PacketType::DataMessage => {
            message_sink.message_arrived();
            flow_controller.message_arrived(resume_sender);
            if packet.flags.flow_paused() {
                message_sink.flow_paused_signalled();
                flow_controller.flow_paused_signalled(resume_sender);
            }
            if packet.flags.consumer_flow_paused() {
                message_sink.consumer_flow_paused_signalled(packet.consumer_id);
            }
            match receive_queues.get(packet.consumer_id) {
                Some(queue) => queue.enqueue(packet),
                None => debug!("no receive queue for consumer {}", packet.consumer_id),
            }
        }

        PacketType::MapMessage | PacketType::ObjectMessage | PacketType::StreamMessage => {
            warn!(
                "dropping {:?}: {}",
                packet.packet_type,
                mq_protocol::MqError::UnsupportedMessageType(packet.packet_type.as_u16())
            );
        }

        other if other.is_reply() => {
            route_generic_reply(packet, ack_queues);
        }

        other => {
            warn!(
                "dropping packet: {}",
                mq_protocol::MqError::UnrecognizedPacketType(other.as_u16())
            );
        }
    }
}

fn route_generic_reply(packet: Packet, ack_queues: &AckQueueTable) {
    match ack_queues.get(packet.consumer_id) {
        Some(queue) => queue.enqueue(packet),
        None => debug!(
            "no ack-queue waiter for ack-id {} ({:?})",
            packet.consumer_id, packet.packet_type
        ),
    }
}

impl ReadDispatcher {
    /// Spawns the dispatcher thread. `on_exit` is invoked exactly once, with
    /// the terminating error (or `None` on an orderly `GOODBYE`) and whether
    /// the exit happened because of an unexpected socket error, mirroring
    /// `connection.exitConnection(err, fromReader=true, abortConnection=...)`
    /// (spec ss4.4, ss4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        transport: Arc<TransportHandle>,
        ack_queues: Arc<AckQueueTable>,
        pending_consumers: Arc<PendingConsumerTable>,
        producer_flows: Arc<ProducerFlowTable>,
        receive_queues: Arc<ReceiveQueueTable>,
        flow_controller: Arc<FlowController>,
        resume_sender: Arc<dyn ResumeFlowSender>,
        message_sink: Arc<dyn MessageSink>,
        activity: Arc<ActivityFlag>,
        on_exit: impl FnOnce(Option<mq_protocol::MqError>, bool) + Send + 'static,
    ) -> Self {
        let exit = Arc::new(AtomicBool::new(false));
        let goodbye_received = Arc::new(AtomicBool::new(false));
        let thread_goodbye = goodbye_received.clone();
        let thread_exit = exit.clone();

        let handle = std::thread::spawn(move || {
            let mut terminating_error = None;
            loop {
                if thread_exit.load(Ordering::SeqCst) {
                    break;
                }
                match transport.read_packet(None) {
                    Ok(packet) => {
                        activity.mark();
                        dispatch_one(
                            packet,
                            &ack_queues,
                            &pending_consumers,
                            &producer_flows,
                            &receive_queues,
                            &flow_controller,
                            resume_sender.as_ref(),
                            message_sink.as_ref(),
                            &thread_goodbye,
                        );
                        if thread_goodbye.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(err) => {
                        terminating_error = Some(err);
                        break;
                    }
                }
            }
            let unexpected = terminating_error.is_some();
            on_exit(terminating_error, unexpected);
        });

        ReadDispatcher {
            exit,
            goodbye_received,
            handle: Some(handle),
        }
    }

    /// Signals the loop to stop after its current read and waits for it to
    /// exit. Only unblocks a read already in flight if the caller has also
    /// shut down the transport (spec ss4.5's `exitConnection`).
    pub fn join(mut self) {
        self.exit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn goodbye_received(&self) -> bool {
        self.goodbye_received.load(Ordering::SeqCst)
    }

    /// The OS thread id of the reader loop, available as soon as the thread
    /// is spawned (`JoinHandle::thread()` doesn't require the thread body to
    /// have started running). `Connection::close` uses this to detect being
    /// called from the reader thread itself (spec ss4.5).
    pub fn thread_id(&self) -> Option<std::thread::ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receive_queue::ReceiveQueue;
    use std::sync::atomic::AtomicUsize;

    struct NullResumeSender;
    impl ResumeFlowSender for NullResumeSender {
        fn send_resume_flow(&self, _chunk_count: i32) -> mq_protocol::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        arrived: AtomicUsize,
        flow_paused: AtomicUsize,
        consumer_paused: AtomicUsize,
    }
    impl MessageSink for CountingSink {
        fn message_arrived(&self) {
            self.arrived.fetch_add(1, Ordering::SeqCst);
        }
        fn flow_paused_signalled(&self) {
            self.flow_paused.fetch_add(1, Ordering::SeqCst);
        }
        fn consumer_flow_paused_signalled(&self, _consumer_id: u64) {
            self.consumer_paused.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn harness() -> (
        AckQueueTable,
        PendingConsumerTable,
        ProducerFlowTable,
        ReceiveQueueTable,
        FlowController,
        NullResumeSender,
        CountingSink,
        AtomicBool,
    ) {
        (
            AckQueueTable::new(),
            PendingConsumerTable::new(),
            ProducerFlowTable::new(),
            ReceiveQueueTable::new(),
            FlowController::new(&crate::config::ConnectionConfig::new("localhost", 7676)),
            NullResumeSender,
            CountingSink::default(),
            AtomicBool::new(false),
        )
    }

    #[test]
    fn generic_reply_routes_to_ack_queue_by_consumer_id() {
        let (ack_queues, pending, producers, receivers, flow, resume, sink, goodbye) = harness();
        let queue = Arc::new(ReceiveQueue::new());
        ack_queues.insert(9, queue.clone());

        let mut reply = Packet::new(PacketType::SetClientIdReply);
        reply.consumer_id = 9;
        dispatch_one(reply, &ack_queues, &pending, &producers, &receivers, &flow, &resume, &sink, &goodbye);

        assert!(queue.dequeue_wait(crate::receive_queue::Timeout::NoWait).is_some());
    }

    #[test]
    fn authenticate_request_routes_to_ack_queue_like_a_reply() {
        let (ack_queues, pending, producers, receivers, flow, resume, sink, goodbye) = harness();
        let queue = Arc::new(ReceiveQueue::new());
        ack_queues.insert(3, queue.clone());

        let mut auth_request = Packet::new(PacketType::AuthenticateRequest);
        auth_request.consumer_id = 3;
        dispatch_one(auth_request, &ack_queues, &pending, &producers, &receivers, &flow, &resume, &sink, &goodbye);

        assert!(queue.dequeue_wait(crate::receive_queue::Timeout::NoWait).is_some());
    }

    #[test]
    fn data_message_bumps_arrival_and_enqueues_to_consumer_queue() {
        let (ack_queues, pending, producers, receivers, flow, resume, sink, goodbye) = harness();
        let queue = Arc::new(ReceiveQueue::new());
        receivers.insert(42, queue.clone());

        let mut msg = Packet::new(PacketType::DataMessage);
        msg.consumer_id = 42;
        dispatch_one(msg, &ack_queues, &pending, &producers, &receivers, &flow, &resume, &sink, &goodbye);

        assert_eq!(sink.arrived.load(Ordering::SeqCst), 1);
        assert!(queue.dequeue_wait(crate::receive_queue::Timeout::NoWait).is_some());
    }

    #[test]
    fn unsupported_message_type_is_dropped_without_panicking() {
        let (ack_queues, pending, producers, receivers, flow, resume, sink, goodbye) = harness();
        let msg = Packet::new(PacketType::MapMessage);
        dispatch_one(msg, &ack_queues, &pending, &producers, &receivers, &flow, &resume, &sink, &goodbye);
        assert_eq!(sink.arrived.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn goodbye_sets_the_flag() {
        let (ack_queues, pending, producers, receivers, flow, resume, sink, goodbye) = harness();
        let bye = Packet::new(PacketType::Goodbye);
        dispatch_one(bye, &ack_queues, &pending, &producers, &receivers, &flow, &resume, &sink, &goodbye);
        assert!(goodbye.load(Ordering::SeqCst));
    }
}
