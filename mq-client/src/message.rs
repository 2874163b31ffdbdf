//! The application-visible message, built from an inbound `Packet` (spec
//! ss4.6: "msg = Message::fromPacket(pkt)").

use mq_protocol::{Packet, PropertyMap, SysMessageId, VariableHeaderId};

#[derive(Debug, Clone)]
pub struct Message {
    pub consumer_id: u64,
    pub sys_message_id: SysMessageId,
    pub destination: Option<String>,
    pub is_queue: bool,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub message_type: Option<String>,
    pub persistent: bool,
    pub redelivered: bool,
    pub priority: u8,
    pub delivery_count: u32,
    pub expiration: u64,
    pub delivery_time: u64,
    pub properties: PropertyMap,
    pub body: Vec<u8>,
}

impl Message {
    pub fn from_packet(packet: Packet) -> Self {
        Message {
            consumer_id: packet.consumer_id,
            sys_message_id: packet.sys_message_id,
            destination: packet.text_header(VariableHeaderId::Destination).map(str::to_string),
            is_queue: packet.flags.is_queue(),
            correlation_id: packet.text_header(VariableHeaderId::CorrelationId).map(str::to_string),
            reply_to: packet.text_header(VariableHeaderId::ReplyTo).map(str::to_string),
            message_type: packet.text_header(VariableHeaderId::MessageType).map(str::to_string),
            persistent: packet.flags.persistent(),
            redelivered: packet.flags.redelivered(),
            priority: packet.priority,
            delivery_count: packet.delivery_count,
            expiration: packet.expiration,
            delivery_time: packet.delivery_time,
            properties: packet.properties,
            body: packet.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_protocol::PacketType;

    #[test]
    fn carries_over_destination_and_body() {
        let mut packet = Packet::new(PacketType::DataMessage);
        packet.set_text_header(VariableHeaderId::Destination, "orders.queue");
        packet.flags.set_redelivered(true);
        packet.body = b"hi".to_vec();
        let msg = Message::from_packet(packet);
        assert_eq!(msg.destination.as_deref(), Some("orders.queue"));
        assert!(msg.redelivered);
        assert_eq!(msg.body, b"hi");
    }
}
