//! Packet type codes (spec ss3, ss4.2, ss4.4, ss8).
//!
//! The retrieved C++ sources expose the variable-header and flag layout but
//! not a numeric packet-type table (the Java-side `PacketType` constants
//! weren't part of the retrieval pack). The numbering below is this crate's
//! own, internally consistent allocation — see `DESIGN.md` for the decision
//! record. What matters for interop within this spec is that the codec,
//! engine, and dispatcher all agree on the same table, which they do by
//! sharing this enum.

use crate::error::MqError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    Hello = 1,
    HelloReply = 2,
    AuthenticateRequest = 3,
    Authenticate = 4,
    AuthenticateReply = 5,
    Goodbye = 6,
    GoodbyeReply = 7,
    Ping = 8,
    Debug = 9,

    SetClientId = 10,
    SetClientIdReply = 11,

    CreateDestination = 12,
    CreateDestinationReply = 13,
    DeleteDestination = 14,
    DeleteDestinationReply = 15,

    AddProducer = 16,
    AddProducerReply = 17,
    DeleteProducer = 18,
    DeleteProducerReply = 19,

    AddConsumer = 20,
    AddConsumerReply = 21,
    DeleteConsumer = 22,
    DeleteConsumerReply = 23,

    UnsubscribeDurable = 24,
    UnsubscribeDurableReply = 25,

    RegisterSession = 26,
    RegisterSessionReply = 27,
    DestroySession = 28,
    DestroySessionReply = 29,

    Start = 30,
    StartReply = 31,
    Stop = 32,
    StopReply = 33,

    DataMessage = 34,
    MapMessage = 35,
    ObjectMessage = 36,
    StreamMessage = 37,

    Acknowledge = 38,
    AcknowledgeReply = 39,
    AcknowledgeExpired = 40,
    AcknowledgeExpiredReply = 41,
    Redeliver = 42,
    RedeliverReply = 43,

    ResumeFlow = 44,

    StartTransaction = 45,
    StartTransactionReply = 46,
    EndTransaction = 47,
    EndTransactionReply = 48,
    PrepareTransaction = 49,
    PrepareTransactionReply = 50,
    CommitTransaction = 51,
    CommitTransactionReply = 52,
    RollbackTransaction = 53,
    RollbackTransactionReply = 54,
    RecoverTransaction = 55,
    RecoverTransactionReply = 56,
}

impl PacketType {
    pub fn from_u16(raw: u16) -> Result<Self, MqError> {
        use PacketType::*;
        Ok(match raw {
            1 => Hello,
            2 => HelloReply,
            3 => AuthenticateRequest,
            4 => Authenticate,
            5 => AuthenticateReply,
            6 => Goodbye,
            7 => GoodbyeReply,
            8 => Ping,
            9 => Debug,
            10 => SetClientId,
            11 => SetClientIdReply,
            12 => CreateDestination,
            13 => CreateDestinationReply,
            14 => DeleteDestination,
            15 => DeleteDestinationReply,
            16 => AddProducer,
            17 => AddProducerReply,
            18 => DeleteProducer,
            19 => DeleteProducerReply,
            20 => AddConsumer,
            21 => AddConsumerReply,
            22 => DeleteConsumer,
            23 => DeleteConsumerReply,
            24 => UnsubscribeDurable,
            25 => UnsubscribeDurableReply,
            26 => RegisterSession,
            27 => RegisterSessionReply,
            28 => DestroySession,
            29 => DestroySessionReply,
            30 => Start,
            31 => StartReply,
            32 => Stop,
            33 => StopReply,
            34 => DataMessage,
            35 => MapMessage,
            36 => ObjectMessage,
            37 => StreamMessage,
            38 => Acknowledge,
            39 => AcknowledgeReply,
            40 => AcknowledgeExpired,
            41 => AcknowledgeExpiredReply,
            42 => Redeliver,
            43 => RedeliverReply,
            44 => ResumeFlow,
            45 => StartTransaction,
            46 => StartTransactionReply,
            47 => EndTransaction,
            48 => EndTransactionReply,
            49 => PrepareTransaction,
            50 => PrepareTransactionReply,
            51 => CommitTransaction,
            52 => CommitTransactionReply,
            53 => RollbackTransaction,
            54 => RollbackTransactionReply,
            55 => RecoverTransaction,
            56 => RecoverTransactionReply,
            other => return Err(MqError::UnrecognizedPacketType(other)),
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this type is a `*_REPLY` packet that carries a `JMQStatus`
    /// property and should be routed to an ack-queue waiter (spec ss4.4),
    /// rather than handled as an unsolicited control or data frame.
    pub fn is_reply(self) -> bool {
        use PacketType::*;
        matches!(
            self,
            HelloReply
                | AuthenticateReply
                | SetClientIdReply
                | CreateDestinationReply
                | DeleteDestinationReply
                | AddProducerReply
                | AddConsumerReply
                | DeleteConsumerReply
                | UnsubscribeDurableReply
                | RegisterSessionReply
                | DestroySessionReply
                | StartReply
                | StopReply
                | AcknowledgeReply
                | AcknowledgeExpiredReply
                | RedeliverReply
                | StartTransactionReply
                | EndTransactionReply
                | PrepareTransactionReply
                | CommitTransactionReply
                | RollbackTransactionReply
                | RecoverTransactionReply
        )
    }

    /// Data-bearing message types the consumer side must accept; `Map`,
    /// `Object`, and `Stream` bodies are out of scope per spec ss4.4 and
    /// surface `UnsupportedMessageType` instead.
    pub fn is_unsupported_message(self) -> bool {
        matches!(
            self,
            PacketType::MapMessage | PacketType::ObjectMessage | PacketType::StreamMessage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        let all = [
            PacketType::Hello,
            PacketType::HelloReply,
            PacketType::AuthenticateRequest,
            PacketType::Authenticate,
            PacketType::AuthenticateReply,
            PacketType::Goodbye,
            PacketType::GoodbyeReply,
            PacketType::Ping,
            PacketType::Debug,
            PacketType::SetClientId,
            PacketType::SetClientIdReply,
            PacketType::AddConsumer,
            PacketType::AddConsumerReply,
            PacketType::ResumeFlow,
            PacketType::RecoverTransactionReply,
        ];
        for t in all {
            assert_eq!(PacketType::from_u16(t.as_u16()).unwrap(), t);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(matches!(
            PacketType::from_u16(9999),
            Err(MqError::UnrecognizedPacketType(9999))
        ));
    }

    #[test]
    fn add_consumer_reply_is_not_generic_reply() {
        assert!(PacketType::AddConsumerReply.is_reply());
    }

    #[test]
    fn map_message_is_unsupported() {
        assert!(PacketType::MapMessage.is_unsupported_message());
        assert!(!PacketType::DataMessage.is_unsupported_message());
    }
}
