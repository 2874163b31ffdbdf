//! The error taxonomy shared by the whole client runtime (spec ss7).
//!
//! The original C client threaded a single `iMQError` enum through every
//! layer via return codes and `goto Cleanup`. We keep the same flat
//! taxonomy but surface it as a `thiserror` enum and propagate it with `?`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MqError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MqError {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("null argument: {0}")]
    NullArgument(&'static str),
    #[error("unsupported argument: {0}")]
    UnsupportedArgument(String),
    #[error("operation timed out")]
    Timeout,
    #[error("not found")]
    NotFound,
    #[error("id already in use")]
    ReusedId,
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
    #[error("unexpected acknowledgement, got packet type {0}")]
    UnexpectedAcknowledgement(u16),
    #[error("unrecognized packet type {0}")]
    UnrecognizedPacketType(u16),
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u16),
    #[error("unsupported auth type: {0}")]
    UnsupportedAuthType(String),
    #[error("authentication mismatch")]
    AuthMismatch,
    #[error("admin key authentication mismatch")]
    AdminKeyAuthMismatch,
    #[error("invalid authenticate request")]
    InvalidAuthenticateRequest,
    #[error("invalid login")]
    InvalidLogin,
    #[error("invalid client id")]
    InvalidClientId,
    #[error("client id already in use")]
    ClientIdInUse,
    #[error("broker: bad request")]
    BrokerBadRequest,
    #[error("broker: forbidden")]
    BrokerForbidden,
    #[error("broker: precondition failed")]
    BrokerPreconditionFailed,
    #[error("broker: conflict")]
    BrokerConflict,
    #[error("broker: gone")]
    BrokerGone,
    #[error("broker: resource full")]
    BrokerResourceFull,
    #[error("broker: entity too large")]
    BrokerEntityTooLarge,
    #[error("broker: internal error")]
    BrokerError,
    #[error("broker: not implemented")]
    BrokerNotImplemented,
    #[error("broker: unavailable")]
    BrokerUnavailable,
    #[error("broker: bad protocol version")]
    BrokerBadVersion,
    #[error("broker connection closed")]
    BrokerConnectionClosed,
    #[error("could not connect to broker")]
    CouldNotConnect,
    #[error("concurrent deadlock detected")]
    ConcurrentDeadlock,
    #[error("session closed")]
    SessionClosed,
    #[error("message not in session")]
    MessageNotInSession,
    #[error("consumer not in session")]
    ConsumerNotInSession,
    #[error("producer not in session")]
    ProducerNotInSession,
    #[error("consumer has no durable name")]
    ConsumerNoDurableName,
    #[error("consumer has no subscription name")]
    ConsumerNoSubscriptionName,
    #[error("a queue consumer cannot be durable")]
    QueueConsumerCannotBeDurable,
    #[error("a shared subscription must be on a topic")]
    SharedSubscriptionNotTopic,
    #[error("cannot unsubscribe an active durable consumer")]
    CannotUnsubscribeActiveConsumer,
    #[error("destination consumer limit exceeded")]
    DestinationConsumerLimitExceeded,
    #[error("invalid message selector: {0}")]
    InvalidMessageSelector(String),
    #[error("session is not transacted")]
    NotTransactedSession,
    #[error("session is transacted")]
    TransactedSession,
    #[error("transaction id already in use")]
    TransactionIdInUse,
    #[error("invalid transaction id")]
    InvalidTransactionId,
    #[error("an XA session is already in progress")]
    XaSessionInProgress,
    #[error("connection is not an XA connection")]
    NotXaConnection,
    #[error("thread is outside an XA transaction")]
    ThreadOutsideXaTransaction,
    #[error("SSL/TLS initialization error: {0}")]
    SslInitError(String),
    #[error("base64 encode failure")]
    Base64EncodeFailure,
    #[error("MD5 hash failure")]
    Md5HashFailure,
    #[error("send: destination not found")]
    SendNotFound,
    #[error("send: message too large")]
    SendTooLarge,
    #[error("send: resource full")]
    SendResourceFull,
    #[error("incompatible library version")]
    IncompatibleLibrary,
    #[error("could not create thread")]
    CouldNotCreateThread,
    #[error("producer is closed")]
    ProducerClosed,
    #[error("consumer is closed")]
    ConsumerClosed,
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MqError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => MqError::Timeout,
            _ => MqError::Io(e.to_string()),
        }
    }
}
