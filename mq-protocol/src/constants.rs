//! Wire constants: packet magic/version, property name strings, auth type
//! strings, and the library's own default configuration values.
//!
//! Property names are part of the wire contract with the broker (spec ss6)
//! and must never be renamed, even though they read oddly from a Rust
//! naming-convention point of view.

/// Never change: baked into every broker on the wire (spec ss3).
pub const PACKET_MAGIC: u32 = 469_754_818;
pub const PACKET_VERSION: u16 = 301;
pub const PACKET_HEADER_SIZE: usize = 72;
pub const PACKET_DEFAULT_PRIORITY: u8 = 5;
pub const PACKET_NULL_CONSUMER_ID: u64 = 0;

/// Packet sequence numbers wrap within `[PACKET_MIN_SEQUENCE_NUMBER,
/// PACKET_MAX_SEQUENCE_NUMBER]` (spec ss3, ss8).
pub const PACKET_MAX_SEQUENCE_NUMBER: u32 = i32::MAX as u32;
pub const PACKET_MIN_SEQUENCE_NUMBER: u32 = 0;

// Authentication type strings (spec ss6, exact wire strings).
pub const AUTH_TYPE_BASIC: &str = "basic";
pub const AUTH_TYPE_DIGEST: &str = "digest";
pub const AUTH_TYPE_ADMIN_KEY: &str = "jmqadminkey";

// Header property names recognized in requests/replies (spec ss6). These are
// broker wire contract, not renameable.
pub const JMQ_CONNECTION_ID: &str = "JMQConnectionID";
pub const JMQ_SESSION_ID: &str = "JMQSessionID";
pub const JMQ_ACK_MODE: &str = "JMQAckMode";
pub const JMQ_DESTINATION: &str = "JMQDestination";
pub const JMQ_DEST_TYPE: &str = "JMQDestType";
pub const JMQ_SELECTOR: &str = "JMQSelector";
pub const JMQ_DURABLE_NAME: &str = "JMQDurableName";
pub const JMQ_SHARED_SUBSCRIPTION_NAME: &str = "JMQSharedSubscriptionName";
pub const JMQ_JMS_SHARE: &str = "JMQJMSShare";
pub const JMQ_NO_LOCAL: &str = "JMQNoLocal";
pub const JMQ_RECONNECT: &str = "JMQReconnect";
pub const JMQ_SIZE: &str = "JMQSize";
pub const JMQ_SHARE: &str = "JMQShare";
pub const JMQ_PRODUCER_ID: &str = "JMQProducerID";
pub const JMQ_BYTES: &str = "JMQBytes";
pub const JMQ_CONSUMER_ID: &str = "JMQConsumerID";
pub const JMQ_TRANSACTION_ID: &str = "JMQTransactionID";
pub const JMQ_CLIENT_ID: &str = "JMQClientID";
pub const JMQ_STATUS: &str = "JMQStatus";
pub const JMQ_REASON: &str = "JMQReason";
pub const JMQ_AUTH_TYPE: &str = "JMQAuthType";
pub const JMQ_CHALLENGE: &str = "JMQChallenge";
pub const JMQ_PROTOCOL_LEVEL: &str = "JMQProtocolLevel";
pub const JMQ_VERSION: &str = "JMQVersion";
pub const JMQ_BLOCK: &str = "JMQBlock";
pub const JMQ_SET_REDELIVERED: &str = "JMQSetRedelivered";
pub const JMQ_USER_AGENT: &str = "JMQUserAgent";
pub const JMQ_BODY_TYPE: &str = "JMQBodyType";
pub const JMQ_ACK_TYPE: &str = "JMQAckType";
pub const JMQ_DEAD_REASON: &str = "JMQDeadReason";
pub const JMQ_XA_FLAGS: &str = "JMQXAFlags";
pub const JMQ_XA_ONE_PHASE: &str = "JMQXAOnePhase";
pub const JMQ_QUANTITY: &str = "JMQQuantity";
pub const JMQ_REDELIVER: &str = "JMQRedeliver";
pub const JMQ_PING_INTERVAL: &str = "JMQPingInterval";

pub const ACK_TYPE_ACKNOWLEDGE_REQUEST: i32 = 0;
pub const ACK_TYPE_UNDELIVERABLE_REQUEST: i32 = 1;
pub const ACK_TYPE_DEAD_REQUEST: i32 = 2;

pub const DEAD_REASON_UNDELIVERABLE: i32 = 0;
pub const DEAD_REASON_EXPIRED: i32 = 1;

// Defaults, mirrored from `iMQConstants.hpp`.
pub const DEFAULT_ACK_TIMEOUT_MICROS: u64 = 0;
pub const DEFAULT_WRITE_TIMEOUT_MICROS: u64 = 0;
pub const DEFAULT_PING_INTERVAL_SEC: u64 = 30;
pub const DEFAULT_CONNECTION_FLOW_LIMIT_ENABLED: bool = false;
pub const DEFAULT_CONNECTION_FLOW_LIMIT: i32 = 1000;
pub const DEFAULT_CONNECTION_FLOW_COUNT: i32 = 100;
pub const DEFAULT_CONSUMER_PREFETCH_MAX_MESSAGE_COUNT: i32 = -1;
pub const DEFAULT_CONSUMER_PREFETCH_THRESHOLD_PERCENT: f64 = 50.0;
pub const DEFAULT_ACK_ON_PERSISTENT_PRODUCE: bool = true;
pub const DEFAULT_ACK_ON_NON_PERSISTENT_PRODUCE: bool = false;
pub const DEFAULT_ACK_ON_ACKNOWLEDGE: bool = true;
pub const DEFAULT_DUPS_OK_LIMIT: usize = 10;
pub const DEFAULT_SSL_BROKER_IS_TRUSTED: bool = true;
pub const DEFAULT_SSL_CHECK_BROKER_FINGERPRINT: bool = false;
pub const DEFAULT_CONNECT_TIMEOUT_MICROS: u64 = 60 * 1_000_000;
pub const DEFAULT_READ_PORTMAPPER_TIMEOUT_MICROS: u64 = 60 * 1_000_000;
pub const DEFAULT_PORTMAPPER_SERVICE_NAME: &str = "jms";
