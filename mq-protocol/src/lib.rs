//! Wire format for the message-queue client: packet header, variable
//! headers, properties map, flags, status codes, and the shared error
//! taxonomy. No networking or threading lives here — see `mq-client` for
//! the stateful runtime built on top of this codec.

pub mod constants;
pub mod error;
pub mod flags;
pub mod packet;
pub mod packet_type;
pub mod properties;
pub mod status;
pub mod sysid;
pub mod varheader;

pub use constants::*;
pub use error::{MqError, Result};
pub use flags::PacketFlags;
pub use packet::{Packet, PacketSink, PacketSource, VarHeaderValue};
pub use packet_type::PacketType;
pub use properties::{PropertyMap, PropertyValue};
pub use status::status_to_error;
pub use sysid::{next_sequence_number, SysMessageId};
pub use varheader::VariableHeaderId;
