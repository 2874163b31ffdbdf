//! Variable-header identifiers (spec ss3, ss4.1). A closed set, 4-byte
//! aligned on the wire, terminated by a sentinel id of 0.

use crate::error::MqError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum VariableHeaderId {
    Destination = 1,
    MessageId = 2,
    CorrelationId = 3,
    ReplyTo = 4,
    MessageType = 5,
    DestinationClass = 6,
    ReplyToClass = 7,
    TransactionId = 8,
    ProducerId = 9,
    DeliveryTime = 10,
    DeliveryCount = 11,
}

/// Sentinel id that terminates the variable-header section.
pub const HEADER_TERMINATOR_ID: u16 = 0;

/// Smallest recognized variable-header id.
pub const MIN_VALID_ID: u16 = 1;

/// Largest id this codec recognizes.
pub const MAX_VALID_ID: u16 = 11;

/// Ids above this bound are rejected outright rather than skipped — they
/// can't be a well-formed but newer field, just a corrupt stream (spec
/// ss4.1: "fields outside the range are rejected").
pub const MAX_SKIPPABLE_ID: u16 = 255;

impl VariableHeaderId {
    pub fn from_u16(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::Destination),
            2 => Some(Self::MessageId),
            3 => Some(Self::CorrelationId),
            4 => Some(Self::ReplyTo),
            5 => Some(Self::MessageType),
            6 => Some(Self::DestinationClass),
            7 => Some(Self::ReplyToClass),
            8 => Some(Self::TransactionId),
            9 => Some(Self::ProducerId),
            10 => Some(Self::DeliveryTime),
            11 => Some(Self::DeliveryCount),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this header's value is a UTF-8 string vs. a raw integer
    /// (DeliveryTime/DeliveryCount are encoded as big-endian integers,
    /// everything else as length-prefixed UTF-8, matching
    /// `PACKET_VARIABLE_HEADER_NAMES` in the original `Packet.hpp`).
    pub fn is_string(self) -> bool {
        !matches!(self, Self::DeliveryTime | Self::DeliveryCount)
    }
}

/// Validates a raw id against the recognized range, per spec ss4.1.
pub fn validate_id(id: u16) -> Result<(), MqError> {
    if id > MAX_SKIPPABLE_ID {
        return Err(MqError::InvalidPacket(format!(
            "variable header id {id} outside recognized range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_ids() {
        for raw in MIN_VALID_ID..=MAX_VALID_ID {
            let id = VariableHeaderId::from_u16(raw).expect("known id");
            assert_eq!(id.as_u16(), raw);
        }
    }

    #[test]
    fn unknown_id_in_skippable_range_is_ok_but_unmapped() {
        assert!(validate_id(40).is_ok());
        assert!(VariableHeaderId::from_u16(40).is_none());
    }

    #[test]
    fn id_past_skippable_bound_is_rejected() {
        assert!(validate_id(4000).is_err());
    }
}
