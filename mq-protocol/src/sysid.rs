//! The system message id: `(sequence:32, ip:16, port:32, timestamp:64)`
//! (spec ss3, ss6). This is the broker-unique opaque identity used for
//! acknowledge/redeliver/dead-letter bookkeeping — never the
//! application-visible JMS message id.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::Ipv6Addr;

use crate::constants::{PACKET_MAX_SEQUENCE_NUMBER, PACKET_MIN_SEQUENCE_NUMBER};

pub const SYS_MESSAGE_ID_SIZE: usize = 4 + 16 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SysMessageId {
    pub sequence: u32,
    /// An IPv6 address, or an IPv4-mapped IPv6 address per spec ss3.
    pub ip: [u8; 16],
    pub port: u32,
    pub timestamp: u64,
}

impl SysMessageId {
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.sequence)?;
        out.write_all(&self.ip)?;
        out.write_u32::<BigEndian>(self.port)?;
        out.write_u64::<BigEndian>(self.timestamp)?;
        Ok(())
    }

    pub fn decode<R: Read>(input: &mut R) -> io::Result<Self> {
        let sequence = input.read_u32::<BigEndian>()?;
        let mut ip = [0u8; 16];
        input.read_exact(&mut ip)?;
        let port = input.read_u32::<BigEndian>()?;
        let timestamp = input.read_u64::<BigEndian>()?;
        Ok(SysMessageId {
            sequence,
            ip,
            port,
            timestamp,
        })
    }

    pub fn ip_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.ip)
    }
}

/// Process-wide monotonic sequence-number generator, guarded by a single
/// mutex per spec ss4.1 ("guarded by one mutex; it wraps at a fixed
/// positive bound"). Shared across all connections in the process, matching
/// the original's static `Monitor` + counter on `Packet`.
static SEQUENCE: Mutex<u32> = Mutex::new(PACKET_MIN_SEQUENCE_NUMBER);

/// Returns the next packet sequence number, wrapping from
/// `PACKET_MAX_SEQUENCE_NUMBER` back to `PACKET_MIN_SEQUENCE_NUMBER`.
pub fn next_sequence_number() -> u32 {
    let mut seq = SEQUENCE.lock();
    let current = *seq;
    *seq = if current >= PACKET_MAX_SEQUENCE_NUMBER {
        PACKET_MIN_SEQUENCE_NUMBER
    } else {
        current + 1
    };
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sys_message_id_round_trips() {
        let id = SysMessageId {
            sequence: 42,
            ip: Ipv6Addr::LOCALHOST.octets(),
            port: 7676,
            timestamp: 1_690_000_000_000,
        };
        let mut buf = Vec::new();
        id.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), SYS_MESSAGE_ID_SIZE);
        let decoded = SysMessageId::decode(&mut &buf[..]).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn sequence_numbers_are_monotonic_and_wrap() {
        *SEQUENCE.lock() = PACKET_MAX_SEQUENCE_NUMBER - 1;
        let a = next_sequence_number();
        let b = next_sequence_number();
        let c = next_sequence_number();
        assert_eq!(a, PACKET_MAX_SEQUENCE_NUMBER - 1);
        assert_eq!(b, PACKET_MAX_SEQUENCE_NUMBER);
        assert_eq!(c, PACKET_MIN_SEQUENCE_NUMBER);
    }
}
