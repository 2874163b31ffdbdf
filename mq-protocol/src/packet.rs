//! The framed wire packet (spec ss3, ss4.1, ss8): fixed header, variable
//! headers, serialized properties, opaque body. Grounded in
//! `original_source/.../io/Packet.hpp` for field order and sizes, and in
//! `examples/baajur-flo/flo-protocol/src/client.rs` for how the teacher
//! structures a hand-rolled binary codec around `byteorder`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::time::Duration;

use crate::constants::{
    PACKET_DEFAULT_PRIORITY, PACKET_HEADER_SIZE, PACKET_MAGIC, PACKET_NULL_CONSUMER_ID,
    PACKET_VERSION,
};
use crate::error::{MqError, Result};
use crate::flags::PacketFlags;
use crate::packet_type::PacketType;
use crate::properties::PropertyMap;
use crate::sysid::{SysMessageId, SYS_MESSAGE_ID_SIZE};
use crate::varheader::{self, VariableHeaderId, HEADER_TERMINATOR_ID};

/// The minimal highest wire version this codec still understands. We only
/// reject magics outright; a version mismatch is tolerated the same way the
/// original client tolerates "version-compatible" brokers (spec ss4.1).
const MIN_COMPATIBLE_VERSION: u16 = 300;

/// A source of bytes a packet can be decoded from, with an overall
/// deadline. Mirrors `TransportAdapter::read` at the codec boundary without
/// coupling the codec to sockets.
pub trait PacketSource {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<()>;
}

/// A destination a packet can be encoded to, in one logical write.
pub trait PacketSink {
    fn write_all(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<()>;
}

/// A decoded variable header value: either a UTF-8 string or a raw u32
/// (`DeliveryTime`/`DeliveryCount` carry integers, spec ss4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarHeaderValue {
    Text(String),
    Integer(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub transaction_id: u64,
    pub producer_id: u64,
    pub expiration: u64,
    pub delivery_time: u64,
    pub delivery_count: u32,
    pub priority: u8,
    pub encryption: u8,
    pub flags: PacketFlags,
    pub consumer_id: u64,
    pub sys_message_id: SysMessageId,
    pub variable_headers: BTreeMap<VariableHeaderId, VarHeaderValue>,
    pub properties: PropertyMap,
    pub body: Vec<u8>,
}

impl Default for Packet {
    fn default() -> Self {
        Packet {
            packet_type: PacketType::Ping,
            transaction_id: 0,
            producer_id: 0,
            expiration: 0,
            delivery_time: 0,
            delivery_count: 0,
            priority: PACKET_DEFAULT_PRIORITY,
            encryption: 0,
            flags: PacketFlags::default(),
            consumer_id: PACKET_NULL_CONSUMER_ID,
            sys_message_id: SysMessageId::default(),
            variable_headers: BTreeMap::new(),
            properties: PropertyMap::new(),
            body: Vec::new(),
        }
    }
}

impl Packet {
    pub fn new(packet_type: PacketType) -> Self {
        Packet {
            packet_type,
            ..Default::default()
        }
    }

    pub fn set_text_header(&mut self, id: VariableHeaderId, value: impl Into<String>) {
        self.variable_headers.insert(id, VarHeaderValue::Text(value.into()));
    }

    pub fn set_integer_header(&mut self, id: VariableHeaderId, value: u64) {
        self.variable_headers
            .insert(id, VarHeaderValue::Integer(value));
    }

    pub fn text_header(&self, id: VariableHeaderId) -> Option<&str> {
        match self.variable_headers.get(&id) {
            Some(VarHeaderValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer_header(&self, id: VariableHeaderId) -> Option<u64> {
        match self.variable_headers.get(&id) {
            Some(VarHeaderValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    fn encode_variable_headers(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (id, value) in &self.variable_headers {
            let raw_id = id.as_u16();
            let bytes: Vec<u8> = match value {
                VarHeaderValue::Text(s) => s.as_bytes().to_vec(),
                VarHeaderValue::Integer(v) => {
                    let mut b = Vec::with_capacity(4);
                    b.write_u32::<BigEndian>(*v as u32).unwrap();
                    b
                }
            };
            buf.write_u16::<BigEndian>(raw_id).unwrap();
            buf.write_u16::<BigEndian>(bytes.len() as u16).unwrap();
            buf.extend_from_slice(&bytes);
            pad_to_4(&mut buf);
        }
        buf.write_u16::<BigEndian>(HEADER_TERMINATOR_ID).unwrap();
        buf.write_u16::<BigEndian>(0).unwrap();
        pad_to_4(&mut buf);
        buf
    }

    fn decode_variable_headers(cursor: &mut Cursor<&[u8]>) -> Result<BTreeMap<VariableHeaderId, VarHeaderValue>> {
        let mut headers = BTreeMap::new();
        loop {
            let raw_id = cursor.read_u16::<BigEndian>()?;
            let len = cursor.read_u16::<BigEndian>()? as usize;
            if raw_id == HEADER_TERMINATOR_ID {
                skip_padding(cursor, len)?;
                break;
            }
            varheader::validate_id(raw_id)?;
            let mut raw = vec![0u8; len];
            cursor.read_exact(&mut raw)?;
            skip_padding(cursor, len)?;

            if let Some(id) = VariableHeaderId::from_u16(raw_id) {
                let value = if id.is_string() {
                    let text = String::from_utf8(raw).map_err(|e| {
                        MqError::InvalidPacket(format!("non-utf8 variable header: {e}"))
                    })?;
                    VarHeaderValue::Text(text)
                } else {
                    if raw.len() != 4 {
                        return Err(MqError::InvalidPacket(
                            "integer variable header must be 4 bytes".into(),
                        ));
                    }
                    let value = (&raw[..]).read_u32::<BigEndian>()? as u64;
                    VarHeaderValue::Integer(value)
                };
                headers.insert(id, value);
            }
            // Recognized-but-unmapped ids (spec ss4.1) are skipped silently.
        }
        Ok(headers)
    }

    /// Encodes the full frame in one buffer: header, variable headers,
    /// properties, body. `encode` to a sink is expected to write this in a
    /// single logical operation (spec ss4.1).
    pub fn to_bytes(&self) -> Vec<u8> {
        let var_headers = self.encode_variable_headers();
        let properties = self.properties.encode();
        let properties_offset = (PACKET_HEADER_SIZE + var_headers.len()) as u32;
        let properties_size = properties.len() as u32;
        let total_size =
            (PACKET_HEADER_SIZE + var_headers.len() + properties.len() + self.body.len()) as u32;

        let mut buf = Vec::with_capacity(total_size as usize);
        buf.write_u32::<BigEndian>(PACKET_MAGIC).unwrap();
        buf.write_u16::<BigEndian>(PACKET_VERSION).unwrap();
        buf.write_u16::<BigEndian>(self.packet_type.as_u16()).unwrap();
        buf.write_u32::<BigEndian>(total_size).unwrap();
        buf.write_u64::<BigEndian>(self.transaction_id).unwrap();
        buf.write_u64::<BigEndian>(self.producer_id).unwrap();
        buf.write_u64::<BigEndian>(self.expiration).unwrap();
        buf.write_u64::<BigEndian>(self.delivery_time).unwrap();
        buf.write_u32::<BigEndian>(self.delivery_count).unwrap();
        buf.write_u32::<BigEndian>(properties_offset).unwrap();
        buf.write_u32::<BigEndian>(properties_size).unwrap();
        buf.write_u8(self.priority).unwrap();
        buf.write_u8(self.encryption).unwrap();
        buf.write_u16::<BigEndian>(self.flags.0).unwrap();
        buf.write_u64::<BigEndian>(self.consumer_id).unwrap();
        self.sys_message_id.encode(&mut buf).unwrap();
        debug_assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        buf.extend_from_slice(&var_headers);
        buf.extend_from_slice(&properties);
        buf.extend_from_slice(&self.body);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(MqError::InvalidPacket("frame shorter than header".into()));
        }
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != PACKET_MAGIC {
            return Err(MqError::InvalidPacket(format!("bad magic {magic:#x}")));
        }
        let version = cursor.read_u16::<BigEndian>()?;
        if version < MIN_COMPATIBLE_VERSION {
            return Err(MqError::InvalidPacket(format!(
                "incompatible wire version {version}"
            )));
        }
        let raw_type = cursor.read_u16::<BigEndian>()?;
        let packet_type = PacketType::from_u16(raw_type)?;
        let total_size = cursor.read_u32::<BigEndian>()?;
        if total_size as usize != bytes.len() {
            return Err(MqError::InvalidPacket(format!(
                "packet size {total_size} does not match frame length {}",
                bytes.len()
            )));
        }
        let transaction_id = cursor.read_u64::<BigEndian>()?;
        let producer_id = cursor.read_u64::<BigEndian>()?;
        let expiration = cursor.read_u64::<BigEndian>()?;
        let delivery_time = cursor.read_u64::<BigEndian>()?;
        let delivery_count = cursor.read_u32::<BigEndian>()?;
        let properties_offset = cursor.read_u32::<BigEndian>()?;
        let properties_size = cursor.read_u32::<BigEndian>()?;
        let priority = cursor.read_u8()?;
        let encryption = cursor.read_u8()?;
        let flags = PacketFlags::new(cursor.read_u16::<BigEndian>()?);
        let consumer_id = cursor.read_u64::<BigEndian>()?;
        let sys_message_id = SysMessageId::decode(&mut cursor)?;
        debug_assert_eq!(cursor.position() as usize, PACKET_HEADER_SIZE);

        let properties_end = properties_offset as u64 + properties_size as u64;
        if properties_end > total_size as u64 || properties_offset as u64 > total_size as u64 {
            return Err(MqError::InvalidPacket(
                "properties region falls outside the packet".into(),
            ));
        }

        let variable_headers = Self::decode_variable_headers(&mut cursor)?;
        let after_var_headers = cursor.position();
        if after_var_headers != properties_offset as u64 {
            return Err(MqError::InvalidPacket(
                "variable headers do not end at properties offset".into(),
            ));
        }

        let properties_bytes = &bytes[properties_offset as usize..properties_end as usize];
        let properties = PropertyMap::decode(properties_bytes)?;

        let body = bytes[properties_end as usize..].to_vec();

        Ok(Packet {
            packet_type,
            transaction_id,
            producer_id,
            expiration,
            delivery_time,
            delivery_count,
            priority,
            encryption,
            flags,
            consumer_id,
            sys_message_id,
            variable_headers,
            properties,
            body,
        })
    }

    /// Reads and decodes one packet from `source` (spec ss4.1:
    /// "reads a header, validates magic, version-compatible,
    /// size-consistent, allocates a body buffer, reads the remainder").
    pub fn decode(source: &mut dyn PacketSource, timeout: Option<Duration>) -> Result<Self> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        source.read_exact(&mut header, timeout)?;
        let magic = (&header[0..4]).read_u32::<BigEndian>()?;
        if magic != PACKET_MAGIC {
            return Err(MqError::InvalidPacket(format!("bad magic {magic:#x}")));
        }
        let total_size = (&header[8..12]).read_u32::<BigEndian>()? as usize;
        if total_size < PACKET_HEADER_SIZE {
            return Err(MqError::InvalidPacket("packet size smaller than header".into()));
        }
        let mut rest = vec![0u8; total_size - PACKET_HEADER_SIZE];
        if !rest.is_empty() {
            source.read_exact(&mut rest, timeout)?;
        }
        let mut full = Vec::with_capacity(total_size);
        full.extend_from_slice(&header);
        full.extend_from_slice(&rest);
        Self::from_bytes(&full)
    }

    /// Writes the packet to `sink` in one logical operation (spec ss4.1).
    pub fn encode(&self, sink: &mut dyn PacketSink, timeout: Option<Duration>) -> Result<()> {
        let bytes = self.to_bytes();
        sink.write_all(&bytes, timeout)
    }

    /// A short human-readable summary for logging, replacing the original's
    /// `dumpProperties`/file-handle print.
    pub fn describe(&self) -> String {
        format!(
            "{:?} txn={} producer={} consumer={} flags={:#06x} body={}B props={}",
            self.packet_type,
            self.transaction_id,
            self.producer_id,
            self.consumer_id,
            self.flags.0,
            self.body.len(),
            self.properties.len()
        )
    }
}

fn pad_to_4(buf: &mut Vec<u8>) {
    let rem = buf.len() % 4;
    if rem != 0 {
        buf.extend(std::iter::repeat(0u8).take(4 - rem));
    }
}

fn skip_padding(cursor: &mut Cursor<&[u8]>, content_len: usize) -> Result<()> {
    // 4 bytes of id+length plus content_len is how far we've advanced since
    // the last 4-byte boundary; pad to the next one.
    let consumed = 4 + content_len;
    let rem = consumed % 4;
    if rem != 0 {
        let pad = 4 - rem;
        let mut discard = vec![0u8; pad];
        cursor.read_exact(&mut discard)?;
    }
    Ok(())
}

struct VecSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketSource for VecSource<'a> {
    fn read_exact(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> Result<()> {
        if self.pos + buf.len() > self.data.len() {
            return Err(MqError::Io("unexpected end of stream".into()));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }
}

struct VecSink<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> PacketSink for VecSink<'a> {
    fn write_all(&mut self, buf: &[u8], _timeout: Option<Duration>) -> Result<()> {
        self.out.extend_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Packet {
        let mut p = Packet::new(PacketType::DataMessage);
        p.transaction_id = 7;
        p.producer_id = 42;
        p.consumer_id = 99;
        p.flags.set_persistent(true);
        p.set_text_header(VariableHeaderId::Destination, "orders.queue");
        p.set_integer_header(VariableHeaderId::DeliveryCount, 3);
        p.properties.insert("JMQBodyType", "text");
        p.body = b"hello broker".to_vec();
        p
    }

    #[test]
    fn round_trips_through_to_bytes_from_bytes() {
        let original = sample_packet();
        let bytes = original.to_bytes();
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn round_trips_through_encode_decode_traits() {
        let original = sample_packet();
        let mut out = Vec::new();
        {
            let mut sink = VecSink { out: &mut out };
            original.encode(&mut sink, None).unwrap();
        }
        let mut source = VecSource {
            data: &out,
            pos: 0,
        };
        let decoded = Packet::decode(&mut source, None).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_packet().to_bytes();
        bytes[0] = 0xff;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(MqError::InvalidPacket(_))
        ));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut bytes = sample_packet().to_bytes();
        bytes.push(0); // trailing garbage byte invalidates the size check
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(MqError::InvalidPacket(_))
        ));
    }

    #[test]
    fn rejects_properties_region_outside_packet() {
        let mut p = sample_packet();
        p.body.clear();
        let mut bytes = p.to_bytes();
        // Corrupt propertiesSize (offset 20..24 in the header) to run past
        // the end of the packet.
        let bad_size: u32 = 10_000;
        bytes[20..24].copy_from_slice(&bad_size.to_be_bytes());
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(MqError::InvalidPacket(_))
        ));
    }

    #[test]
    fn unmapped_but_in_range_variable_header_id_is_skipped_on_decode() {
        let mut p = sample_packet();
        // Hand-construct a frame with an id past MAX_VALID_ID but inside
        // MAX_SKIPPABLE_ID, followed by the normal terminator.
        let extra_id: u16 = 40;
        let mut var_headers = p.encode_variable_headers();
        // Splice the extra header in before the terminator (last 4 bytes).
        let terminator = var_headers.split_off(var_headers.len() - 4);
        var_headers.write_u16::<BigEndian>(extra_id).unwrap();
        var_headers.write_u16::<BigEndian>(0).unwrap();
        var_headers.extend_from_slice(&terminator);

        let properties = p.properties.encode();
        let properties_offset = (PACKET_HEADER_SIZE + var_headers.len()) as u32;
        let properties_size = properties.len() as u32;
        p.body.clear();
        let total_size = PACKET_HEADER_SIZE as u32 + var_headers.len() as u32 + properties_size;

        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(PACKET_MAGIC).unwrap();
        buf.write_u16::<BigEndian>(PACKET_VERSION).unwrap();
        buf.write_u16::<BigEndian>(p.packet_type.as_u16()).unwrap();
        buf.write_u32::<BigEndian>(total_size).unwrap();
        buf.write_u64::<BigEndian>(p.transaction_id).unwrap();
        buf.write_u64::<BigEndian>(p.producer_id).unwrap();
        buf.write_u64::<BigEndian>(p.expiration).unwrap();
        buf.write_u64::<BigEndian>(p.delivery_time).unwrap();
        buf.write_u32::<BigEndian>(p.delivery_count).unwrap();
        buf.write_u32::<BigEndian>(properties_offset).unwrap();
        buf.write_u32::<BigEndian>(properties_size).unwrap();
        buf.write_u8(p.priority).unwrap();
        buf.write_u8(p.encryption).unwrap();
        buf.write_u16::<BigEndian>(p.flags.0).unwrap();
        buf.write_u64::<BigEndian>(p.consumer_id).unwrap();
        p.sys_message_id.encode(&mut buf).unwrap();
        buf.extend_from_slice(&var_headers);
        buf.extend_from_slice(&properties);

        let decoded = Packet::from_bytes(&buf).unwrap();
        assert_eq!(decoded.variable_headers, p.variable_headers);
    }

    #[test]
    fn describe_does_not_panic_and_mentions_type() {
        let p = sample_packet();
        assert!(p.describe().contains("DataMessage"));
    }
}
