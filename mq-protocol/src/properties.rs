//! The packet properties map (spec ss3, ss4.1): a small self-describing
//! key/value map carried after the variable headers and before the body.
//! Grounded in the original's `portable::Properties` container — a subset
//! of Java-serialization-style typed values sufficient for broker metadata,
//! not a general object-serialization format.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::error::MqError;

const TAG_BOOL: u8 = 1;
const TAG_I32: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_F64: u8 = 4;
const TAG_STRING: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Str(String),
}

impl PropertyValue {
    fn tag(&self) -> u8 {
        match self {
            PropertyValue::Bool(_) => TAG_BOOL,
            PropertyValue::Int32(_) => TAG_I32,
            PropertyValue::Int64(_) => TAG_I64,
            PropertyValue::Float64(_) => TAG_F64,
            PropertyValue::Str(_) => TAG_STRING,
        }
    }

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u8(self.tag())?;
        match self {
            PropertyValue::Bool(v) => out.write_u8(*v as u8)?,
            PropertyValue::Int32(v) => out.write_i32::<BigEndian>(*v)?,
            PropertyValue::Int64(v) => out.write_i64::<BigEndian>(*v)?,
            PropertyValue::Float64(v) => out.write_f64::<BigEndian>(*v)?,
            PropertyValue::Str(v) => {
                let bytes = v.as_bytes();
                out.write_u32::<BigEndian>(bytes.len() as u32)?;
                out.write_all(bytes)?;
            }
        }
        Ok(())
    }

    fn decode<R: Read>(input: &mut R) -> Result<Self, MqError> {
        let tag = input.read_u8()?;
        Ok(match tag {
            TAG_BOOL => PropertyValue::Bool(input.read_u8()? != 0),
            TAG_I32 => PropertyValue::Int32(input.read_i32::<BigEndian>()?),
            TAG_I64 => PropertyValue::Int64(input.read_i64::<BigEndian>()?),
            TAG_F64 => PropertyValue::Float64(input.read_f64::<BigEndian>()?),
            TAG_STRING => {
                let len = input.read_u32::<BigEndian>()? as usize;
                let mut buf = vec![0u8; len];
                input.read_exact(&mut buf)?;
                PropertyValue::Str(String::from_utf8(buf).map_err(|e| {
                    MqError::InvalidPacket(format!("non-utf8 property string: {e}"))
                })?)
            }
            other => {
                return Err(MqError::InvalidPacket(format!(
                    "unknown property value tag {other}"
                )))
            }
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int32(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int64(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float64(v)
    }
}

/// An ordered (by key) set of broker properties. `BTreeMap` gives a
/// deterministic wire encoding without needing to track insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    pub fn new() -> Self {
        PropertyMap(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(PropertyValue::as_str)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.0.get(key).and_then(PropertyValue::as_i32)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(PropertyValue::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(PropertyValue::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Count prefix lets the decoder avoid scanning for a terminator.
        buf.write_u32::<BigEndian>(self.0.len() as u32).unwrap();
        for (key, value) in &self.0 {
            let key_bytes = key.as_bytes();
            buf.write_u32::<BigEndian>(key_bytes.len() as u32).unwrap();
            buf.write_all(key_bytes).unwrap();
            value.encode(&mut buf).unwrap();
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MqError> {
        let mut cursor = bytes;
        let count = cursor.read_u32::<BigEndian>()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key_len = cursor.read_u32::<BigEndian>()? as usize;
            let mut key_buf = vec![0u8; key_len];
            cursor.read_exact(&mut key_buf)?;
            let key = String::from_utf8(key_buf)
                .map_err(|e| MqError::InvalidPacket(format!("non-utf8 property key: {e}")))?;
            let value = PropertyValue::decode(&mut cursor)?;
            map.insert(key, value);
        }
        Ok(PropertyMap(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_value_types() {
        let mut props = PropertyMap::new();
        props.insert("JMQDestination", "orders.queue");
        props.insert("JMQDeliveryCount", 3i32);
        props.insert("JMQTransactionID", 9_000_000_000i64);
        props.insert("JMQNoLocal", true);
        props.insert("weight", 2.5f64);

        let encoded = props.encode();
        let decoded = PropertyMap::decode(&encoded).unwrap();
        assert_eq!(props, decoded);
        assert_eq!(decoded.get_str("JMQDestination"), Some("orders.queue"));
        assert_eq!(decoded.get_i32("JMQDeliveryCount"), Some(3));
        assert_eq!(decoded.get_i64("JMQTransactionID"), Some(9_000_000_000));
        assert_eq!(decoded.get_bool("JMQNoLocal"), Some(true));
    }

    #[test]
    fn empty_map_round_trips() {
        let props = PropertyMap::new();
        let encoded = props.encode();
        let decoded = PropertyMap::decode(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let bytes = [0, 0, 0, 1]; // claims one entry, has none
        assert!(PropertyMap::decode(&bytes).is_err());
    }
}
