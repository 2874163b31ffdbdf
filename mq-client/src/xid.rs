//! Distributed-transaction identifiers (spec GLOSSARY, ss6): format-id plus
//! global-transaction-id and branch-qualifier byte strings, no more than
//! 128 bytes of `gtrid`+`bqual` combined, per the XA specification this
//! protocol's transaction verbs are modeled on.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use mq_protocol::{MqError, Result};

pub const MAX_XID_DATA_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, gtrid: Vec<u8>, bqual: Vec<u8>) -> Result<Self> {
        if gtrid.len() + bqual.len() > MAX_XID_DATA_LEN {
            return Err(MqError::InvalidArgument(format!(
                "xid data {} bytes exceeds {MAX_XID_DATA_LEN}",
                gtrid.len() + bqual.len()
            )));
        }
        Ok(Xid {
            format_id,
            global_transaction_id: gtrid,
            branch_qualifier: bqual,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 1 + 1 + self.global_transaction_id.len() + self.branch_qualifier.len());
        buf.write_i32::<BigEndian>(self.format_id).unwrap();
        buf.write_u8(self.global_transaction_id.len() as u8).unwrap();
        buf.write_u8(self.branch_qualifier.len() as u8).unwrap();
        buf.extend_from_slice(&self.global_transaction_id);
        buf.extend_from_slice(&self.branch_qualifier);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let format_id = cursor.read_i32::<BigEndian>()?;
        let gtrid_len = cursor.read_u8()? as usize;
        let bqual_len = cursor.read_u8()? as usize;
        if cursor.len() < gtrid_len + bqual_len {
            return Err(MqError::InvalidArgument("truncated xid".into()));
        }
        let gtrid = cursor[..gtrid_len].to_vec();
        let bqual = cursor[gtrid_len..gtrid_len + bqual_len].to_vec();
        Xid::new(format_id, gtrid, bqual)
    }

    /// Decodes a `recoverTransaction` reply body: a 32-bit count followed by
    /// that many length-prefixed XIDs (spec ss4.3, ss6).
    pub fn decode_vec(bytes: &[u8]) -> Result<Vec<Self>> {
        let mut cursor = bytes;
        let count = cursor.read_u32::<BigEndian>()?;
        let mut xids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = cursor.read_u32::<BigEndian>()? as usize;
            if cursor.len() < len {
                return Err(MqError::InvalidArgument("truncated xid vector".into()));
            }
            let (entry, rest) = cursor.split_at(len);
            xids.push(Xid::decode(entry)?);
            cursor = rest;
        }
        Ok(xids)
    }

    pub fn encode_vec(xids: &[Xid]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(xids.len() as u32).unwrap();
        for xid in xids {
            let encoded = xid.encode();
            buf.write_u32::<BigEndian>(encoded.len() as u32).unwrap();
            buf.extend_from_slice(&encoded);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_xid() {
        let xid = Xid::new(1, b"gtrid".to_vec(), b"bqual".to_vec()).unwrap();
        let decoded = Xid::decode(&xid.encode()).unwrap();
        assert_eq!(xid, decoded);
    }

    #[test]
    fn round_trips_a_vector_of_xids() {
        let xids = vec![
            Xid::new(1, b"a".to_vec(), b"b".to_vec()).unwrap(),
            Xid::new(2, b"cc".to_vec(), vec![]).unwrap(),
        ];
        let encoded = Xid::encode_vec(&xids);
        let decoded = Xid::decode_vec(&encoded).unwrap();
        assert_eq!(xids, decoded);
    }

    #[test]
    fn rejects_oversized_xid_data() {
        assert!(Xid::new(1, vec![0u8; 100], vec![0u8; 100]).is_err());
    }
}
