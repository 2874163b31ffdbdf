//! Digest (challenge/response) authentication (spec ss6, ss8 scenario 2).
//!
//! Grounded in `JMQDigestAuthenticationHandler.cpp`. The handler hashes
//! `username:password`, then hashes `hash(username:password):nonce`, and
//! replies with the username and the second hash — both as the library's
//! peculiar "signed hex" encoding: MD5's 16 bytes are treated as a
//! big-endian two's-complement integer, negated if the top bit is set, and
//! printed as hex with leading zero *nibbles* stripped (but always at
//! least one digit), prefixed with `-` if the original value was negative.

use md5::{Digest, Md5};

use mq_protocol::Result;

use super::{write_utf8_string, AuthenticationHandler};
use mq_protocol::constants::AUTH_TYPE_DIGEST;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

#[derive(Default)]
pub struct DigestAuthHandler {
    username: String,
    password: String,
}

impl AuthenticationHandler for DigestAuthHandler {
    fn auth_type(&self) -> &'static str {
        AUTH_TYPE_DIGEST
    }

    fn init(&mut self, username: &str, password: &str) {
        self.username = username.to_string();
        self.password = password.to_string();
    }

    fn handle_request(&mut self, auth_request: &[u8], _sequence_num: u32) -> Result<Vec<u8>> {
        let userpwd = format!("{}:{}", self.username, self.password);
        let hashed_userpwd = md5_signed_hex(userpwd.as_bytes());

        let mut credential_bytes = Vec::with_capacity(hashed_userpwd.len() + 1 + auth_request.len());
        credential_bytes.extend_from_slice(hashed_userpwd.as_bytes());
        credential_bytes.push(b':');
        credential_bytes.extend_from_slice(auth_request);
        let hashed_credential = md5_signed_hex(&credential_bytes);

        let mut out = Vec::new();
        write_utf8_string(&mut out, &self.username);
        write_utf8_string(&mut out, &hashed_credential);
        Ok(out)
    }
}

/// `convertMD5HashToSigned`: if the high bit of the hash is clear, the hash
/// is already non-negative. Otherwise take the two's complement (flip all
/// bits, add one) and report it as negative.
fn to_signed(hash: [u8; 16]) -> ([u8; 16], bool) {
    if hash[0] & 0x80 == 0 {
        return (hash, false);
    }
    let mut flipped = hash;
    for b in flipped.iter_mut() {
        *b ^= 0xFF;
    }
    let mut carry: u16 = 1;
    for b in flipped.iter_mut().rev() {
        let sum = *b as u16 + carry;
        *b = (sum & 0xFF) as u8;
        carry = sum >> 8;
        if carry == 0 {
            break;
        }
    }
    (flipped, true)
}

/// `getMD5HashString`: MD5-hash `buf`, sign it, then hex-encode skipping
/// leading zero nibbles (always emitting at least the final nibble).
fn md5_signed_hex(buf: &[u8]) -> String {
    let hash: [u8; 16] = Md5::digest(buf).into();
    let (signed, is_negative) = to_signed(hash);

    let mut out = String::with_capacity(33);
    if is_negative {
        out.push('-');
    }
    let mut leading_zeroes = true;
    for (i, byte) in signed.iter().enumerate() {
        if leading_zeroes && *byte == 0 && i != signed.len() - 1 {
            continue;
        }
        let high = (byte >> 4) & 0x0F;
        if !leading_zeroes || high != 0 {
            out.push(HEX_DIGITS[high as usize] as char);
        }
        out.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
        leading_zeroes = false;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_hex_matches_known_vectors() {
        // From JMQDigestAuthenticationHandler.cpp's own conversion test table.
        assert_eq!(md5_signed_hex_of_precomputed_hash(
            [0x00; 16]), "0");
        assert_eq!(
            md5_signed_hex_of_precomputed_hash([
                0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
                0xFF, 0xFF, 0xFF
            ]),
            "7fffffffffffffffffffffffffffffff"
        );
        assert_eq!(
            md5_signed_hex_of_precomputed_hash([
                0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00
            ]),
            "-80000000000000000000000000000000"
        );
        assert_eq!(
            md5_signed_hex_of_precomputed_hash(*b"\xd3\xc3\xb5\xcb\x55\xd3\xc6\xd0\xc6\x12\x2e\xed\xcc\xc3\xdc\xf3"),
            "-2c3c4a34aa2c392f39edd112333c230d"
        );
    }

    // Helper mirroring `md5_signed_hex` but starting from an already-known
    // hash rather than hashing input, to exercise the sign/hex-formatting
    // logic directly against the handler's own unit-test vectors.
    fn md5_signed_hex_of_precomputed_hash(hash: [u8; 16]) -> String {
        let (signed, is_negative) = to_signed(hash);
        let mut out = String::new();
        if is_negative {
            out.push('-');
        }
        let mut leading_zeroes = true;
        for (i, byte) in signed.iter().enumerate() {
            if leading_zeroes && *byte == 0 && i != signed.len() - 1 {
                continue;
            }
            let high = (byte >> 4) & 0x0F;
            if !leading_zeroes || high != 0 {
                out.push(HEX_DIGITS[high as usize] as char);
            }
            out.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
            leading_zeroes = false;
        }
        out
    }

    #[test]
    fn matches_handler_test_vector() {
        let mut handler = DigestAuthHandler::default();
        handler.init("guest", "guest");
        let nonce = b"-34b997a1a2d58a1635f2b0596f8a217";

        let reply = handler.handle_request(nonce, 0).unwrap();

        let mut expected = Vec::new();
        write_utf8_string(&mut expected, "guest");
        write_utf8_string(&mut expected, "-4bd2e7a6ba3de828e8bd2740b6419a98");
        assert_eq!(reply, expected);
    }
}
