//! Authentication handlers (spec ss4.3, ss6).
//!
//! The engine picks a handler by the `authType` property carried on the
//! first `AUTHENTICATE_REQUEST` and drives it through `init` then
//! `handle_request` once per round of the challenge/response loop.

mod basic;
mod digest;

pub use basic::BasicAuthHandler;
pub use digest::DigestAuthHandler;

use mq_protocol::{MqError, Result};
use mq_protocol::constants::{AUTH_TYPE_ADMIN_KEY, AUTH_TYPE_BASIC, AUTH_TYPE_DIGEST};

/// Length-prefixed UTF-8 string encoding shared by every handler's reply
/// body: a 16-bit big-endian length followed by the UTF-8 bytes. Grounded
/// in `SerialDataOutputStream`'s `UTF8String::write`.
pub(crate) fn write_utf8_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// A credential-negotiation strategy selected by the broker's advertised
/// `authType`. One challenge/response round produces one reply body.
pub trait AuthenticationHandler: Send {
    fn auth_type(&self) -> &'static str;

    fn init(&mut self, username: &str, password: &str);

    /// Consumes one `AUTHENTICATE_REQUEST` body and the packet's sequence
    /// number, producing the body of the next `AUTHENTICATE` packet.
    fn handle_request(&mut self, auth_request: &[u8], sequence_num: u32) -> Result<Vec<u8>>;
}

/// Instantiates the handler named by an inbound `authType` property (spec
/// ss4.3). Admin-key auth is a broker-internal bootstrap mechanism with no
/// client-side challenge/response step, so it has no handler here; seeing
/// it from a regular client connection is a protocol error.
pub fn handler_for(auth_type: &str) -> Result<Box<dyn AuthenticationHandler>> {
    match auth_type {
        AUTH_TYPE_BASIC => Ok(Box::new(BasicAuthHandler::default())),
        AUTH_TYPE_DIGEST => Ok(Box::new(DigestAuthHandler::default())),
        AUTH_TYPE_ADMIN_KEY => Err(MqError::UnsupportedAuthType(auth_type.to_string())),
        other => Err(MqError::UnsupportedAuthType(other.to_string())),
    }
}
