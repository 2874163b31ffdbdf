//! Basic authentication (spec ss6, ss8 scenario 1). Grounded in
//! `JMQBasicAuthenticationHandler.cpp`: the reply carries the username in
//! the clear and the password base64-encoded, nothing more.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mq_protocol::{MqError, Result};

use super::{write_utf8_string, AuthenticationHandler};
use mq_protocol::constants::AUTH_TYPE_BASIC;

#[derive(Default)]
pub struct BasicAuthHandler {
    username: String,
    password: String,
}

impl AuthenticationHandler for BasicAuthHandler {
    fn auth_type(&self) -> &'static str {
        AUTH_TYPE_BASIC
    }

    fn init(&mut self, username: &str, password: &str) {
        self.username = username.to_string();
        self.password = password.to_string();
    }

    fn handle_request(&mut self, _auth_request: &[u8], _sequence_num: u32) -> Result<Vec<u8>> {
        if self.password.is_empty() {
            return Err(MqError::UnsupportedArgument("empty password".into()));
        }
        let encoded = STANDARD.encode(self.password.as_bytes());

        let mut out = Vec::new();
        write_utf8_string(&mut out, &self.username);
        write_utf8_string(&mut out, &encoded);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_username_and_base64_password() {
        let mut handler = BasicAuthHandler::default();
        handler.init("guest", "guest");
        let reply = handler.handle_request(&[], 0).unwrap();

        let mut expected = Vec::new();
        write_utf8_string(&mut expected, "guest");
        write_utf8_string(&mut expected, &STANDARD.encode(b"guest"));
        assert_eq!(reply, expected);
    }

    #[test]
    fn rejects_empty_password() {
        let mut handler = BasicAuthHandler::default();
        handler.init("guest", "");
        assert!(handler.handle_request(&[], 0).is_err());
    }
}
