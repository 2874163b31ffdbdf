//! Portmapper bootstrap (spec ss4.2, ss6): resolve the broker's real
//! service port before opening the connection's transport. Grounded on
//! `Connection.cpp`'s handling of `MQ_READ_PORTMAPPER_TIMEOUT_PROPERTY` and
//! spec ss4.2's description ("connect to a bootstrap port, read a
//! service-list entry matching the requested service, then reconnect to the
//! returned service port"); the retrieval pack doesn't carry the broker-side
//! portmapper listener itself, so the exact line format below is this
//! crate's own reading of that description rather than a verbatim port of
//! broker source — see DESIGN.md.

use std::io::{BufRead, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use mq_protocol::{MqError, Result};

use crate::config::ConnectionConfig;

struct ServiceEntry {
    name: String,
    port: u16,
}

/// Each line is `name:type:proto:port`; the list ends at the first blank
/// line or EOF.
fn read_service_list(stream: &TcpStream, timeout: Duration) -> Result<Vec<ServiceEntry>> {
    stream.set_read_timeout(Some(timeout)).ok();
    let cloned = stream.try_clone().map_err(MqError::from)?;
    let mut reader = BufReader::new(cloned);
    let mut entries = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(MqError::from)?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if n == 0 || trimmed.is_empty() {
            break;
        }
        let fields: Vec<&str> = trimmed.split(':').collect();
        if let [name, _service_type, _proto, port, ..] = fields[..] {
            if let Ok(port) = port.parse() {
                entries.push(ServiceEntry {
                    name: name.to_string(),
                    port,
                });
            }
        }
    }
    Ok(entries)
}

/// Resolves the real service port. When `config.use_portmapper` is unset,
/// `config.port` already names the service port directly and no bootstrap
/// round-trip happens.
pub fn resolve_port(config: &ConnectionConfig) -> Result<u16> {
    if !config.use_portmapper {
        return Ok(config.port);
    }

    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|_| MqError::CouldNotConnect)?
        .next()
        .ok_or(MqError::CouldNotConnect)?;
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(MqError::from)?;

    let entries = read_service_list(&stream, config.read_portmapper_timeout)?;
    stream.shutdown(std::net::Shutdown::Both).ok();

    entries
        .into_iter()
        .find(|entry| entry.name == config.portmapper_service_name)
        .map(|entry| entry.port)
        .ok_or(MqError::CouldNotConnect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn resolves_matching_service_from_bootstrap_list() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .write_all(b"admin:ADMIN:tcp:7677\njms:JMS:tcp:7676\n\n")
                .unwrap();
        });

        let config = ConnectionConfig::new(addr.ip().to_string(), addr.port()).with_portmapper("jms");
        let resolved = resolve_port(&config).unwrap();
        assert_eq!(resolved, 7676);
        server.join().unwrap();
    }

    #[test]
    fn disabled_portmapper_returns_configured_port_directly() {
        let config = ConnectionConfig::new("localhost", 7676);
        assert_eq!(resolve_port(&config).unwrap(), 7676);
    }
}
