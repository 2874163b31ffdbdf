//! End-to-end connection open/close against a hand-rolled broker thread
//! (spec ss8 scenario 1: hello + basic auth + clientId + close).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use mq_protocol::constants::*;
use mq_protocol::status::STATUS_OK;
use mq_protocol::{MqError, Packet, PacketSink, PacketSource, PacketType};

use mq_client::{Connection, ConnectionConfig};

struct Broker {
    stream: TcpStream,
}

impl PacketSource for Broker {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> mq_protocol::Result<()> {
        self.stream.set_read_timeout(timeout).ok();
        Read::read_exact(&mut self.stream, buf).map_err(MqError::from)
    }
}

impl PacketSink for Broker {
    fn write_all(&mut self, buf: &[u8], timeout: Option<Duration>) -> mq_protocol::Result<()> {
        self.stream.set_write_timeout(timeout).ok();
        Write::write_all(&mut self.stream, buf).map_err(MqError::from)
    }
}

impl Broker {
    fn read(&mut self) -> Packet {
        Packet::decode(self, Some(Duration::from_secs(5))).expect("broker read")
    }

    fn write(&mut self, packet: &Packet) {
        packet.encode(self, Some(Duration::from_secs(5))).expect("broker write");
    }
}

fn spawn_broker(listener: TcpListener) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut broker = Broker { stream };

        let hello = broker.read();
        assert_eq!(hello.packet_type, PacketType::Hello);
        let mut hello_reply = Packet::new(PacketType::HelloReply);
        hello_reply.consumer_id = hello.consumer_id;
        hello_reply.properties.insert(JMQ_STATUS, STATUS_OK);
        hello_reply.properties.insert(JMQ_CONNECTION_ID, 1001i64);
        broker.write(&hello_reply);

        let mut auth_request = Packet::new(PacketType::AuthenticateRequest);
        auth_request.consumer_id = hello.consumer_id;
        auth_request.properties.insert(JMQ_AUTH_TYPE, AUTH_TYPE_BASIC);
        broker.write(&auth_request);

        let authenticate = broker.read();
        assert_eq!(authenticate.packet_type, PacketType::Authenticate);
        let mut auth_reply = Packet::new(PacketType::AuthenticateReply);
        auth_reply.consumer_id = hello.consumer_id;
        auth_reply.properties.insert(JMQ_STATUS, STATUS_OK);
        broker.write(&auth_reply);

        let set_client_id = broker.read();
        assert_eq!(set_client_id.packet_type, PacketType::SetClientId);
        assert_eq!(set_client_id.properties.get_str(JMQ_CLIENT_ID), Some("test-client"));
        let mut set_client_id_reply = Packet::new(PacketType::SetClientIdReply);
        set_client_id_reply.consumer_id = set_client_id.consumer_id;
        set_client_id_reply.properties.insert(JMQ_STATUS, STATUS_OK);
        broker.write(&set_client_id_reply);

        let goodbye = broker.read();
        assert_eq!(goodbye.packet_type, PacketType::Goodbye);
        let mut goodbye_reply = Packet::new(PacketType::GoodbyeReply);
        goodbye_reply.consumer_id = goodbye.consumer_id;
        goodbye_reply.properties.insert(JMQ_STATUS, STATUS_OK);
        broker.write(&goodbye_reply);
    })
}

#[test]
fn open_hello_auth_client_id_then_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = spawn_broker(listener);

    let config = ConnectionConfig::new("127.0.0.1", addr.port()).with_ping_interval(Duration::ZERO);
    let connection = Connection::open(config, "guest", "guest", Some("test-client".into()), None)
        .expect("connection should open");

    assert_eq!(connection.client_id(), Some("test-client".to_string()));

    connection.close().expect("close should succeed");
    // idempotent: a second close is a no-op, not an error.
    connection.close().expect("second close should also succeed");

    broker.join().unwrap();
}
