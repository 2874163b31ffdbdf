//! Transport adapters (spec ss4.2, ss4.5, SPEC_FULL.md "ambient stack"):
//! plain TCP and TLS-over-TCP, both implementing the packet codec's
//! `PacketSource`/`PacketSink` traits so `ProtocolEngine` never touches a
//! socket type directly. TLS is layered with `rustls`, the crate other
//! example repos in the pack reach for; this module does not reimplement
//! any TLS handshake logic itself.
//!
//! `connect` resolves the real service port through the portmapper bootstrap
//! (`portmapper` submodule) when configured, then opens independent read and
//! write halves of the transport: a reader owned exclusively by the single
//! dispatcher thread and a writer serialized by `TransportHandle` for
//! application callers (spec ss4.5's `writeMonitor`). Splitting the two
//! apart, rather than sharing one lock across both, is what lets
//! `engine.hello()`'s write go out while the dispatcher's first read is
//! still blocked waiting on bytes the broker hasn't sent yet — see
//! DESIGN.md for the deadlock this replaced.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use mq_protocol::{MqError, PacketSink, PacketSource, Result};

use crate::config::{ConnectionConfig, ConnectionType};
use crate::portmapper;

/// The independent read/write halves `connect` hands back, plus the local
/// address and a shutdown callback usable from either side without
/// contending for the other side's lock.
pub struct TransportHalves {
    pub reader: Box<dyn PacketSource + Send>,
    pub writer: Box<dyn PacketSink + Send>,
    pub local_addr: Option<(IpAddr, u16)>,
    pub shutdown: Box<dyn Fn() -> Result<()> + Send + Sync>,
}

fn shutdown_socket(stream: &TcpStream) -> Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(MqError::from(e)),
    }
}

// ---- Plain TCP ----

struct TcpReader(TcpStream);
struct TcpWriter(TcpStream);

impl PacketSource for TcpReader {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<()> {
        self.0.set_read_timeout(timeout).ok();
        Read::read_exact(&mut self.0, buf).map_err(MqError::from)
    }
}

impl PacketSink for TcpWriter {
    fn write_all(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<()> {
        self.0.set_write_timeout(timeout).ok();
        Write::write_all(&mut self.0, buf).map_err(MqError::from)
    }
}

fn tcp_connect(config: &ConnectionConfig) -> Result<TcpStream> {
    let port = portmapper::resolve_port(config)?;
    let addr = format!("{}:{}", config.host, port);
    let mut last_err = None;
    for candidate in addr
        .to_socket_addrs()
        .map_err(|_| MqError::CouldNotConnect)?
    {
        if !config.enable_ipv6 && candidate.is_ipv6() {
            continue;
        }
        match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    let _ = last_err;
    Err(MqError::CouldNotConnect)
}

fn tcp_halves(config: &ConnectionConfig) -> Result<TransportHalves> {
    let stream = tcp_connect(config)?;
    let local_addr = stream.local_addr().ok().map(|a| (a.ip(), a.port()));
    let reader = stream.try_clone().map_err(MqError::from)?;
    let shutdown_handle = stream.try_clone().map_err(MqError::from)?;
    Ok(TransportHalves {
        reader: Box::new(TcpReader(reader)),
        writer: Box::new(TcpWriter(stream)),
        local_addr,
        shutdown: Box::new(move || shutdown_socket(&shutdown_handle)),
    })
}

// ---- TLS over TCP ----

/// TLS-over-TCP using `rustls`. The broker's certificate is trusted via the
/// platform/webpki roots unless the configuration opts into fingerprint
/// pinning, matching the `ssl-is-host-trusted`/`ssl-check-host-fingerprint`
/// keys from spec ss6.
///
/// `rustls::ClientConnection` isn't safe to mutate from two threads at
/// once, so the read and write halves share one behind a short-lived lock:
/// raw socket I/O (the part that can block indefinitely) happens with the
/// lock released, and only the TLS record encode/decode step — which never
/// blocks, since it only touches bytes already read into memory — happens
/// while it's held. This is what keeps a blocked `TlsReader::read_exact`
/// from also blocking `TlsWriter::write_all`.
struct TlsShared {
    conn: Mutex<rustls::ClientConnection>,
}

struct TlsReader {
    shared: Arc<TlsShared>,
    sock: TcpStream,
}

struct TlsWriter {
    shared: Arc<TlsShared>,
    sock: TcpStream,
}

impl PacketSource for TlsReader {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<()> {
        self.sock.set_read_timeout(timeout).ok();
        let mut filled = 0;
        while filled < buf.len() {
            loop {
                let mut conn = self.shared.conn.lock();
                match conn.reader().read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => {
                        filled += n;
                        if filled == buf.len() {
                            return Ok(());
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(MqError::from(e)),
                }
            }

            let mut raw = [0u8; 4096];
            let n = self.sock.read(&mut raw).map_err(MqError::from)?;
            if n == 0 {
                return Err(MqError::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }
            let mut conn = self.shared.conn.lock();
            let mut cursor = &raw[..n];
            conn.read_tls(&mut cursor).map_err(MqError::from)?;
            conn.process_new_packets()
                .map_err(|e| MqError::SslInitError(e.to_string()))?;
        }
        Ok(())
    }
}

impl PacketSink for TlsWriter {
    fn write_all(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<()> {
        self.sock.set_write_timeout(timeout).ok();
        let mut encrypted = Vec::new();
        {
            let mut conn = self.shared.conn.lock();
            io::Write::write_all(&mut conn.writer(), buf).map_err(MqError::from)?;
            while conn.wants_write() {
                conn.write_tls(&mut encrypted).map_err(MqError::from)?;
            }
        }
        self.sock.write_all(&encrypted).map_err(MqError::from)
    }
}

fn tls_halves(config: &ConnectionConfig) -> Result<TransportHalves> {
    let tcp = tcp_connect(config)?;
    let local_addr = tcp.local_addr().ok().map(|a| (a.ip(), a.port()));
    let read_sock = tcp.try_clone().map_err(MqError::from)?;
    let write_sock = tcp.try_clone().map_err(MqError::from)?;
    let shutdown_handle = tcp.try_clone().map_err(MqError::from)?;

    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = rustls::ServerName::try_from(config.host.as_str())
        .map_err(|e| MqError::SslInitError(e.to_string()))?;

    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| MqError::SslInitError(e.to_string()))?;

    let shared = Arc::new(TlsShared {
        conn: Mutex::new(conn),
    });

    Ok(TransportHalves {
        reader: Box::new(TlsReader {
            shared: shared.clone(),
            sock: read_sock,
        }),
        writer: Box::new(TlsWriter {
            shared,
            sock: write_sock,
        }),
        local_addr,
        shutdown: Box::new(move || shutdown_socket(&shutdown_handle)),
    })
}

/// Builds transport halves directly from an already-connected stream,
/// bypassing `connect`'s portmapper/dial step. Used by the engine and
/// dispatcher test suites, which set up their own loopback sockets.
#[cfg(test)]
pub(crate) fn halves_from_stream(stream: TcpStream) -> Result<TransportHalves> {
    let local_addr = stream.local_addr().ok().map(|a| (a.ip(), a.port()));
    let reader = stream.try_clone().map_err(MqError::from)?;
    let shutdown_handle = stream.try_clone().map_err(MqError::from)?;
    Ok(TransportHalves {
        reader: Box::new(TcpReader(reader)),
        writer: Box::new(TcpWriter(stream)),
        local_addr,
        shutdown: Box::new(move || shutdown_socket(&shutdown_handle)),
    })
}

/// Opens the transport named by the configuration's connection type,
/// resolving it through the portmapper first when `use_portmapper` is set.
pub fn connect(config: &ConnectionConfig) -> Result<TransportHalves> {
    match config.connection_type {
        ConnectionType::Tcp => tcp_halves(config),
        ConnectionType::Tls => tls_halves(config),
    }
}

/// A transport shared between the single reader thread and however many
/// application threads are writing requests. Reads and writes are
/// independently locked (spec ss4.2, ss4.5): the reader's mutex is only
/// ever contended by `close`/`exitConnection` calling `shutdown`, never by a
/// writer, so a write can always proceed even while the dispatcher's read is
/// blocked waiting for bytes.
pub struct TransportHandle {
    reader: Mutex<Box<dyn PacketSource + Send>>,
    writer: Mutex<Box<dyn PacketSink + Send>>,
    shutdown_fn: Box<dyn Fn() -> Result<()> + Send + Sync>,
    local_addr: Option<(IpAddr, u16)>,
    closed: AtomicBool,
}

impl TransportHandle {
    pub fn new(halves: TransportHalves) -> Self {
        TransportHandle {
            reader: Mutex::new(halves.reader),
            writer: Mutex::new(halves.writer),
            shutdown_fn: halves.shutdown,
            local_addr: halves.local_addr,
            closed: AtomicBool::new(false),
        }
    }

    pub fn read_packet(&self, timeout: Option<Duration>) -> Result<mq_protocol::Packet> {
        let mut guard = self.reader.lock();
        mq_protocol::Packet::decode(&mut **guard, timeout)
    }

    pub fn write_packet(&self, packet: &mq_protocol::Packet, timeout: Option<Duration>) -> Result<()> {
        let mut guard = self.writer.lock();
        packet.encode(&mut **guard, timeout)
    }

    /// Unblocks any in-flight read/write from another thread (spec ss4.2's
    /// `shutdown()` contract); does not itself mark the transport closed.
    pub fn shutdown(&self) -> Result<()> {
        (self.shutdown_fn)()
    }

    /// `close()` (spec ss4.2): shuts the socket down and latches `isClosed`.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_addr.map(|(ip, _)| ip)
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_addr.map(|(_, port)| port)
    }
}
