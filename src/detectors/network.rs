//! Instrumentation server detection over loopback.
//!
//! Instrumentation daemons listen on well-known loopback ports. Two probes:
//!
//! 1. **Port-open**: a plain TCP connect to each catalog port.
//! 2. **Handshake**: after connecting, send the daemon's auth-negotiation
//!    line and look for its characteristic rejection reply. An open port
//!    could be any service; the reply pins it down.
//!
//! Every connect, read and write is bounded by a timeout and every socket
//! is dropped (closed) before the probe moves on. A timeout is a miss,
//! never an error.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, trace};

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};

/// Auth-negotiation line the daemon answers.
pub const HANDSHAKE_MESSAGE: &[u8; 6] = b"AUTH\r\n";

/// Upper bound on how much of the reply is read.
pub const RESPONSE_LIMIT: usize = 1024;

/// Present in the daemon's reply to an unauthenticated client.
pub const REJECTION_MARKER: &[u8] = b"REJECTED";

fn connect(port: u16, timeout: Duration) -> Option<TcpStream> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => Some(stream),
        Err(err) => {
            trace!(port, error = %err, "no listener");
            None
        }
    }
}

fn contains_marker(response: &[u8]) -> bool {
    response
        .windows(REJECTION_MARKER.len())
        .any(|window| window == REJECTION_MARKER)
}

/// Send the handshake and read until the marker shows up, the peer closes,
/// the read times out, or the response limit is reached.
fn exchange(stream: &mut TcpStream) -> io::Result<bool> {
    stream.write_all(HANDSHAKE_MESSAGE)?;

    let mut response = Vec::with_capacity(RESPONSE_LIMIT);
    let mut chunk = [0u8; 256];
    while response.len() < RESPONSE_LIMIT {
        let room = (RESPONSE_LIMIT - response.len()).min(chunk.len());
        match stream.read(&mut chunk[..room]) {
            Ok(0) => break,
            Ok(n) => {
                response.extend_from_slice(&chunk[..n]);
                if contains_marker(&response) {
                    return Ok(true);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                break
            }
            Err(err) => return Err(err),
        }
    }
    Ok(contains_marker(&response))
}

pub struct PortProbe {
    connect_timeout: Duration,
}

impl PortProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Probe for PortProbe {
    fn id(&self) -> ProbeId {
        ProbeId::InstrumentationPort
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        let open = catalog
            .ports()
            .iter()
            .copied()
            .find(|&port| connect(port, self.connect_timeout).is_some());
        settle(self.id(), Ok(open.map(|port| format!("127.0.0.1:{port}"))))
    }
}

pub struct HandshakeProbe {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl HandshakeProbe {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    fn confirm(&self, port: u16) -> bool {
        let Some(mut stream) = connect(port, self.connect_timeout) else {
            return false;
        };
        let exchanged = stream
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.io_timeout)))
            .and_then(|()| exchange(&mut stream));
        match exchanged {
            Ok(confirmed) => confirmed,
            Err(err) => {
                debug!(port, error = %err, "handshake aborted");
                false
            }
        }
    }
}

impl Probe for HandshakeProbe {
    fn id(&self) -> ProbeId {
        ProbeId::InstrumentationHandshake
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        let confirmed = catalog
            .handshake_ports()
            .iter()
            .copied()
            .find(|&port| self.confirm(port));
        settle(
            self.id(),
            Ok(confirmed.map(|port| format!("127.0.0.1:{port} rejected handshake"))),
        )
    }
}
