//! Deterministic local port allocation
//!
//! Each resource hashes to a stable base port so independent invocations
//! converge on the same port without negotiation. When the base port is
//! taken, a bounded linear probe finds the next free one; whichever port is
//! actually used gets recorded in the registry, anchoring later invocations.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

pub const PORT_RANGE_START: u16 = 10000;
pub const PORT_RANGE_SPAN: u32 = 50000;
pub const PROBE_WINDOW: u16 = 20;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// The deterministic base port for a resource name.
pub fn base_port(resource: &str) -> u16 {
    let digest = Sha256::digest(resource.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(bytes);
    PORT_RANGE_START + (n % u64::from(PORT_RANGE_SPAN)) as u16
}

/// Whether something is currently accepting connections on this local port.
pub fn is_listening(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
}

/// Pick a free port for this resource: the deterministic base port, or the
/// first free port within the probe window after it.
pub fn allocate(resource: &str) -> Result<u16> {
    let base = base_port(resource);

    for offset in 0..PROBE_WINDOW {
        let port = base + offset;
        if !is_listening(port) {
            return Ok(port);
        }
    }

    bail!(
        "No free port in range {}..{} for resource '{}'",
        base,
        base + PROBE_WINDOW,
        resource
    )
}
