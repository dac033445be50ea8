// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide configuration: compile-time constants and environment
//! lookups. All tunables live here; nothing else hardcodes ports or
//! intervals.

use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use crate::{Error, Result};

// =======================================================================
// Discovery constants
// =======================================================================

/// UDP port of the message discovery beacon.
pub const MSG_DISCOVERY_PORT: u16 = 11317;

/// UDP port of the service discovery beacon.
pub const SRV_DISCOVERY_PORT: u16 = 11318;

/// Multicast group both beacons join. Loopback stays enabled so processes
/// on the same host hear each other.
pub const DISCOVERY_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 7);

/// Interval between heartbeat beacons.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Silence after which a peer is considered gone (three missed heartbeats).
pub const MAX_SILENCE_INTERVAL: Duration = Duration::from_millis(3000);

/// Read timeout on the beacon socket; bounds the beacon thread's reaction
/// time to the stop flag.
pub const DISCOVERY_READ_TIMEOUT: Duration = Duration::from_millis(250);

// =======================================================================
// Data-plane constants
// =======================================================================

/// Poll timeout of the reception loop.
pub const RECEPTION_POLL_TIMEOUT_MS: i64 = 250;

/// Delay between a fresh `connect` and the first send on that connection.
/// The underlying transport completes its handshake asynchronously; a send
/// issued immediately after `connect` may be dropped.
pub const CONNECTION_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Linger applied to the short-lived control dealer sockets.
pub const CONTROL_LINGER_MS: i32 = 300;

/// Upper bound on a fully qualified topic name.
pub const MAX_NAME_LENGTH: usize = 65535;

/// Marker for an unthrottled publisher or subscriber.
pub const UNTHROTTLED: u64 = u64::MAX;

// =======================================================================
// Environment
// =======================================================================

/// Default partition applied to every node in the process.
pub const ENV_PARTITION: &str = "IGN_PARTITION";

/// `"1"` enables diagnostic logging on stderr.
pub const ENV_VERBOSE: &str = "IGN_VERBOSE";

/// Preferred local IPv4 address for socket binding.
pub const ENV_IP: &str = "IGN_IP";

/// PLAIN authentication username.
pub const ENV_USERNAME: &str = "IGN_TRANSPORT_USERNAME";

/// PLAIN authentication password.
pub const ENV_PASSWORD: &str = "IGN_TRANSPORT_PASSWORD";

/// Process-wide default partition, empty when unset.
pub fn partition() -> String {
    std::env::var(ENV_PARTITION).unwrap_or_default()
}

/// Whether `IGN_VERBOSE=1`.
pub fn verbose() -> bool {
    std::env::var(ENV_VERBOSE).map(|v| v == "1").unwrap_or(false)
}

/// PLAIN credentials, if fully configured.
///
/// Returns `Ok(None)` when neither variable is set and
/// [`Error::AuthConfigError`] when only one of the two is.
pub fn plain_credentials() -> Result<Option<(String, String)>> {
    let username = std::env::var(ENV_USERNAME).ok();
    let password = std::env::var(ENV_PASSWORD).ok();
    match (username, password) {
        (Some(u), Some(p)) => Ok(Some((u, p))),
        (None, None) => Ok(None),
        _ => Err(Error::AuthConfigError),
    }
}

/// Local IPv4 address the data-plane sockets bind to.
///
/// `IGN_IP` wins when set and parseable; otherwise the address is inferred
/// by routing a throwaway datagram socket and reading its local endpoint,
/// falling back to loopback on single-host setups.
pub fn host_addr() -> Ipv4Addr {
    if let Ok(var) = std::env::var(ENV_IP) {
        match var.parse::<Ipv4Addr>() {
            Ok(addr) => return addr,
            Err(_) => {
                log::debug!("[Config] Invalid {}='{}', falling back to auto-detect", ENV_IP, var);
            }
        }
    }
    detect_host_addr().unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Infer the primary interface address without sending any traffic: a UDP
/// socket "connected" to a routable address reveals the source address the
/// kernel would pick.
fn detect_host_addr() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_addr_is_routable() {
        let addr = host_addr();
        assert!(!addr.is_unspecified(), "host address should never be 0.0.0.0");
    }

    #[test]
    fn test_discovery_ports_are_distinct() {
        assert_ne!(MSG_DISCOVERY_PORT, SRV_DISCOVERY_PORT);
    }

    #[test]
    fn test_silence_is_three_heartbeats() {
        assert_eq!(MAX_SILENCE_INTERVAL, HEARTBEAT_INTERVAL * 3);
    }
}
