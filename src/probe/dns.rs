//! DNS layer: resolve the target host to a socket address.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use url::Host;

use super::ProbeError;

/// Resolve `host` to the first address the system resolver returns.
///
/// IP literals are returned as-is without a lookup.
pub async fn resolve(host: &Host<&str>, port: u16, timeout: Duration) -> Result<SocketAddr, ProbeError> {
    let name = match host {
        Host::Ipv4(ip) => return Ok(SocketAddr::new(IpAddr::V4(*ip), port)),
        Host::Ipv6(ip) => return Ok(SocketAddr::new(IpAddr::V6(*ip), port)),
        Host::Domain(name) => *name,
    };

    let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((name, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    addrs
        .next()
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", name)))
}
