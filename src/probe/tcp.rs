//! TCP layer: open and immediately drop a raw connection.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::ProbeError;

/// Try to connect to `addr` within `timeout`.
///
/// The elapsed time is reported whether or not the connection succeeded.
pub async fn run_tcp_probe(addr: SocketAddr, timeout: Duration) -> (Duration, Result<(), ProbeError>) {
    let start = Instant::now();

    let result = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Network(e.to_string())),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    (start.elapsed(), result)
}
