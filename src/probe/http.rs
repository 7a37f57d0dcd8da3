//! HTTP layer implementation.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::ProbeError;

/// Issue a GET against `url` and return the final status code.
///
/// Redirects are followed by the client. The request is abandoned when `cancel`
/// fires, which happens on its own once `timeout` has elapsed. The elapsed time
/// covers send to response-or-abort.
pub async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    cancel: CancellationToken,
) -> (Duration, Result<u16, ProbeError>) {
    let start = Instant::now();
    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            if start.elapsed() >= timeout {
                Err(ProbeError::Timeout(timeout))
            } else {
                Err(ProbeError::Cancelled)
            }
        }
        response = client.get(url).send() => response
            .map(|r| r.status().as_u16())
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(timeout)
                } else {
                    ProbeError::Network(e.to_string())
                }
            }),
    };

    deadline.abort();
    (start.elapsed(), result)
}
