//! Transport-level reachability probe (TCP connect, no SSH handshake)

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reachability {
    pub target: String,
    pub port: u16,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

/// Attempt a TCP connection to `host:port` within `timeout`.
///
/// Failures are reported in `reason`, never returned as errors.
pub async fn probe(target: &str, host: &str, port: u16, timeout: Duration) -> Reachability {
    let started = Instant::now();
    let (reachable, latency_ms, reason) =
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => (true, Some(round_ms(started.elapsed())), None),
            Ok(Err(e)) => {
                let reason = e.to_string();
                let reason = if reason.is_empty() {
                    format!("{:?}", e.kind())
                } else {
                    reason
                };
                (false, None, Some(reason))
            }
            Err(_) => (
                false,
                None,
                Some(format!("timed out after {}ms", timeout.as_millis())),
            ),
        };

    Reachability {
        target: target.to_string(),
        port,
        reachable,
        latency_ms,
        reason,
    }
}
