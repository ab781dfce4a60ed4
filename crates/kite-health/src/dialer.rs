//! TCP reachability checks for pod ports.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Decides whether `host:port` accepts a connection within `timeout`.
#[async_trait]
pub trait PortDialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Dials over the network with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl PortDialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(%host, port, error = %e, "dial failed");
                false
            }
            Err(_) => {
                debug!(%host, port, ?timeout, "dial timed out");
                false
            }
        }
    }
}

/// Answers every dial with a fixed result without touching the network.
/// Used where pod addresses are not routable from the control plane.
#[derive(Debug, Clone, Copy)]
pub struct StaticDialer(pub bool);

#[async_trait]
impl PortDialer for StaticDialer {
    async fn dial(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        self.0
    }
}
