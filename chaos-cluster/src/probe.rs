//! Health probes used to decide when a node is reachable.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// How to check that a node is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// A TCP connect to the address succeeds.
    Tcp(SocketAddr),
    /// An HTTP GET to the URL returns any response.
    Http(String),
}

impl Probe {
    /// Run the probe once. Returns true when the node answered within `timeout`.
    pub async fn check(&self, http: &reqwest::Client, timeout: Duration) -> bool {
        match self {
            Probe::Tcp(addr) => matches!(
                tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
                Ok(Ok(_))
            ),
            Probe::Http(url) => match http.get(url).timeout(timeout).send().await {
                Ok(resp) => {
                    tracing::debug!("Probe {} answered {}", url, resp.status());
                    true
                }
                Err(e) => {
                    tracing::debug!("Probe {} failed: {}", url, e);
                    false
                }
            },
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Tcp(addr) => write!(f, "tcp {}", addr),
            Probe::Http(url) => write!(f, "http {}", url),
        }
    }
}
