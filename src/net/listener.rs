//! TCP listener with a per-client-IP connection cap.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce `max_connections` per client IP
//! - Turn away over-cap peers with `429 Too Many Requests`

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const TOO_MANY_CONNECTIONS: &[u8] = b"HTTP/1.1 429 Too Many Requests\r\n\
Content-Type: text/plain\r\n\
Content-Length: 60\r\n\
Connection: close\r\n\
\r\n\
The number of connections from your ip exceeds MaxConnsPerIP";

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// A TCP listener that limits concurrent connections per client IP.
pub struct Listener {
    inner: TcpListener,
    per_ip: Arc<DashMap<IpAddr, usize>>,
    max_per_ip: usize,
}

impl Listener {
    /// Bind to `address` (anything `TcpListener::bind` accepts).
    pub async fn bind(address: &str, max_per_ip: usize) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.to_string(),
                source,
            })?;

        if let Ok(local_addr) = inner.local_addr() {
            tracing::info!(
                address = %local_addr,
                max_connections_per_ip = max_per_ip,
                "Listener bound"
            );
        }

        Ok(Self {
            inner,
            per_ip: Arc::new(DashMap::new()),
            max_per_ip,
        })
    }

    /// Accept the next connection whose peer is under its cap.
    ///
    /// Over-cap connections are answered with a 429 in the background and skipped.
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        loop {
            let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

            match self.try_admit(addr.ip()) {
                Some(permit) => {
                    tracing::debug!(peer_addr = %addr, "Connection accepted");
                    return Ok((stream, addr, permit));
                }
                None => {
                    tracing::warn!(
                        peer_addr = %addr,
                        max_connections_per_ip = self.max_per_ip,
                        "Per-IP connection limit reached"
                    );
                    tokio::spawn(reject(stream));
                }
            }
        }
    }

    fn try_admit(&self, ip: IpAddr) -> Option<ConnectionPermit> {
        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            return None;
        }
        *count += 1;
        Some(ConnectionPermit {
            per_ip: Arc::clone(&self.per_ip),
            ip,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Open connections currently held by `ip`.
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.per_ip.get(&ip).map(|count| *count).unwrap_or(0)
    }
}

async fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(TOO_MANY_CONNECTIONS).await;
    let _ = stream.shutdown().await;
}

/// A permit representing one of a client IP's connection slots.
///
/// When dropped, the slot is released. Entries for IPs with no open
/// connections are removed so the map does not grow with every peer seen.
#[derive(Debug)]
pub struct ConnectionPermit {
    per_ip: Arc<DashMap<IpAddr, usize>>,
    ip: IpAddr,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.per_ip.entry(self.ip) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }
}
