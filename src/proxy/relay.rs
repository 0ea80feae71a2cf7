//! Bidirectional relay between a client and a destination connection.
//!
//! # Responsibilities
//! - Copy client→destination and destination→client on two spawned tasks
//! - Propagate end-of-stream from each direction to the opposite peer
//! - Finish only after *both* directions are done, then close both ends
//! - Tear the tunnel down when neither direction moves a byte for `idle_timeout`
//!
//! A copy error is a warning, never fatal: the opposite direction keeps
//! draining until its own source ends.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;

use crate::observability::metrics;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved in each direction over a tunnel's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_destination: u64,
    pub destination_to_client: u64,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Upstream,
    Downstream,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Upstream => "client_to_destination",
            Direction::Downstream => "destination_to_client",
        }
    }
}

/// Last time either direction moved data. Shared by both copy tasks so a
/// one-way transfer keeps the silent direction alive.
#[derive(Debug)]
struct Activity {
    started: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_millis.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Relay bytes between `client` and `destination` until both directions finish.
///
/// Both connections are dropped (closed) before this returns, on every path.
pub async fn relay<C, D>(client: C, destination: D, idle_timeout: Duration) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (destination_read, destination_write) = tokio::io::split(destination);
    let activity = Arc::new(Activity::new());

    let upstream = tokio::spawn(pipe(
        client_read,
        destination_write,
        Direction::Upstream,
        idle_timeout,
        Arc::clone(&activity),
    ));
    let downstream = tokio::spawn(pipe(
        destination_read,
        client_write,
        Direction::Downstream,
        idle_timeout,
        activity,
    ));

    // The other direction may still be draining when the first one ends.
    let (upstream, downstream) = tokio::join!(upstream, downstream);

    let mut stats = RelayStats::default();
    let upstream = match upstream {
        Ok(finished) => {
            stats.client_to_destination = finished.bytes;
            Some(finished)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Client to destination task failed");
            None
        }
    };
    let downstream = match downstream {
        Ok(finished) => {
            stats.destination_to_client = finished.bytes;
            Some(finished)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Destination to client task failed");
            None
        }
    };

    // Last references to both streams; dropping them closes the sockets.
    drop(upstream);
    drop(downstream);
    stats
}

/// One finished direction. Holds the halves so the streams stay open until both directions are done.
struct Finished<R, W> {
    _reader: R,
    _writer: W,
    bytes: u64,
}

async fn pipe<R, W>(
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    direction: Direction,
    idle_timeout: Duration,
    activity: Arc<Activity>,
) -> Finished<ReadHalf<R>, WriteHalf<W>>
where
    R: AsyncRead + AsyncWrite,
    W: AsyncRead + AsyncWrite,
{
    let mut bytes = 0;
    let result = copy_until_idle(&mut reader, &mut writer, idle_timeout, &activity, &mut bytes).await;

    // Pass the end-of-stream on so the peer can finish its side.
    let _ = writer.shutdown().await;

    match result {
        Ok(()) => tracing::debug!(direction = direction.as_str(), bytes, "Relay direction finished"),
        Err(e) => tracing::warn!(
            direction = direction.as_str(),
            bytes,
            error = %e,
            "Relay copy error"
        ),
    }
    metrics::record_tunnel_bytes(direction.as_str(), bytes);

    Finished {
        _reader: reader,
        _writer: writer,
        bytes,
    }
}

async fn copy_until_idle<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Duration,
    activity: &Activity,
    bytes: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        // Measured from the last byte in either direction, not from this read.
        let remaining = idle_timeout.saturating_sub(activity.idle_for());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel idle timeout"));
        }

        let n = match tokio::time::timeout(remaining, reader.read(&mut buf)).await {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            // The other direction may have been active meanwhile; re-check.
            Err(_) => continue,
        };
        activity.touch();

        match tokio::time::timeout(idle_timeout, writer.write_all(&buf[..n])).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "peer stopped reading"));
            }
        }
        *bytes += n as u64;
    }
}
