//! Pooled outbound HTTP client.
//!
//! Each `OutboundClient` owns a keep-alive capable hyper client configured from
//! [`OutboundSettings`]. A client is not tied to an origin: every borrow may
//! target a different host.
//!
//! The read timeout covers the whole response: first the wait for the head,
//! then every gap between body frames.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use hyper::body::{Bytes, Frame, Incoming, SizeHint};
use hyper::{Request, Response};
use tokio::time::{Instant, Sleep};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use thiserror::Error;

use crate::config::OutboundSettings;
use crate::observability::metrics;

/// Failure of one outbound exchange.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The origin did not produce a response head in time.
    #[error("timed out after {0:?} waiting for the origin response")]
    Timeout(Duration),

    /// The origin sent its head, then went quiet mid-body.
    #[error("origin body stalled for {0:?}")]
    BodyStalled(Duration),

    /// The origin connection failed while the body was streaming.
    #[error("origin body error: {0}")]
    Body(#[source] hyper::Error),

    /// DNS, connect, protocol or origin failure.
    #[error("{}", error_chain(.0))]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// hyper's top-level errors are terse ("client error (Connect)"); the useful detail is in the sources.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// A reusable outbound HTTP/1.1 client.
#[derive(Debug, Clone)]
pub struct OutboundClient {
    inner: Client<HttpConnector, Body>,
    read_timeout: Duration,
}

impl OutboundClient {
    pub fn new(settings: &OutboundSettings) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(settings.write_timeout));
        connector.set_nodelay(true);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(settings.max_idle_conn_duration)
            .pool_timer(TokioTimer::new())
            .build(connector);

        Self {
            inner,
            read_timeout: settings.read_timeout,
        }
    }

    /// Perform one exchange. `request` must carry an absolute `http://` URI.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<ReadTimeoutBody>, ForwardError> {
        let response = match tokio::time::timeout(self.read_timeout, self.inner.request(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ForwardError::Timeout(self.read_timeout)),
        };
        let read_timeout = self.read_timeout;
        Ok(response.map(|body| ReadTimeoutBody::new(body, read_timeout)))
    }
}

/// An origin response body that fails once no frame arrives for `timeout`.
#[derive(Debug)]
pub struct ReadTimeoutBody {
    inner: Incoming,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl ReadTimeoutBody {
    fn new(inner: Incoming, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
        }
    }
}

impl hyper::body::Body for ReadTimeoutBody {
    type Data = Bytes;
    type Error = ForwardError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(frame) => {
                this.deadline.as_mut().reset(Instant::now() + this.timeout);
                Poll::Ready(frame.map(|result| result.map_err(ForwardError::Body)))
            }
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(timeout = ?this.timeout, "Origin body stalled, aborting response");
                    metrics::record_upstream_error("body_stalled");
                    Poll::Ready(Some(Err(ForwardError::BodyStalled(this.timeout))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
