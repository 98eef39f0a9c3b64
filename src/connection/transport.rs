//! Transport Abstraction
//!
//! A transport accepts query requests and eventually answers each one through
//! its [`ReplySender`]. Encoding, sockets, pooling and backlog scheduling all
//! live behind this trait.
//!
//! ## Delivery Contract
//!
//! Every submitted request resolves exactly once:
//!
//! ```text
//! submit(request, sender)
//!        │
//!        ├──> sender.send(Ok(reply))        reply arrived
//!        ├──> sender.send(Err(error))       transport failed
//!        └──> sender dropped                closed before reply
//! ```
//!
//! A sender dropped without a value surfaces to the waiting caller as
//! [`TransportError::ClosedBeforeReply`].

use crate::connection::client::ConnectionStats;
use crate::protocol::{QueryRequest, Reply};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// The one-shot channel a transport answers a request on.
pub type ReplySender = oneshot::Sender<Result<Reply, TransportError>>;

/// Errors raised below the protocol layer, before any reply is available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection went away while the request was in flight
    #[error("connection closed before a reply was received")]
    ClosedBeforeReply,

    /// The request was submitted after the transport was closed
    #[error("transport is closed")]
    Closed,

    /// Lower-level I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Something that can carry query requests to a server.
pub trait Transport: Send + Sync + 'static {
    /// Submits a request. Work that completes later is spawned on `runtime`.
    ///
    /// Implementations must eventually send on `reply` or drop it.
    fn submit(&self, runtime: &Handle, request: QueryRequest, reply: ReplySender);

    /// Closes the transport. In-flight requests resolve as
    /// [`TransportError::ClosedBeforeReply`].
    fn close(&self);

    /// Returns true once [`Transport::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// The pending reply to one submitted query.
#[derive(Debug)]
pub struct QueryFuture {
    rx: oneshot::Receiver<Result<Reply, TransportError>>,
    stats: Arc<ConnectionStats>,
}

impl QueryFuture {
    pub(crate) fn new(
        rx: oneshot::Receiver<Result<Reply, TransportError>>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self { rx, stats }
    }
}

impl Future for QueryFuture {
    type Output = Result<Reply, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(TransportError::ClosedBeforeReply),
        };

        match &result {
            Ok(_) => self.stats.reply_received(),
            Err(_) => self.stats.transport_error(),
        }
        Poll::Ready(result)
    }
}
