//! In-Process Transport
//!
//! [`MemoryTransport`] answers requests from a [`CommandHandler`] over a
//! shared [`DocumentStore`], without any network. Each request runs as its
//! own task on the connection's runtime, optionally after a simulated
//! latency.
//!
//! ## Closing
//!
//! Closing broadcasts on a `watch` channel. Tasks still waiting out their
//! latency drop their reply sender, so callers observe
//! [`TransportError::ClosedBeforeReply`]; requests submitted after close are
//! answered with [`TransportError::Closed`].

use crate::commands::CommandHandler;
use crate::connection::transport::{ReplySender, Transport, TransportError};
use crate::protocol::QueryRequest;
use crate::storage::DocumentStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the in-process transport.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Delay before each reply is produced (default: none)
    pub latency: Duration,
}

/// A transport served by an in-process command handler.
#[derive(Debug)]
pub struct MemoryTransport {
    handler: CommandHandler,
    config: MemoryConfig,
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Creates a transport over a fresh, empty store.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self::with_store(Arc::new(DocumentStore::new()), config)
    }

    /// Creates a transport over an existing store, e.g. one shared by
    /// several connections.
    pub fn with_store(store: Arc<DocumentStore>, config: MemoryConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            handler: CommandHandler::new(store),
            config,
            shutdown_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// The store requests are executed against.
    pub fn store(&self) -> &Arc<DocumentStore> {
        self.handler.storage()
    }
}

impl Transport for MemoryTransport {
    fn submit(&self, runtime: &Handle, request: QueryRequest, reply: ReplySender) {
        // Subscribe before checking the flag so a concurrent close is seen
        // either here or by the task.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_closed() {
            let _ = reply.send(Err(TransportError::Closed));
            return;
        }

        let handler = self.handler.clone();
        let latency = self.config.latency;

        runtime.spawn(async move {
            if !latency.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(latency) => {}
                    _ = shutdown_rx.changed() => {
                        debug!(ns = %request.namespace, "Transport closed with request in flight");
                        return;
                    }
                }
            }
            if *shutdown_rx.borrow() {
                return;
            }

            let result = handler.execute(&request);
            trace!(
                ns = %request.namespace,
                documents = result.documents.len(),
                "Request executed"
            );
            let _ = reply.send(Ok(result));
        });
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown_tx.send_replace(true);
            info!("In-memory transport closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_replies_to_command() {
        let transport = MemoryTransport::new();
        let (tx, rx) = oneshot::channel();
        transport.submit(
            &Handle::current(),
            QueryRequest::new("app.$cmd", doc! { "ping": 1 }),
            tx,
        );

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_close() {
        let transport = MemoryTransport::new();
        transport.close();
        assert!(transport.is_closed());

        let (tx, rx) = oneshot::channel();
        transport.submit(
            &Handle::current(),
            QueryRequest::new("app.$cmd", doc! { "ping": 1 }),
            tx,
        );
        assert_eq!(rx.await.unwrap(), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_close_drops_in_flight_requests() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            latency: Duration::from_secs(5),
        });
        let (tx, rx) = oneshot::channel();
        transport.submit(
            &Handle::current(),
            QueryRequest::new("app.$cmd", doc! { "ping": 1 }),
            tx,
        );
        transport.close();

        let outcome = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("in-flight request should resolve promptly after close");
        assert!(outcome.is_err(), "sender must be dropped without a reply");
    }

    #[tokio::test]
    async fn test_shared_store() {
        let store = Arc::new(DocumentStore::new());
        let a = MemoryTransport::with_store(Arc::clone(&store), MemoryConfig::default());
        let b = MemoryTransport::with_store(Arc::clone(&store), MemoryConfig::default());

        let (tx, rx) = oneshot::channel();
        a.submit(
            &Handle::current(),
            QueryRequest::new(
                "app.$cmd",
                doc! { "insert": "t", "documents": vec![doc! { "x": 1 }] },
            ),
            tx,
        );
        rx.await.unwrap().unwrap();

        assert_eq!(b.store().count("app", "t", &doc! {}), 1);
    }
}
