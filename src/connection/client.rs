//! Shared Connection
//!
//! A [`Connection`] is shared by every database handle created from it. It
//! owns the runtime that delivers replies, the transport requests travel
//! over, the registry of active handles, and the live durability settings.
//!
//! ## Request Lifecycle
//!
//! ```text
//! Database handle
//!        │
//!        │ query(request)
//!        ▼
//! ┌──────────────────────────────┐
//! │ Connection                   │
//! │   oneshot::channel()         │
//! │   transport.submit(tx) ──────┼──> Transport (runtime tasks)
//! │   QueryFuture(rx)            │           │
//! └──────────────┬───────────────┘           │ tx.send(reply)
//!                │                           │
//!                ▼                           │
//!   block_on / spawn + callback  <───────────┘
//! ```
//!
//! ## Blocking Calls
//!
//! Blocking waits run on the caller's thread with `Runtime::block_on` while
//! the runtime's worker threads keep delivering other replies, so a blocking
//! call never starves pending callbacks.

use crate::connection::memory::MemoryTransport;
use crate::connection::registry::Registry;
use crate::connection::transport::{QueryFuture, Transport, TransportError};
use crate::database::membership::{self, TeardownGuard};
use crate::database::{Acknowledgment, Database, WriteConcern};
use crate::error::{Error, Result};
use crate::protocol::{classify_command_error, CommandError, Document, QueryRequest, Reply};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// How `collection_names` enumerates collections.
///
/// The choice is configuration; the handle never probes the server to pick
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionListing {
    /// Issue the `listCollections` command
    #[default]
    ListCollections,
    /// Scan the legacy `<db>.system.namespaces` collection
    NamespaceScan,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Worker threads of the reply-delivery runtime (default: 2)
    pub worker_threads: usize,

    /// Collection enumeration strategy
    pub collection_listing: CollectionListing,

    /// Initial durability settings
    pub write_concern: WriteConcern,

    /// Guard consulted when this connection's handles are dropped
    /// (default: the process-wide guard)
    pub teardown_guard: &'static TeardownGuard,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            collection_listing: CollectionListing::default(),
            write_concern: WriteConcern::default(),
            teardown_guard: membership::global_guard(),
        }
    }
}

/// Statistics for one connection
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total queries submitted to the transport
    pub queries_submitted: AtomicU64,
    /// Replies received
    pub replies_received: AtomicU64,
    /// Queries that ended in a transport error
    pub transport_errors: AtomicU64,
    /// Replies classified as command failures
    pub command_failures: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_submitted(&self) {
        self.queries_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_received(&self) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// A connection shared by many database handles.
pub struct Connection {
    /// Reply-delivery runtime, taken on drop
    runtime: Option<Runtime>,

    transport: Arc<dyn Transport>,

    /// Active handle per database name
    registry: Registry,

    /// Live durability settings
    durability: RwLock<WriteConcern>,

    collection_listing: CollectionListing,

    teardown_guard: &'static TeardownGuard,

    stats: Arc<ConnectionStats>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Connection");
        match self.registry.names() {
            Ok(names) => debug.field("registry", &names),
            Err(err) => debug.field("registry", &err),
        };
        debug
            .field("collection_listing", &self.collection_listing)
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}

impl Connection {
    /// Opens a connection over `transport`.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("flashdoc-worker")
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;

        info!(
            workers = config.worker_threads.max(1),
            listing = ?config.collection_listing,
            "Connection opened"
        );

        Ok(Arc::new(Self {
            runtime: Some(runtime),
            transport,
            registry: Registry::new(),
            durability: RwLock::new(config.write_concern),
            collection_listing: config.collection_listing,
            teardown_guard: config.teardown_guard,
            stats: Arc::new(ConnectionStats::new()),
        }))
    }

    /// Opens a connection to a fresh in-process server.
    pub fn in_memory() -> Result<Arc<Self>> {
        Self::new(ConnectionConfig::default(), Arc::new(MemoryTransport::new()))
    }

    /// Returns the active handle for `name`, creating and registering one if
    /// none is alive.
    pub fn database(self: &Arc<Self>, name: &str) -> Result<Arc<Database>> {
        self.registry
            .get_or_insert_with(name, || Database::new(self, name))
    }

    /// Makes `database` the active handle for its name, replacing any
    /// previous entry.
    pub fn register(&self, database: &Arc<Database>) -> Result<()> {
        self.registry.insert(database)?;
        Ok(())
    }

    /// The live handle registered under `name`, if any.
    pub fn registered(&self, name: &str) -> Result<Option<Arc<Database>>> {
        Ok(self.registry.lookup(name)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Submits a query. The returned future resolves once with the reply or
    /// a transport error.
    pub fn query(&self, request: QueryRequest) -> QueryFuture {
        let (tx, rx) = oneshot::channel();
        self.stats.query_submitted();
        match &self.runtime {
            Some(runtime) => self.transport.submit(runtime.handle(), request, tx),
            None => drop(tx),
        }
        QueryFuture::new(rx, Arc::clone(&self.stats))
    }

    /// Submits a query and invokes `callback` exactly once with the outcome.
    ///
    /// The pending callback keeps the connection alive until it has run.
    pub fn query_with<F>(self: &Arc<Self>, request: QueryRequest, callback: F)
    where
        F: FnOnce(std::result::Result<Reply, TransportError>) + Send + 'static,
    {
        let reply = self.query(request);
        let conn = Arc::clone(self);
        self.spawn(async move {
            callback(reply.await);
            drop(conn);
        });
    }

    /// Decides whether a reply document is a logical failure.
    pub fn classify_command_error(&self, document: &Document) -> Option<CommandError> {
        classify_command_error(document)
    }

    /// Snapshot of the current durability settings.
    pub fn durability(&self) -> WriteConcern {
        match self.durability.read() {
            Ok(concern) => concern.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_durability(&self, update: impl FnOnce(&mut WriteConcern)) {
        let mut concern = match self.durability.write() {
            Ok(concern) => concern,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut concern);
        debug!(write_concern = %concern.to_document(), "Durability settings changed");
    }

    pub fn set_w(&self, w: impl Into<Acknowledgment>) {
        let w = w.into();
        self.update_durability(|concern| concern.w = w);
    }

    pub fn set_journal(&self, journal: bool) {
        self.update_durability(|concern| concern.journal = journal);
    }

    pub fn set_wtimeout_ms(&self, wtimeout_ms: u64) {
        self.update_durability(|concern| concern.wtimeout_ms = wtimeout_ms);
    }

    pub fn collection_listing(&self) -> CollectionListing {
        self.collection_listing
    }

    pub fn teardown_guard(&self) -> &'static TeardownGuard {
        self.teardown_guard
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Closes the transport. In-flight requests fail with
    /// [`TransportError::ClosedBeforeReply`].
    pub fn close(&self) {
        self.transport.close();
        info!("Connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Runs `future` to completion on the calling thread.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        if Handle::try_current().is_ok() {
            return Err(Error::BlockingInAsyncContext);
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or(Error::Transport(TransportError::Closed))?;
        Ok(runtime.block_on(future))
    }

    /// Runs `future` in the background on the connection's runtime.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(runtime) = &self.runtime {
            runtime.spawn(future);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The last reference may be released on one of the runtime's own
        // worker threads, where a blocking shutdown is not allowed.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        debug!("Connection dropped");
    }
}
