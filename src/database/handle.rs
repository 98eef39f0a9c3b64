//! Database Handle
//!
//! A [`Database`] is a lightweight, per-database view of a shared
//! [`Connection`]. It holds nothing but its name and its connection
//! reference, and is always handed out as `Arc<Database>`.
//!
//! ## Call Styles
//!
//! Each operation comes in three forms built on one deferred operation:
//!
//! | Form           | Returns                         | Delivery                  |
//! |----------------|---------------------------------|---------------------------|
//! | `op(..)`       | `Result<T>`                     | blocks the calling thread |
//! | `op_with(..)`  | `()`                            | callback, exactly once    |
//! | `op_async(..)` | [`Deferred<T>`]                 | `.await` on any executor  |
//!
//! Blocking forms must not be called from inside an async runtime; they
//! return [`Error::BlockingInAsyncContext`] there.
//!
//! ## Lifecycle
//!
//! Dropping the last `Arc<Database>` removes the handle from its connection's
//! registry (see [`membership`](crate::database::membership)).

use crate::collection::Collection;
use crate::connection::{CollectionListing, Connection};
use crate::database::executor::{self, ready, CommandSpec, Deferred};
use crate::database::membership::{self, ConnectionRef};
use crate::error::{Error, Result};
use crate::gridfs::{FileStore, DEFAULT_PREFIX};
use crate::doc;
use crate::protocol::{Bson, Document, DocumentExt, QueryRequest};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Characters a database name may not contain.
const INVALID_NAME_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0'];

/// A reference to a document in another collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRef {
    /// Collection holding the target document
    pub collection: String,
    /// `_id` of the target document
    pub id: Bson,
    /// Database holding the collection; `None` means the resolving database
    pub database: Option<String>,
}

impl DbRef {
    pub fn new(collection: impl Into<String>, id: impl Into<Bson>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            database: None,
        }
    }

    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// A handle to one database on a shared connection.
pub struct Database {
    name: String,
    connection: ConnectionRef,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("attached", &self.connection.get().is_some())
            .finish()
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database({})", self.name)
    }
}

/// Checks a database name before any handle is built for it.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || name.contains(INVALID_NAME_CHARS) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Database {
    /// Creates a handle without registering it.
    ///
    /// Most callers want [`Connection::database`], which reuses the live
    /// handle for a name and registers new ones.
    pub fn new(connection: &Arc<Connection>, name: &str) -> Result<Arc<Self>> {
        validate_database_name(name)?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            connection: ConnectionRef::Strong(Arc::clone(connection)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> Result<&Arc<Connection>> {
        self.connection.get().ok_or(Error::Detached)
    }

    // ========================================================================
    // Mode adapters
    // ========================================================================

    /// Waits for `deferred` on the calling thread.
    pub(crate) fn wait<T>(&self, deferred: Deferred<T>) -> Result<T> {
        self.connection()?.block_on(deferred)?
    }

    /// Drives `deferred` in the background and hands its outcome to
    /// `callback`.
    ///
    /// The task holds the connection until the callback has run, so dropping
    /// every handle and the connection itself never discards a pending
    /// callback.
    pub(crate) fn notify<T, F>(&self, deferred: Deferred<T>, callback: F)
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        match self.connection() {
            Ok(conn) => {
                let keep_alive = Arc::clone(conn);
                conn.spawn(async move {
                    callback(deferred.await);
                    drop(keep_alive);
                })
            }
            Err(err) => callback(Err(err)),
        }
    }

    /// Submits a plain query and returns its documents.
    pub(crate) fn query_async(&self, request: QueryRequest) -> Deferred<Vec<Document>> {
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(err) => return ready(Err(err)),
        };
        debug!(db = %self.name, ns = %request.namespace, "Submitting query");
        let stats = Arc::clone(conn.stats());
        let reply = conn.query(request);
        Box::pin(async move { executor::query_documents(reply.await?, &stats) })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Runs a command and returns its reply document.
    ///
    /// Replies reporting failure become [`Error::CommandFailed`].
    ///
    /// ```no_run
    /// use flashdoc::connection::Connection;
    /// use flashdoc::database::CommandSpec;
    /// use flashdoc::doc;
    ///
    /// let conn = Connection::in_memory()?;
    /// let db = conn.database("app")?;
    /// let nonce = db.command("getnonce")?;
    /// db.command(CommandSpec::from(doc! { "create": "events" }).arg("capped", false))?;
    /// # Ok::<(), flashdoc::Error>(())
    /// ```
    pub fn command(&self, spec: impl Into<CommandSpec>) -> Result<Document> {
        self.wait(self.command_async(spec))
    }

    /// Callback form of [`Database::command`].
    pub fn command_with<F>(&self, spec: impl Into<CommandSpec>, callback: F)
    where
        F: FnOnce(Result<Document>) + Send + 'static,
    {
        self.notify(self.command_async(spec), callback)
    }

    /// Deferred form of [`Database::command`].
    pub fn command_async(&self, spec: impl Into<CommandSpec>) -> Deferred<Document> {
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(err) => return ready(Err(err)),
        };
        let request = executor::command_request(&self.name, spec.into().into_document());
        debug!(
            db = %self.name,
            command = request.query.first_key().unwrap_or(""),
            "Submitting command"
        );

        let stats = Arc::clone(conn.stats());
        let reply = conn.query(request);
        Box::pin(async move { executor::classify_reply(reply.await?, &stats) })
    }

    // ========================================================================
    // Collection discovery
    // ========================================================================

    /// Names of the collections in this database, in server order.
    ///
    /// `system.indexes` and `$`-namespaces are never included.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.wait(self.collection_names_async())
    }

    pub fn collection_names_with<F>(&self, callback: F)
    where
        F: FnOnce(Result<Vec<String>>) + Send + 'static,
    {
        self.notify(self.collection_names_async(), callback)
    }

    pub fn collection_names_async(&self) -> Deferred<Vec<String>> {
        let listing = match self.connection() {
            Ok(conn) => conn.collection_listing(),
            Err(err) => return ready(Err(err)),
        };

        match listing {
            CollectionListing::ListCollections => {
                let reply = self.command_async("listCollections");
                Box::pin(async move { executor::names_from_listing(&reply.await?) })
            }
            CollectionListing::NamespaceScan => {
                let request =
                    QueryRequest::new(format!("{}.system.namespaces", self.name), Document::new());
                let entries = self.query_async(request);
                let db = self.name.clone();
                Box::pin(async move { Ok(executor::names_from_namespaces(&entries.await?, &db)) })
            }
        }
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Resolves a reference to the document it points at.
    ///
    /// A missing document is `Ok(None)`.
    pub fn dereference(self: &Arc<Self>, reference: &DbRef) -> Result<Option<Document>> {
        self.wait(self.dereference_async(reference))
    }

    pub fn dereference_with<F>(self: &Arc<Self>, reference: &DbRef, callback: F)
    where
        F: FnOnce(Result<Option<Document>>) + Send + 'static,
    {
        self.notify(self.dereference_async(reference), callback)
    }

    pub fn dereference_async(self: &Arc<Self>, reference: &DbRef) -> Deferred<Option<Document>> {
        if let Some(other) = &reference.database {
            if *other != self.name {
                return ready(Err(Error::InvalidArgument(format!(
                    "reference points at database '{}', not '{}'",
                    other, self.name
                ))));
            }
        }
        self.collection(&reference.collection)
            .find_one_async(doc! { "_id": reference.id.clone() })
    }

    // ========================================================================
    // Statistics and administration
    // ========================================================================

    /// Equivalent to `command({dbstats: 1})`.
    pub fn stats(&self) -> Result<Document> {
        self.wait(self.stats_async())
    }

    pub fn stats_with<F>(&self, callback: F)
    where
        F: FnOnce(Result<Document>) + Send + 'static,
    {
        self.notify(self.stats_async(), callback)
    }

    pub fn stats_async(&self) -> Deferred<Document> {
        self.command_async("dbstats")
    }

    /// Creates a collection, passing `options` as extra command fields.
    pub fn create_collection(self: &Arc<Self>, name: &str, options: Document) -> Result<Collection> {
        self.wait(self.create_collection_async(name, options))
    }

    pub fn create_collection_async(
        self: &Arc<Self>,
        name: &str,
        options: Document,
    ) -> Deferred<Collection> {
        let mut spec = CommandSpec::from(doc! { "create": name });
        for (key, value) in options {
            spec = spec.arg(key, value);
        }
        let created = self.command_async(spec);
        let collection = self.collection(name);
        Box::pin(async move {
            created.await?;
            Ok(collection)
        })
    }

    /// Drops a collection. Dropping a missing collection fails with the
    /// server's "ns not found".
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.wait(self.drop_collection_async(name))
    }

    pub fn drop_collection_async(&self, name: &str) -> Deferred<()> {
        let dropped = self.command_async(doc! { "drop": name });
        Box::pin(async move {
            dropped.await?;
            Ok(())
        })
    }

    // ========================================================================
    // Factories
    // ========================================================================

    /// A collection bound to this handle. No I/O happens here.
    pub fn collection(self: &Arc<Self>, name: &str) -> Collection {
        Collection::new(Arc::clone(self), name)
    }

    /// The default (`fs`) file store bound to this handle.
    pub fn gridfs(self: &Arc<Self>) -> FileStore {
        self.gridfs_with_prefix(DEFAULT_PREFIX)
    }

    pub fn gridfs_with_prefix(self: &Arc<Self>, prefix: &str) -> FileStore {
        FileStore::new(Arc::clone(self), prefix)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let handle: *const Database = self;
        let guard = self
            .connection
            .get()
            .map_or_else(membership::global_guard, |conn| conn.teardown_guard());
        membership::release(guard, &mut self.connection, handle, &self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, MemoryConfig, MemoryTransport, TransportError};
    use std::sync::mpsc;
    use std::time::Duration;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    const WAIT: Duration = Duration::from_secs(5);

    /// Set `RUST_LOG=flashdoc=trace` to see handle activity in test output.
    fn init_tracing() {
        let _ = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .with_test_writer()
            .try_init();
    }

    fn setup() -> (Arc<Connection>, Arc<Database>) {
        init_tracing();
        let conn = Connection::in_memory().unwrap();
        let db = conn.database("app").unwrap();
        (conn, db)
    }

    /// Connections built here may be closed, so they get their own guard.
    fn connect(config: ConnectionConfig, memory: MemoryConfig) -> Arc<Connection> {
        init_tracing();
        let config = ConnectionConfig {
            teardown_guard: membership::isolated_guard(),
            ..config
        };
        Connection::new(config, Arc::new(MemoryTransport::with_config(memory))).unwrap()
    }

    /// Runs a callback-form operation and waits for its single delivery.
    fn deliver<T: Send + 'static>(start: impl FnOnce(mpsc::Sender<Result<T>>)) -> Result<T> {
        let (tx, rx) = mpsc::channel();
        start(tx);
        let result = rx.recv_timeout(WAIT).expect("callback was not invoked");
        assert!(
            rx.recv_timeout(Duration::from_millis(50)).is_err(),
            "callback invoked more than once"
        );
        result
    }

    #[test]
    fn test_getnonce_both_styles() {
        let (_conn, db) = setup();

        let reply = db.command(doc! { "getnonce": 1 }).unwrap();
        assert!(reply.get_str("nonce").is_ok());

        let reply = deliver(|tx| {
            db.command_with(doc! { "getnonce": 1 }, move |r| {
                let _ = tx.send(r);
            })
        })
        .unwrap();
        assert!(reply.get_str("nonce").is_ok());
    }

    #[test]
    fn test_deferred_form() {
        let (_conn, db) = setup();
        let reply = tokio_test::block_on(db.command_async("ping")).unwrap();
        assert_eq!(reply.get("ok"), Some(&Bson::Double(1.0)));
    }

    #[test]
    fn test_failure_is_never_returned_as_success() {
        let (conn, db) = setup();

        let sync_err = db.command("nosuchcommand").unwrap_err();
        let async_err = deliver(|tx| {
            db.command_with("nosuchcommand", move |r| {
                let _ = tx.send(r);
            })
        })
        .unwrap_err();

        for err in [&sync_err, &async_err] {
            match err {
                Error::CommandFailed(e) => {
                    assert_eq!(e.code, Some(59));
                    assert_eq!(e.message, "no such command: 'nosuchcommand'");
                }
                other => panic!("expected CommandFailed, got {:?}", other),
            }
        }
        assert_eq!(sync_err.to_string(), async_err.to_string());
        assert_eq!(
            conn.stats()
                .command_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[test]
    fn test_transport_closed_before_reply() {
        let conn = connect(
            ConnectionConfig::default(),
            MemoryConfig {
                latency: Duration::from_millis(300),
            },
        );
        let db = conn.database("app").unwrap();

        // Callback form: close while the request is in flight.
        let (tx, rx) = mpsc::channel();
        db.command_with(doc! { "getnonce": 1 }, move |r| {
            let _ = tx.send(r);
        });
        conn.close();
        let async_err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
        assert!(matches!(
            async_err,
            Error::Transport(TransportError::ClosedBeforeReply)
        ));

        // Blocking form: close from another thread while blocked.
        let conn = connect(
            ConnectionConfig::default(),
            MemoryConfig {
                latency: Duration::from_millis(300),
            },
        );
        let db = conn.database("app").unwrap();
        let closer = {
            let conn = Arc::clone(&conn);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                conn.close();
            })
        };
        let sync_err = db.command(doc! { "getnonce": 1 }).unwrap_err();
        closer.join().unwrap();
        assert!(matches!(
            sync_err,
            Error::Transport(TransportError::ClosedBeforeReply)
        ));
        assert!(sync_err.is_transport());
    }

    #[test]
    fn test_blocking_call_while_callbacks_pending() {
        let conn = connect(
            ConnectionConfig::default(),
            MemoryConfig {
                latency: Duration::from_millis(20),
            },
        );
        let db = conn.database("app").unwrap();

        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let tx = tx.clone();
            db.command_with("ping", move |r| {
                let _ = tx.send(r.is_ok());
            });
        }
        drop(tx);

        assert!(db.command("ping").is_ok());

        let delivered: Vec<bool> = (0..8).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert!(delivered.into_iter().all(|ok| ok));
    }

    #[test]
    fn test_pending_callbacks_survive_dropping_everything() {
        let conn = connect(
            ConnectionConfig::default(),
            MemoryConfig {
                latency: Duration::from_millis(50),
            },
        );
        let db = conn.database("app").unwrap();

        let (tx, rx) = mpsc::channel();
        for _ in 0..64 {
            let tx = tx.clone();
            db.command_with("ping", move |r| {
                let _ = tx.send(r.is_ok());
            });
        }
        drop(tx);
        drop(db);
        drop(conn);

        let delivered: Vec<bool> = (0..64).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert!(delivered.into_iter().all(|ok| ok));
    }

    #[test]
    fn test_closed_connection_trips_configured_guard() {
        let conn = connect(ConnectionConfig::default(), MemoryConfig::default());
        let db = conn.database("app").unwrap();
        conn.close();

        drop(db);
        assert!(conn.teardown_guard().is_tripped());
        assert_eq!(conn.registry().len().unwrap(), 1);

        // Later handles skip cleanup entirely.
        let other = Database::new(&conn, "other").unwrap();
        conn.register(&other).unwrap();
        drop(other);
        assert_eq!(conn.registry().names().unwrap(), vec!["app", "other"]);
    }

    #[test]
    fn test_collection_names_excludes_system_entries() {
        let (_conn, db) = setup();
        db.create_collection("zeta", Document::new()).unwrap();
        db.create_collection("alpha", Document::new()).unwrap();

        let names = db.collection_names().unwrap();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(!names.iter().any(|n| n == "system.indexes" || n.contains("$cmd")));
    }

    #[test]
    fn test_collection_names_strategies_agree() {
        let store = Arc::new(crate::storage::DocumentStore::new());
        let open = |listing| {
            let config = ConnectionConfig {
                collection_listing: listing,
                ..ConnectionConfig::default()
            };
            let transport = MemoryTransport::with_store(Arc::clone(&store), MemoryConfig::default());
            Connection::new(config, Arc::new(transport)).unwrap()
        };
        let modern = open(CollectionListing::ListCollections);
        let legacy = open(CollectionListing::NamespaceScan);

        let db = modern.database("app").unwrap();
        db.create_collection("users", Document::new()).unwrap();
        db.collection("events").insert_one(doc! { "kind": "login" }).unwrap();
        modern
            .database("application")
            .unwrap()
            .create_collection("other", Document::new())
            .unwrap();

        let from_command = db.collection_names().unwrap();
        let from_scan = legacy.database("app").unwrap().collection_names().unwrap();
        assert_eq!(from_command, vec!["users", "events"]);
        assert_eq!(from_command, from_scan);

        let via_callback = deliver(|tx| {
            legacy.database("app").unwrap().collection_names_with(move |r| {
                let _ = tx.send(r);
            })
        })
        .unwrap();
        assert_eq!(via_callback, from_scan);
    }

    #[test]
    fn test_insert_into_new_collection_lists_it_once() {
        let (_conn, db) = setup();
        assert!(db.collection_names().unwrap().is_empty());

        db.collection("T").insert_one(doc! { "x": 1 }).unwrap();

        let names = db.collection_names().unwrap();
        assert_eq!(names.iter().filter(|n| *n == "T").count(), 1);
    }

    #[test]
    fn test_dereference() {
        let (_conn, db) = setup();
        let stored = doc! { "_id": 42, "name": "ada" };
        db.collection("people").insert_one(stored.clone()).unwrap();

        let found = db.dereference(&DbRef::new("people", 42)).unwrap();
        assert_eq!(found, Some(stored.clone()));

        let missing = db.dereference(&DbRef::new("people", 7)).unwrap();
        assert_eq!(missing, None);

        let via_callback = deliver(|tx| {
            db.dereference_with(&DbRef::new("people", 42), move |r| {
                let _ = tx.send(r);
            })
        })
        .unwrap();
        assert_eq!(via_callback, Some(stored));
    }

    #[test]
    fn test_dereference_rejects_other_database() {
        let (_conn, db) = setup();
        let reference = DbRef::new("people", 1).in_database("elsewhere");
        assert!(matches!(
            db.dereference(&reference),
            Err(Error::InvalidArgument(_))
        ));

        let same = DbRef::new("people", 1).in_database("app");
        assert_eq!(db.dereference(&same).unwrap(), None);
    }

    #[test]
    fn test_stats() {
        let (_conn, db) = setup();
        db.collection("a")
            .insert_many(vec![doc! { "x": 1 }, doc! { "x": 2 }])
            .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.get_str("db").ok(), Some("app"));
        assert_eq!(stats.get_integer("collections"), Some(1));
        assert_eq!(stats.get_integer("objects"), Some(2));

        let via_callback = deliver(|tx| {
            db.stats_with(move |r| {
                let _ = tx.send(r);
            })
        })
        .unwrap();
        assert_eq!(via_callback, stats);
    }

    #[test]
    fn test_create_and_drop_collection() {
        let (_conn, db) = setup();
        let capped = db
            .create_collection("log", doc! { "capped": true, "size": 1024 })
            .unwrap();
        assert_eq!(capped.name(), "log");

        let exists = db.create_collection("log", Document::new()).unwrap_err();
        assert_eq!(exists.code(), Some(48));

        db.drop_collection("log").unwrap();
        assert!(db.collection_names().unwrap().is_empty());
        assert_eq!(db.drop_collection("log").unwrap_err().code(), Some(26));
    }

    #[test]
    fn test_database_names_are_validated() {
        let conn = Connection::in_memory().unwrap();
        for bad in ["", "a.b", "has space", "dollar$", "sl/ash"] {
            assert!(matches!(conn.database(bad), Err(Error::InvalidName(_))));
        }
        assert!(conn.database("fine_name-1").is_ok());
    }

    #[test]
    fn test_database_returns_live_handle() {
        let conn = Connection::in_memory().unwrap();
        let a = conn.database("app").unwrap();
        let b = conn.database("app").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_drop_removes_registry_entry() {
        let conn = Connection::in_memory().unwrap();
        let db = conn.database("app").unwrap();
        assert_eq!(conn.registry().len().unwrap(), 1);

        drop(db);
        assert!(conn.registry().is_empty().unwrap());
        assert!(conn.registered("app").unwrap().is_none());
    }

    #[test]
    fn test_older_handle_does_not_evict_newer() {
        let conn = Connection::in_memory().unwrap();
        let old = conn.database("app").unwrap();

        let newer = Database::new(&conn, "app").unwrap();
        conn.register(&newer).unwrap();

        drop(old);

        let active = conn
            .registered("app")
            .unwrap()
            .expect("newer handle must survive");
        assert!(Arc::ptr_eq(&active, &newer));
    }

    #[test]
    fn test_drop_prunes_dead_entries() {
        let conn = Connection::in_memory().unwrap();
        conn.registry()
            .insert_weak("stale", std::sync::Weak::new())
            .unwrap();
        let keep = conn.database("keep").unwrap();
        let db = conn.database("app").unwrap();
        assert_eq!(conn.registry().len().unwrap(), 3);

        drop(db);
        assert_eq!(conn.registry().names().unwrap(), vec!["keep"]);
        drop(keep);
    }

    #[test]
    fn test_handle_keeps_connection_alive() {
        let conn = Connection::in_memory().unwrap();
        let weak = Arc::downgrade(&conn);
        let db = conn.database("app").unwrap();
        drop(conn);

        assert!(weak.upgrade().is_some());
        assert!(db.command("ping").is_ok());

        drop(db);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_async_form_inside_runtime() {
        let conn = Connection::in_memory().unwrap();
        let db = conn.database("app").unwrap();

        assert!(matches!(db.command("ping"), Err(Error::BlockingInAsyncContext)));

        let reply = db.command_async(doc! { "getnonce": 1 }).await.unwrap();
        assert!(reply.get_str("nonce").is_ok());
        let names = db.collection_names_async().await.unwrap();
        assert!(names.is_empty());
    }
}
