//! Command Handler Module
//!
//! This module executes query requests against a [`DocumentStore`], playing
//! the server side of [`MemoryTransport`]. Requests on a `<db>.$cmd`
//! namespace are commands dispatched on their first key; every other
//! namespace is a plain query.
//!
//! ## Supported Commands
//!
//! - `ping` - Liveness check
//! - `getnonce` - Returns a fresh `nonce` string
//! - `buildinfo` - Server version
//! - `dbstats` - Collection and object counts for the database
//! - `listCollections` - Collection names in creation order
//! - `create` - Create an empty collection
//! - `drop` - Drop a collection
//! - `insert` - Insert documents, honoring `writeConcern`
//! - `count` - Count documents matching `query`
//!
//! Unknown commands fail with `ok: 0` and code 59.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│   cmd_*()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         │                                     │             │
//! │         ▼ (non-$cmd namespace)                ▼             │
//! │     query()  ──────────────────────>  DocumentStore         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MemoryTransport`]: crate::connection::MemoryTransport

use crate::doc;
use crate::protocol::{is_truthy, Bson, Document, DocumentExt, QueryRequest, Reply, QUERY_FAILURE};
use crate::storage::DocumentStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Version reported by `buildinfo`.
pub const SERVER_VERSION: &str = concat!("flashdoc-memory-", env!("CARGO_PKG_VERSION"));

/// Error code for an unknown command.
pub const CODE_COMMAND_NOT_FOUND: i64 = 59;
/// Error code for a missing namespace.
pub const CODE_NAMESPACE_NOT_FOUND: i64 = 26;
/// Error code for creating a collection that exists.
pub const CODE_NAMESPACE_EXISTS: i64 = 48;
/// Error code for an unknown write concern tag.
pub const CODE_UNKNOWN_WRITE_CONCERN: i64 = 79;
/// Error code for a malformed request.
pub const CODE_BAD_VALUE: i64 = 2;
/// Error code for an invalid namespace in a query.
pub const CODE_INVALID_NAMESPACE: i64 = 16256;

/// Executes requests against the in-memory store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<DocumentStore>,
    /// Source of `getnonce` values
    nonce_counter: Arc<AtomicU64>,
}

impl CommandHandler {
    /// Creates a new command handler with the given store.
    pub fn new(storage: Arc<DocumentStore>) -> Self {
        Self {
            storage,
            nonce_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The store this handler executes against.
    pub fn storage(&self) -> &Arc<DocumentStore> {
        &self.storage
    }

    /// Executes a request and returns the reply.
    pub fn execute(&self, request: &QueryRequest) -> Reply {
        let Some((db, collection)) = request.split_namespace() else {
            return query_failure(CODE_INVALID_NAMESPACE, "Invalid ns");
        };
        if db.is_empty() || collection.is_empty() {
            return query_failure(CODE_INVALID_NAMESPACE, "Invalid ns");
        }

        if collection == "$cmd" {
            Reply::single(self.run_command(db, &request.query))
        } else {
            self.query(db, collection, request)
        }
    }

    /// Runs one command document and returns the result document.
    fn run_command(&self, db: &str, command: &Document) -> Document {
        let Some(name) = command.first_key() else {
            return failure(CODE_BAD_VALUE, "empty command");
        };
        self.dispatch(&name.to_ascii_lowercase(), db, command)
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, name: &str, db: &str, command: &Document) -> Document {
        match name {
            "ping" => success(),
            "getnonce" => self.cmd_getnonce(),
            "buildinfo" => success_with(doc! { "version": SERVER_VERSION }),
            "dbstats" => self.cmd_dbstats(db),
            "listcollections" => self.cmd_list_collections(db),
            "create" => self.cmd_create(db, command),
            "drop" => self.cmd_drop(db, command),
            "insert" => self.cmd_insert(db, command),
            "count" => self.cmd_count(db, command),

            // Unknown command
            _ => failure(
                CODE_COMMAND_NOT_FOUND,
                format!("no such command: '{}'", command.first_key().unwrap_or(name)),
            ),
        }
    }

    /// Plain query against a collection, or the `system.namespaces` listing.
    fn query(&self, db: &str, collection: &str, request: &QueryRequest) -> Reply {
        let skip = request.skip as usize;
        let limit = request.limit.unsigned_abs() as usize;

        let documents = if collection == "system.namespaces" {
            let matching = self
                .storage
                .namespace_entries(db)
                .into_iter()
                .filter(|entry| entry.matches(&request.query))
                .skip(skip);
            if limit == 0 {
                matching.collect()
            } else {
                matching.take(limit).collect()
            }
        } else {
            self.storage.find(db, collection, &request.query, skip, limit)
        };

        let documents = match &request.fields {
            Some(fields) => documents.iter().map(|d| project(d, fields)).collect(),
            None => documents,
        };
        Reply::with_documents(documents)
    }

    // ========================================================================
    // Command handlers
    // ========================================================================

    /// getnonce
    fn cmd_getnonce(&self) -> Document {
        let count = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let nonce = format!("{:08x}{:08x}", nanos, count as u32);
        success_with(doc! { "nonce": nonce })
    }

    /// dbstats
    fn cmd_dbstats(&self, db: &str) -> Document {
        let stats = self.storage.database_stats(db);
        success_with(doc! {
            "db": db,
            "collections": stats.collections as i64,
            "objects": stats.objects as i64,
            "indexes": stats.indexes as i64,
        })
    }

    /// listCollections
    fn cmd_list_collections(&self, db: &str) -> Document {
        let batch: Vec<Bson> = self
            .storage
            .collection_names(db)
            .into_iter()
            .map(|name| Bson::Document(doc! { "name": name, "options": {} }))
            .collect();

        success_with(doc! {
            "cursor": {
                "id": 0_i64,
                "ns": format!("{}.$cmd.listCollections", db),
                "firstBatch": batch,
            }
        })
    }

    /// create <name>
    fn cmd_create(&self, db: &str, command: &Document) -> Document {
        let Some(name) = target_collection(command) else {
            return failure(CODE_BAD_VALUE, "collection name must be a string");
        };
        if self.storage.create_collection(db, name) {
            success()
        } else {
            failure(CODE_NAMESPACE_EXISTS, "collection already exists")
        }
    }

    /// drop <name>
    fn cmd_drop(&self, db: &str, command: &Document) -> Document {
        let Some(name) = target_collection(command) else {
            return failure(CODE_BAD_VALUE, "collection name must be a string");
        };
        if self.storage.drop_collection(db, name) {
            success_with(doc! { "ns": format!("{}.{}", db, name), "nIndexesWas": 1 })
        } else {
            failure(CODE_NAMESPACE_NOT_FOUND, "ns not found")
        }
    }

    /// insert <name> documents [writeConcern]
    fn cmd_insert(&self, db: &str, command: &Document) -> Document {
        let Some(name) = target_collection(command) else {
            return failure(CODE_BAD_VALUE, "collection name must be a string");
        };
        if let Ok(concern) = command.get_document("writeConcern") {
            if let Ok(tag) = concern.get_str("w") {
                if tag != "majority" {
                    return failure(
                        CODE_UNKNOWN_WRITE_CONCERN,
                        format!("unrecognized getLastError mode: {}", tag),
                    );
                }
            }
        }

        let Ok(values) = command.get_array("documents") else {
            return failure(CODE_BAD_VALUE, "insert requires a 'documents' array");
        };
        let mut documents = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Bson::Document(d) => documents.push(d.clone()),
                _ => return failure(CODE_BAD_VALUE, "documents must be objects"),
            }
        }

        let n = self.storage.insert(db, name, documents);
        success_with(doc! { "n": n as i64 })
    }

    /// count <name> [query]
    fn cmd_count(&self, db: &str, command: &Document) -> Document {
        let Some(name) = target_collection(command) else {
            return failure(CODE_BAD_VALUE, "collection name must be a string");
        };
        let filter = command.get_document("query").cloned().unwrap_or_default();
        let n = self.storage.count(db, name, &filter);
        success_with(doc! { "n": n as f64 })
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// The collection named by a command's first value, e.g. `{drop: "users"}`.
fn target_collection(command: &Document) -> Option<&str> {
    command.iter().next().and_then(|(_, v)| v.as_str())
}

fn success() -> Document {
    doc! { "ok": 1.0 }
}

fn success_with(mut body: Document) -> Document {
    body.insert("ok", 1.0);
    body
}

fn failure(code: i64, message: impl Into<String>) -> Document {
    let message: String = message.into();
    doc! { "ok": 0.0, "errmsg": message, "code": code }
}

fn query_failure(code: i64, message: &str) -> Reply {
    Reply {
        response_flags: QUERY_FAILURE,
        ..Reply::single(doc! { "$err": message, "code": code })
    }
}

/// Keeps `_id` plus every field whose projection value is truthy.
fn project(document: &Document, fields: &Document) -> Document {
    document
        .iter()
        .filter(|(key, _)| {
            *key == "_id" || fields.get(key.as_str()).is_some_and(is_truthy)
        })
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::classify_command_error;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(DocumentStore::new()))
    }

    fn command(handler: &CommandHandler, db: &str, cmd: Document) -> Document {
        let request = QueryRequest::new(format!("{}.$cmd", db), cmd);
        handler.execute(&request).into_first().unwrap()
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();
        let reply = command(&handler, "app", doc! { "ping": 1 });
        assert_eq!(classify_command_error(&reply), None);
    }

    #[test]
    fn test_getnonce_is_fresh() {
        let handler = create_handler();
        let a = command(&handler, "app", doc! { "getnonce": 1 });
        let b = command(&handler, "app", doc! { "getnonce": 1 });
        assert!(a.get_str("nonce").is_ok());
        assert_ne!(a.get_str("nonce").ok(), b.get_str("nonce").ok());
    }

    #[test]
    fn test_unknown_command() {
        let handler = create_handler();
        let reply = command(&handler, "app", doc! { "frobnicate": 1 });
        let err = classify_command_error(&reply).unwrap();
        assert_eq!(err.code, Some(CODE_COMMAND_NOT_FOUND));
        assert_eq!(err.message, "no such command: 'frobnicate'");
    }

    #[test]
    fn test_command_names_are_case_insensitive() {
        let handler = create_handler();
        let reply = command(&handler, "app", doc! { "dbStats": 1 });
        assert_eq!(reply.get_str("db").ok(), Some("app"));
    }

    #[test]
    fn test_insert_and_query() {
        let handler = create_handler();
        let reply = command(
            &handler,
            "app",
            doc! { "insert": "users", "documents": vec![doc! { "_id": 1, "name": "ada" }] },
        );
        assert_eq!(reply.get_integer("n"), Some(1));

        let mut request = QueryRequest::new("app.users", doc! { "_id": 1 });
        request.limit = -1;
        let found = handler.execute(&request);
        assert_eq!(found.documents.len(), 1);
        assert_eq!(found.documents[0].get_str("name").ok(), Some("ada"));
    }

    #[test]
    fn test_insert_rejects_unknown_write_concern_tag() {
        let handler = create_handler();
        let reply = command(
            &handler,
            "app",
            doc! {
                "insert": "users",
                "documents": vec![doc! { "x": 1 }],
                "writeConcern": doc! { "w": "dc-east" },
            },
        );
        let err = classify_command_error(&reply).unwrap();
        assert_eq!(err.code, Some(CODE_UNKNOWN_WRITE_CONCERN));
        assert_eq!(handler.storage().count("app", "users", &doc! {}), 0);
    }

    #[test]
    fn test_create_and_drop() {
        let handler = create_handler();
        let created = command(&handler, "app", doc! { "create": "logs" });
        assert_eq!(classify_command_error(&created), None);

        let again = command(&handler, "app", doc! { "create": "logs" });
        assert_eq!(classify_command_error(&again).unwrap().code, Some(CODE_NAMESPACE_EXISTS));

        let dropped = command(&handler, "app", doc! { "drop": "logs" });
        assert_eq!(dropped.get_str("ns").ok(), Some("app.logs"));

        let missing = command(&handler, "app", doc! { "drop": "logs" });
        assert_eq!(
            classify_command_error(&missing).unwrap().code,
            Some(CODE_NAMESPACE_NOT_FOUND)
        );
    }

    #[test]
    fn test_list_collections() {
        let handler = create_handler();
        command(&handler, "app", doc! { "create": "a" });
        command(&handler, "app", doc! { "create": "b" });

        let reply = command(&handler, "app", doc! { "listCollections": 1 });
        let batch = reply
            .get_document("cursor")
            .and_then(|c| c.get_array("firstBatch"))
            .unwrap();
        let names: Vec<_> = batch
            .iter()
            .filter_map(|v| v.as_document().and_then(|d| d.get_str("name").ok()))
            .collect();
        assert_eq!(names, vec!["system.indexes", "a", "b"]);
    }

    #[test]
    fn test_count() {
        let handler = create_handler();
        handler.storage().insert(
            "app",
            "t",
            vec![doc! { "k": 1 }, doc! { "k": 2 }, doc! { "k": 1 }],
        );
        let reply = command(&handler, "app", doc! { "count": "t", "query": doc! { "k": 1 } });
        assert_eq!(reply.get_integer("n"), Some(2));
    }

    #[test]
    fn test_invalid_namespace() {
        let handler = create_handler();
        let reply = handler.execute(&QueryRequest::new("nodot", doc! {}));
        assert_eq!(reply.response_flags, QUERY_FAILURE);
        assert!(classify_command_error(reply.first().unwrap()).is_some());
    }

    #[test]
    fn test_projection() {
        let handler = create_handler();
        handler
            .storage()
            .insert("app", "u", vec![doc! { "_id": 1, "a": 1, "b": 2 }]);
        let mut request = QueryRequest::new("app.u", doc! {});
        request.fields = Some(doc! { "b": 1 });
        let reply = handler.execute(&request);
        let keys: Vec<_> = reply.documents[0].keys().collect();
        assert_eq!(keys, vec!["_id", "b"]);
    }
}
