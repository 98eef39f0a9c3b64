//! # FlashDoc - Per-Database Handles over a Shared Document Connection
//!
//! FlashDoc is the database layer of a document-database client. Many
//! lightweight [`Database`] handles share one [`Connection`]; each handle
//! runs commands, discovers collections, resolves references and reports
//! statistics for its database.
//!
//! ## Features
//!
//! - **Dual-Mode**: every operation has a blocking form, a callback form, and
//!   a deferred (`async`) form, all producing identical results and errors
//! - **Weak Registry**: the connection tracks the active handle per database
//!   name without keeping any handle alive
//! - **Live Durability**: write concern is read from the connection on every
//!   write, never cached by a handle
//! - **In-Process Server**: a sharded in-memory document store answers
//!   requests over the same transport seam a network client would use
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashDoc                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ Collection  │───>│  Database   │───>│ Connection  │                  │
//! │  │ FileStore   │    │  (handle)   │    │ runtime +   │                  │
//! │  └─────────────┘    └──────┬──────┘    │ registry    │                  │
//! │                            │           └──────┬──────┘                  │
//! │                   weak ref │ (on drop)        │ dyn Transport           │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │  Registry   │    │ MemoryTransport              │ │
//! │                     │ name → Weak │    │   CommandHandler             │ │
//! │                     └─────────────┘    │   DocumentStore (shards)     │ │
//! │                                        └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use flashdoc::{doc, Connection, DbRef};
//!
//! let conn = Connection::in_memory()?;
//! let db = conn.database("app")?;
//!
//! // Blocking
//! let nonce = db.command("getnonce")?;
//!
//! // Callback, invoked exactly once on a runtime thread
//! db.command_with("ping", |result| {
//!     if let Err(err) = result {
//!         eprintln!("ping failed: {}", err);
//!     }
//! });
//!
//! let people = db.collection("people");
//! let id = people.insert_one(doc! { "name": "ada" })?;
//! let ada = db.dereference(&DbRef::new("people", id))?;
//! assert!(ada.is_some());
//! assert_eq!(db.collection_names()?, vec!["people"]);
//! # Ok::<(), flashdoc::Error>(())
//! ```
//!
//! Inside an async runtime use the `_async` forms and `.await` them; the
//! blocking forms refuse to run there.
//!
//! ## Module Overview
//!
//! - [`database`]: database handles, dual-mode execution, registry membership
//! - [`connection`]: the shared connection, transports and handle registry
//! - [`collection`]: per-collection reads and writes
//! - [`gridfs`]: chunked file storage
//! - [`protocol`]: documents, requests and replies
//! - [`commands`]: the in-process command handler
//! - [`storage`]: the sharded in-memory document store

pub mod collection;
pub mod commands;
pub mod connection;
pub mod database;
pub mod error;
pub mod gridfs;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use collection::Collection;
pub use connection::{CollectionListing, Connection, ConnectionConfig, MemoryTransport, Transport};
pub use database::{Acknowledgment, CommandSpec, Database, DbRef, Deferred, WriteConcern};
pub use error::{Error, Result};
pub use gridfs::FileStore;
pub use protocol::{Bson, Document, ObjectId};

/// Builds a [`Document`]: `doc! { "name": "ada", "age": 36 }`.
pub use bson::doc;

/// Version of FlashDoc
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
