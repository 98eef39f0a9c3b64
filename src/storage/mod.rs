//! Storage Module
//!
//! In-memory storage for the in-process server behind
//! [`MemoryTransport`](crate::connection::MemoryTransport).
//!
//! ## Example
//!
//! ```
//! use flashdoc::doc;
//! use flashdoc::storage::DocumentStore;
//!
//! let store = DocumentStore::new();
//! store.create_collection("app", "events");
//! store.insert("app", "events", vec![doc! { "kind": "login" }]);
//! assert_eq!(store.count("app", "events", &doc! {}), 1);
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::{DatabaseStats, DocumentStore, StoreStats, SYSTEM_INDEXES};
