//! In-Memory Document Store
//!
//! This module implements the storage behind [`MemoryTransport`]: every
//! collection of every database, keyed by its full namespace
//! (`<database>.<collection>`).
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Namespaces are spread over independent shards so
//!    requests against different collections don't contend on one lock.
//! 2. **Creation Order**: Each collection records a creation sequence number,
//!    so listings come back in the order collections were created.
//! 3. **Atomic Counters**: Operation statistics use relaxed atomics.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DocumentStore                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...16    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MemoryTransport`]: crate::connection::MemoryTransport

use crate::doc;
use crate::protocol::{Bson, Document, DocumentExt};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Number of shards (must be a power of 2 for efficient modulo)
const NUM_SHARDS: usize = 16;

/// The collection every database implicitly gains once it holds data.
pub const SYSTEM_INDEXES: &str = "system.indexes";

/// One stored collection.
#[derive(Debug, Clone)]
struct StoredCollection {
    /// Creation sequence number, used to order listings
    seq: u64,
    /// Documents in insertion order
    documents: Vec<Document>,
}

/// A single shard containing a portion of the namespaces.
#[derive(Debug, Default)]
struct Shard {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

/// Per-database statistics, as reported by `dbstats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub collections: u64,
    pub objects: u64,
    pub indexes: u64,
}

/// Operation counters for the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub inserts: u64,
    pub queries: u64,
    pub collections_created: u64,
    pub collections_dropped: u64,
}

/// Thread-safe storage for every namespace served by one in-memory server.
///
/// # Example
///
/// ```
/// use flashdoc::doc;
/// use flashdoc::storage::DocumentStore;
///
/// let store = DocumentStore::new();
/// store.insert("app", "users", vec![doc! { "_id": 1, "name": "ada" }]);
///
/// let found = store.find("app", "users", &doc! { "name": "ada" }, 0, 0);
/// assert_eq!(found.len(), 1);
/// assert_eq!(store.collection_names("app"), vec!["system.indexes", "users"]);
/// ```
pub struct DocumentStore {
    shards: Vec<Shard>,

    /// Next creation sequence number
    next_seq: AtomicU64,

    insert_count: AtomicU64,
    query_count: AtomicU64,
    create_count: AtomicU64,
    drop_count: AtomicU64,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("shards", &self.shards.len())
            .field("insert_count", &self.insert_count.load(Ordering::Relaxed))
            .field("query_count", &self.query_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            next_seq: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            query_count: AtomicU64::new(0),
            create_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a namespace belongs to.
    #[inline]
    fn shard_for(&self, namespace: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        namespace.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn new_collection(&self) -> StoredCollection {
        self.create_count.fetch_add(1, Ordering::Relaxed);
        StoredCollection {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            documents: Vec::new(),
        }
    }

    /// Creates an empty collection.
    ///
    /// Returns `false` if the collection already exists.
    pub fn create_collection(&self, db: &str, collection: &str) -> bool {
        let namespace = format!("{}.{}", db, collection);
        let mut collections = self.shard_for(&namespace).collections.write().unwrap();
        if collections.contains_key(&namespace) {
            return false;
        }
        let created = self.new_collection();
        collections.insert(namespace, created);
        true
    }

    /// Drops a collection and its documents.
    ///
    /// Returns `false` if there was nothing to drop.
    pub fn drop_collection(&self, db: &str, collection: &str) -> bool {
        let namespace = format!("{}.{}", db, collection);
        let removed = self
            .shard_for(&namespace)
            .collections
            .write()
            .unwrap()
            .remove(&namespace)
            .is_some();
        if removed {
            self.drop_count.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Appends documents, creating the collection on first insert.
    ///
    /// Returns the number of documents inserted.
    pub fn insert(&self, db: &str, collection: &str, documents: Vec<Document>) -> usize {
        let namespace = format!("{}.{}", db, collection);
        let count = documents.len();
        self.insert_count.fetch_add(count as u64, Ordering::Relaxed);

        let mut collections = self.shard_for(&namespace).collections.write().unwrap();
        if !collections.contains_key(&namespace) {
            let created = self.new_collection();
            collections.insert(namespace.clone(), created);
        }
        if let Some(stored) = collections.get_mut(&namespace) {
            stored.documents.extend(documents);
        }
        count
    }

    /// Returns documents matching `filter` in insertion order.
    ///
    /// `limit == 0` means no limit.
    pub fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        skip: usize,
        limit: usize,
    ) -> Vec<Document> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        let namespace = format!("{}.{}", db, collection);
        let collections = self.shard_for(&namespace).collections.read().unwrap();
        let Some(stored) = collections.get(&namespace) else {
            return Vec::new();
        };

        let matching = stored
            .documents
            .iter()
            .filter(|doc| doc.matches(filter))
            .skip(skip)
            .cloned();
        if limit == 0 {
            matching.collect()
        } else {
            matching.take(limit).collect()
        }
    }

    /// Counts documents matching `filter`.
    pub fn count(&self, db: &str, collection: &str, filter: &Document) -> u64 {
        let namespace = format!("{}.{}", db, collection);
        let collections = self.shard_for(&namespace).collections.read().unwrap();
        collections
            .get(&namespace)
            .map(|stored| stored.documents.iter().filter(|d| d.matches(filter)).count() as u64)
            .unwrap_or(0)
    }

    /// Returns true if the collection exists.
    pub fn contains(&self, db: &str, collection: &str) -> bool {
        let namespace = format!("{}.{}", db, collection);
        self.shard_for(&namespace)
            .collections
            .read()
            .unwrap()
            .contains_key(&namespace)
    }

    /// Snapshot of `(seq, collection name, document count)` for one database,
    /// in creation order.
    fn collections_of(&self, db: &str) -> Vec<(u64, String, u64)> {
        let prefix = format!("{}.", db);
        let mut found = Vec::new();
        for shard in &self.shards {
            let collections = shard.collections.read().unwrap();
            for (namespace, stored) in collections.iter() {
                if let Some(name) = namespace.strip_prefix(&prefix) {
                    found.push((stored.seq, name.to_string(), stored.documents.len() as u64));
                }
            }
        }
        found.sort_by_key(|(seq, _, _)| *seq);
        found
    }

    /// Collection names of one database in creation order.
    ///
    /// A database holding any collection also reports the implicit
    /// `system.indexes` collection first, the way the server does.
    pub fn collection_names(&self, db: &str) -> Vec<String> {
        let names: Vec<String> = self
            .collections_of(db)
            .into_iter()
            .map(|(_, name, _)| name)
            .collect();
        if names.is_empty() {
            return names;
        }
        std::iter::once(SYSTEM_INDEXES.to_string())
            .chain(names)
            .collect()
    }

    /// Entries of the legacy `system.namespaces` listing for one database.
    ///
    /// Each collection contributes `<db>.<name>` and its `_id` index namespace
    /// `<db>.<name>.$_id_`.
    pub fn namespace_entries(&self, db: &str) -> Vec<Document> {
        let mut entries = Vec::new();
        for name in self.collection_names(db) {
            entries.push(doc! { "name": format!("{}.{}", db, name) });
            if name != SYSTEM_INDEXES {
                entries.push(doc! { "name": format!("{}.{}.$_id_", db, name) });
            }
        }
        entries
    }

    /// Statistics for one database.
    pub fn database_stats(&self, db: &str) -> DatabaseStats {
        let collections = self.collections_of(db);
        DatabaseStats {
            collections: collections.len() as u64,
            objects: collections.iter().map(|(_, _, n)| n).sum(),
            indexes: collections.len() as u64,
        }
    }

    /// Returns store-wide operation counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            inserts: self.insert_count.load(Ordering::Relaxed),
            queries: self.query_count.load(Ordering::Relaxed),
            collections_created: self.create_count.load(Ordering::Relaxed),
            collections_dropped: self.drop_count.load(Ordering::Relaxed),
        }
    }
}

/// Returns the `_id` of a document, if set.
pub fn document_id(document: &Document) -> Option<&Bson> {
    document.get("_id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let store = DocumentStore::new();
        store.insert("app", "users", vec![doc! { "_id": 1, "name": "ada" }]);
        store.insert("app", "users", vec![doc! { "_id": 2, "name": "bob" }]);

        let all = store.find("app", "users", &doc! {}, 0, 0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].get_str("name").ok(), Some("ada"));

        let bob = store.find("app", "users", &doc! { "_id": 2 }, 0, 0);
        assert_eq!(bob.len(), 1);
        assert_eq!(document_id(&bob[0]), Some(&Bson::Int32(2)));
    }

    #[test]
    fn test_find_missing_collection() {
        let store = DocumentStore::new();
        assert!(store.find("app", "nothing", &doc! {}, 0, 0).is_empty());
        assert_eq!(store.count("app", "nothing", &doc! {}), 0);
    }

    #[test]
    fn test_skip_and_limit() {
        let store = DocumentStore::new();
        let docs = (0..10).map(|i| doc! { "i": i }).collect();
        store.insert("app", "nums", docs);

        let page = store.find("app", "nums", &doc! {}, 3, 4);
        let values: Vec<_> = page.iter().filter_map(|d| d.get_integer("i")).collect();
        assert_eq!(values, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_create_and_drop() {
        let store = DocumentStore::new();
        assert!(store.create_collection("app", "logs"));
        assert!(!store.create_collection("app", "logs"));
        assert!(store.contains("app", "logs"));
        assert!(store.drop_collection("app", "logs"));
        assert!(!store.drop_collection("app", "logs"));
        assert!(!store.contains("app", "logs"));
    }

    #[test]
    fn test_collection_names_in_creation_order() {
        let store = DocumentStore::new();
        assert!(store.collection_names("app").is_empty());

        store.create_collection("app", "zebra");
        store.create_collection("app", "apple");
        store.create_collection("other", "mango");
        store.insert("app", "middle", vec![doc! { "x": 1 }]);

        assert_eq!(
            store.collection_names("app"),
            vec!["system.indexes", "zebra", "apple", "middle"]
        );
        assert_eq!(store.collection_names("other"), vec!["system.indexes", "mango"]);
    }

    #[test]
    fn test_database_prefix_is_exact() {
        let store = DocumentStore::new();
        store.create_collection("app", "a");
        store.create_collection("application", "b");
        assert_eq!(store.collection_names("app"), vec!["system.indexes", "a"]);
    }

    #[test]
    fn test_namespace_entries() {
        let store = DocumentStore::new();
        store.create_collection("app", "users");
        let names: Vec<_> = store
            .namespace_entries("app")
            .iter()
            .filter_map(|d| d.get_str("name").ok().map(String::from))
            .collect();
        assert_eq!(
            names,
            vec!["app.system.indexes", "app.users", "app.users.$_id_"]
        );
    }

    #[test]
    fn test_database_stats() {
        let store = DocumentStore::new();
        store.insert("app", "a", vec![doc! { "x": 1 }, doc! { "x": 2 }]);
        store.insert("app", "b", vec![doc! { "x": 3 }]);
        let stats = store.database_stats("app");
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.objects, 3);
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(DocumentStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..100 {
                        store.insert("app", "events", vec![doc! { "t": t, "i": i }]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count("app", "events", &doc! {}), 400);
        assert_eq!(store.stats().inserts, 400);
        assert_eq!(store.stats().collections_created, 1);
    }
}
