//! Collections
//!
//! A [`Collection`] is a named view into one database. Creating one performs
//! no I/O; collections spring into existence on first insert.
//!
//! Operations follow the same three call styles as
//! [`Database`](crate::database::Database): blocking, `_with` callback, and
//! `_async` deferred.

use crate::database::executor::ready;
use crate::database::{Database, Deferred};
use crate::error::{Error, Result};
use crate::doc;
use crate::protocol::{as_number, Bson, Document, ObjectId, QueryRequest};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A collection bound to a database handle.
#[derive(Debug, Clone)]
pub struct Collection {
    database: Arc<Database>,
    name: String,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

impl Collection {
    pub fn new(database: Arc<Database>, name: impl Into<String>) -> Self {
        Self {
            database,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<db>.<collection>`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database.name(), self.name)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Documents equal to `filter` on every field it names, in insertion order.
    ///
    /// `limit == 0` returns every match.
    pub fn find(&self, filter: Document, skip: u32, limit: i32) -> Result<Vec<Document>> {
        self.database.wait(self.find_async(filter, skip, limit))
    }

    pub fn find_async(&self, filter: Document, skip: u32, limit: i32) -> Deferred<Vec<Document>> {
        let request = QueryRequest {
            skip,
            limit,
            ..QueryRequest::new(self.full_name(), filter)
        };
        self.database.query_async(request)
    }

    /// The first document matching `filter`, if any.
    pub fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        self.database.wait(self.find_one_async(filter))
    }

    pub fn find_one_with<F>(&self, filter: Document, callback: F)
    where
        F: FnOnce(Result<Option<Document>>) + Send + 'static,
    {
        self.database.notify(self.find_one_async(filter), callback)
    }

    pub fn find_one_async(&self, filter: Document) -> Deferred<Option<Document>> {
        let found = self.find_async(filter, 0, -1);
        Box::pin(async move { Ok(found.await?.into_iter().next()) })
    }

    /// Number of documents matching `filter`.
    pub fn count(&self, filter: Document) -> Result<u64> {
        self.database.wait(self.count_async(filter))
    }

    pub fn count_async(&self, filter: Document) -> Deferred<u64> {
        let command = doc! { "count": self.name.as_str(), "query": filter };
        let reply = self.database.command_async(command);
        Box::pin(async move {
            let reply = reply.await?;
            let n = reply
                .get("n")
                .and_then(as_number)
                .ok_or_else(|| Error::UnexpectedReply("count reply has no numeric 'n'".into()))?;
            Ok(n.max(0.0) as u64)
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts one document and returns its `_id`.
    ///
    /// A document without `_id` gets a fresh [`ObjectId`] as its first field.
    pub fn insert_one(&self, document: Document) -> Result<Bson> {
        self.database.wait(self.insert_one_async(document))
    }

    pub fn insert_one_async(&self, document: Document) -> Deferred<Bson> {
        let inserted = self.insert_many_async(vec![document]);
        Box::pin(async move {
            inserted
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::UnexpectedReply("insert returned no ids".into()))
        })
    }

    /// Inserts documents in order and returns their `_id`s.
    pub fn insert_many(&self, documents: Vec<Document>) -> Result<Vec<Bson>> {
        self.database.wait(self.insert_many_async(documents))
    }

    pub fn insert_many_with<F>(&self, documents: Vec<Document>, callback: F)
    where
        F: FnOnce(Result<Vec<Bson>>) + Send + 'static,
    {
        self.database.notify(self.insert_many_async(documents), callback)
    }

    pub fn insert_many_async(&self, documents: Vec<Document>) -> Deferred<Vec<Bson>> {
        if documents.is_empty() {
            return ready(Err(Error::InvalidArgument(
                "insert requires at least one document".into(),
            )));
        }
        // Durability is read now, so a change made after this call does not
        // affect the request.
        let concern = match self.database.build_write_concern() {
            Ok(concern) => concern,
            Err(err) => return ready(Err(err)),
        };

        let (ids, documents): (Vec<Bson>, Vec<Document>) =
            documents.into_iter().map(with_id).unzip();
        debug!(ns = %self.full_name(), count = ids.len(), w = %concern.w, "Inserting documents");

        let command = doc! {
            "insert": self.name.as_str(),
            "documents": documents,
            "ordered": true,
            "writeConcern": concern.to_document(),
        };
        let reply = self.database.command_async(command);
        Box::pin(async move {
            reply.await?;
            Ok(ids)
        })
    }

    /// Drops this collection.
    pub fn drop(&self) -> Result<()> {
        self.database.drop_collection(&self.name)
    }

    pub fn drop_async(&self) -> Deferred<()> {
        self.database.drop_collection_async(&self.name)
    }
}

/// Returns the document's `_id`, generating one first if it has none.
fn with_id(document: Document) -> (Bson, Document) {
    if let Some(id) = document.get("_id") {
        return (id.clone(), document);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut stamped = doc! { "_id": id.clone() };
    for (key, value) in document {
        stamped.insert(key, value);
    }
    (id, stamped)
}
