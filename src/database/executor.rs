//! Dual-Mode Execution
//!
//! Every database operation is written once, as a [`Deferred`] future. The
//! three call styles are thin shells around it:
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   command() ───>│                          │───> block_on(deferred)
//!                 │  command_request()       │
//! command_with()─>│  Connection::query()     │───> spawn(deferred + callback)
//!                 │  classify_reply()        │
//! command_async()>│                          │───> deferred
//!                 └──────────────────────────┘
//! ```
//!
//! Request construction ([`command_request`]) and reply classification
//! ([`classify_reply`], [`query_documents`]) live here and nowhere else, so
//! blocking and non-blocking callers always see the same errors.

use crate::connection::ConnectionStats;
use crate::error::{Error, Result};
use crate::protocol::{
    classify_command_error, Bson, Document, DocumentExt, QueryRequest, Reply, QUERY_FAILURE,
};
use crate::storage::SYSTEM_INDEXES;
use std::future::Future;
use std::pin::Pin;
use tracing::{trace, warn};

/// A database operation that has been submitted but not yet resolved.
pub type Deferred<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Wraps an already-known outcome as a [`Deferred`].
pub(crate) fn ready<T: Send + 'static>(result: Result<T>) -> Deferred<T> {
    Box::pin(async move { result })
}

/// A command: either a complete document, or a name plus extra arguments.
///
/// ```
/// use flashdoc::database::CommandSpec;
///
/// let cmd = CommandSpec::new("create").arg("capped", true).arg("size", 4096);
/// let doc = cmd.into_document();
/// let keys: Vec<_> = doc.keys().collect();
/// assert_eq!(keys, vec!["create", "capped", "size"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    base: Document,
    extra: Document,
}

impl CommandSpec {
    /// A command named `name`, normalized to `{<name>: 1}`.
    pub fn new(name: impl Into<String>) -> Self {
        let mut base = Document::new();
        base.insert(name, 1);
        Self {
            base,
            extra: Document::new(),
        }
    }

    /// Appends an extra argument after the command's own fields.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.extra.insert(key, value);
        self
    }

    /// The command name (first key).
    pub fn name(&self) -> Option<&str> {
        self.base.first_key()
    }

    /// The normalized command document.
    pub fn into_document(self) -> Document {
        let mut document = self.base;
        for (key, value) in self.extra {
            document.insert(key, value);
        }
        document
    }
}

impl From<Document> for CommandSpec {
    fn from(document: Document) -> Self {
        Self {
            base: document,
            extra: Document::new(),
        }
    }
}

impl From<&str> for CommandSpec {
    fn from(name: &str) -> Self {
        CommandSpec::new(name)
    }
}

impl From<String> for CommandSpec {
    fn from(name: String) -> Self {
        CommandSpec::new(name)
    }
}

/// The namespace commands for `db` are addressed to.
pub fn command_namespace(db: &str) -> String {
    format!("{}.$cmd", db)
}

/// Builds the request that runs `command` against database `db`.
pub fn command_request(db: &str, command: Document) -> QueryRequest {
    QueryRequest {
        limit: -1,
        ..QueryRequest::new(command_namespace(db), command)
    }
}

/// Takes the first document of a command reply and classifies it.
pub fn classify_reply(reply: Reply, stats: &ConnectionStats) -> Result<Document> {
    let Some(document) = reply.into_first() else {
        stats.command_failed();
        return Err(Error::UnexpectedReply("command reply held no documents".into()));
    };
    match classify_command_error(&document) {
        Some(err) => {
            stats.command_failed();
            warn!(code = ?err.code, error = %err.message, "Command failed");
            Err(Error::CommandFailed(err))
        }
        None => {
            trace!(reply = %document, "Command succeeded");
            Ok(document)
        }
    }
}

/// Returns the documents of a plain query reply, or the failure it reports.
pub fn query_documents(reply: Reply, stats: &ConnectionStats) -> Result<Vec<Document>> {
    if reply.response_flags & QUERY_FAILURE != 0 {
        stats.command_failed();
        let err = reply
            .first()
            .and_then(classify_command_error)
            .unwrap_or_else(|| crate::protocol::CommandError::new(None, "query failed"));
        warn!(code = ?err.code, error = %err.message, "Query failed");
        return Err(Error::CommandFailed(err));
    }
    Ok(reply.documents)
}

/// Collection names from a `listCollections` reply, in server order.
pub fn names_from_listing(reply: &Document) -> Result<Vec<String>> {
    let batch = reply
        .get_document("cursor")
        .and_then(|cursor| cursor.get_array("firstBatch"))
        .map_err(|_| Error::UnexpectedReply("listCollections reply has no cursor.firstBatch".into()))?;

    Ok(batch
        .iter()
        .filter_map(Bson::as_document)
        .filter_map(|entry| entry.get_str("name").ok())
        .filter(|name| is_user_collection(name))
        .map(String::from)
        .collect())
}

/// Collection names from `system.namespaces` entries, in server order.
///
/// Entries outside `<db>.` are skipped; the prefix is stripped from the rest.
pub fn names_from_namespaces(entries: &[Document], db: &str) -> Vec<String> {
    let prefix = format!("{}.", db);
    entries
        .iter()
        .filter_map(|entry| entry.get_str("name").ok())
        .filter_map(|name| name.strip_prefix(&prefix))
        .filter(|name| is_user_collection(name))
        .map(String::from)
        .collect()
}

/// Excludes the index catalog and `$`-namespaces such as `$cmd` and
/// `<coll>.$_id_`.
fn is_user_collection(name: &str) -> bool {
    name != SYSTEM_INDEXES && !name.contains('$')
}
