//! Queries, Replies and Reply Classification
//!
//! A query targets a namespace (`<database>.<collection>`, or
//! `<database>.$cmd` for commands) and carries a filter document. The server
//! answers with a [`Reply`] holding zero or more documents.
//!
//! A reply can be perfectly well-formed and still describe a failure: the
//! server sets `ok: 0` (with `errmsg` / `code`) on a failed command, and
//! `$err` on a failed query. [`classify_command_error`] is the single place
//! that decides whether a reply document is such a logical failure.

use crate::protocol::types::{is_truthy, Bson, Document, DocumentExt};
use std::fmt;

/// Reply flag set by the server when a query failed and the single reply
/// document carries `$err`.
pub const QUERY_FAILURE: u32 = 1 << 1;

/// A request submitted through a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Full namespace, e.g. `app.users` or `app.$cmd`
    pub namespace: String,
    /// Query option bits
    pub flags: u32,
    /// Number of matching documents to skip
    pub skip: u32,
    /// Maximum number of documents to return; `0` means no limit and a
    /// negative value returns `|limit|` documents in a single batch
    pub limit: i32,
    /// Filter, or the command document for `$cmd` namespaces
    pub query: Document,
    /// Optional projection
    pub fields: Option<Document>,
}

impl QueryRequest {
    pub fn new(namespace: impl Into<String>, query: Document) -> Self {
        Self {
            namespace: namespace.into(),
            flags: 0,
            skip: 0,
            limit: 0,
            query,
            fields: None,
        }
    }

    /// Splits the namespace into `(database, collection)`.
    pub fn split_namespace(&self) -> Option<(&str, &str)> {
        self.namespace.split_once('.')
    }

    /// Returns true if this request targets the `$cmd` pseudo-collection.
    pub fn is_command(&self) -> bool {
        matches!(self.split_namespace(), Some((_, "$cmd")))
    }
}

/// The server's answer to one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Reply flag bits, see [`QUERY_FAILURE`]
    pub response_flags: u32,
    /// Open cursor id, `0` once exhausted
    pub cursor_id: i64,
    /// Offset of the first returned document within the cursor
    pub starting_from: i32,
    /// Result documents
    pub documents: Vec<Document>,
}

impl Reply {
    /// Builds a single-batch reply with no open cursor.
    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    /// Builds the one-document reply used for command results.
    pub fn single(document: Document) -> Self {
        Self::with_documents(vec![document])
    }

    pub fn first(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub fn into_first(self) -> Option<Document> {
        self.documents.into_iter().next()
    }
}

/// A logical failure reported inside a well-formed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// Server error code, if one was reported
    pub code: Option<i64>,
    /// Server error message
    pub message: String,
}

impl CommandError {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CommandError {}

/// Decides whether `document` describes a logical failure.
///
/// - `$err` present: a failed query, message taken from `$err`.
/// - `ok` present and falsy: a failed command, message taken from `errmsg`.
///
/// Documents without either marker are successes.
pub fn classify_command_error(document: &Document) -> Option<CommandError> {
    let code = document.get_integer("code");

    if let Some(err) = document.get("$err") {
        let message = match err {
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Some(CommandError::new(code, message));
    }

    match document.get("ok") {
        Some(ok) if !is_truthy(ok) => {
            let message = document.get_str("errmsg").unwrap_or("command failed");
            Some(CommandError::new(code, message))
        }
        _ => None,
    }
}
