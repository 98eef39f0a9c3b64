//! Document Protocol Types
//!
//! This module defines what travels between a database handle and the
//! connection: ordered documents, query requests, replies, and the rule that
//! classifies a reply document as a logical failure.
//!
//! ## Modules
//!
//! - `types`: the `bson` document types plus filter-matching helpers
//! - `reply`: `QueryRequest`, `Reply` and `classify_command_error`
//!
//! ## Example
//!
//! ```
//! use flashdoc::doc;
//! use flashdoc::protocol::{classify_command_error, Reply};
//!
//! let reply = Reply::single(doc! { "ok": 0, "errmsg": "unauthorized" });
//! let err = classify_command_error(reply.first().unwrap()).unwrap();
//! assert_eq!(err.message, "unauthorized");
//! ```

pub mod reply;
pub mod types;

// Re-export commonly used types for convenience
pub use reply::{classify_command_error, CommandError, QueryRequest, Reply, QUERY_FAILURE};
pub use types::{
    as_integer, as_number, binary, is_truthy, loosely_equals, Binary, Bson, Document, DocumentExt,
    ObjectId,
};
