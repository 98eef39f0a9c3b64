//! Error types shared by every database operation.

use crate::connection::{RegistryError, TransportError};
use crate::protocol::CommandError;

/// Errors returned by database handles, collections and file stores.
///
/// Blocking calls return these directly; callback forms pass the identical
/// value to the callback.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No reply could be obtained
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server replied, and the reply reports a failure
    #[error("command failed: {0}")]
    CommandFailed(#[from] CommandError),

    /// A reply was well-formed but not shaped as the operation expects
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Database name rejected before any I/O
    #[error("invalid database name '{0}'")]
    InvalidName(String),

    /// An argument could not be used for the requested operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle no longer holds its connection
    #[error("database handle is detached from its connection")]
    Detached,

    /// A blocking form was called from inside an async runtime
    #[error("blocking call made from inside an async context; use the async form")]
    BlockingInAsyncContext,

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The connection's runtime could not be started
    #[error("failed to start connection runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl Error {
    /// The server error code, for command failures that carry one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::CommandFailed(err) => err.code,
            _ => None,
        }
    }

    /// Returns true for failures that happened before any reply arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
