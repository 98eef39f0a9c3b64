//! Database Module
//!
//! Per-database handles over a shared [`Connection`](crate::connection::Connection).
//!
//! ## Components
//!
//! - [`Database`]: the handle itself, with blocking, callback and deferred
//!   forms of every operation
//! - [`executor`]: request construction and reply classification shared by
//!   all three forms
//! - [`membership`]: removal from the connection's registry on drop
//! - [`write_concern`]: live durability settings attached to writes

pub mod executor;
pub mod handle;
pub mod membership;
pub mod write_concern;

// Re-export commonly used types
pub use executor::{CommandSpec, Deferred};
pub use handle::{validate_database_name, Database, DbRef};
pub use membership::{begin_teardown, is_tearing_down, TeardownGuard};
pub use write_concern::{Acknowledgment, WriteConcern};
