//! Connection Module
//!
//! This module provides the shared connection every database handle talks
//! through, the transport abstraction beneath it, and the weak registry of
//! active handles.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Connection                            │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  Registry   │    │   Runtime   │    │ Durability  │     │
//! │  │ name → Weak │    │  (tokio)    │    │  settings   │     │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘     │
//! │                            │                                │
//! │                            ▼                                │
//! │                   ┌─────────────────┐                       │
//! │                   │ dyn Transport   │                       │
//! │                   └─────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use flashdoc::connection::Connection;
//!
//! let conn = Connection::in_memory()?;
//! let db = conn.database("app")?;
//! let reply = db.command("ping")?;
//! # Ok::<(), flashdoc::Error>(())
//! ```

pub mod client;
pub mod memory;
pub mod registry;
pub mod transport;

// Re-export commonly used types
pub use client::{CollectionListing, Connection, ConnectionConfig, ConnectionStats};
pub use memory::{MemoryConfig, MemoryTransport};
pub use registry::{Registry, RegistryError};
pub use transport::{QueryFuture, ReplySender, Transport, TransportError};
