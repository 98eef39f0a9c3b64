//! Command Handler Module
//!
//! This module implements the server side of the in-process transport. It
//! receives query requests, executes them against the document store, and
//! returns replies shaped the way a real server shapes them.
//!
//! ## Architecture
//!
//! ```text
//! QueryRequest
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ DocumentStore   │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
