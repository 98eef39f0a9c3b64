//! Registry Membership
//!
//! A [`Database`](crate::database::Database) removes itself from its
//! connection's registry when it is dropped. Cleanup is best-effort:
//!
//! 1. The handle's strong connection reference is released first, so
//!    cleaning up never extends the connection's lifetime.
//! 2. If the connection is still alive and open, registry entries pointing
//!    at this handle (by identity) are removed, along with any dead entries.
//! 3. A closed connection, a failure or a panic trips the [`TeardownGuard`];
//!    from then on every cleanup that consults it is skipped.
//!
//! The guard exists for process shutdown, when statics and connections are
//! torn down in no particular order. Handles consult the guard configured on
//! their connection, which is the process-wide one unless
//! [`ConnectionConfig::teardown_guard`] says otherwise. Call
//! [`begin_teardown`] to trip the process-wide guard explicitly.
//!
//! [`ConnectionConfig::teardown_guard`]: crate::connection::ConnectionConfig::teardown_guard

use crate::connection::Connection;
use crate::database::Database;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// One-shot flag that disables registry cleanup once tripped.
#[derive(Debug, Default)]
pub struct TeardownGuard {
    tripped: AtomicBool,
}

impl TeardownGuard {
    pub const fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Trips the guard. There is no way to reset it.
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::Release);
    }
}

static TEARDOWN: TeardownGuard = TeardownGuard::new();

/// The guard consulted by a handle's `Drop` unless its connection was
/// configured with another one.
pub fn global_guard() -> &'static TeardownGuard {
    &TEARDOWN
}

/// Marks the process as shutting down. Handles dropped afterwards leave the
/// registry untouched.
pub fn begin_teardown() {
    TEARDOWN.trip();
}

pub fn is_tearing_down() -> bool {
    TEARDOWN.is_tripped()
}

/// A fresh guard for tests that close connections, leaving the process-wide
/// guard untouched for tests running alongside.
#[cfg(test)]
pub(crate) fn isolated_guard() -> &'static TeardownGuard {
    Box::leak(Box::new(TeardownGuard::new()))
}

/// A handle's reference to its connection.
#[derive(Debug)]
pub(crate) enum ConnectionRef {
    /// Owned while the handle is live
    Strong(Arc<Connection>),
    /// Released during destruction
    Detached,
}

impl ConnectionRef {
    pub(crate) fn get(&self) -> Option<&Arc<Connection>> {
        match self {
            ConnectionRef::Strong(conn) => Some(conn),
            ConnectionRef::Detached => None,
        }
    }

    /// Releases the strong reference immediately and returns a weak one for
    /// the cleanup that follows. Returns `None` if already detached.
    fn demote(&mut self) -> Option<Weak<Connection>> {
        match std::mem::replace(self, ConnectionRef::Detached) {
            ConnectionRef::Strong(conn) => Some(Arc::downgrade(&conn)),
            ConnectionRef::Detached => None,
        }
    }
}

/// What a cleanup attempt found.
enum Cleanup {
    Removed(usize),
    ConnectionGone,
    ConnectionClosed,
}

/// Removes `handle` from its connection's registry.
///
/// Never panics and never reports failure; failures trip `guard`.
pub(crate) fn release(
    guard: &TeardownGuard,
    connection: &mut ConnectionRef,
    handle: *const Database,
    name: &str,
) {
    if guard.is_tripped() {
        return;
    }
    let Some(weak) = connection.demote() else {
        return;
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| match weak.upgrade() {
        Some(conn) if conn.is_closed() => Ok(Cleanup::ConnectionClosed),
        Some(conn) => conn.registry().remove_handle(handle).map(Cleanup::Removed),
        None => Ok(Cleanup::ConnectionGone),
    }));

    match outcome {
        Ok(Ok(Cleanup::Removed(removed))) => {
            trace!(db = %name, removed, "Database handle left registry");
        }
        Ok(Ok(Cleanup::ConnectionGone)) => {
            trace!(db = %name, "Connection already gone, nothing to clean up");
        }
        Ok(Ok(Cleanup::ConnectionClosed)) => {
            warn!(db = %name, "Connection closed during cleanup, disabling further cleanup");
            guard.trip();
        }
        Ok(Err(err)) => {
            warn!(db = %name, error = %err, "Registry cleanup failed, disabling further cleanup");
            guard.trip();
        }
        Err(_) => {
            warn!(db = %name, "Registry cleanup panicked, disabling further cleanup");
            guard.trip();
        }
    }
}
