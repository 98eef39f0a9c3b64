//! Write Concern
//!
//! Durability settings live on the [`Connection`](crate::connection::Connection)
//! and may change at any time. A handle never caches them: every call to
//! [`Database::build_write_concern`] reads the connection's current values.

use crate::database::Database;
use crate::error::Result;
use crate::doc;
use crate::protocol::{Bson, Document};
use std::fmt;

/// How many acknowledgments a write waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// A number of nodes; `0` means unacknowledged
    Nodes(u32),
    /// A named mode such as `"majority"`
    Tag(String),
}

impl From<u32> for Acknowledgment {
    fn from(n: u32) -> Self {
        Acknowledgment::Nodes(n)
    }
}

impl From<&str> for Acknowledgment {
    fn from(tag: &str) -> Self {
        Acknowledgment::Tag(tag.to_string())
    }
}

impl From<String> for Acknowledgment {
    fn from(tag: String) -> Self {
        Acknowledgment::Tag(tag)
    }
}

impl From<&Acknowledgment> for Bson {
    fn from(w: &Acknowledgment) -> Self {
        match w {
            // Counts past i32::MAX widen instead of wrapping negative.
            Acknowledgment::Nodes(n) => i32::try_from(*n)
                .map(Bson::Int32)
                .unwrap_or_else(|_| Bson::Int64(i64::from(*n))),
            Acknowledgment::Tag(tag) => Bson::String(tag.clone()),
        }
    }
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acknowledgment::Nodes(n) => write!(f, "{}", n),
            Acknowledgment::Tag(tag) => write!(f, "{}", tag),
        }
    }
}

/// Durability requirements attached to writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConcern {
    /// Wait for the journal commit
    pub journal: bool,
    /// Acknowledgments to wait for (default: 1)
    pub w: Acknowledgment,
    /// Give up waiting after this many milliseconds; `0` waits forever
    pub wtimeout_ms: u64,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            journal: false,
            w: Acknowledgment::Nodes(1),
            wtimeout_ms: 0,
        }
    }
}

impl WriteConcern {
    /// Returns false for `w: 0`.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Acknowledgment::Nodes(0)
    }

    /// The `writeConcern` document sent with write commands.
    pub fn to_document(&self) -> Document {
        doc! {
            "j": self.journal,
            "w": &self.w,
            "wtimeout": i64::try_from(self.wtimeout_ms).unwrap_or(i64::MAX),
        }
    }
}

impl Database {
    /// Reads the connection's durability settings as they are right now.
    pub fn build_write_concern(&self) -> Result<WriteConcern> {
        Ok(self.connection()?.durability())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;

    #[test]
    fn test_default_write_concern() {
        let concern = WriteConcern::default();
        assert!(concern.is_acknowledged());
        assert_eq!(
            concern.to_document(),
            doc! { "j": false, "w": 1, "wtimeout": 0i64 }
        );
    }

    #[test]
    fn test_tagged_write_concern() {
        let concern = WriteConcern {
            journal: true,
            w: "majority".into(),
            wtimeout_ms: 500,
        };
        assert_eq!(concern.to_document().get_str("w").ok(), Some("majority"));
        assert_eq!(concern.w.to_string(), "majority");
    }

    #[test]
    fn test_large_node_counts_stay_positive() {
        let concern = WriteConcern {
            w: u32::MAX.into(),
            wtimeout_ms: u64::MAX,
            ..WriteConcern::default()
        };
        let document = concern.to_document();
        assert_eq!(document.get("w"), Some(&Bson::Int64(i64::from(u32::MAX))));
        assert_eq!(document.get_i64("wtimeout").ok(), Some(i64::MAX));

        let small = WriteConcern {
            w: 3u32.into(),
            ..WriteConcern::default()
        };
        assert_eq!(small.to_document().get("w"), Some(&Bson::Int32(3)));
    }

    #[test]
    fn test_unacknowledged() {
        let concern = WriteConcern {
            w: 0u32.into(),
            ..WriteConcern::default()
        };
        assert!(!concern.is_acknowledged());
    }

    #[test]
    fn test_build_reads_live_settings() {
        let conn = Connection::in_memory().unwrap();
        let db = conn.database("app").unwrap();
        assert_eq!(db.build_write_concern().unwrap().w, Acknowledgment::Nodes(1));

        conn.set_w(2u32);
        assert_eq!(db.build_write_concern().unwrap().w, Acknowledgment::Nodes(2));

        conn.set_w("majority");
        conn.set_journal(true);
        conn.set_wtimeout_ms(100);
        let concern = db.build_write_concern().unwrap();
        assert_eq!(concern.w, Acknowledgment::Tag("majority".to_string()));
        assert!(concern.journal);
        assert_eq!(concern.wtimeout_ms, 100);
    }
}
