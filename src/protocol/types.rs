//! Document Data Types
//!
//! Documents, values and object ids are the `bson` crate's own. Field order
//! matters: the server reads the command name from the *first* key of a
//! command document, and [`Document`] keeps insertion order.
//!
//! What this module adds is the server's view of values when it matches
//! filters: numbers compare by value across widths, and `ok` fields are read
//! for truthiness rather than type.
//!
//! ## Examples
//!
//! ```
//! use flashdoc::doc;
//! use flashdoc::protocol::DocumentExt;
//!
//! let stored = doc! { "_id": 7_i64, "name": "ada" };
//! assert!(stored.matches(&doc! { "_id": 7 }));
//! assert_eq!(stored.first_key(), Some("_id"));
//! ```

pub use bson::oid::ObjectId;
pub use bson::{Binary, Bson, Document};

use bson::spec::BinarySubtype;

/// Returns any numeric variant as `f64`.
pub fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Returns any numeric variant widened to `i64`.
///
/// Doubles are truncated toward zero.
pub fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) => Some(*f as i64),
        _ => None,
    }
}

/// Server truthiness: `false`, `null` and numeric zero are falsy.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        other => as_number(other).map_or(true, |n| n != 0.0),
    }
}

/// Equality as the server sees it when matching filters.
///
/// `Int32(1)`, `Int64(1)` and `Double(1.0)` are all equal.
pub fn loosely_equals(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Wraps raw bytes as a generic binary value.
pub fn binary(bytes: &[u8]) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.to_vec(),
    })
}

/// Server-side helpers on [`Document`].
pub trait DocumentExt {
    /// The first key, which names the command in a command document.
    fn first_key(&self) -> Option<&str>;

    /// A numeric field widened to `i64`, whatever its stored width.
    fn get_integer(&self, key: &str) -> Option<i64>;

    /// The payload of a binary field.
    fn get_bytes(&self, key: &str) -> Option<&[u8]>;

    /// True if every field of `filter` is present and loosely equal here.
    fn matches(&self, filter: &Document) -> bool;
}

impl DocumentExt for Document {
    fn first_key(&self) -> Option<&str> {
        self.keys().next().map(String::as_str)
    }

    fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(as_integer)
    }

    fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key) {
            Some(Bson::Binary(binary)) => Some(&binary.bytes),
            _ => None,
        }
    }

    fn matches(&self, filter: &Document) -> bool {
        filter.iter().all(|(key, expected)| {
            self.get(key)
                .is_some_and(|actual| loosely_equals(actual, expected))
        })
    }
}
