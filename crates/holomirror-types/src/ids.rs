//! Type-safe identifier wrappers.
//!
//! Events and observer connections carry UUID v7 identifiers (time-ordered,
//! generated app-side). Workers are named by the embedding application, so
//! [`WorkerId`] wraps a plain string that also appears in gateway URLs.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Unique identifier for a published event.
    EventId
}

define_id! {
    /// Unique identifier for one attached observer connection.
    ConnectionId
}

/// Name of a registered worker.
///
/// Worker ids are chosen by whoever registers the worker and are unique
/// within one gateway. They are used verbatim as URL path segments, so
/// [`WorkerId::is_path_safe`] reports whether an id can be addressed over
/// HTTP without percent-encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Create a worker id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is non-empty and only uses `[A-Za-z0-9_.-]`.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    }
}

impl core::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn worker_id_serializes_as_bare_string() {
        let id = WorkerId::from("w1");
        assert_eq!(serde_json::to_string(&id).ok().as_deref(), Some("\"w1\""));
    }

    #[test]
    fn path_safety() {
        assert!(WorkerId::from("agent-7.main_loop").is_path_safe());
        assert!(!WorkerId::from("").is_path_safe());
        assert!(!WorkerId::from("a/b").is_path_safe());
        assert!(!WorkerId::from("with space").is_path_safe());
    }
}
