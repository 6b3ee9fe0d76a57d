//! Strongly-typed identifiers for medallion entities.
//!
//! Identifiers are ULIDs: sortable by creation time and unique without
//! coordination.
//!
//! ```rust
//! use medallion_core::id::{CycleId, SnapshotId};
//!
//! let snapshot = SnapshotId::generate();
//! let cycle = CycleId::generate();
//! assert_ne!(snapshot.to_string(), cycle.to_string());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Wraps a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the ID.
            #[must_use]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
                chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!("invalid {} '{s}': {e}", $label),
                    })
            }
        }
    };
}

ulid_id!(
    /// Identifies one committed table snapshot.
    SnapshotId,
    "snapshot ID"
);

ulid_id!(
    /// Identifies one commit record in a table's commit chain.
    CommitId,
    "commit ID"
);

ulid_id!(
    /// Identifies one refresh cycle of the transformation engine.
    CycleId,
    "cycle ID"
);
