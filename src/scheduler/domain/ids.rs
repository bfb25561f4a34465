//! Identifier newtypes for scheduler entities.
//!
//! Every entity is keyed by a UUID; the wrappers keep intention, job,
//! worker, token, user, and archive identifiers from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the wrapped UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for a live intention (requested unit of work).
    IntentionId
);

uuid_identifier!(
    /// Unique identifier for a job, the shared execution handle.
    JobId
);

uuid_identifier!(
    /// Unique identifier for a registered worker.
    WorkerId
);

uuid_identifier!(
    /// Unique identifier for a linked API token.
    TokenId
);

uuid_identifier!(
    /// Identifier of the user on whose behalf work is requested.
    ///
    /// Users are owned by the surrounding application; the scheduler only
    /// needs a stable key.
    UserId
);

uuid_identifier!(
    /// Unique identifier for an archive record.
    ArchiveId
);

uuid_identifier!(
    /// Identifier of the project an owner import or refresh belongs to.
    ProjectId
);
