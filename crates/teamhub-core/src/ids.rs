//! Branded ID newtypes for type safety.
//!
//! Each identity in the hub is a distinct newtype around `String`, so a
//! channel ID cannot be passed where a user ID is expected. User, channel and
//! workspace IDs are assigned by external systems and only wrapped here.
//! Message and connection IDs are minted by the hub as UUID v7 strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Mint a new time-ordered ID.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "{}"), Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::generate()
            }
        }
    };
}

branded_id! {
    /// Stable identity of an authenticated user.
    UserId
}

branded_id! {
    /// Chat channel identifier.
    ChannelId
}

branded_id! {
    /// Workspace identifier (boards are scoped to a workspace).
    WorkspaceId
}

branded_id! {
    /// Durable message identifier assigned by the persistence service.
    MessageId
}

branded_id! {
    /// Identifier of one live duplex connection.
    ///
    /// Distinguishes a reconnect from the connection it replaced, so a late
    /// disconnect from the old socket never evicts the new one.
    ConnectionId
}

generated_id!(MessageId, "msg_");
generated_id!(ConnectionId, "conn_");
