//! Typed identifiers for sessions, users, and devices.
//!
//! Ids are opaque String wrappers (serde-transparent). A session id is either
//! a braced GUID or a value derived from the user id and the start time, so
//! the wrapper never assumes a particular shape.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Identifier of one recording session.
    SessionId
);
typed_id!(
    /// Stable identifier of the user the events are recorded for.
    UserId
);
typed_id!(
    /// Identifier of the device, attached when session GUIDs are generated.
    DeviceId
);

impl SessionId {
    /// Reproducible id built from the user id and the session start time.
    pub fn derived(user_id: &UserId, started_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self(format!(
            "{}-{}",
            user_id.as_str(),
            started_at.format("%Y%m%dT%H%M%S%.3fZ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_id_from_string() {
        let id = SessionId::from_string("test-session");
        assert_eq!(id.as_str(), "test-session");
        assert_eq!(id.to_string(), "test-session");
    }

    #[test]
    fn derived_session_id_joins_user_and_time() {
        let at = chrono::Utc
            .with_ymd_and_hms(2024, 3, 9, 17, 4, 5)
            .single()
            .unwrap();
        let id = SessionId::derived(&UserId::from("alice"), at);
        assert_eq!(id.as_str(), "alice-20240309T170405.000Z");
    }

    #[test]
    fn typed_id_serde_is_transparent() {
        let id = UserId::from_string("bob");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bob\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
