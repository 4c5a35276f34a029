use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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
    };
}

entity_id!(
    /// Room ID (12-char nanoid)
    RoomId
);
entity_id!(
    /// User ID (12-char nanoid)
    UserId
);
entity_id!(
    /// Media session ID (12-char nanoid)
    SessionId
);
entity_id!(
    /// Media unit ID (12-char nanoid)
    MediaUnitId
);
entity_id!(
    /// Recording ID (12-char nanoid)
    RecordingId
);
entity_id!(
    /// Backend pipeline ID (12-char nanoid)
    PipelineId
);
entity_id!(
    /// Host ID, assigned by the operator or the balancer registration
    HostId
);
entity_id!(
    /// Backend element ID. Opaque, issued by the media server; never parsed.
    ElementId
);
entity_id!(
    /// Client transaction ID, echoed verbatim in responses
    TransactionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_length() {
        assert_eq!(generate_id().len(), 12);
    }

    #[test]
    fn test_id_roundtrip() {
        let id = RoomId::from_string("room-1".to_string());
        assert_eq!(id.as_str(), "room-1");
        assert_eq!(id.to_string(), "room-1");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"room-1\"");
        let back: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_new_ids_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
