use serde::{Deserialize, Serialize};

/// Named policy attached to a room, user, session or media unit that
/// customizes default behaviors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Strategy {
    #[must_use]
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            name: "freewill".to_string(),
            params: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy() {
        let strategy = Strategy::default();
        assert_eq!(strategy.name, "freewill");
        assert!(strategy.params.is_null());
    }

    #[test]
    fn test_roundtrip() {
        let strategy = Strategy::new("moderated", serde_json::json!({"moderator": "u1"}));
        let json = serde_json::to_string(&strategy).unwrap();
        let back: Strategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
    }
}
