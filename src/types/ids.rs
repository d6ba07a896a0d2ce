//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `must()`, `as_str()`, Display,
/// Serialize, Deserialize. Optionally generates `new()` (prefixed UUID v4) and
/// `Default` when a prefix is passed.
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        define_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!(
                    concat!($prefix, "_{}"),
                    &uuid::Uuid::new_v4().simple().to_string()[..16]
                ))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Wrap a value known to be valid (generated or already checked).
            pub fn must(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
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

define_id!(EnvelopeId, "env");
define_id!(RequestId, "req");
define_id!(SessionId, "sess");
define_id!(UserId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed() {
        assert!(EnvelopeId::new().as_str().starts_with("env_"));
        assert!(RequestId::new().as_str().starts_with("req_"));
        assert!(SessionId::default().as_str().starts_with("sess_"));
        assert_ne!(EnvelopeId::new(), EnvelopeId::new());
    }

    #[test]
    fn test_from_string_rejects_empty() {
        assert!(UserId::from_string(String::new()).is_err());
        assert_eq!(UserId::from_string("u1".into()).unwrap().as_str(), "u1");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = UserId::must("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        let back: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(back, id);
    }
}
