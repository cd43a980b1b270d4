//! Type-safe model identifier
//!
//! Model ids key the cooldown map, the ledger's transaction log and the
//! per-task exclusion sets used while walking a fallback chain.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Provider-facing model identifier (e.g. `meta-llama/llama-3.1-8b-instruct:free`)
///
/// # Validation
/// - `new()`: rejects empty ids and ids containing whitespace
/// - `From<String>` / `From<&str>`: no validation, for ids that already came
///   from the catalog or from tests
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Create a validated ModelId
    ///
    /// # Errors
    /// Returns an error if the id is empty or contains whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("model id cannot be empty".to_string());
        }
        if id.chars().any(char::is_whitespace) {
            return Err(format!("model id '{}' must not contain whitespace", id));
        }
        Ok(Self(id))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Models already attempted (and failed) for one task
pub type ExclusionSet = HashSet<ModelId>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_and_whitespace() {
        assert!(ModelId::new("").is_err());
        assert!(ModelId::new("   ").is_err());
        assert!(ModelId::new("gpt 4").is_err());
        assert_eq!(
            ModelId::new("openai/gpt-4o-mini").unwrap().as_str(),
            "openai/gpt-4o-mini"
        );
    }

    #[test]
    fn test_exclusion_set_deduplicates() {
        let mut excluded = ExclusionSet::new();
        excluded.insert(ModelId::from("free-a"));
        excluded.insert(ModelId::from("free-a".to_string()));
        assert_eq!(excluded.len(), 1);
    }
}
