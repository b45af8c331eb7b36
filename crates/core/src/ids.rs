use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LlmTraceError, Result};

/// Opaque run identifier assigned by the upstream orchestration framework.
/// Any non-empty token is accepted; uniqueness is the framework's contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LlmTraceError::Parse("empty run id".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_trims() {
        let id = RunId::parse("  run-1 ").unwrap();
        assert_eq!(id.as_str(), "run-1");
    }

    #[test]
    fn rejects_empty() {
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("   ").is_err());
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(RunId::generate(), RunId::generate());
    }
}
