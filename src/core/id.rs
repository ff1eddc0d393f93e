use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const SIGN_ID_LEN: usize = 8;

/// Short stable identifier of a sign. Assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SignId(String);

impl SignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id. Not checked against anything; use
    /// [`SignId::generate_unique`] when a live index is available.
    pub fn generate() -> Self {
        let mut raw = Uuid::new_v4().simple().to_string();
        raw.truncate(SIGN_ID_LEN);
        Self(raw)
    }

    /// Generates ids until `is_taken` rejects none of them.
    pub fn generate_unique(is_taken: impl Fn(&SignId) -> bool) -> Self {
        loop {
            let candidate = Self::generate();
            if !is_taken(&candidate) {
                return candidate;
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SignId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_short_and_non_empty() {
        let id = SignId::generate();
        assert_eq!(id.as_str().len(), SIGN_ID_LEN);
        assert!(!id.is_empty());
    }

    #[test]
    fn test_generate_unique_skips_taken() {
        let taken: HashSet<SignId> = (0..64).map(|_| SignId::generate()).collect();
        let fresh = SignId::generate_unique(|id| taken.contains(id));
        assert!(!taken.contains(&fresh));
    }
}
