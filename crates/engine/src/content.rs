//! Content policy seam.
//!
//! The engine only needs a verdict; the vocabulary behind it is configuration.

use serde::Serialize;

/// Result of checking a prompt against a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentVerdict {
    pub allowed: bool,
    /// Matched categories/terms when not allowed.
    pub blocked_categories: Vec<String>,
}

impl ContentVerdict {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            blocked_categories: Vec::new(),
        }
    }
}

pub trait ContentPolicy: Send + Sync + 'static {
    fn check(&self, prompt: &str) -> ContentVerdict;
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissivePolicy;

impl ContentPolicy for PermissivePolicy {
    fn check(&self, _prompt: &str) -> ContentVerdict {
        ContentVerdict::allowed()
    }
}

/// Case-insensitive substring blocklist.
#[derive(Debug, Clone, Default)]
pub struct BlocklistPolicy {
    terms: Vec<String>,
}

impl BlocklistPolicy {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.into().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        terms.sort();
        terms.dedup();
        Self { terms }
    }

    /// Parse a comma-separated term list (e.g. from an environment variable).
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl ContentPolicy for BlocklistPolicy {
    fn check(&self, prompt: &str) -> ContentVerdict {
        let lower = prompt.to_lowercase();
        let blocked: Vec<String> = self
            .terms
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .cloned()
            .collect();

        ContentVerdict {
            allowed: blocked.is_empty(),
            blocked_categories: blocked,
        }
    }
}
