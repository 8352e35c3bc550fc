//! Validation outcome.

use serde::{Deserialize, Serialize};

/// Outcome of one validator run. Produced fresh every time, never stored
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BuildResult {
    pub fn new() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: BuildResult) {
        if !other.success {
            self.success = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Errors joined one per line, as folded into a version's build log.
    pub fn error_log(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("\n"))
        }
    }
}

impl Default for BuildResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_keeps_success() {
        let mut result = BuildResult::new();
        result.add_warning("risky");
        assert!(result.success);
        assert_eq!(result.error_log(), None);
    }

    #[test]
    fn test_merge_propagates_failure() {
        let mut result = BuildResult::new();
        let mut other = BuildResult::new();
        other.add_error("Missing <head> section");
        other.add_error("Missing <body> section");
        result.merge(other);

        assert!(!result.success);
        assert_eq!(
            result.error_log().as_deref(),
            Some("Missing <head> section\nMissing <body> section")
        );
    }
}
