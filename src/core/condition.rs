//! Output line classification for command tasks

use crate::core::result::{BuildError, ErrorKind};
use regex::Regex;

/// Pattern matched against command output lines (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum OutputPattern {
    /// Simple string contains match
    Simple(String),
    /// Regular expression match
    Regex(Regex),
}

impl OutputPattern {
    /// Build a pattern, falling back to a substring match when the regex is invalid
    pub fn new(pattern: &str, use_regex: bool) -> Self {
        if use_regex {
            match Regex::new(pattern) {
                Ok(regex) => OutputPattern::Regex(regex),
                Err(_) => OutputPattern::Simple(pattern.to_string()),
            }
        } else {
            OutputPattern::Simple(pattern.to_string())
        }
    }

    /// Check if the pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        match self {
            OutputPattern::Simple(pattern) => text.contains(pattern),
            OutputPattern::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Splits command output into warnings and errors
#[derive(Debug, Clone, Default)]
pub struct OutputClassifier {
    pub warning: Option<OutputPattern>,
    pub error: Option<OutputPattern>,
}

impl OutputClassifier {
    /// Classify every line; error matches take precedence over warnings
    pub fn classify(&self, output: &str) -> Vec<BuildError> {
        let mut diagnostics = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if self.error.as_ref().is_some_and(|p| p.matches(line)) {
                diagnostics.push(BuildError::fatal(ErrorKind::ComponentBuildFailure, line));
            } else if self.warning.as_ref().is_some_and(|p| p.matches(line)) {
                diagnostics.push(BuildError::warning(ErrorKind::ComponentBuildFailure, line));
            }
        }
        diagnostics
    }
}
