//! Diagnostics reported by the bundler and the outcome of a build cycle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single warning or error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Extra detail, e.g. a stack trace when running with `debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Message {
            text: text.into(),
            location: None,
            detail: None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{location}: ")?;
        }
        write!(f, "{}", self.text)?;
        if let Some(detail) = &self.detail {
            write!(f, "\n{detail}")?;
        }
        Ok(())
    }
}

/// Where in a source file a [`Message`] points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Result of one build cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub ok: bool,
    pub warnings: Vec<Message>,
    pub errors: Vec<Message>,
}

impl BuildOutcome {
    /// Outcome of a cycle that never ran, e.g. because the build was canceled.
    pub fn noop() -> Self {
        BuildOutcome::default()
    }

    pub fn success(warnings: Vec<Message>) -> Self {
        BuildOutcome {
            ok: true,
            warnings,
            errors: Vec::new(),
        }
    }

    pub fn failure(warnings: Vec<Message>, errors: Vec<Message>) -> Self {
        BuildOutcome {
            ok: false,
            warnings,
            errors,
        }
    }
}
