//! Build-time errors and structured errors for machine-readable output

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// A malformed script. Lowering aborts with no partial output.
///
/// `path` is the position of the offending node in the authored tree, one
/// index per nesting level (`[2, 0]` = first child of the third top-level node).
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum BuildError {
    #[error("node {path:?}: repeat must be at least 1")]
    ZeroRepeat { path: Vec<usize> },

    #[error("node {path:?}: {kind} requires at least one keyword")]
    MissingKeywords { path: Vec<usize>, kind: &'static str },

    #[error("node {path:?}: template_click requires a template path")]
    MissingTemplate { path: Vec<usize> },

    #[error("node {path:?}: match threshold {threshold} is outside (0, 1]")]
    InvalidThreshold { path: Vec<usize>, threshold: f64 },

    #[error("node {path:?}: poll interval must be positive")]
    InvalidInterval { path: Vec<usize> },

    #[error("node {path:?}: while_block needs max_loops or max_duration")]
    UnboundedLoop { path: Vec<usize> },

    #[error("node {path:?}: script runs past the largest representable time")]
    ClockOverflow { path: Vec<usize> },

    #[error("event {index} ({kind}) needs a condition evaluator, but the player has none")]
    EvaluatorRequired { index: usize, kind: &'static str },
}

/// Structured error for CLI and tooling output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidScript,
    EvaluatorRequired,
    InvalidConfig,
    NotFound,
    Io,
    Parse,
    Unknown,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestions: Vec::new(),
            context: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("Not found: {}", what))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        match &e {
            BuildError::EvaluatorRequired { .. } => Self::new(ErrorCode::EvaluatorRequired, e.to_string())
                .with_suggestions(vec![
                    "pass --conditions always|never for a dry run".to_string(),
                ]),
            BuildError::ZeroRepeat { path }
            | BuildError::MissingKeywords { path, .. }
            | BuildError::MissingTemplate { path }
            | BuildError::InvalidThreshold { path, .. }
            | BuildError::InvalidInterval { path }
            | BuildError::UnboundedLoop { path }
            | BuildError::ClockOverflow { path } => Self::new(ErrorCode::InvalidScript, e.to_string())
                .with_context(serde_json::json!({ "path": path })),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        if let Some(build) = e.downcast_ref::<BuildError>() {
            return build.clone().into();
        }
        if e.downcast_ref::<std::io::Error>().is_some() {
            return Self::new(ErrorCode::Io, format!("{:#}", e));
        }
        if e.downcast_ref::<serde_json::Error>().is_some() {
            return Self::new(ErrorCode::Parse, format!("{:#}", e));
        }
        Self::new(ErrorCode::Unknown, format!("{:#}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_maps_to_invalid_script_with_path() {
        let err: Error = BuildError::ZeroRepeat { path: vec![1, 0] }.into();
        assert_eq!(err.code, ErrorCode::InvalidScript);
        assert_eq!(err.context, Some(serde_json::json!({ "path": [1, 0] })));
    }

    #[test]
    fn anyhow_wrapping_keeps_build_error_code() {
        let err: Error = anyhow::Error::new(BuildError::EvaluatorRequired {
            index: 3,
            kind: "guard_start",
        })
        .into();
        assert_eq!(err.code, ErrorCode::EvaluatorRequired);
        assert!(!err.suggestions.is_empty());
    }
}
