//! Unified pipeline error model.
//! This module provides a common error enum used across argument validation,
//! column resolution, dispatch, and query execution, along with helper
//! constructors and conversions from the engine and anyhow error types.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineError {
    /// Argument fails schema or enumeration checks. Raised before any query is built.
    Validation { message: String },
    /// A season-keyed metric maps to no existing column even after fallback.
    UnresolvedColumn { message: String },
    /// Tool name cannot be resolved through the alias map or the guardrail fallback.
    UnknownTool { message: String },
    /// The query engine failed during execution; original message preserved.
    Execution { message: String },
}

impl PipelineError {
    pub fn kind_str(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "ValidationError",
            PipelineError::UnresolvedColumn { .. } => "UnresolvedColumnError",
            PipelineError::UnknownTool { .. } => "UnknownToolError",
            PipelineError::Execution { .. } => "ExecutionError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PipelineError::Validation { message }
            | PipelineError::UnresolvedColumn { message }
            | PipelineError::UnknownTool { message }
            | PipelineError::Execution { message } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self { PipelineError::Validation { message: msg.into() } }
    pub fn unresolved_column<S: Into<String>>(msg: S) -> Self { PipelineError::UnresolvedColumn { message: msg.into() } }
    pub fn unknown_tool<S: Into<String>>(msg: S) -> Self { PipelineError::UnknownTool { message: msg.into() } }
    pub fn execution<S: Into<String>>(msg: S) -> Self { PipelineError::Execution { message: msg.into() } }

    /// True for the error classes raised before any query executes.
    pub fn is_pre_execution(&self) -> bool {
        matches!(self, PipelineError::Validation { .. } | PipelineError::UnresolvedColumn { .. })
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind_str(), self.message())
    }
}

impl std::error::Error for PipelineError {}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Execution unless downcasted elsewhere
        PipelineError::Execution { message: err.to_string() }
    }
}

impl From<polars::prelude::PolarsError> for PipelineError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        PipelineError::Execution { message: err.to_string() }
    }
}
