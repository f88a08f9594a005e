//! Wire types for the pipeline boundary: the semantic intent handed over by
//! the upstream planner, the routed operation list, and the per-operation
//! outcome records the dispatcher returns. Parsing is deliberately tolerant:
//! missing fields default, unknown dataset keys collapse to None, and extra
//! keys are ignored. Validation of the interesting parts happens downstream
//! in the per-dataset argument validators.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;

pub const OP_TOOL_CALL: &str = "tool_call";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeframe {
    #[serde(default)]
    pub season: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default)]
    pub teams: Vec<String>,
}

/// Semantic intent produced once per question by the external planner.
/// Advisory except for dataset/season/entities, which seed tool arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub goal: String,
    #[serde(default, deserialize_with = "de_dataset")]
    pub dataset: Option<Dataset>,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub metric_hint: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

// Unknown dataset keys are tolerated as absent rather than failing the parse.
fn de_dataset<'de, D>(d: D) -> Result<Option<Dataset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(Dataset::parse))
}

/// One routed tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOp {
    #[serde(default = "default_op_kind")]
    pub op: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

fn default_op_kind() -> String {
    OP_TOOL_CALL.to_string()
}

impl ToolOp {
    pub fn call<S: Into<String>>(tool_name: S, args: Value) -> ToolOp {
        ToolOp { op: OP_TOOL_CALL.to_string(), tool_name: tool_name.into(), args }
    }
}

/// Ordered list of routed operations for one question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePlan {
    #[serde(default)]
    pub ops: Vec<ToolOp>,
}

impl RoutePlan {
    /// An empty operation list is a planning failure upstream, never a valid
    /// input to the dispatcher.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.ops.is_empty() {
            return Err(PipelineError::validation(
                "route contains no operations; at least one tool_call is required",
            ));
        }
        Ok(())
    }

    pub fn from_json(v: &Value) -> PipelineResult<RoutePlan> {
        let route: RoutePlan = serde_json::from_value(v.clone())
            .map_err(|e| PipelineError::validation(format!("malformed route: {e}")))?;
        route.validate()?;
        Ok(route)
    }
}

/// What one executed tool produced: rendered text, or the failure it raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Rendered(String),
    Failed { error: String },
}

/// One result record per routed operation. `Completed` covers both success
/// and a tool-level failure (the tool ran and reported an error); `Rejected`
/// covers operations the dispatcher could not hand to any tool at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpOutcome {
    Completed { tool: String, output: ToolOutput },
    Rejected { error: String },
}

impl OpOutcome {
    pub fn ok<S: Into<String>>(tool: S, rendered: String) -> OpOutcome {
        OpOutcome::Completed { tool: tool.into(), output: ToolOutput::Rendered(rendered) }
    }

    pub fn failed<S: Into<String>>(tool: S, err: &PipelineError) -> OpOutcome {
        OpOutcome::Completed { tool: tool.into(), output: ToolOutput::Failed { error: err.to_string() } }
    }

    pub fn rejected<S: Into<String>>(message: S) -> OpOutcome {
        OpOutcome::Rejected { error: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OpOutcome::Completed { output: ToolOutput::Rendered(_), .. })
    }

    pub fn tool(&self) -> Option<&str> {
        match self {
            OpOutcome::Completed { tool, .. } => Some(tool.as_str()),
            OpOutcome::Rejected { .. } => None,
        }
    }

    pub fn rendered(&self) -> Option<&str> {
        match self {
            OpOutcome::Completed { output: ToolOutput::Rendered(text), .. } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match self {
            OpOutcome::Completed { output: ToolOutput::Failed { error }, .. } => Some(error.as_str()),
            OpOutcome::Rejected { error } => Some(error.as_str()),
            _ => None,
        }
    }
}
