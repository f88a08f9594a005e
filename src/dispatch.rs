//! Tool dispatch. A routed plan arrives as a list of operations; each
//! `tool_call` is mapped through the alias table onto one of the five dataset
//! executors and run in isolation, so one bad operation never takes down its
//! neighbors. Unknown tool names are not fatal either: the dispatcher
//! substitutes the executor suggested by the planned dataset, falling back to
//! player stats, and only the direct named entry point reports
//! UnknownToolError.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;
use crate::ops::{OpOutcome, RoutePlan, OP_TOOL_CALL};
use crate::query::{capsheets, contracts, picks, player_stats, team_stats, QueryCtx};

pub const PLAYER_STATS_TOOL: &str = "player_stats_aggregate";
pub const TEAM_STATS_TOOL: &str = "team_stats_aggregate";
pub const CONTRACTS_TOOL: &str = "contracts_aggregate";
pub const CAPSHEETS_TOOL: &str = "team_capsheets_aggregate";
pub const PICKS_TOOL: &str = "team_picks_aggregate";

/// Argument keys whose comma-separated string values become lists.
const LIST_KEYS: [&str; 4] = ["players", "teams", "metrics", "years"];

pub struct ToolRegistry {
    ctx: QueryCtx,
}

impl ToolRegistry {
    pub fn new(ctx: QueryCtx) -> ToolRegistry {
        ToolRegistry { ctx }
    }

    pub fn ctx(&self) -> &QueryCtx {
        &self.ctx
    }

    /// Canonical executor name for a tool name, honoring the legacy aliases
    /// routers have emitted over time.
    pub fn canonical_tool(name: &str) -> Option<&'static str> {
        match name.trim().to_lowercase().as_str() {
            "player_stats_aggregate"
            | "player_stats_aggregate_tool"
            | "player_stats_tool"
            | "player_stats" => Some(PLAYER_STATS_TOOL),
            "team_stats_aggregate"
            | "team_stats_aggregate_tool"
            | "team_stats_tool"
            | "team_stats" => Some(TEAM_STATS_TOOL),
            "contracts_aggregate"
            | "contracts_aggregate_tool"
            | "contracts_tool"
            | "player_contracts_aggregate"
            | "player_contracts" => Some(CONTRACTS_TOOL),
            "team_capsheets_aggregate"
            | "team_capsheets_aggregate_tool"
            | "team_capsheets_tool"
            | "team_capsheets" => Some(CAPSHEETS_TOOL),
            "team_picks_aggregate"
            | "team_picks_aggregate_tool"
            | "team_picks_tool"
            | "team_picks" => Some(PICKS_TOOL),
            _ => None,
        }
    }

    /// Executor a dataset points at; the guardrail target for unknown tools.
    pub fn tool_for_dataset(ds: Dataset) -> &'static str {
        match ds {
            Dataset::PlayerStats => PLAYER_STATS_TOOL,
            Dataset::TeamStats => TEAM_STATS_TOOL,
            Dataset::PlayerContracts => CONTRACTS_TOOL,
            Dataset::TeamCapsheets => CAPSHEETS_TOOL,
            Dataset::TeamPicks => PICKS_TOOL,
        }
    }

    /// Run one tool by name. Unknown names fail with UnknownToolError here;
    /// routed execution goes through `execute`, which substitutes instead.
    pub fn dispatch_named(&self, name: &str, args: &Value) -> PipelineResult<String> {
        let canonical = Self::canonical_tool(name)
            .ok_or_else(|| PipelineError::unknown_tool(format!("unknown tool '{name}'")))?;
        self.run_canonical(canonical, args)
    }

    fn run_canonical(&self, tool: &'static str, args: &Value) -> PipelineResult<String> {
        let structured = Value::Object(coerce_args(args)?);
        debug!(target: "courtside::dispatch", "running {tool} args={structured}");
        match tool {
            PLAYER_STATS_TOOL => {
                let a: player_stats::PlayerStatsArgs = parse_args(tool, structured)?;
                player_stats::run_player_stats_agg(&self.ctx, &a)
            }
            TEAM_STATS_TOOL => {
                let a: team_stats::TeamStatsArgs = parse_args(tool, structured)?;
                team_stats::run_team_stats_agg(&self.ctx, &a)
            }
            CONTRACTS_TOOL => {
                let a: contracts::ContractsArgs = parse_args(tool, structured)?;
                contracts::run_contracts_agg(&self.ctx, &a)
            }
            CAPSHEETS_TOOL => {
                let a: capsheets::CapsheetsArgs = parse_args(tool, structured)?;
                capsheets::run_capsheets_agg(&self.ctx, &a)
            }
            PICKS_TOOL => {
                let a: picks::PicksArgs = parse_args(tool, structured)?;
                picks::run_team_picks_agg(&self.ctx, &a)
            }
            other => Err(PipelineError::unknown_tool(format!("unknown tool '{other}'"))),
        }
    }

    /// Execute every operation of a routed plan, in order. Each operation
    /// yields exactly one outcome; failures are captured per operation.
    pub fn execute(
        &self,
        route: &RoutePlan,
        dataset_hint: Option<Dataset>,
    ) -> PipelineResult<Vec<OpOutcome>> {
        route.validate()?;
        let fallback =
            dataset_hint.map(Self::tool_for_dataset).unwrap_or(PLAYER_STATS_TOOL);
        let mut outcomes = Vec::with_capacity(route.ops.len());
        for op in &route.ops {
            if op.op != OP_TOOL_CALL {
                let err = PipelineError::validation(format!(
                    "unsupported op '{}'; only tool_call can be executed",
                    op.op
                ));
                outcomes.push(OpOutcome::rejected(err.to_string()));
                continue;
            }
            let tool = match Self::canonical_tool(&op.tool_name) {
                Some(t) => t,
                None => {
                    warn!(
                        target: "courtside::dispatch",
                        "unknown tool '{}', substituting {fallback}",
                        op.tool_name
                    );
                    fallback
                }
            };
            match self.run_canonical(tool, &op.args) {
                Ok(rendered) => outcomes.push(OpOutcome::ok(tool, rendered)),
                Err(e) => outcomes.push(OpOutcome::failed(tool, &e)),
            }
        }
        Ok(outcomes)
    }

    /// Parse a raw route JSON value and execute it.
    pub fn execute_json(
        &self,
        route: &Value,
        dataset_hint: Option<Dataset>,
    ) -> PipelineResult<Vec<OpOutcome>> {
        self.execute(&RoutePlan::from_json(route)?, dataset_hint)
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, v: Value) -> PipelineResult<T> {
    serde_json::from_value(v)
        .map_err(|e| PipelineError::validation(format!("invalid arguments for {tool}: {e}")))
}

/// Coerce tool arguments into the structured object form. Objects pass
/// through; strings parse as JSON when they look like it, else as the loose
/// "key=value; key=value" form; null means no arguments. Flat comparison keys
/// ("age__gte") are folded into the filters map either way.
fn coerce_args(args: &Value) -> PipelineResult<Map<String, Value>> {
    let flat = match args {
        Value::Object(map) => map.clone(),
        Value::String(text) if text.trim_start().starts_with('{') => {
            serde_json::from_str::<Map<String, Value>>(text).map_err(|e| {
                PipelineError::validation(format!("tool arguments are not valid JSON: {e}"))
            })?
        }
        Value::String(text) => parse_kv_args(text),
        Value::Null => Map::new(),
        other => {
            return Err(PipelineError::validation(format!(
                "tool arguments must be an object or a key=value string, got {other}"
            )))
        }
    };
    Ok(fold_filter_keys(flat))
}

/// Parse the loose "key=value; key=value" argument form. List-valued keys
/// split on commas; scalars are sniffed as integers, floats or booleans.
fn parse_kv_args(text: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for segment in text.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((key, raw)) = segment.split_once('=') else {
            warn!(target: "courtside::dispatch", "ignoring malformed argument segment '{segment}'");
            continue;
        };
        let key = key.trim().to_string();
        let raw = raw.trim();
        let value = if LIST_KEYS.contains(&key.as_str()) {
            Value::Array(raw.split(',').map(|p| coerce_scalar(p.trim())).collect())
        } else {
            coerce_scalar(raw)
        };
        out.insert(key, value);
    }
    out
}

fn coerce_scalar(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::from(f);
    }
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(s.to_string()),
    }
}

/// Move flat "column__op" keys under the filters object, merging with any
/// filters the caller already nested.
fn fold_filter_keys(mut flat: Map<String, Value>) -> Map<String, Value> {
    let filter_keys: Vec<String> =
        flat.keys().filter(|k| k.contains("__")).cloned().collect();
    if filter_keys.is_empty() {
        return flat;
    }
    let mut filters = match flat.remove("filters") {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    for k in filter_keys {
        if let Some(v) = flat.remove(&k) {
            filters.entry(k).or_insert(v);
        }
    }
    flat.insert("filters".to_string(), Value::Object(filters));
    flat
}
