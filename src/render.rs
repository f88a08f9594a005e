//! Markdown rendering of result sets. Every tool answers with either a pipe
//! table or its dataset's fixed empty marker, so downstream consumers can
//! pattern-match on the first character.

use serde_json::Value;

use crate::query::ResultSet;

pub const NO_RESULTS: &str = "_No results._";
pub const NO_CONTRACT_RESULTS: &str = "_No contract results._";
pub const NO_TEAM_STAT_RESULTS: &str = "_No team stat results._";

/// Render rows as a markdown pipe table, or the marker when empty.
pub fn to_table(rs: &ResultSet, empty_marker: &str) -> String {
    if rs.rows.is_empty() {
        return empty_marker.to_string();
    }
    let mut lines = Vec::with_capacity(rs.rows.len() + 2);
    lines.push(format!("| {} |", rs.columns.join(" | ")));
    lines.push(format!("| {} |", vec!["---"; rs.columns.len()].join(" | ")));
    for row in &rs.rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    lines.join("\n")
}

/// Scalar cell text. Strings render bare, nulls as empty cells.
pub fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
