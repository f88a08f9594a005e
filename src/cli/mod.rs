//! Command-line executor. One binary covers both shapes of use: one-shot
//! execution of a routed plan (or a single tool) passed on the command line,
//! and an interactive session reading commands from stdin. Rendered tables
//! are re-aligned to the terminal width before printing; COURTSIDE_OUTPUT=json
//! (or --json) switches to machine-readable outcome lists.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use terminal_size::{terminal_size, Width};

use crate::dispatch::ToolRegistry;
use crate::manifest::{Dataset, Manifest};
use crate::ops::OpOutcome;
use crate::query::QueryCtx;
use crate::snapshot::SnapshotStore;

const USAGE: &str = r#"courtside - aggregation pipeline over NBA parquet snapshots

USAGE:
  courtside [--data <dir>] [--manifest <path>] [--dataset <key>] [--json]
            [--route <json> | --route-file <path> | --tool <name> [--args <json|k=v>]]

OPTIONS:
  --data <dir>        snapshot directory (default: COURTSIDE_DATA_DIR or ./data)
  --manifest <path>   manifest JSON override (default: COURTSIDE_MANIFEST or builtin)
  --dataset <key>     dataset hint used when a routed tool name is unknown
  --json              print outcomes as JSON (or set COURTSIDE_OUTPUT=json)
  -h, --help          show this help

Without --route/--route-file/--tool an interactive session reads stdin:
  {"ops": [...]}              execute a routed plan
  {"op": "tool_call", ...}    execute a single operation
  tool <name> <args>          run one tool (args as JSON or "k=v; k=v")
  dataset <key>               set the dataset hint
  help                        show this help
  exit                        quit
"#;

const MIN_COL_WIDTH: usize = 4;

#[derive(Debug, Default)]
struct CliOptions {
    data_dir: Option<String>,
    manifest: Option<String>,
    dataset: Option<String>,
    json: bool,
    route: Option<String>,
    route_file: Option<String>,
    tool: Option<String>,
    tool_args: Option<String>,
    help: bool,
}

impl CliOptions {
    fn parse(argv: &[String]) -> anyhow::Result<CliOptions> {
        let mut o = CliOptions::default();
        let mut i = 0;
        while i < argv.len() {
            match argv[i].as_str() {
                "--data" => o.data_dir = Some(take_value(argv, &mut i, "--data")?),
                "--manifest" => o.manifest = Some(take_value(argv, &mut i, "--manifest")?),
                "--dataset" => o.dataset = Some(take_value(argv, &mut i, "--dataset")?),
                "--route" => o.route = Some(take_value(argv, &mut i, "--route")?),
                "--route-file" => o.route_file = Some(take_value(argv, &mut i, "--route-file")?),
                "--tool" => o.tool = Some(take_value(argv, &mut i, "--tool")?),
                "--args" => o.tool_args = Some(take_value(argv, &mut i, "--args")?),
                "--json" => o.json = true,
                "-h" | "--help" => o.help = true,
                other => anyhow::bail!("unknown argument '{other}' (try --help)"),
            }
            i += 1;
        }
        Ok(o)
    }
}

fn take_value(argv: &[String], i: &mut usize, flag: &str) -> anyhow::Result<String> {
    *i += 1;
    argv.get(*i).cloned().ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

pub fn run(argv: Vec<String>) -> anyhow::Result<()> {
    let opts = CliOptions::parse(&argv)?;
    if opts.help {
        println!("{USAGE}");
        return Ok(());
    }

    let data_dir = opts
        .data_dir
        .clone()
        .or_else(|| std::env::var("COURTSIDE_DATA_DIR").ok())
        .unwrap_or_else(|| "data".to_string());
    let manifest_path = opts.manifest.clone().or_else(|| std::env::var("COURTSIDE_MANIFEST").ok());
    let manifest = Manifest::load_or_default(manifest_path.as_deref().map(Path::new))?;

    let store = SnapshotStore::shared(&data_dir);
    store.log_inventory();
    let registry = ToolRegistry::new(QueryCtx::new(store, Arc::new(manifest)));

    // Honor env override to force JSON output
    let json_mode = opts.json
        || std::env::var("COURTSIDE_OUTPUT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
    let mut hint = opts.dataset.as_deref().and_then(Dataset::parse);

    if let Some(name) = &opts.tool {
        let args = parse_tool_args(opts.tool_args.as_deref())?;
        let out = registry.dispatch_named(name, &args)?;
        println!("{}", fit_output(&out));
        return Ok(());
    }
    if let Some(text) = route_source(&opts)? {
        let value: Value = serde_json::from_str(&text)?;
        let outcomes = registry.execute_json(&as_route(value)?, hint)?;
        print_outcomes(&outcomes, json_mode)?;
        return Ok(());
    }

    println!(
        "courtside {} - routed-plan executor (help for commands)",
        env!("CARGO_PKG_VERSION")
    );
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("courtside> ");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed {
            "exit" | "quit" => break,
            "help" => {
                println!("{USAGE}");
                continue;
            }
            _ => {}
        }
        if let Some(rest) = trimmed.strip_prefix("dataset ") {
            let key = rest.trim();
            hint = Dataset::parse(key);
            match hint {
                Some(ds) => println!("dataset hint set to {ds}"),
                None => println!("unknown dataset '{key}'"),
            }
            continue;
        }
        if let Err(e) = handle_line(&registry, trimmed, hint, json_mode) {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

fn route_source(opts: &CliOptions) -> anyhow::Result<Option<String>> {
    if let Some(r) = &opts.route {
        return Ok(Some(r.clone()));
    }
    if let Some(p) = &opts.route_file {
        return Ok(Some(fs::read_to_string(p)?));
    }
    Ok(None)
}

fn handle_line(
    registry: &ToolRegistry,
    line: &str,
    hint: Option<Dataset>,
    json_mode: bool,
) -> anyhow::Result<()> {
    if line.starts_with('{') {
        let value: Value = serde_json::from_str(line)?;
        let outcomes = registry.execute_json(&as_route(value)?, hint)?;
        return print_outcomes(&outcomes, json_mode);
    }
    if let Some(rest) = line.strip_prefix("tool ") {
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("");
        let raw = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let args = parse_tool_args(raw)?;
        let out = registry.dispatch_named(name, &args)?;
        println!("{}", fit_output(&out));
        return Ok(());
    }
    anyhow::bail!("unrecognized command (help for commands)")
}

/// Accept either a full route or a bare operation, wrapping the latter.
fn as_route(value: Value) -> anyhow::Result<Value> {
    if value.get("ops").is_some() {
        return Ok(value);
    }
    if value.get("op").is_some() || value.get("tool_name").is_some() {
        return Ok(serde_json::json!({ "ops": [value] }));
    }
    anyhow::bail!("expected a route with \"ops\" or a single operation")
}

fn parse_tool_args(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(s) if s.trim_start().starts_with('{') => Ok(serde_json::from_str(s)?),
        Some(s) => Ok(Value::String(s.to_string())),
    }
}

fn print_outcomes(outcomes: &[OpOutcome], json_mode: bool) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
        return Ok(());
    }
    for (i, o) in outcomes.iter().enumerate() {
        println!("-- op {} :: {}", i + 1, o.tool().unwrap_or("?"));
        match (o.rendered(), o.error_text()) {
            (Some(text), _) => println!("{}", fit_output(text)),
            (None, Some(err)) => println!("{err}"),
            _ => {}
        }
    }
    Ok(())
}

/// Re-align a rendered table to the current terminal.
pub fn fit_output(text: &str) -> String {
    let width = terminal_size().map(|(Width(w), _)| w as usize).unwrap_or(120);
    align_table(text, width)
}

/// Pad a markdown pipe table into aligned columns, truncating cells so the
/// table stays inside `term_width`. Numeric cells align right. Non-table
/// text passes through untouched.
pub fn align_table(text: &str, term_width: usize) -> String {
    if !text.starts_with('|') {
        return text.to_string();
    }
    let rows: Vec<Vec<String>> = text
        .lines()
        .map(|l| l.trim().trim_matches('|').split('|').map(|c| c.trim().to_string()).collect())
        .collect();
    let ncols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if ncols == 0 {
        return text.to_string();
    }
    // per-column budget: each column costs "| " plus a trailing space
    let cap = ((term_width.saturating_sub(1)) / ncols).saturating_sub(3).max(MIN_COL_WIDTH);
    let mut widths = vec![0usize; ncols];
    for row in &rows {
        if is_separator_row(row) {
            continue;
        }
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(display_len(cell).min(cap));
        }
    }
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        if is_separator_row(row) {
            let mut line = String::from("|");
            for w in &widths {
                line.push(' ');
                line.push_str(&"-".repeat(*w));
                line.push_str(" |");
            }
            out.push(line);
        } else {
            out.push(build_row(row, &widths));
        }
    }
    out.join("\n")
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('|');
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let (text, align_right) = (truncate(&cell, *w), is_numeric_like(&cell));
        s.push(' ');
        if align_right {
            let pad = w.saturating_sub(display_len(&text));
            s.push_str(&" ".repeat(pad));
            s.push_str(&text);
        } else {
            s.push_str(&text);
            let pad = w.saturating_sub(display_len(&text));
            s.push_str(&" ".repeat(pad));
        }
        s.push(' ');
        s.push('|');
    }
    s
}

fn is_separator_row(row: &[String]) -> bool {
    !row.is_empty() && row.iter().all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-'))
}

fn display_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    if max <= 1 {
        return "…".to_string();
    }
    let take = max - 1;
    s.chars().take(take).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    // crude detection for aligning numbers to right
    let st = s.trim();
    if st.is_empty() {
        return false;
    }
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() {
            has_digit = true;
            continue;
        }
        if ".-+eE,_".contains(ch) {
            continue;
        }
        return false;
    }
    has_digit
}
