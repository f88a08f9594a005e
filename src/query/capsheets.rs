//! Team cap-sheet aggregations. One row per team with one committed-cap
//! column per future season ("cap_2025_26", ...). As with contracts, the
//! season argument only picks the cap column. The default shape is the
//! ranking every cap question wants: teams ordered by committed cap for the
//! resolved season. A max summary also names the team holding the maximum.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    de_group_by, latest_season_column, nearest_season_column, parse_filter_map, AggQuery,
    AggSelect, AggVerb, ArgMaxSelect, ExtraSelect, FilterClause, ParamValue, QueryCtx, QueryShape,
    SelectCol,
};
use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;
use crate::render;

/// Metric words that all mean "the committed cap for the season".
const CAP_SYNONYMS: [&str; 5] = ["cap", "salary", "salary_cap", "cap_space", "total_salary"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CapsheetsArgs {
    pub season: Option<String>,
    pub metric: Option<String>,
    pub agg: Option<String>,
    #[serde(deserialize_with = "de_group_by")]
    pub group_by: Option<String>,
    pub teams: Option<Vec<String>>,
    pub filters: Option<serde_json::Map<String, Value>>,
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapGroup {
    Team,
    None,
}

impl CapGroup {
    fn parse(raw: Option<&str>) -> PipelineResult<CapGroup> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("team") => Ok(CapGroup::Team),
            Some("none") => Ok(CapGroup::None),
            Some(other) => Err(PipelineError::validation(format!(
                "group_by must be one of team|none for team_capsheets, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapsheetsQuery {
    pub verb: AggVerb,
    pub cap_column: String,
    pub group: CapGroup,
    pub teams: Vec<String>,
    pub filters: Vec<FilterClause>,
    pub k: Option<usize>,
}

fn parse_cap_verb(raw: &str) -> PipelineResult<AggVerb> {
    let verb = AggVerb::parse(raw)?;
    match verb {
        AggVerb::Max | AggVerb::Min | AggVerb::Sum | AggVerb::Avg | AggVerb::Count => Ok(verb),
        _ => Err(PipelineError::validation(format!(
            "agg must be one of max|min|sum|avg|count for team_capsheets, got '{raw}'"
        ))),
    }
}

/// Resolve the metric to a physical cap column: exact schema hits win, cap
/// synonyms key off the season with a nearest-year fallback. Without a usable
/// season the latest cap column is taken.
fn resolve_cap_column(
    schema: &[String],
    metric: &str,
    season: Option<&str>,
) -> PipelineResult<String> {
    let metric = metric.trim();
    if schema.iter().any(|c| c == metric) {
        return Ok(metric.to_string());
    }
    let base = metric.to_lowercase();
    if CAP_SYNONYMS.contains(&base.as_str()) {
        if let Some(year) = season.and_then(crate::resolve::season_start_year) {
            let keyed = format!("cap_{}_{:02}", year, (year + 1).rem_euclid(100));
            if schema.iter().any(|c| c == &keyed) {
                return Ok(keyed);
            }
            if let Some(nearest) = nearest_season_column(schema, "cap_", year) {
                debug!(
                    target: "courtside::query",
                    "cap column {keyed} missing in team_capsheets, using nearest {nearest}"
                );
                return Ok(nearest);
            }
        } else if let Some(latest) = latest_season_column(schema, "cap_") {
            return Ok(latest);
        }
        return Err(PipelineError::unresolved_column(
            "no cap columns available in team_capsheets",
        ));
    }
    if base.starts_with("cap_") {
        return Err(PipelineError::unresolved_column(format!(
            "column '{metric}' does not exist in team_capsheets"
        )));
    }
    Err(PipelineError::unresolved_column(format!(
        "Could not resolve cap column for metric '{metric}'"
    )))
}

pub fn validate_args(ctx: &QueryCtx, args: &CapsheetsArgs) -> PipelineResult<CapsheetsQuery> {
    let schema = ctx.store.columns(Dataset::TeamCapsheets)?;
    let verb = parse_cap_verb(args.agg.as_deref().unwrap_or("max"))?;

    // No default season here: absent season means "the latest cap column",
    // not the salary-domain default (that default seeds plan normalization).
    let season = args.season.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let metric = args.metric.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("cap");
    let metric = ctx.manifest.canonical_metric(metric).unwrap_or(metric);
    let cap_column = resolve_cap_column(&schema, metric, season)?;

    let teams = ctx.aliases.resolve_teams(args.teams.as_deref().unwrap_or(&[]));
    let group = CapGroup::parse(args.group_by.as_deref())?;

    let filters = match &args.filters {
        Some(map) => parse_filter_map(map, &schema, Dataset::TeamCapsheets)?,
        None => Vec::new(),
    };

    Ok(CapsheetsQuery { verb, cap_column, group, teams, filters, k: args.k })
}

pub fn build_query(ctx: &QueryCtx, q: &CapsheetsQuery) -> AggQuery {
    let mut filters: Vec<FilterClause> = Vec::new();
    if !q.teams.is_empty() {
        filters.push(FilterClause::In {
            column: "team".into(),
            values: q.teams.iter().map(|t| ParamValue::Str(t.clone())).collect(),
        });
    }
    filters.extend(q.filters.iter().cloned());

    let shape = match q.group {
        CapGroup::Team => QueryShape::Listing {
            columns: vec![SelectCol::plain("team"), SelectCol::named(q.cap_column.clone(), "value")],
            order_by: vec![("value".into(), true)],
            limit: q.k,
        },
        CapGroup::None => QueryShape::Summary {
            aggs: vec![AggSelect::new(q.verb, q.cap_column.clone(), "value")],
            extras: vec![ExtraSelect::tag(q.cap_column.clone(), "metric_col")],
            arg_max: (q.verb == AggVerb::Max).then(|| ArgMaxSelect {
                value_column: q.cap_column.clone(),
                label_column: "team".into(),
                alias: "top_team".into(),
            }),
        },
    };

    AggQuery {
        dataset: Dataset::TeamCapsheets,
        from_path: ctx.store.path_for(Dataset::TeamCapsheets).to_string_lossy().into_owned(),
        filters,
        shape,
    }
}

pub fn run_capsheets_agg(ctx: &QueryCtx, args: &CapsheetsArgs) -> PipelineResult<String> {
    let q = validate_args(ctx, args)?;
    let built = build_query(ctx, &q);
    let rs = built.execute(&ctx.store)?;
    Ok(render::to_table(&rs, render::NO_RESULTS))
}
