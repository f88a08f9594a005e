//! Player contract aggregations over the salary book. One row per player,
//! with one column per future season ("salary_2025_26", ...), so the season
//! argument never filters rows; it only steers which salary column the
//! metric resolves to. Representative name/team/note columns ride along via
//! first() so a summary row still says who it is about.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    de_group_by, latest_season_column, nearest_season_column, parse_filter_map, AggQuery,
    AggSelect, AggVerb, ExtraSelect, FilterClause, ParamValue, QueryCtx, QueryShape,
};
use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;
use crate::render;
use crate::resolve::season_start_year;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContractsArgs {
    pub season: Option<String>,
    pub metric: Option<String>,
    pub agg: Option<String>,
    #[serde(deserialize_with = "de_group_by")]
    pub group_by: Option<String>,
    pub players: Option<Vec<String>>,
    pub teams: Option<Vec<String>>,
    pub filters: Option<serde_json::Map<String, Value>>,
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractGroup {
    None,
    Player,
    Team,
}

impl ContractGroup {
    fn parse(raw: Option<&str>) -> PipelineResult<ContractGroup> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("none") => Ok(ContractGroup::None),
            Some("player") => Ok(ContractGroup::Player),
            Some("team") => Ok(ContractGroup::Team),
            Some(other) => Err(PipelineError::validation(format!(
                "group_by must be one of none|player|team for player_contracts, got '{other}'"
            ))),
        }
    }

    /// Physical grouping column and the logical alias it is reported under.
    fn key(&self) -> Option<(&'static str, &'static str)> {
        match self {
            ContractGroup::None => None,
            ContractGroup::Player => Some(("name", "player")),
            ContractGroup::Team => Some(("team", "team")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContractsQuery {
    pub verb: AggVerb,
    pub salary_column: String,
    pub group: ContractGroup,
    pub players: Vec<String>,
    pub teams: Vec<String>,
    pub filters: Vec<FilterClause>,
    pub k: Option<usize>,
}

fn parse_contract_verb(raw: &str) -> PipelineResult<AggVerb> {
    let verb = AggVerb::parse(raw)?;
    match verb {
        AggVerb::Max | AggVerb::Min | AggVerb::Sum | AggVerb::Avg | AggVerb::Count => Ok(verb),
        _ => Err(PipelineError::validation(format!(
            "agg must be one of max|min|sum|avg|count for player_contracts, got '{raw}'"
        ))),
    }
}

/// Resolve the metric to a physical salary column. Explicit column names are
/// honored when they exist; the generic "salary" keys off the season with a
/// nearest-year fallback. Without a usable season the latest salary column is
/// taken.
fn resolve_salary_column(
    schema: &[String],
    metric: &str,
    season: Option<&str>,
) -> PipelineResult<String> {
    let metric = metric.trim();
    if schema.iter().any(|c| c == metric) {
        return Ok(metric.to_string());
    }
    if metric.eq_ignore_ascii_case("salary") {
        if let Some(year) = season.and_then(season_start_year) {
            let keyed = format!("salary_{}_{:02}", year, (year + 1).rem_euclid(100));
            if schema.iter().any(|c| c == &keyed) {
                return Ok(keyed);
            }
            if let Some(nearest) = nearest_season_column(schema, "salary_", year) {
                debug!(
                    target: "courtside::query",
                    "salary column {keyed} missing in player_contracts, using nearest {nearest}"
                );
                return Ok(nearest);
            }
        } else if let Some(latest) = latest_season_column(schema, "salary_") {
            return Ok(latest);
        }
        return Err(PipelineError::unresolved_column(
            "no salary columns available in player_contracts",
        ));
    }
    if metric.starts_with("salary_") {
        return Err(PipelineError::unresolved_column(format!(
            "column '{metric}' does not exist in player_contracts"
        )));
    }
    Err(PipelineError::validation(format!("Unknown metric '{metric}' for player_contracts")))
}

pub fn validate_args(ctx: &QueryCtx, args: &ContractsArgs) -> PipelineResult<ContractsQuery> {
    let schema = ctx.store.columns(Dataset::PlayerContracts)?;
    let verb = parse_contract_verb(args.agg.as_deref().unwrap_or("max"))?;

    // No default season here: absent season means "the latest salary column",
    // not the salary-domain default (that default seeds plan normalization).
    let season = args.season.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let metric = args.metric.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("salary");
    let metric = ctx.manifest.canonical_metric(metric).unwrap_or(metric);
    let salary_column = resolve_salary_column(&schema, metric, season)?;

    let players = ctx.aliases.resolve_players(args.players.as_deref().unwrap_or(&[]));
    // Contract rows key teams by abbreviation, so names map twice: alias to
    // the canonical franchise name, then to the abbreviation.
    let teams: Vec<String> = ctx
        .aliases
        .resolve_teams(args.teams.as_deref().unwrap_or(&[]))
        .iter()
        .map(|t| ctx.manifest.team_to_abbrev(t))
        .collect();

    let mut group = ContractGroup::parse(args.group_by.as_deref())?;
    if group == ContractGroup::None && players.len() > 1 {
        group = ContractGroup::Player;
    }

    let filters = match &args.filters {
        Some(map) => parse_filter_map(map, &schema, Dataset::PlayerContracts)?,
        None => Vec::new(),
    };

    Ok(ContractsQuery { verb, salary_column, group, players, teams, filters, k: args.k })
}

pub fn build_query(ctx: &QueryCtx, q: &ContractsQuery) -> AggQuery {
    let mut filters: Vec<FilterClause> = Vec::new();
    if !q.players.is_empty() {
        filters.push(FilterClause::In {
            column: "name".into(),
            values: q.players.iter().map(|p| ParamValue::Str(p.clone())).collect(),
        });
    }
    if !q.teams.is_empty() {
        filters.push(FilterClause::In {
            column: "team".into(),
            values: q.teams.iter().map(|t| ParamValue::Str(t.clone())).collect(),
        });
    }
    filters.extend(q.filters.iter().cloned());

    let shape = match q.group.key() {
        None => QueryShape::Summary {
            aggs: vec![AggSelect::new(q.verb, q.salary_column.clone(), "value")],
            extras: vec![
                ExtraSelect::first("name", "name"),
                ExtraSelect::first("team", "team"),
                ExtraSelect::first("note", "note"),
            ],
            arg_max: None,
        },
        Some((key_column, key_alias)) => {
            let extras = match q.group {
                ContractGroup::Player => {
                    vec![ExtraSelect::first("team", "team"), ExtraSelect::first("note", "note")]
                }
                _ => vec![ExtraSelect::first("note", "note")],
            };
            QueryShape::Grouped {
                key_column: key_column.into(),
                key_alias: key_alias.into(),
                agg: AggSelect::new(q.verb, q.salary_column.clone(), "value"),
                extras,
                limit: q.k,
            }
        }
    };

    AggQuery {
        dataset: Dataset::PlayerContracts,
        from_path: ctx.store.path_for(Dataset::PlayerContracts).to_string_lossy().into_owned(),
        filters,
        shape,
    }
}

pub fn run_contracts_agg(ctx: &QueryCtx, args: &ContractsArgs) -> PipelineResult<String> {
    let q = validate_args(ctx, args)?;
    let built = build_query(ctx, &q);
    let rs = built.execute(&ctx.store)?;
    Ok(render::to_table(&rs, render::NO_CONTRACT_RESULTS))
}
