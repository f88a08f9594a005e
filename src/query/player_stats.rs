//! Per-player season stat aggregations. Rows are one player-season each, so
//! every query is season-scoped: the season filter is always the first WHERE
//! clause, defaulting from the manifest when the caller gives none. A
//! games-played total rides along with every select so small-sample answers
//! are visible as such.

use serde::Deserialize;
use serde_json::Value;

use super::{
    coalesce_metrics, de_group_by, parse_filter_map, AggQuery, AggSelect, AggVerb, CompOp,
    ExtraSelect, FilterClause, ParamValue, QueryCtx, QueryShape,
};
use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;
use crate::render;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerStatsArgs {
    pub season: Option<String>,
    pub metric: Option<String>,
    pub metrics: Option<Vec<String>>,
    pub agg: Option<String>,
    #[serde(deserialize_with = "de_group_by")]
    pub group_by: Option<String>,
    pub players: Option<Vec<String>>,
    pub teams: Option<Vec<String>>,
    pub filters: Option<serde_json::Map<String, Value>>,
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatGroup {
    None,
    Player,
    Team,
}

impl StatGroup {
    fn parse(raw: Option<&str>) -> PipelineResult<StatGroup> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("none") => Ok(StatGroup::None),
            Some("player") => Ok(StatGroup::Player),
            Some("team") => Ok(StatGroup::Team),
            Some(other) => Err(PipelineError::validation(format!(
                "group_by must be one of none|player|team for player_stats, got '{other}'"
            ))),
        }
    }

    fn column(&self) -> Option<&'static str> {
        match self {
            StatGroup::None => None,
            StatGroup::Player => Some("player"),
            StatGroup::Team => Some("team"),
        }
    }
}

/// Closed record produced by `validate_args`; building and execution take
/// only this, never the raw arguments.
#[derive(Debug, Clone)]
pub struct PlayerStatsQuery {
    pub season: String,
    pub verb: AggVerb,
    pub metrics: Vec<String>,
    pub group: StatGroup,
    pub players: Vec<String>,
    pub teams: Vec<String>,
    pub filters: Vec<FilterClause>,
    pub k: Option<usize>,
}

pub fn validate_args(ctx: &QueryCtx, args: &PlayerStatsArgs) -> PipelineResult<PlayerStatsQuery> {
    let schema = ctx.store.columns(Dataset::PlayerStats)?;
    let season = args
        .season
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.manifest.default_season_for(Dataset::PlayerStats).map(str::to_string))
        .ok_or_else(|| {
            PipelineError::validation("no season given and no default configured for player_stats")
        })?;

    let verb = AggVerb::parse(args.agg.as_deref().unwrap_or("avg"))?;
    let requested = coalesce_metrics(args.metric.as_deref(), args.metrics.as_deref());
    // Glossary wording resolves to physical columns before validation; the
    // resolution can merge duplicates, so dedupe once more afterwards.
    let mut metrics: Vec<String> = Vec::with_capacity(requested.len());
    for m in &requested {
        let canonical = ctx.manifest.canonical_metric(m).unwrap_or(m.as_str()).to_string();
        if !metrics.contains(&canonical) {
            metrics.push(canonical);
        }
    }
    let (verb, metrics) = if verb == AggVerb::Count || metrics.is_empty() {
        (AggVerb::Count, vec!["row_count".to_string()])
    } else {
        (verb, metrics)
    };
    for m in &metrics {
        if m != "row_count" && !schema.iter().any(|c| c == m) {
            return Err(PipelineError::validation(format!("Unknown metric '{m}' for player_stats")));
        }
    }

    let players = ctx.aliases.resolve_players(args.players.as_deref().unwrap_or(&[]));
    let teams = ctx.aliases.resolve_teams(args.teams.as_deref().unwrap_or(&[]));
    let mut group = StatGroup::parse(args.group_by.as_deref())?;
    if group == StatGroup::None && players.len() > 1 {
        group = StatGroup::Player;
    }

    let filters = match &args.filters {
        Some(map) => parse_filter_map(map, &schema, Dataset::PlayerStats)?,
        None => Vec::new(),
    };

    Ok(PlayerStatsQuery { season, verb, metrics, group, players, teams, filters, k: args.k })
}

pub fn build_query(ctx: &QueryCtx, q: &PlayerStatsQuery) -> AggQuery {
    let mut filters: Vec<FilterClause> = vec![FilterClause::Cmp {
        column: "season".into(),
        op: CompOp::Eq,
        value: ParamValue::Str(q.season.clone()),
    }];
    if !q.players.is_empty() {
        filters.push(FilterClause::In {
            column: "player".into(),
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

    let games = ExtraSelect::sum_as("g", "games_played");
    let shape = if q.verb == AggVerb::Count {
        match q.group.column() {
            None => QueryShape::Summary {
                aggs: vec![AggSelect::new(AggVerb::Count, "row_count", "row_count")],
                extras: vec![games],
                arg_max: None,
            },
            Some(key) => QueryShape::Grouped {
                key_column: key.into(),
                key_alias: key.into(),
                agg: AggSelect::new(AggVerb::Count, "row_count", "value"),
                extras: vec![games],
                limit: q.k,
            },
        }
    } else if q.metrics.len() > 1 {
        match q.group.column() {
            Some(key) => QueryShape::GroupedUnion {
                key_column: key.into(),
                key_alias: "group_key".into(),
                verb: q.verb,
                metrics: q.metrics.clone(),
                extras: vec![games],
                limit: q.k,
            },
            None => QueryShape::Summary {
                aggs: q.metrics.iter().map(|m| AggSelect::new(q.verb, m.clone(), m.clone())).collect(),
                extras: vec![games],
                arg_max: None,
            },
        }
    } else {
        let m = &q.metrics[0];
        match q.group.column() {
            Some(key) => QueryShape::Grouped {
                key_column: key.into(),
                key_alias: key.into(),
                agg: AggSelect::new(q.verb, m.clone(), "value"),
                extras: vec![games],
                limit: q.k,
            },
            None => QueryShape::Summary {
                aggs: vec![AggSelect::new(q.verb, m.clone(), m.clone())],
                extras: vec![games],
                arg_max: None,
            },
        }
    };

    AggQuery {
        dataset: Dataset::PlayerStats,
        from_path: ctx.store.path_for(Dataset::PlayerStats).to_string_lossy().into_owned(),
        filters,
        shape,
    }
}

/// Validate, build and execute in one step; the direct entry point the
/// dispatcher and embedding callers share.
pub fn run_player_stats_agg(ctx: &QueryCtx, args: &PlayerStatsArgs) -> PipelineResult<String> {
    let q = validate_args(ctx, args)?;
    let built = build_query(ctx, &q);
    let rs = built.execute(&ctx.store)?;
    Ok(render::to_table(&rs, render::NO_RESULTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::snapshot::SnapshotStore;
    use polars::prelude::*;
    use serde_json::json;
    use std::fs::File;
    use std::sync::Arc;

    fn write_fixture(dir: &std::path::Path) {
        let mut df = DataFrame::new(vec![
            Series::new(
                "player".into(),
                vec!["Stephen Curry", "Stephen Curry", "LeBron James", "Jayson Tatum"],
            )
            .into(),
            Series::new(
                "team".into(),
                vec![
                    "Golden State Warriors",
                    "Golden State Warriors",
                    "Los Angeles Lakers",
                    "Boston Celtics",
                ],
            )
            .into(),
            Series::new("season".into(), vec!["2024-25", "2023-24", "2024-25", "2024-25"]).into(),
            Series::new("g".into(), vec![70i64, 74, 71, 72]).into(),
            Series::new("pts".into(), vec![24.5f64, 26.4, 25.7, 28.1]).into(),
            Series::new("ast".into(), vec![6.0f64, 5.1, 8.2, 4.9]).into(),
            Series::new("age".into(), vec![36i64, 35, 40, 26]).into(),
        ])
        .unwrap();
        let f = File::create(dir.join("player_stats.parquet")).unwrap();
        ParquetWriter::new(f).finish(&mut df).unwrap();
    }

    fn make_ctx(dir: &std::path::Path) -> QueryCtx {
        QueryCtx::new(SnapshotStore::shared(dir), Arc::new(Manifest::default()))
    }

    #[test]
    fn single_player_average_resolves_alias_and_glossary() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PlayerStatsArgs {
            players: Some(vec!["steph curry".into()]),
            metric: Some("points".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.season, "2024-25");
        assert_eq!(q.metrics, vec!["pts"]);
        assert_eq!(q.players, vec!["Stephen Curry"]);
        assert_eq!(q.group, StatGroup::None);

        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.contains("AVG(pts) AS pts"), "sql: {sql}");
        assert!(sql.contains("SUM(g) AS games_played"));
        assert!(sql.contains("season = ?"));
        assert!(sql.contains("player IN (?)"));
        assert!(!sql.contains("2024-25"), "literals must stay out of the query text");
        assert_eq!(
            built.params(),
            vec![ParamValue::Str("2024-25".into()), ParamValue::Str("Stephen Curry".into())]
        );

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.cell(0, "pts"), Some(&json!(24.5)));
        assert_eq!(rs.cell(0, "games_played"), Some(&json!(70)));
    }

    #[test]
    fn two_players_auto_upgrade_to_player_grouping() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PlayerStatsArgs {
            players: Some(vec!["Stephen Curry".into(), "LeBron James".into()]),
            metric: Some("pts".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.group, StatGroup::Player);

        let built = build_query(&ctx, &q);
        assert!(built.sql().contains("GROUP BY player ORDER BY value DESC"));
        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.columns, vec!["player", "value", "games_played"]);
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.cell(0, "player"), Some(&json!("LeBron James")));
        assert_eq!(rs.cell(0, "value"), Some(&json!(25.7)));
        assert_eq!(rs.cell(1, "player"), Some(&json!("Stephen Curry")));
    }

    #[test]
    fn multi_metric_union_caps_each_metric_partition() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PlayerStatsArgs {
            metrics: Some(vec!["pts".into(), "ast".into()]),
            group_by: Some("player".into()),
            k: Some(2),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.contains(" UNION ALL "));
        assert!(sql.contains("'pts' AS metric"));
        assert!(sql.contains("'ast' AS metric"));
        // season filter parameterized once per sub-query
        assert_eq!(built.params().len(), 2);

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.columns, vec!["group_key", "value", "metric", "games_played"]);
        assert_eq!(rs.rows.len(), 4, "top-2 per metric over 3 players in season");
        assert_eq!(rs.cell(0, "metric"), Some(&json!("pts")));
        assert_eq!(rs.cell(0, "group_key"), Some(&json!("Jayson Tatum")));
        assert_eq!(rs.cell(2, "metric"), Some(&json!("ast")));
        assert_eq!(rs.cell(2, "group_key"), Some(&json!("LeBron James")));
    }

    #[test]
    fn count_ignores_metric_and_applies_threshold_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let filters = json!({"age__gte": 36});
        let args = PlayerStatsArgs {
            agg: Some("count".into()),
            metric: Some("pts".into()),
            filters: Some(filters.as_object().unwrap().clone()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.metrics, vec!["row_count"]);

        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.starts_with("SELECT COUNT(*) AS row_count, SUM(g) AS games_played"));
        assert!(sql.contains("age >= ?"));

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "row_count"), Some(&json!(2)));
        assert_eq!(rs.cell(0, "games_played"), Some(&json!(141)));
    }

    #[test]
    fn unknown_metric_and_group_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());

        let err = validate_args(
            &ctx,
            &PlayerStatsArgs { metric: Some("vorp".into()), ..Default::default() },
        )
        .unwrap_err();
        assert_eq!(err.kind_str(), "ValidationError");
        assert!(err.message().contains("vorp"));

        let err = validate_args(
            &ctx,
            &PlayerStatsArgs { group_by: Some("position".into()), ..Default::default() },
        )
        .unwrap_err();
        assert_eq!(err.kind_str(), "ValidationError");
    }

    #[test]
    fn rendered_output_is_a_markdown_table() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PlayerStatsArgs {
            players: Some(vec!["Stephen Curry".into()]),
            metric: Some("pts".into()),
            ..Default::default()
        };
        let out = run_player_stats_agg(&ctx, &args).unwrap();
        assert!(out.starts_with("| pts | games_played |"), "out: {out}");
        assert!(out.contains("| 24.5 | 70 |"));

        // no season rows → fixed empty marker
        let none = run_player_stats_agg(
            &ctx,
            &PlayerStatsArgs {
                season: Some("1999-00".into()),
                metric: Some("pts".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(none, "_No results._");
    }
}
