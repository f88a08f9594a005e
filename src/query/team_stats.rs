//! Per-team season stat aggregations. Rows mirror the league table: one team
//! per season, playoff teams carrying a trailing `*` in the label, plus a
//! synthetic "League Average" row that is excluded from every query unless
//! explicitly requested. Metrics are restricted to the numeric stat columns;
//! identity and rank columns are not aggregatable.

use serde::Deserialize;
use serde_json::Value;

use super::{
    coalesce_metrics, de_group_by, parse_filter_map, AggQuery, AggSelect, AggVerb, CompOp,
    FilterClause, ParamValue, QueryCtx, QueryShape,
};
use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;
use crate::render;
use crate::resolve::{expand_team_labels, TeamDecoration};

const LEAGUE_AVERAGE_LABEL: &str = "League Average";

/// Columns that are never valid aggregation targets.
const NON_METRIC_COLUMNS: [&str; 3] = ["team", "season", "rk"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamStatsArgs {
    pub season: Option<String>,
    pub metric: Option<String>,
    pub metrics: Option<Vec<String>>,
    pub agg: Option<String>,
    #[serde(deserialize_with = "de_group_by")]
    pub group_by: Option<String>,
    pub teams: Option<Vec<String>>,
    pub include_league_average: bool,
    pub filters: Option<serde_json::Map<String, Value>>,
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamGroup {
    None,
    Team,
}

impl TeamGroup {
    fn parse(raw: Option<&str>) -> PipelineResult<TeamGroup> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("none") => Ok(TeamGroup::None),
            Some("team") => Ok(TeamGroup::Team),
            Some(other) => Err(PipelineError::validation(format!(
                "group_by must be one of none|team for team_stats, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeamStatsQuery {
    pub season: String,
    pub verb: AggVerb,
    pub metrics: Vec<String>,
    pub group: TeamGroup,
    pub teams: Vec<String>,
    pub include_league_average: bool,
    pub filters: Vec<FilterClause>,
    pub k: Option<usize>,
}

pub fn validate_args(ctx: &QueryCtx, args: &TeamStatsArgs) -> PipelineResult<TeamStatsQuery> {
    let schema = ctx.store.columns(Dataset::TeamStats)?;
    let season = args
        .season
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.manifest.default_season_for(Dataset::TeamStats).map(str::to_string))
        .ok_or_else(|| {
            PipelineError::validation("no season given and no default configured for team_stats")
        })?;

    let verb = AggVerb::parse(args.agg.as_deref().unwrap_or("avg"))?;
    let requested = coalesce_metrics(args.metric.as_deref(), args.metrics.as_deref());
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
        if m == "row_count" {
            continue;
        }
        let known = schema.iter().any(|c| c == m);
        if !known || NON_METRIC_COLUMNS.contains(&m.as_str()) {
            return Err(PipelineError::validation(format!("Unknown metric '{m}' for team_stats")));
        }
    }

    // Both the bare and the playoff-starred row label match each named team.
    let resolved = ctx.aliases.resolve_teams(args.teams.as_deref().unwrap_or(&[]));
    let teams = expand_team_labels(&resolved, TeamDecoration::PlayoffStar);
    let group = TeamGroup::parse(args.group_by.as_deref())?;

    let filters = match &args.filters {
        Some(map) => parse_filter_map(map, &schema, Dataset::TeamStats)?,
        None => Vec::new(),
    };

    Ok(TeamStatsQuery {
        season,
        verb,
        metrics,
        group,
        teams,
        include_league_average: args.include_league_average,
        filters,
        k: args.k,
    })
}

pub fn build_query(ctx: &QueryCtx, q: &TeamStatsQuery) -> AggQuery {
    let mut filters: Vec<FilterClause> = vec![FilterClause::Cmp {
        column: "season".into(),
        op: CompOp::Eq,
        value: ParamValue::Str(q.season.clone()),
    }];
    if !q.teams.is_empty() {
        filters.push(FilterClause::In {
            column: "team".into(),
            values: q.teams.iter().map(|t| ParamValue::Str(t.clone())).collect(),
        });
    }
    if !q.include_league_average {
        filters.push(FilterClause::Cmp {
            column: "team".into(),
            op: CompOp::Ne,
            value: ParamValue::Str(LEAGUE_AVERAGE_LABEL.into()),
        });
    }
    filters.extend(q.filters.iter().cloned());

    let shape = if q.verb == AggVerb::Count {
        match q.group {
            TeamGroup::None => QueryShape::Summary {
                aggs: vec![AggSelect::new(AggVerb::Count, "row_count", "row_count")],
                extras: vec![],
                arg_max: None,
            },
            TeamGroup::Team => QueryShape::Grouped {
                key_column: "team".into(),
                key_alias: "team".into(),
                agg: AggSelect::new(AggVerb::Count, "row_count", "value"),
                extras: vec![],
                limit: q.k,
            },
        }
    } else if q.metrics.len() > 1 {
        match q.group {
            TeamGroup::Team => QueryShape::GroupedUnion {
                key_column: "team".into(),
                key_alias: "team".into(),
                verb: q.verb,
                metrics: q.metrics.clone(),
                extras: vec![],
                limit: q.k,
            },
            TeamGroup::None => QueryShape::Summary {
                aggs: q.metrics.iter().map(|m| AggSelect::new(q.verb, m.clone(), m.clone())).collect(),
                extras: vec![],
                arg_max: None,
            },
        }
    } else {
        let m = &q.metrics[0];
        match q.group {
            TeamGroup::Team => QueryShape::Grouped {
                key_column: "team".into(),
                key_alias: "team".into(),
                agg: AggSelect::new(q.verb, m.clone(), "value"),
                extras: vec![],
                limit: q.k,
            },
            TeamGroup::None => QueryShape::Summary {
                aggs: vec![AggSelect::new(q.verb, m.clone(), m.clone())],
                extras: vec![],
                arg_max: None,
            },
        }
    };

    AggQuery {
        dataset: Dataset::TeamStats,
        from_path: ctx.store.path_for(Dataset::TeamStats).to_string_lossy().into_owned(),
        filters,
        shape,
    }
}

pub fn run_team_stats_agg(ctx: &QueryCtx, args: &TeamStatsArgs) -> PipelineResult<String> {
    let q = validate_args(ctx, args)?;
    let built = build_query(ctx, &q);
    let rs = built.execute(&ctx.store)?;
    Ok(render::to_table(&rs, render::NO_TEAM_STAT_RESULTS))
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
                "team".into(),
                vec![
                    "Cleveland Cavaliers*",
                    "Boston Celtics*",
                    "Golden State Warriors*",
                    "Washington Wizards",
                    "League Average",
                    "Boston Celtics*",
                ],
            )
            .into(),
            Series::new(
                "season".into(),
                vec!["2024-25", "2024-25", "2024-25", "2024-25", "2024-25", "2023-24"],
            )
            .into(),
            Series::new("rk".into(), vec![1i64, 2, 3, 30, 0, 1]).into(),
            Series::new("pts".into(), vec![121.9f64, 120.5, 113.8, 108.5, 114.2, 120.6]).into(),
            Series::new("ast".into(), vec![28.3f64, 26.8, 29.1, 25.1, 26.6, 26.9]).into(),
        ])
        .unwrap();
        let f = File::create(dir.join("team_stats.parquet")).unwrap();
        ParquetWriter::new(f).finish(&mut df).unwrap();
    }

    fn make_ctx(dir: &std::path::Path) -> QueryCtx {
        QueryCtx::new(SnapshotStore::shared(dir), Arc::new(Manifest::default()))
    }

    #[test]
    fn grouped_ranking_excludes_league_average_row() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = TeamStatsArgs {
            metric: Some("pts".into()),
            group_by: Some("team".into()),
            k: Some(3),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.contains("team != ?"), "sql: {sql}");
        assert!(built.params().contains(&ParamValue::Str("League Average".into())));

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.rows.len(), 3);
        assert_eq!(rs.cell(0, "team"), Some(&json!("Cleveland Cavaliers*")));
        assert_eq!(rs.cell(1, "team"), Some(&json!("Boston Celtics*")));
        for row in 0..rs.rows.len() {
            assert_ne!(rs.cell(row, "team"), Some(&json!("League Average")));
        }
    }

    #[test]
    fn league_average_row_counts_only_when_included() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());

        let excluded = TeamStatsArgs { agg: Some("count".into()), ..Default::default() };
        let q = validate_args(&ctx, &excluded).unwrap();
        let rs = build_query(&ctx, &q).execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "row_count"), Some(&json!(4)));

        let included = TeamStatsArgs {
            agg: Some("count".into()),
            include_league_average: true,
            ..Default::default()
        };
        let q = validate_args(&ctx, &included).unwrap();
        let rs = build_query(&ctx, &q).execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "row_count"), Some(&json!(5)));
    }

    #[test]
    fn named_team_matches_playoff_starred_label() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = TeamStatsArgs {
            teams: Some(vec!["celtics".into()]),
            metric: Some("pts".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.teams, vec!["Boston Celtics", "Boston Celtics*"]);

        let built = build_query(&ctx, &q);
        assert!(built.sql().contains("team IN (?,?)"));
        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "pts"), Some(&json!(120.5)));
    }

    #[test]
    fn identity_columns_are_not_metrics() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        for bad in ["team", "rk", "season", "net_rating"] {
            let err = validate_args(
                &ctx,
                &TeamStatsArgs { metric: Some(bad.to_string()), ..Default::default() },
            )
            .unwrap_err();
            assert_eq!(err.kind_str(), "ValidationError", "metric '{bad}'");
        }
    }

    #[test]
    fn multi_metric_summary_keeps_metric_aliases() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = TeamStatsArgs {
            metrics: Some(vec!["pts".into(), "ast".into()]),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        let built = build_query(&ctx, &q);
        assert!(built.sql().starts_with("SELECT AVG(pts) AS pts, AVG(ast) AS ast FROM"));

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.columns, vec!["pts", "ast"]);
        assert_eq!(rs.rows.len(), 1);
        // 2024-25 average over the four real teams
        assert_eq!(rs.cell(0, "pts"), Some(&json!((121.9 + 120.5 + 113.8 + 108.5) / 4.0)));
    }

    #[test]
    fn grouped_union_caps_each_metric_partition() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = TeamStatsArgs {
            metrics: Some(vec!["points".into(), "assists".into()]),
            group_by: Some("team".into()),
            k: Some(2),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.metrics, vec!["pts", "ast"]);

        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.contains("UNION ALL"), "sql: {sql}");
        assert_eq!(built.params().len(), 4, "filter params repeat per metric");

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.columns, vec!["team", "value", "metric"]);
        assert_eq!(rs.rows.len(), 4, "two rows per metric partition");
        assert_eq!(rs.cell(0, "team"), Some(&json!("Cleveland Cavaliers*")));
        assert_eq!(rs.cell(0, "metric"), Some(&json!("pts")));
        assert_eq!(rs.cell(2, "team"), Some(&json!("Golden State Warriors*")));
        assert_eq!(rs.cell(2, "value"), Some(&json!(29.1)));
        assert_eq!(rs.cell(3, "metric"), Some(&json!("ast")));
    }
}
