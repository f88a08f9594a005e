//! Future draft-pick queries. Rows are individual picks: the owning team
//! (stored decorated, "<Team> Future NBA Draft Picks"), the draft year, the
//! round label and a free-text details column. Two verbs only: count picks,
//! or list the matching rows. Year scoping takes the most specific argument
//! given: an explicit year list beats a single year beats a range, and a
//! season label only contributes its start year when nothing else is set.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{
    de_group_by, AggQuery, AggSelect, AggVerb, CompOp, FilterClause, ParamValue, QueryCtx,
    QueryShape, SelectCol,
};
use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;
use crate::render;
use crate::resolve::{expand_team_labels, season_start_year, TeamDecoration};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PicksArgs {
    pub season: Option<String>,
    pub year: Option<Value>,
    pub start_year: Option<Value>,
    pub end_year: Option<Value>,
    pub years: Option<Vec<Value>>,
    pub teams: Option<Vec<String>>,
    pub pick_round: Option<Value>,
    pub agg: Option<String>,
    #[serde(deserialize_with = "de_group_by")]
    pub group_by: Option<String>,
    pub k: Option<usize>,
    pub limit: Option<usize>,
    pub filters: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickAgg {
    Count,
    Listing,
}

impl PickAgg {
    fn parse(raw: Option<&str>) -> PipelineResult<PickAgg> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("count") => Ok(PickAgg::Count),
            Some("none") => Ok(PickAgg::Listing),
            Some(other) => Err(PipelineError::validation(format!(
                "agg must be one of count|none for team_picks, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickGroup {
    None,
    Team,
    Year,
    Round,
}

impl PickGroup {
    fn parse(raw: Option<&str>) -> PipelineResult<PickGroup> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("team") => Ok(PickGroup::Team),
            Some("none") => Ok(PickGroup::None),
            Some("year") => Ok(PickGroup::Year),
            Some("round") => Ok(PickGroup::Round),
            Some(other) => Err(PipelineError::validation(format!(
                "group_by must be one of none|team|year|round for team_picks, got '{other}'"
            ))),
        }
    }

    fn key(&self) -> Option<(&'static str, &'static str)> {
        match self {
            PickGroup::None => None,
            PickGroup::Team => Some(("team", "team")),
            PickGroup::Year => Some(("pick_year", "year")),
            PickGroup::Round => Some(("pick_round", "round")),
        }
    }
}

/// Which draft years a query covers, in decreasing specificity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearScope {
    Any,
    List(Vec<i64>),
    Exact(i64),
    Range { start: Option<i64>, end: Option<i64> },
}

#[derive(Debug, Clone)]
pub struct PicksQuery {
    pub scope: YearScope,
    pub teams: Vec<String>,
    pub round: Option<String>,
    pub details_like: Option<String>,
    pub agg: PickAgg,
    pub group: PickGroup,
    pub k: Option<usize>,
    pub limit: Option<usize>,
}

/// Accept a year as a number, a year string or a season label ("2026-27").
fn coerce_year(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => season_start_year(s).map(i64::from),
        _ => None,
    }
}

/// Map loose round wording onto the stored labels.
pub fn normalize_round(v: &Value) -> Option<&'static str> {
    let text = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_lowercase(),
        _ => return None,
    };
    match text.as_str() {
        "1" | "first" | "rd1" | "round 1" => Some("First"),
        "2" | "second" | "rd2" | "round 2" => Some("Second"),
        _ => None,
    }
}

pub fn validate_args(ctx: &QueryCtx, args: &PicksArgs) -> PipelineResult<PicksQuery> {
    let agg = PickAgg::parse(args.agg.as_deref())?;
    let group = PickGroup::parse(args.group_by.as_deref())?;

    let years: Vec<i64> =
        args.years.iter().flatten().filter_map(coerce_year).collect();
    let scope = if !years.is_empty() {
        YearScope::List(years)
    } else if let Some(y) = args.year.as_ref().and_then(coerce_year) {
        YearScope::Exact(y)
    } else {
        let start = args.start_year.as_ref().and_then(coerce_year);
        let end = args.end_year.as_ref().and_then(coerce_year);
        if start.is_some() || end.is_some() {
            YearScope::Range { start, end }
        } else if let Some(y) = args.season.as_deref().and_then(season_start_year) {
            YearScope::Exact(i64::from(y))
        } else {
            YearScope::Any
        }
    };

    let resolved = ctx.aliases.resolve_teams(args.teams.as_deref().unwrap_or(&[]));
    let teams = expand_team_labels(&resolved, TeamDecoration::FuturePicks);

    let round = match &args.pick_round {
        Some(v) => {
            let r = normalize_round(v);
            if r.is_none() {
                warn!(target: "courtside::query", "unrecognized pick_round {v}, ignoring");
            }
            r.map(str::to_string)
        }
        None => None,
    };

    // Only the details substring filter applies to picks; anything else in
    // the filter map is dropped with a warning.
    let mut details_like = None;
    if let Some(map) = &args.filters {
        for (key, value) in map {
            if key == "details__like" {
                match value.as_str() {
                    Some(s) if !s.trim().is_empty() => details_like = Some(s.trim().to_string()),
                    _ => warn!(target: "courtside::query", "details__like must be a string, ignoring"),
                }
            } else if !value.is_null() {
                warn!(target: "courtside::query", "ignoring unsupported filter '{key}' for team_picks");
            }
        }
    }

    Ok(PicksQuery {
        scope,
        teams,
        round,
        details_like,
        agg,
        group,
        k: args.k,
        limit: args.limit,
    })
}

pub fn build_query(ctx: &QueryCtx, q: &PicksQuery) -> AggQuery {
    let mut filters: Vec<FilterClause> = Vec::new();
    match &q.scope {
        YearScope::Any => {}
        YearScope::List(years) => filters.push(FilterClause::In {
            column: "pick_year".into(),
            values: years.iter().map(|y| ParamValue::Int(*y)).collect(),
        }),
        YearScope::Exact(y) => filters.push(FilterClause::Cmp {
            column: "pick_year".into(),
            op: CompOp::Eq,
            value: ParamValue::Int(*y),
        }),
        YearScope::Range { start, end } => {
            if let Some(s) = start {
                filters.push(FilterClause::Cmp {
                    column: "pick_year".into(),
                    op: CompOp::Ge,
                    value: ParamValue::Int(*s),
                });
            }
            if let Some(e) = end {
                filters.push(FilterClause::Cmp {
                    column: "pick_year".into(),
                    op: CompOp::Le,
                    value: ParamValue::Int(*e),
                });
            }
        }
    }
    if !q.teams.is_empty() {
        filters.push(FilterClause::In {
            column: "team".into(),
            values: q.teams.iter().map(|t| ParamValue::Str(t.clone())).collect(),
        });
    }
    if let Some(round) = &q.round {
        filters.push(FilterClause::Cmp {
            column: "pick_round".into(),
            op: CompOp::Eq,
            value: ParamValue::Str(round.clone()),
        });
    }
    if let Some(needle) = &q.details_like {
        filters.push(FilterClause::Contains { column: "details".into(), needle: needle.clone() });
    }

    let shape = match q.agg {
        PickAgg::Listing => {
            let order: Vec<(String, bool)> = match q.group {
                PickGroup::Team => ["team", "pick_year", "pick_round"],
                PickGroup::Year | PickGroup::None => ["pick_year", "team", "pick_round"],
                PickGroup::Round => ["pick_round", "pick_year", "team"],
            }
            .iter()
            .map(|c| (c.to_string(), false))
            .collect();
            QueryShape::Listing {
                columns: vec![
                    SelectCol::plain("team"),
                    SelectCol::plain("pick_year"),
                    SelectCol::plain("pick_round"),
                    SelectCol::plain("details"),
                ],
                order_by: order,
                limit: q.limit,
            }
        }
        PickAgg::Count => match q.group.key() {
            Some((key_column, key_alias)) => QueryShape::Grouped {
                key_column: key_column.into(),
                key_alias: key_alias.into(),
                agg: AggSelect::new(AggVerb::Count, "row_count", "value"),
                extras: vec![],
                limit: q.k,
            },
            None => QueryShape::Summary {
                aggs: vec![AggSelect::new(AggVerb::Count, "row_count", "value")],
                extras: vec![],
                arg_max: None,
            },
        },
    };

    AggQuery {
        dataset: Dataset::TeamPicks,
        from_path: ctx.store.path_for(Dataset::TeamPicks).to_string_lossy().into_owned(),
        filters,
        shape,
    }
}

pub fn run_team_picks_agg(ctx: &QueryCtx, args: &PicksArgs) -> PipelineResult<String> {
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

    const OKC: &str = "Oklahoma City Thunder Future NBA Draft Picks";
    const BOS: &str = "Boston Celtics Future NBA Draft Picks";

    fn write_fixture(dir: &std::path::Path) {
        let mut df = DataFrame::new(vec![
            Series::new("team".into(), vec![OKC, OKC, OKC, BOS, BOS]).into(),
            Series::new("pick_year".into(), vec![2026i64, 2026, 2027, 2026, 2028]).into(),
            Series::new(
                "pick_round".into(),
                vec!["First", "Second", "First", "First", "Second"],
            )
            .into(),
            Series::new(
                "details".into(),
                vec![
                    "Own; swap rights with HOU",
                    "Via MIA",
                    "Own",
                    "Own",
                    "Via MEM (protected)",
                ],
            )
            .into(),
        ])
        .unwrap();
        let f = File::create(dir.join("team_picks.parquet")).unwrap();
        ParquetWriter::new(f).finish(&mut df).unwrap();
    }

    fn make_ctx(dir: &std::path::Path) -> QueryCtx {
        QueryCtx::new(SnapshotStore::shared(dir), Arc::new(Manifest::default()))
    }

    #[test]
    fn default_counts_picks_per_team() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let q = validate_args(&ctx, &PicksArgs::default()).unwrap();
        assert_eq!(q.agg, PickAgg::Count);
        assert_eq!(q.group, PickGroup::Team);
        assert_eq!(q.scope, YearScope::Any);

        let built = build_query(&ctx, &q);
        assert_eq!(
            built.sql(),
            format!(
                "SELECT team AS team, COUNT(*) AS value FROM read_parquet('{}') \
                 WHERE TRUE GROUP BY team ORDER BY value DESC",
                built.from_path
            )
        );

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.cell(0, "team"), Some(&json!(OKC)));
        assert_eq!(rs.cell(0, "value"), Some(&json!(3)));
        assert_eq!(rs.cell(1, "value"), Some(&json!(2)));
    }

    #[test]
    fn abbreviated_team_expands_to_decorated_label() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PicksArgs {
            teams: Some(vec!["OKC".into()]),
            group_by: Some("none".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.teams, vec!["Oklahoma City Thunder".to_string(), OKC.to_string()]);

        let built = build_query(&ctx, &q);
        assert!(built.sql().contains("WHERE team IN (?,?)"));
        assert_eq!(
            built.params(),
            vec![
                ParamValue::Str("Oklahoma City Thunder".into()),
                ParamValue::Str(OKC.into()),
            ]
        );
        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "value"), Some(&json!(3)));
    }

    #[test]
    fn listing_applies_round_and_year_range() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PicksArgs {
            agg: Some("none".into()),
            pick_round: Some(json!(1)),
            start_year: Some(json!(2026)),
            end_year: Some(json!(2027)),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.round.as_deref(), Some("First"));

        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.contains("pick_year >= ? AND pick_year <= ? AND pick_round = ?"), "sql: {sql}");
        assert!(sql.ends_with("ORDER BY team, pick_year, pick_round"));
        assert_eq!(
            built.params(),
            vec![ParamValue::Int(2026), ParamValue::Int(2027), ParamValue::Str("First".into())]
        );

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.columns, vec!["team", "pick_year", "pick_round", "details"]);
        assert_eq!(rs.rows.len(), 3);
        assert_eq!(rs.cell(0, "team"), Some(&json!(BOS)));
        assert_eq!(rs.cell(1, "team"), Some(&json!(OKC)));
        assert_eq!(rs.cell(2, "pick_year"), Some(&json!(2027)));
    }

    #[test]
    fn details_substring_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let filters = json!({"details__like": "VIA", "pick_no": 7});
        let args = PicksArgs {
            agg: Some("none".into()),
            filters: Some(filters.as_object().unwrap().clone()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.details_like.as_deref(), Some("VIA"));

        let built = build_query(&ctx, &q);
        assert!(built.sql().contains("LOWER(details) LIKE ?"));
        assert_eq!(built.params(), vec![ParamValue::Str("%via%".into())]);

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.cell(0, "details"), Some(&json!("Via MEM (protected)")));
        assert_eq!(rs.cell(1, "details"), Some(&json!("Via MIA")));
    }

    #[test]
    fn season_label_contributes_its_start_year() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PicksArgs {
            season: Some("2026-27".into()),
            group_by: Some("year".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.scope, YearScope::Exact(2026));

        let built = build_query(&ctx, &q);
        let sql = built.sql();
        assert!(sql.contains("SELECT pick_year AS year, COUNT(*) AS value"), "sql: {sql}");
        assert!(sql.contains("WHERE pick_year = ? GROUP BY pick_year ORDER BY value DESC"));

        let rs = built.execute(&ctx.store).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.cell(0, "year"), Some(&json!(2026)));
        assert_eq!(rs.cell(0, "value"), Some(&json!(3)));
    }

    #[test]
    fn year_list_beats_other_year_arguments() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());
        let args = PicksArgs {
            years: Some(vec![json!(2028), json!("2026-27")]),
            year: Some(json!(2027)),
            pick_round: Some(json!("rd2")),
            group_by: Some("none".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.scope, YearScope::List(vec![2028, 2026]));
        assert_eq!(q.round.as_deref(), Some("Second"));

        let rs = build_query(&ctx, &q).execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "value"), Some(&json!(2)));
    }

    #[test]
    fn unknown_round_is_ignored_and_bad_enums_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let ctx = make_ctx(dir.path());

        let args = PicksArgs {
            pick_round: Some(json!("third")),
            group_by: Some("none".into()),
            ..Default::default()
        };
        let q = validate_args(&ctx, &args).unwrap();
        assert_eq!(q.round, None);
        let rs = build_query(&ctx, &q).execute(&ctx.store).unwrap();
        assert_eq!(rs.cell(0, "value"), Some(&json!(5)));

        let err = validate_args(
            &ctx,
            &PicksArgs { group_by: Some("conference".into()), ..Default::default() },
        )
        .unwrap_err();
        assert_eq!(err.kind_str(), "ValidationError");

        let err = validate_args(
            &ctx,
            &PicksArgs { agg: Some("sum".into()), ..Default::default() },
        )
        .unwrap_err();
        assert_eq!(err.kind_str(), "ValidationError");
    }
}
