//! Shared aggregation-query machinery for the five dataset builders.
//! A builder turns a validated argument record into an `AggQuery`: a typed
//! filter list plus a select shape. The query renders to a parameterized SQL
//! string (`sql()` plus `params()`), which is the loggable and testable
//! artifact, and executes against the snapshot frames through polars
//! expressions. Literal values only ever travel as parameters; the query text
//! carries `?` placeholders and schema-validated identifiers, nothing else.

pub mod capsheets;
pub mod contracts;
pub mod picks;
pub mod player_stats;
pub mod team_stats;

use std::sync::Arc;

use polars::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::manifest::{Dataset, Manifest};
use crate::resolve::AliasIndex;
use crate::snapshot::{SharedSnapshots, SnapshotStore};

/// Everything a builder needs at run time, constructed once at startup.
pub struct QueryCtx {
    pub store: SharedSnapshots,
    pub manifest: Arc<Manifest>,
    pub aliases: AliasIndex,
}

impl QueryCtx {
    pub fn new(store: SharedSnapshots, manifest: Arc<Manifest>) -> QueryCtx {
        let aliases = AliasIndex::from_manifest(&manifest);
        QueryCtx { store, manifest, aliases }
    }
}

/// Aggregation verbs accepted on the wire: max|min|sum|avg|count|median|pNN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggVerb {
    Max,
    Min,
    Sum,
    Avg,
    Count,
    Median,
    /// Percentile 1..=99; `fraction()` yields the quantile in (0,1).
    Percentile(u8),
}

impl AggVerb {
    pub fn parse(raw: &str) -> PipelineResult<AggVerb> {
        let v = raw.trim().to_lowercase();
        match v.as_str() {
            "max" => return Ok(AggVerb::Max),
            "min" => return Ok(AggVerb::Min),
            "sum" => return Ok(AggVerb::Sum),
            "avg" => return Ok(AggVerb::Avg),
            "count" => return Ok(AggVerb::Count),
            "median" => return Ok(AggVerb::Median),
            _ => {}
        }
        if let Some(rest) = v.strip_prefix('p') {
            if let Ok(n) = rest.parse::<u8>() {
                if (1..=99).contains(&n) {
                    return Ok(AggVerb::Percentile(n));
                }
            }
        }
        Err(PipelineError::validation(format!(
            "agg must be one of max|min|sum|avg|count|median|pNN (N in 1-99), got '{raw}'"
        )))
    }

    pub fn fraction(&self) -> Option<f64> {
        match self {
            AggVerb::Percentile(n) => Some(*n as f64 / 100.0),
            _ => None,
        }
    }

    /// SQL spelling of the aggregate over a column. Count ignores the column.
    pub fn sql_expr(&self, column: &str) -> String {
        match self {
            AggVerb::Max => format!("MAX({column})"),
            AggVerb::Min => format!("MIN({column})"),
            AggVerb::Sum => format!("SUM({column})"),
            AggVerb::Avg => format!("AVG({column})"),
            AggVerb::Count => "COUNT(*)".to_string(),
            AggVerb::Median => format!("median({column})"),
            AggVerb::Percentile(n) => format!("quantile({column}, {})", *n as f64 / 100.0),
        }
    }

    fn expr(&self, column: &str) -> Expr {
        let base = col(column);
        match self {
            AggVerb::Max => base.max(),
            AggVerb::Min => base.min(),
            AggVerb::Sum => base.sum(),
            AggVerb::Avg => base.mean(),
            // len() counts rows in the current context regardless of nulls
            AggVerb::Count => len().cast(DataType::Int64),
            AggVerb::Median => base.median(),
            AggVerb::Percentile(n) => base.quantile(lit(*n as f64 / 100.0), QuantileMethod::Nearest),
        }
    }
}

/// A literal bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Scalar JSON → parameter; null and composite values yield None.
    pub fn from_json(v: &Value) -> Option<ParamValue> {
        match v {
            Value::String(s) => Some(ParamValue::Str(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ParamValue::Int(i))
                } else {
                    n.as_f64().map(ParamValue::Float)
                }
            }
            Value::Bool(b) => Some(ParamValue::Bool(*b)),
            _ => None,
        }
    }

    fn to_lit(&self) -> Expr {
        match self {
            ParamValue::Str(s) => lit(s.clone()),
            ParamValue::Int(i) => lit(*i),
            ParamValue::Float(f) => lit(*f),
            ParamValue::Bool(b) => lit(*b),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, ParamValue::Int(_) | ParamValue::Float(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompOp {
    pub fn from_suffix(s: &str) -> Option<CompOp> {
        match s {
            "gte" => Some(CompOp::Ge),
            "lte" => Some(CompOp::Le),
            "gt" => Some(CompOp::Gt),
            "lt" => Some(CompOp::Lt),
            "eq" => Some(CompOp::Eq),
            "ne" => Some(CompOp::Ne),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            CompOp::Eq => "=",
            CompOp::Ne => "!=",
            CompOp::Gt => ">",
            CompOp::Ge => ">=",
            CompOp::Lt => "<",
            CompOp::Le => "<=",
        }
    }
}

/// One WHERE clause. Renders a text fragment with placeholders and compiles
/// to a polars mask; both sides are produced from the same structure so the
/// text and the parameter list cannot diverge.
#[derive(Debug, Clone)]
pub enum FilterClause {
    In { column: String, values: Vec<ParamValue> },
    Cmp { column: String, op: CompOp, value: ParamValue },
    /// Case-insensitive substring match: LOWER(column) LIKE '%needle%'.
    Contains { column: String, needle: String },
}

impl FilterClause {
    fn sql(&self) -> String {
        match self {
            FilterClause::In { column, values } => {
                let placeholders = vec!["?"; values.len()].join(",");
                format!("{column} IN ({placeholders})")
            }
            FilterClause::Cmp { column, op, .. } => format!("{column} {} ?", op.sql()),
            FilterClause::Contains { column, .. } => format!("LOWER({column}) LIKE ?"),
        }
    }

    fn push_params(&self, out: &mut Vec<ParamValue>) {
        match self {
            FilterClause::In { values, .. } => out.extend(values.iter().cloned()),
            FilterClause::Cmp { value, .. } => out.push(value.clone()),
            FilterClause::Contains { needle, .. } => {
                out.push(ParamValue::Str(format!("%{}%", needle.to_lowercase())));
            }
        }
    }

    fn expr(&self) -> Expr {
        match self {
            FilterClause::In { column, values } => {
                let mut it = values.iter();
                match it.next() {
                    None => lit(false),
                    Some(first) => it.fold(cmp_expr(column, CompOp::Eq, first), |acc, v| {
                        acc.or(cmp_expr(column, CompOp::Eq, v))
                    }),
                }
            }
            FilterClause::Cmp { column, op, value } => cmp_expr(column, *op, value),
            FilterClause::Contains { column, needle } => {
                let needle = needle.to_lowercase();
                col(column.as_str()).cast(DataType::String).map(
                    move |c: Column| {
                        let s = c.as_materialized_series();
                        let ca = s.str()?;
                        let vals: Vec<Option<bool>> = ca
                            .into_iter()
                            .map(|opt| opt.map(|v| v.to_lowercase().contains(needle.as_str())))
                            .collect();
                        let s = Series::new("_contains_pred".into(), vals);
                        Ok(s.into_column())
                    },
                    |_schema, _field| Ok(Field::new("_contains_pred".into(), DataType::Boolean)),
                )
            }
        }
    }
}

fn cmp_expr(column: &str, op: CompOp, value: &ParamValue) -> Expr {
    let l = col(column);
    let r = value.to_lit();
    match op {
        // Ordered comparisons coerce both sides to Float64, tolerating
        // numeric strings against numbers the way the store would.
        CompOp::Gt => l.cast(DataType::Float64).gt(r.cast(DataType::Float64)),
        CompOp::Ge => l.cast(DataType::Float64).gt_eq(r.cast(DataType::Float64)),
        CompOp::Lt => l.cast(DataType::Float64).lt(r.cast(DataType::Float64)),
        CompOp::Le => l.cast(DataType::Float64).lt_eq(r.cast(DataType::Float64)),
        CompOp::Eq => {
            if value.is_numeric() {
                l.cast(DataType::Float64).eq(r.cast(DataType::Float64))
            } else {
                l.cast(DataType::String).eq(r.cast(DataType::String))
            }
        }
        CompOp::Ne => {
            if value.is_numeric() {
                l.cast(DataType::Float64).neq(r.cast(DataType::Float64))
            } else {
                l.cast(DataType::String).neq(r.cast(DataType::String))
            }
        }
    }
}

/// One aggregate projection with its output alias.
#[derive(Debug, Clone)]
pub struct AggSelect {
    pub verb: AggVerb,
    pub column: String,
    pub alias: String,
}

impl AggSelect {
    pub fn new<S: Into<String>, A: Into<String>>(verb: AggVerb, column: S, alias: A) -> AggSelect {
        AggSelect { verb, column: column.into(), alias: alias.into() }
    }

    fn sql(&self) -> String {
        format!("{} AS {}", self.verb.sql_expr(&self.column), self.alias)
    }

    fn expr(&self) -> Expr {
        self.verb.expr(&self.column).alias(self.alias.as_str())
    }
}

/// Representative columns carried alongside aggregates.
#[derive(Debug, Clone)]
pub enum ExtraSelect {
    /// first(column) AS alias
    First { column: String, alias: String },
    /// SUM(column) AS alias, companion totals such as games_played
    SumAs { column: String, alias: String },
    /// '<value>' AS alias literal tag
    Tag { value: String, alias: String },
}

impl ExtraSelect {
    pub fn first<S: Into<String>, A: Into<String>>(column: S, alias: A) -> ExtraSelect {
        ExtraSelect::First { column: column.into(), alias: alias.into() }
    }

    pub fn sum_as<S: Into<String>, A: Into<String>>(column: S, alias: A) -> ExtraSelect {
        ExtraSelect::SumAs { column: column.into(), alias: alias.into() }
    }

    pub fn tag<S: Into<String>, A: Into<String>>(value: S, alias: A) -> ExtraSelect {
        ExtraSelect::Tag { value: value.into(), alias: alias.into() }
    }

    fn sql(&self) -> String {
        match self {
            ExtraSelect::First { column, alias } => format!("first({column}) AS {alias}"),
            ExtraSelect::SumAs { column, alias } => format!("SUM({column}) AS {alias}"),
            ExtraSelect::Tag { value, alias } => format!("'{value}' AS {alias}"),
        }
    }

    fn expr(&self) -> Expr {
        match self {
            ExtraSelect::First { column, alias } => col(column.as_str()).first().alias(alias.as_str()),
            ExtraSelect::SumAs { column, alias } => col(column.as_str()).sum().alias(alias.as_str()),
            ExtraSelect::Tag { value, alias } => lit(value.clone()).alias(alias.as_str()),
        }
    }

    fn alias(&self) -> &str {
        match self {
            ExtraSelect::First { alias, .. }
            | ExtraSelect::SumAs { alias, .. }
            | ExtraSelect::Tag { alias, .. } => alias.as_str(),
        }
    }
}

/// Label column of the row holding the maximum of a value column, rendered
/// as a correlated sub-select over the whole snapshot.
#[derive(Debug, Clone)]
pub struct ArgMaxSelect {
    pub value_column: String,
    pub label_column: String,
    pub alias: String,
}

/// One projected column in a raw listing, optionally re-aliased.
#[derive(Debug, Clone)]
pub struct SelectCol {
    pub column: String,
    pub alias: Option<String>,
}

impl SelectCol {
    pub fn plain<S: Into<String>>(column: S) -> SelectCol {
        SelectCol { column: column.into(), alias: None }
    }

    pub fn named<S: Into<String>, A: Into<String>>(column: S, alias: A) -> SelectCol {
        SelectCol { column: column.into(), alias: Some(alias.into()) }
    }

    fn sql(&self) -> String {
        match &self.alias {
            Some(a) => format!("{} AS {}", self.column, a),
            None => self.column.clone(),
        }
    }

    fn out_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.column.as_str())
    }
}

/// The select shape of an aggregation query.
#[derive(Debug, Clone)]
pub enum QueryShape {
    /// Single summary row: aggregates, then extras, then an optional arg-max
    /// label appended last.
    Summary {
        aggs: Vec<AggSelect>,
        extras: Vec<ExtraSelect>,
        arg_max: Option<ArgMaxSelect>,
    },
    /// One row per group value, ordered by the aggregate descending.
    Grouped {
        key_column: String,
        key_alias: String,
        agg: AggSelect,
        extras: Vec<ExtraSelect>,
        limit: Option<usize>,
    },
    /// One sub-query per metric, each tagged with a literal metric column and
    /// capped to its own ordered top-k partition, stacked in metric order.
    GroupedUnion {
        key_column: String,
        key_alias: String,
        verb: AggVerb,
        metrics: Vec<String>,
        extras: Vec<ExtraSelect>,
        limit: Option<usize>,
    },
    /// Raw matching rows with a fixed projection and ordering.
    Listing {
        columns: Vec<SelectCol>,
        order_by: Vec<(String, bool)>,
        limit: Option<usize>,
    },
}

/// A fully-built, executable aggregation query for one dataset.
#[derive(Debug, Clone)]
pub struct AggQuery {
    pub dataset: Dataset,
    pub from_path: String,
    pub filters: Vec<FilterClause>,
    pub shape: QueryShape,
}

impl AggQuery {
    fn where_sql(&self) -> String {
        if self.filters.is_empty() {
            "TRUE".to_string()
        } else {
            self.filters.iter().map(|c| c.sql()).collect::<Vec<_>>().join(" AND ")
        }
    }

    fn filter_params(&self, out: &mut Vec<ParamValue>) {
        for c in &self.filters {
            c.push_params(out);
        }
    }

    /// The parameterized query text. Placeholder order matches `params()`.
    pub fn sql(&self) -> String {
        let from = format!("read_parquet('{}')", self.from_path);
        let where_sql = self.where_sql();
        match &self.shape {
            QueryShape::Summary { aggs, extras, arg_max } => {
                let mut items: Vec<String> = aggs.iter().map(|a| a.sql()).collect();
                items.extend(extras.iter().map(|e| e.sql()));
                if let Some(am) = arg_max {
                    items.push(format!(
                        "(SELECT {} FROM {from} ORDER BY {} DESC LIMIT 1) AS {}",
                        am.label_column, am.value_column, am.alias
                    ));
                }
                format!("SELECT {} FROM {from} WHERE {where_sql}", items.join(", "))
            }
            QueryShape::Grouped { key_column, key_alias, agg, extras, limit } => {
                let mut items = vec![format!("{key_column} AS {key_alias}"), agg.sql()];
                items.extend(extras.iter().map(|e| e.sql()));
                let mut sql = format!(
                    "SELECT {} FROM {from} WHERE {where_sql} GROUP BY {key_column} ORDER BY {} DESC",
                    items.join(", "),
                    agg.alias
                );
                if let Some(k) = limit {
                    sql.push_str(&format!(" LIMIT {k}"));
                }
                sql
            }
            QueryShape::GroupedUnion { key_column, key_alias, verb, metrics, extras, limit } => {
                let subs: Vec<String> = metrics
                    .iter()
                    .map(|m| {
                        let mut items = vec![
                            format!("{key_column} AS {key_alias}"),
                            format!("{} AS value", verb.sql_expr(m)),
                            format!("'{m}' AS metric"),
                        ];
                        items.extend(extras.iter().map(|e| e.sql()));
                        let mut sub = format!(
                            "SELECT {} FROM {from} WHERE {where_sql} GROUP BY {key_column} ORDER BY value DESC",
                            items.join(", ")
                        );
                        if let Some(k) = limit {
                            sub.push_str(&format!(" LIMIT {k}"));
                        }
                        format!("({sub})")
                    })
                    .collect();
                subs.join(" UNION ALL ")
            }
            QueryShape::Listing { columns, order_by, limit } => {
                let items: Vec<String> = columns.iter().map(|c| c.sql()).collect();
                let mut sql = format!("SELECT {} FROM {from} WHERE {where_sql}", items.join(", "));
                if !order_by.is_empty() {
                    let parts: Vec<String> = order_by
                        .iter()
                        .map(|(c, desc)| if *desc { format!("{c} DESC") } else { c.clone() })
                        .collect();
                    sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
                }
                if let Some(n) = limit {
                    sql.push_str(&format!(" LIMIT {n}"));
                }
                sql
            }
        }
    }

    /// Positional parameters in placeholder order. Union shapes repeat the
    /// filter parameters once per metric sub-query.
    pub fn params(&self) -> Vec<ParamValue> {
        let mut out = Vec::new();
        match &self.shape {
            QueryShape::GroupedUnion { metrics, .. } => {
                for _ in metrics {
                    self.filter_params(&mut out);
                }
            }
            _ => self.filter_params(&mut out),
        }
        out
    }

    pub fn execute(&self, store: &SnapshotStore) -> PipelineResult<ResultSet> {
        run_query(store, self)
    }
}

/// Ordered rows extracted from a result frame. Column order is explicit so
/// it survives serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row as a (column, value) view for assertions and callers that want
    /// mapping semantics.
    pub fn row_map(&self, idx: usize) -> Vec<(&str, &Value)> {
        self.columns.iter().map(|c| c.as_str()).zip(self.rows[idx].iter()).collect()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(i)
    }
}

/// Execute a built query against the snapshot store.
pub fn run_query(store: &SnapshotStore, q: &AggQuery) -> PipelineResult<ResultSet> {
    debug!(
        target: "courtside::query",
        "{}: sql={} params={:?}",
        q.dataset,
        q.sql(),
        q.params()
    );
    let df = store.frame(q.dataset)?;
    let mask = combined_mask(&q.filters);
    let filtered = || -> LazyFrame {
        match &mask {
            Some(e) => df.clone().lazy().filter(e.clone()),
            None => df.clone().lazy(),
        }
    };

    let out = match &q.shape {
        QueryShape::Summary { aggs, extras, arg_max } => {
            // Emptiness is decided on the filtered frame: aggregating zero
            // rows yields one all-null row, and the renderer needs zero rows
            // to emit the dataset's empty marker instead.
            let base = filtered().collect()?;
            if base.height() == 0 {
                let mut columns: Vec<String> = aggs.iter().map(|a| a.alias.clone()).collect();
                columns.extend(extras.iter().map(|e| e.alias().to_string()));
                if let Some(am) = arg_max {
                    columns.push(am.alias.clone());
                }
                return Ok(ResultSet { columns, rows: Vec::new() });
            }
            let mut exprs: Vec<Expr> = aggs.iter().map(|a| a.expr()).collect();
            exprs.extend(extras.iter().map(|e| e.expr()));
            let mut summary = base.lazy().select(exprs).collect()?;
            if let Some(am) = arg_max {
                let label = top_label(&df, &am.value_column, &am.label_column)?;
                summary.with_column(Series::new(am.alias.as_str().into(), vec![label]))?;
            }
            summary
        }
        QueryShape::Grouped { key_column, key_alias, agg, extras, limit } => {
            let mut agg_exprs = vec![agg.expr()];
            agg_exprs.extend(extras.iter().map(|e| e.expr()));
            let mut select: Vec<Expr> = vec![col(key_column.as_str()).alias(key_alias.as_str()), col(agg.alias.as_str())];
            select.extend(extras.iter().map(|e| col(e.alias())));
            let grouped = filtered()
                .group_by([col(key_column.as_str())])
                .agg(agg_exprs)
                .select(select)
                .sort_by_exprs(vec![col(agg.alias.as_str())], sort_opts(vec![true]))
                .collect()?;
            apply_limit(grouped, *limit)
        }
        QueryShape::GroupedUnion { key_column, key_alias, verb, metrics, extras, limit } => {
            let value_type = if matches!(verb, AggVerb::Count) { DataType::Int64 } else { DataType::Float64 };
            let mut acc: Option<DataFrame> = None;
            for m in metrics {
                // Uniform value dtype across sub-frames so the stack aligns
                let value_expr = verb.expr(m).cast(value_type.clone()).alias("value");
                let mut agg_exprs = vec![value_expr];
                agg_exprs.extend(extras.iter().map(|e| e.expr()));
                let mut select: Vec<Expr> = vec![
                    col(key_column.as_str()).alias(key_alias.as_str()),
                    col("value"),
                    lit(m.clone()).alias("metric"),
                ];
                select.extend(extras.iter().map(|e| col(e.alias())));
                let sub = filtered()
                    .group_by([col(key_column.as_str())])
                    .agg(agg_exprs)
                    .select(select)
                    .sort_by_exprs(vec![col("value")], sort_opts(vec![true]))
                    .collect()?;
                let sub = apply_limit(sub, *limit);
                acc = Some(match acc {
                    None => sub,
                    Some(mut a) => {
                        a.vstack_mut(&sub)?;
                        a
                    }
                });
            }
            match acc {
                Some(df) => df,
                None => return Err(PipelineError::validation("union requires at least one metric")),
            }
        }
        QueryShape::Listing { columns, order_by, limit } => {
            let select: Vec<Expr> = columns
                .iter()
                .map(|c| match &c.alias {
                    Some(a) => col(c.column.as_str()).alias(a.as_str()),
                    None => col(c.column.as_str()),
                })
                .collect();
            let mut lf = filtered().select(select);
            if !order_by.is_empty() {
                let exprs: Vec<Expr> = order_by.iter().map(|(c, _)| col(c.as_str())).collect();
                let descending: Vec<bool> = order_by.iter().map(|(_, d)| *d).collect();
                lf = lf.sort_by_exprs(exprs, sort_opts(descending));
            }
            apply_limit(lf.collect()?, *limit)
        }
    };

    Ok(dataframe_to_rows(&out))
}

fn combined_mask(filters: &[FilterClause]) -> Option<Expr> {
    let mut it = filters.iter();
    let first = it.next()?.expr();
    Some(it.fold(first, |acc, c| acc.and(c.expr())))
}

fn sort_opts(descending: Vec<bool>) -> SortMultipleOptions {
    let n = descending.len();
    SortMultipleOptions {
        descending,
        nulls_last: vec![true; n],
        maintain_order: true,
        multithreaded: true,
        limit: None,
    }
}

fn apply_limit(df: DataFrame, limit: Option<usize>) -> DataFrame {
    match limit {
        Some(n) if n < df.height() => df.slice(0, n),
        _ => df,
    }
}

/// Label value of the row holding the maximum of `value_column`, over the
/// whole snapshot (the arg-max sub-select is deliberately unfiltered).
fn top_label(df: &DataFrame, value_column: &str, label_column: &str) -> PipelineResult<Option<String>> {
    let sorted = df
        .clone()
        .lazy()
        .sort_by_exprs(vec![col(value_column)], sort_opts(vec![true]))
        .collect()?;
    if sorted.height() == 0 {
        return Ok(None);
    }
    let av = sorted.column(label_column)?.get(0)?;
    Ok(match av {
        AnyValue::String(s) => Some(s.to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        AnyValue::Null => None,
        other => Some(other.to_string()),
    })
}

/// Convert a result frame into ordered rows of JSON scalars.
pub fn dataframe_to_rows(df: &DataFrame) -> ResultSet {
    let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut row = Vec::with_capacity(columns.len());
        for c in df.get_column_names() {
            let cell = match df.column(c) {
                Ok(s) => match s.get(row_idx) {
                    Ok(AnyValue::Int64(v)) => serde_json::json!(v),
                    Ok(AnyValue::Int32(v)) => serde_json::json!(v as i64),
                    Ok(AnyValue::Int16(v)) => serde_json::json!(v as i64),
                    Ok(AnyValue::Int8(v)) => serde_json::json!(v as i64),
                    Ok(AnyValue::UInt64(v)) => serde_json::json!(v),
                    Ok(AnyValue::UInt32(v)) => serde_json::json!(v as i64),
                    Ok(AnyValue::Float64(v)) => float_cell(v),
                    Ok(AnyValue::Float32(v)) => float_cell(v as f64),
                    Ok(AnyValue::Boolean(v)) => serde_json::json!(v),
                    Ok(AnyValue::String(v)) => serde_json::json!(v),
                    Ok(AnyValue::StringOwned(v)) => serde_json::json!(v.as_str()),
                    Ok(AnyValue::Null) => Value::Null,
                    _ => Value::Null,
                },
                Err(_) => Value::Null,
            };
            row.push(cell);
        }
        rows.push(row);
    }
    ResultSet { columns, rows }
}

fn float_cell(v: f64) -> Value {
    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Parse a raw filter map into clauses. Bare keys are equality; keys with a
/// recognized `__op` suffix become that comparison; unknown suffixes are
/// dropped with a warning; null values skip the pair entirely. Filter columns
/// must exist in the live schema.
pub fn parse_filter_map(
    filters: &serde_json::Map<String, Value>,
    schema: &[String],
    dataset: Dataset,
) -> PipelineResult<Vec<FilterClause>> {
    let mut out = Vec::new();
    for (key, raw) in filters {
        if raw.is_null() {
            continue;
        }
        let (column, op) = match key.split_once("__") {
            Some((c, suffix)) => match CompOp::from_suffix(suffix) {
                Some(op) => (c, op),
                None => {
                    warn!(
                        target: "courtside::query",
                        "ignoring filter '{key}' with unrecognized suffix for {dataset}"
                    );
                    continue;
                }
            },
            None => (key.as_str(), CompOp::Eq),
        };
        if !schema.iter().any(|c| c == column) {
            return Err(PipelineError::validation(format!(
                "unknown filter column '{column}' for {dataset}"
            )));
        }
        let value = ParamValue::from_json(raw).ok_or_else(|| {
            PipelineError::validation(format!("filter '{key}' must carry a scalar value"))
        })?;
        out.push(FilterClause::Cmp { column: column.to_string(), op, value });
    }
    Ok(out)
}

/// Merge the singular and plural metric arguments, de-duplicating while
/// preserving order. The plural form wins when both are present.
pub fn coalesce_metrics(metric: Option<&str>, metrics: Option<&[String]>) -> Vec<String> {
    if let Some(list) = metrics {
        if !list.is_empty() {
            let mut seen = std::collections::HashSet::new();
            return list.iter().filter(|m| seen.insert(m.as_str().to_string())).cloned().collect();
        }
    }
    metric.map(|m| vec![m.to_string()]).unwrap_or_default()
}

/// Season-keyed column nearest to the target year. Candidates share a name
/// prefix ("salary_", "cap_") followed by the start year. Equidistant
/// candidates prefer the earlier year.
pub fn nearest_season_column(cols: &[String], prefix: &str, target_year: i32) -> Option<String> {
    let mut ranked: Vec<(i32, i32, &String)> = Vec::new();
    for c in cols.iter().filter(|c| c.starts_with(prefix)) {
        let tail = &c[prefix.len()..];
        if let Some(year) = tail.split('_').next().and_then(|t| t.parse::<i32>().ok()) {
            ranked.push(((year - target_year).abs(), year, c));
        }
    }
    ranked.sort();
    ranked.first().map(|(_, _, c)| (*c).clone())
}

/// Lexicographically latest season-keyed column; the zero-padded year suffix
/// makes that the chronologically latest as well.
pub fn latest_season_column(cols: &[String], prefix: &str) -> Option<String> {
    cols.iter().filter(|c| c.starts_with(prefix)).max().cloned()
}

/// Accept a group_by given as a string or a single-element list; router
/// payloads sometimes wrap it.
pub fn de_group_by<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSeq {
        One(String),
        Many(Vec<String>),
    }
    let v: Option<StringOrSeq> = Option::deserialize(d)?;
    Ok(v.and_then(|x| match x {
        StringOrSeq::One(s) => Some(s),
        StringOrSeq::Many(v) => v.into_iter().next(),
    }))
}
