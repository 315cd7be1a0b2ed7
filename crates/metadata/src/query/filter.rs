//! Tracking-API filter compiler.
//!
//! Grammar: `cond (AND cond)*` with `cond := [entity.]key OP value`.
//! Attribute conditions become predicates on `runs` columns; metric, param
//! and tag conditions each materialize an inner-joined `filter_n` subquery
//! over the matching side table. Order-by terms over side tables join a
//! `order_n` subquery the same way.

use crate::error::{MetadataError, MetadataResult};
use crate::models::LifecycleStage;
use crate::query::select::{Bind, Dialect, Fragment, Select};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static FILTER_AND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+AND\s+").unwrap());
static FILTER_COND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:(\w+)\.)?("[^"]+"|`[^`]+`|[\w.]+)\s+(<|<=|>|>=|=|!=|(?i:I?LIKE)|(?i:(?:NOT )?IN))\s+(\((?:'[^']+'(?:,\s*)?)+\)|"[^"]+"|'[^']+'|[\w.]+)$"#,
    )
    .unwrap()
});
static FILTER_IN_GROUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*").unwrap());
static RUN_ORDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(attribute|metric|param|tag)s?\.("[^"]+"|`[^`]+`|[\w.]+)(?i:\s+(ASC|DESC))?$"#)
        .unwrap()
});

/// Rendered value expression for the three-column params table. SQLite 3.44+
/// and PostgreSQL both treat CONCAT arguments as empty when NULL.
const PARAM_VALUE_EXPR: &str = "CONCAT(value_int, value_float, value_str)";

/// Which lifecycle stages a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewType {
    #[default]
    ActiveOnly,
    DeletedOnly,
    All,
}

impl ViewType {
    /// Parse the wire value ("ACTIVE_ONLY", "DELETED_ONLY", "ALL"; empty
    /// defaults to active).
    pub fn parse(s: &str) -> MetadataResult<Self> {
        match s {
            "" | "ACTIVE_ONLY" => Ok(Self::ActiveOnly),
            "DELETED_ONLY" => Ok(Self::DeletedOnly),
            "ALL" => Ok(Self::All),
            other => Err(MetadataError::InvalidQuery(format!(
                "invalid run_view_type '{other}'"
            ))),
        }
    }

    fn stages(&self) -> &'static [LifecycleStage] {
        match self {
            Self::ActiveOnly => &[LifecycleStage::Active],
            Self::DeletedOnly => &[LifecycleStage::Deleted],
            Self::All => &[LifecycleStage::Active, LifecycleStage::Deleted],
        }
    }
}

/// Parsed inputs of a runs/search request.
#[derive(Debug, Clone, Default)]
pub struct RunSearchParams {
    pub experiment_ids: Vec<i32>,
    pub filter: String,
    pub view_type: ViewType,
    pub max_results: i64,
    pub order_by: Vec<String>,
    pub page_token: Option<String>,
}

/// A compiled runs/search statement plus its paging window.
#[derive(Debug, Clone)]
pub struct CompiledRunSearch {
    pub select: Select,
    pub limit: i64,
    pub offset: i64,
}

/// Opaque page token: base64-encoded JSON `{"Offset": n}`.
#[derive(Debug, Serialize, Deserialize)]
struct PageToken {
    #[serde(rename = "Offset")]
    offset: i64,
}

/// Decode a page token into a row offset.
pub fn decode_page_token(token: &str) -> MetadataResult<i64> {
    let invalid =
        |e: &dyn std::fmt::Display| MetadataError::InvalidQuery(format!("invalid page_token '{token}': {e}"));
    let raw = BASE64.decode(token).map_err(|e| invalid(&e))?;
    let parsed: PageToken = serde_json::from_slice(&raw).map_err(|e| invalid(&e))?;
    Ok(parsed.offset)
}

/// Encode a row offset into a page token.
pub fn encode_page_token(offset: i64) -> String {
    BASE64.encode(serde_json::to_vec(&PageToken { offset }).expect("page token serializes"))
}

/// Normalize max_results: 0 defaults, oversized values are rejected.
pub fn normalize_max_results(max_results: i64) -> MetadataResult<i64> {
    if max_results == 0 {
        return Ok(tracklab_core::DEFAULT_SEARCH_MAX_RESULTS);
    }
    if max_results < 0 || max_results > tracklab_core::SEARCH_MAX_RESULTS_LIMIT {
        return Err(MetadataError::InvalidQuery(
            "Invalid value for parameter 'max_results' supplied.".to_string(),
        ));
    }
    Ok(max_results)
}

/// Compile a runs/search request into one SELECT over `runs`.
pub fn compile_run_search(
    params: &RunSearchParams,
    dialect: Dialect,
) -> MetadataResult<CompiledRunSearch> {
    let mut select = Select::new("runs");
    select.column("runs.*");

    if !params.experiment_ids.is_empty() {
        let placeholders = vec!["?"; params.experiment_ids.len()].join(", ");
        select.filter(Fragment::with_binds(
            format!("runs.experiment_id IN ({placeholders})"),
            params
                .experiment_ids
                .iter()
                .map(|id| Bind::Int(i64::from(*id)))
                .collect(),
        ));
    }

    let stages = params.view_type.stages();
    let placeholders = vec!["?"; stages.len()].join(", ");
    select.filter(Fragment::with_binds(
        format!("runs.lifecycle_stage IN ({placeholders})"),
        stages.iter().map(|s| Bind::from(s.as_str())).collect(),
    ));

    if !params.filter.is_empty() {
        for (n, cond) in FILTER_AND.split(&params.filter).enumerate() {
            apply_condition(&mut select, n, cond, dialect)?;
        }
    }

    apply_order_by(&mut select, &params.order_by)?;

    let limit = normalize_max_results(params.max_results)?;
    let offset = match &params.page_token {
        Some(token) if !token.is_empty() => decode_page_token(token)?,
        _ => 0,
    };
    select.limit(limit);
    if offset > 0 {
        select.offset(offset);
    }

    Ok(CompiledRunSearch {
        select,
        limit,
        offset,
    })
}

/// The side table a non-attribute condition joins against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideTable {
    LatestMetrics,
    Params,
    Tags,
}

impl SideTable {
    fn table(&self) -> &'static str {
        match self {
            Self::LatestMetrics => "latest_metrics",
            Self::Params => "params",
            Self::Tags => "tags",
        }
    }

    fn value_expr(&self) -> &'static str {
        match self {
            Self::Params => PARAM_VALUE_EXPR,
            _ => "value",
        }
    }
}

fn apply_condition(
    select: &mut Select,
    n: usize,
    cond: &str,
    dialect: Dialect,
) -> MetadataResult<()> {
    let caps = FILTER_COND
        .captures(cond)
        .ok_or_else(|| MetadataError::InvalidQuery(format!("malformed filter '{cond}'")))?;

    let entity = caps.get(1).map_or("", |m| m.as_str());
    let mut key = caps[2].trim_matches(|c| c == '"' || c == '`').to_string();
    let comparison = caps[3].to_string();
    let raw_value = caps[4].to_string();

    let mut side: Option<SideTable> = None;
    let mut value: Bind;

    match entity {
        "" | "attribute" | "attributes" | "attr" | "run" => {
            match key.as_str() {
                "start_time" | "end_time" => {
                    match comparison.as_str() {
                        ">" | ">=" | "!=" | "=" | "<" | "<=" => {
                            let v: i64 = raw_value.parse().map_err(|_| {
                                MetadataError::InvalidQuery(format!(
                                    "invalid numeric value '{raw_value}'"
                                ))
                            })?;
                            value = Bind::Int(v);
                        }
                        _ => {
                            return Err(MetadataError::InvalidQuery(format!(
                                "invalid numeric attribute comparison operator '{comparison}'"
                            )));
                        }
                    }
                }
                "run_name" | "status" | "user_id" | "artifact_uri" => {
                    match comparison.to_uppercase().as_str() {
                        "!=" | "=" | "LIKE" | "ILIKE" => {
                            if raw_value.starts_with('(') {
                                return Err(MetadataError::InvalidQuery(format!(
                                    "invalid string value '{raw_value}'"
                                )));
                            }
                            value = Bind::from(raw_value.trim_matches(|c| c == '"' || c == '\''));
                        }
                        _ => {
                            return Err(MetadataError::InvalidQuery(format!(
                                "invalid string attribute comparison operator '{comparison}'"
                            )));
                        }
                    }
                    if key == "run_name" {
                        // run_name lives in the reserved display-name tag
                        key = tracklab_core::TAG_RUN_NAME.to_string();
                        side = Some(SideTable::Tags);
                    }
                }
                "run_id" => {
                    key = "run_uuid".to_string();
                    match comparison.to_uppercase().as_str() {
                        "!=" | "=" | "LIKE" | "ILIKE" => {
                            if raw_value.starts_with('(') {
                                return Err(MetadataError::InvalidQuery(format!(
                                    "invalid string value '{raw_value}'"
                                )));
                            }
                            value = Bind::from(raw_value.trim_matches(|c| c == '"' || c == '\''));
                        }
                        "IN" | "NOT IN" => {
                            if !raw_value.starts_with('(') {
                                return Err(MetadataError::InvalidQuery(format!(
                                    "invalid list definition '{raw_value}'"
                                )));
                            }
                            let inner = &raw_value[1..raw_value.len() - 1];
                            let values: Vec<Bind> = FILTER_IN_GROUP
                                .split(inner)
                                .map(|v| Bind::from(v.trim_matches('\'')))
                                .collect();
                            let placeholders = vec!["?"; values.len()].join(", ");
                            select.filter(Fragment::with_binds(
                                format!(
                                    "runs.run_uuid {} ({placeholders})",
                                    comparison.to_uppercase()
                                ),
                                values,
                            ));
                            return Ok(());
                        }
                        _ => {
                            return Err(MetadataError::InvalidQuery(format!(
                                "invalid string attribute comparison operator '{comparison}'"
                            )));
                        }
                    }
                }
                _ => {
                    return Err(MetadataError::InvalidQuery(format!(
                        "invalid attribute '{key}'. Valid values are ['run_name', 'start_time', \
                         'end_time', 'status', 'user_id', 'artifact_uri', 'run_id']"
                    )));
                }
            }
        }
        "metric" | "metrics" => {
            match comparison.as_str() {
                ">" | ">=" | "!=" | "=" | "<" | "<=" => {
                    let v: f64 = raw_value.parse().map_err(|_| {
                        MetadataError::InvalidQuery(format!("invalid numeric value '{raw_value}'"))
                    })?;
                    value = Bind::Float(v);
                }
                _ => {
                    return Err(MetadataError::InvalidQuery(format!(
                        "invalid metric comparison operator '{comparison}'"
                    )));
                }
            }
            side = Some(SideTable::LatestMetrics);
        }
        "parameter" | "parameters" | "param" | "params" => {
            match comparison.to_uppercase().as_str() {
                "!=" | "=" | "LIKE" | "ILIKE" => {
                    if raw_value.starts_with('(') {
                        return Err(MetadataError::InvalidQuery(format!(
                            "invalid string value '{raw_value}'"
                        )));
                    }
                    value = Bind::from(raw_value.trim_matches(|c| c == '"' || c == '\''));
                }
                _ => {
                    return Err(MetadataError::InvalidQuery(format!(
                        "invalid param comparison operator '{comparison}'"
                    )));
                }
            }
            side = Some(SideTable::Params);
        }
        "tag" | "tags" => {
            match comparison.to_uppercase().as_str() {
                "!=" | "=" | "LIKE" | "ILIKE" => {
                    if raw_value.starts_with('(') {
                        return Err(MetadataError::InvalidQuery(format!(
                            "invalid string value '{raw_value}'"
                        )));
                    }
                    value = Bind::from(raw_value.trim_matches(|c| c == '"' || c == '\''));
                }
                _ => {
                    return Err(MetadataError::InvalidQuery(format!(
                        "invalid tag comparison operator '{comparison}'"
                    )));
                }
            }
            side = Some(SideTable::Tags);
        }
        other => {
            return Err(MetadataError::InvalidQuery(format!(
                "invalid entity type '{other}'. Valid values are ['metric', 'parameter', 'tag', \
                 'attribute']"
            )));
        }
    }

    match side {
        None => {
            // predicate directly on the runs table
            if dialect == Dialect::Sqlite && comparison.to_uppercase() == "ILIKE" {
                if let Bind::Str(s) = &value {
                    value = Bind::Str(s.to_lowercase());
                }
                select.filter(Fragment::with_binds(
                    format!("LOWER(runs.{key}) LIKE ?"),
                    vec![value],
                ));
            } else {
                select.filter(Fragment::with_binds(
                    format!("runs.{key} {comparison} ?"),
                    vec![value],
                ));
            }
        }
        Some(table) => {
            let value_expr = table.value_expr();
            let mut value_where = format!("{value_expr} {comparison} ?");
            if dialect == Dialect::Sqlite && comparison.to_uppercase() == "ILIKE" {
                value_where = format!("LOWER({value_expr}) LIKE ?");
                if let Bind::Str(s) = &value {
                    value = Bind::Str(s.to_lowercase());
                }
            }
            select.join(Fragment::with_binds(
                format!(
                    "JOIN (SELECT run_uuid, {value_expr} AS value FROM {} WHERE key = ? AND \
                     {value_where}) AS filter_{n} ON runs.run_uuid = filter_{n}.run_uuid",
                    table.table(),
                ),
                vec![Bind::from(key), value],
            ));
        }
    }
    Ok(())
}

fn apply_order_by(select: &mut Select, order_by: &[String]) -> MetadataResult<()> {
    let mut start_time_order = false;
    for (n, clause) in order_by.iter().enumerate() {
        let caps = RUN_ORDER.captures(clause).ok_or_else(|| {
            MetadataError::InvalidQuery(format!("invalid order_by clause '{clause}'"))
        })?;

        let key = caps[2].trim_matches(|c| c == '"' || c == '`').to_string();
        let desc = caps
            .get(3)
            .is_some_and(|m| m.as_str().eq_ignore_ascii_case("DESC"));

        let side = match &caps[1] {
            "attribute" => {
                if key == "start_time" {
                    start_time_order = true;
                }
                None
            }
            "metric" => Some(SideTable::LatestMetrics),
            "param" => Some(SideTable::Params),
            "tag" => Some(SideTable::Tags),
            other => {
                return Err(MetadataError::InvalidQuery(format!(
                    "invalid entity type '{other}'. Valid values are ['metric', 'parameter', \
                     'tag', 'attribute']"
                )));
            }
        };

        let column = match side {
            None => format!("runs.{key}"),
            Some(table) => {
                select.join(Fragment::with_binds(
                    format!(
                        "LEFT OUTER JOIN (SELECT run_uuid, {} AS value FROM {} WHERE key = ?) AS \
                         order_{n} ON runs.run_uuid = order_{n}.run_uuid",
                        table.value_expr(),
                        table.table(),
                    ),
                    vec![Bind::from(key)],
                ));
                format!("order_{n}.value")
            }
        };
        select.order(format!("{column}{}", if desc { " DESC" } else { "" }));
    }

    if !start_time_order {
        select.order("runs.start_time DESC");
    }
    select.order("runs.run_uuid");
    Ok(())
}

// =============================================================================
// Experiment search
// =============================================================================

/// Compile an experiments/search filter into one SELECT over `experiments`.
///
/// Attribute keys are `name`, `creation_time` and `last_update_time`; tag
/// conditions join `experiment_tags` the same way run conditions join their
/// side tables.
pub fn compile_experiment_search(
    filter: &str,
    view_type: ViewType,
    dialect: Dialect,
) -> MetadataResult<Select> {
    let mut select = Select::new("experiments");
    select.column("experiments.*");

    let stages = view_type.stages();
    let placeholders = vec!["?"; stages.len()].join(", ");
    select.filter(Fragment::with_binds(
        format!("experiments.lifecycle_stage IN ({placeholders})"),
        stages.iter().map(|s| Bind::from(s.as_str())).collect(),
    ));

    if !filter.is_empty() {
        for (n, cond) in FILTER_AND.split(filter).enumerate() {
            apply_experiment_condition(&mut select, n, cond, dialect)?;
        }
    }

    select.order("experiments.creation_time DESC");
    select.order("experiments.experiment_id");
    Ok(select)
}

fn apply_experiment_condition(
    select: &mut Select,
    n: usize,
    cond: &str,
    dialect: Dialect,
) -> MetadataResult<()> {
    let caps = FILTER_COND
        .captures(cond)
        .ok_or_else(|| MetadataError::InvalidQuery(format!("malformed filter '{cond}'")))?;

    let entity = caps.get(1).map_or("", |m| m.as_str());
    let key = caps[2].trim_matches(|c| c == '"' || c == '`').to_string();
    let comparison = caps[3].to_string();
    let raw_value = caps[4].to_string();

    match entity {
        "" | "attribute" | "attributes" | "attr" => match key.as_str() {
            "creation_time" | "last_update_time" => match comparison.as_str() {
                ">" | ">=" | "!=" | "=" | "<" | "<=" => {
                    let v: i64 = raw_value.parse().map_err(|_| {
                        MetadataError::InvalidQuery(format!("invalid numeric value '{raw_value}'"))
                    })?;
                    select.filter(Fragment::with_binds(
                        format!("experiments.{key} {comparison} ?"),
                        vec![Bind::Int(v)],
                    ));
                    Ok(())
                }
                _ => Err(MetadataError::InvalidQuery(format!(
                    "invalid numeric attribute comparison operator '{comparison}'"
                ))),
            },
            "name" => match comparison.to_uppercase().as_str() {
                "!=" | "=" | "LIKE" | "ILIKE" => {
                    let mut value = Bind::from(raw_value.trim_matches(|c| c == '"' || c == '\''));
                    if dialect == Dialect::Sqlite && comparison.to_uppercase() == "ILIKE" {
                        if let Bind::Str(s) = &value {
                            value = Bind::Str(s.to_lowercase());
                        }
                        select.filter(Fragment::with_binds(
                            "LOWER(experiments.name) LIKE ?".to_string(),
                            vec![value],
                        ));
                    } else {
                        select.filter(Fragment::with_binds(
                            format!("experiments.name {comparison} ?"),
                            vec![value],
                        ));
                    }
                    Ok(())
                }
                _ => Err(MetadataError::InvalidQuery(format!(
                    "invalid string attribute comparison operator '{comparison}'"
                ))),
            },
            _ => Err(MetadataError::InvalidQuery(format!(
                "invalid attribute '{key}'. Valid values are ['name', 'creation_time', \
                 'last_update_time']"
            ))),
        },
        "tag" | "tags" => match comparison.to_uppercase().as_str() {
            "!=" | "=" | "LIKE" | "ILIKE" => {
                let mut value = Bind::from(raw_value.trim_matches(|c| c == '"' || c == '\''));
                let mut value_where = format!("value {comparison} ?");
                if dialect == Dialect::Sqlite && comparison.to_uppercase() == "ILIKE" {
                    value_where = "LOWER(value) LIKE ?".to_string();
                    if let Bind::Str(s) = &value {
                        value = Bind::Str(s.to_lowercase());
                    }
                }
                select.join(Fragment::with_binds(
                    format!(
                        "JOIN (SELECT experiment_id, value FROM experiment_tags WHERE key = ? AND \
                         {value_where}) AS filter_{n} ON experiments.experiment_id = \
                         filter_{n}.experiment_id"
                    ),
                    vec![Bind::from(key), value],
                ));
                Ok(())
            }
            _ => Err(MetadataError::InvalidQuery(format!(
                "invalid tag comparison operator '{comparison}'"
            ))),
        },
        other => Err(MetadataError::InvalidQuery(format!(
            "invalid entity type '{other}'. Valid values are ['tag', 'attribute']"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(filter: &str, dialect: Dialect) -> CompiledRunSearch {
        compile_run_search(
            &RunSearchParams {
                experiment_ids: vec![1],
                filter: filter.to_string(),
                ..Default::default()
            },
            dialect,
        )
        .unwrap()
    }

    #[test]
    fn attribute_condition_on_runs_column() {
        let compiled = search("attributes.start_time = 123456789", Dialect::Sqlite);
        let (sql, binds) = compiled.select.build(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT runs.* FROM runs WHERE (runs.experiment_id IN (?) AND runs.lifecycle_stage \
             IN (?) AND runs.start_time = ?) ORDER BY runs.start_time DESC, runs.run_uuid \
             LIMIT 1000"
        );
        assert_eq!(
            binds,
            vec![Bind::Int(1), Bind::from("active"), Bind::Int(123456789)]
        );
    }

    #[test]
    fn metric_condition_joins_latest_metrics() {
        let compiled = search("metrics.accuracy > 0.9", Dialect::Sqlite);
        let (sql, binds) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.contains(
            "JOIN (SELECT run_uuid, value AS value FROM latest_metrics WHERE key = ? AND value > \
             ?) AS filter_0 ON runs.run_uuid = filter_0.run_uuid"
        ));
        assert!(binds.contains(&Bind::from("accuracy")));
        assert!(binds.contains(&Bind::Float(0.9)));
    }

    #[test]
    fn param_condition_uses_concat_value() {
        let compiled = search("params.lr = '0.1'", Dialect::Postgres);
        let (sql, binds) = compiled.select.build(Dialect::Postgres);
        assert!(sql.contains(
            "JOIN (SELECT run_uuid, CONCAT(value_int, value_float, value_str) AS value FROM \
             params WHERE key = $1 AND CONCAT(value_int, value_float, value_str) = $2) AS \
             filter_0"
        ));
        assert!(binds.contains(&Bind::from("lr")));
        assert!(binds.contains(&Bind::from("0.1")));
    }

    #[test]
    fn run_name_rewrites_to_tag_join() {
        let compiled = search("attributes.run_name = 'TestRun1'", Dialect::Sqlite);
        let (sql, binds) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.contains("FROM tags WHERE key = ?"));
        // join binds precede where binds
        assert_eq!(binds[0], Bind::from("mlflow.runName"));
        assert_eq!(binds[1], Bind::from("TestRun1"));
    }

    #[test]
    fn run_id_in_list() {
        let compiled = search("attributes.run_id IN ('a', 'b')", Dialect::Sqlite);
        let (sql, binds) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.contains("runs.run_uuid IN (?, ?)"));
        assert_eq!(binds[2], Bind::from("a"));
        assert_eq!(binds[3], Bind::from("b"));
    }

    #[test]
    fn ilike_rewritten_on_sqlite_only() {
        let compiled = search("tags.note ILIKE '%X%'", Dialect::Sqlite);
        let (sql, binds) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.contains("LOWER(value) LIKE ?"));
        assert_eq!(binds[1], Bind::from("%x%"));

        let compiled = search("tags.note ILIKE '%X%'", Dialect::Postgres);
        let (sql, binds) = compiled.select.build(Dialect::Postgres);
        assert!(sql.contains("value ILIKE $2"));
        assert_eq!(binds[1], Bind::from("%X%"));
    }

    #[test]
    fn order_by_side_table_left_joins() {
        let compiled = compile_run_search(
            &RunSearchParams {
                experiment_ids: vec![1],
                order_by: vec!["metric.loss ASC".to_string()],
                ..Default::default()
            },
            Dialect::Sqlite,
        )
        .unwrap();
        let (sql, _) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.contains(
            "LEFT OUTER JOIN (SELECT run_uuid, value AS value FROM latest_metrics WHERE key = ?) \
             AS order_0 ON runs.run_uuid = order_0.run_uuid"
        ));
        assert!(sql.contains("ORDER BY order_0.value, runs.start_time DESC, runs.run_uuid"));
    }

    #[test]
    fn explicit_start_time_order_suppresses_default() {
        let compiled = compile_run_search(
            &RunSearchParams {
                experiment_ids: vec![1],
                order_by: vec!["attribute.start_time ASC".to_string()],
                ..Default::default()
            },
            Dialect::Sqlite,
        )
        .unwrap();
        let (sql, _) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.contains("ORDER BY runs.start_time, runs.run_uuid"));
        assert!(!sql.contains("start_time DESC"));
    }

    #[test]
    fn malformed_filter_rejected() {
        let err = compile_run_search(
            &RunSearchParams {
                filter: "this is not a filter".to_string(),
                ..Default::default()
            },
            Dialect::Sqlite,
        )
        .unwrap_err();
        assert!(err.to_string().contains("malformed filter"));
    }

    #[test]
    fn unknown_attribute_rejected() {
        let err = compile_run_search(
            &RunSearchParams {
                filter: "attributes.nope = 'x'".to_string(),
                ..Default::default()
            },
            Dialect::Sqlite,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid attribute 'nope'"));
    }

    #[test]
    fn numeric_attribute_rejects_like() {
        let err = compile_run_search(
            &RunSearchParams {
                filter: "attributes.start_time LIKE '5'".to_string(),
                ..Default::default()
            },
            Dialect::Sqlite,
        )
        .unwrap_err();
        assert!(
            err.to_string()
                .contains("invalid numeric attribute comparison operator")
        );
    }

    #[test]
    fn max_results_bounds() {
        assert_eq!(normalize_max_results(0).unwrap(), 1000);
        assert_eq!(normalize_max_results(10).unwrap(), 10);
        assert_eq!(normalize_max_results(50_000).unwrap(), 50_000);
        let err = normalize_max_results(50_001).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid query: Invalid value for parameter 'max_results' supplied."
        );
    }

    #[test]
    fn page_token_round_trip() {
        let token = encode_page_token(42);
        assert_eq!(decode_page_token(&token).unwrap(), 42);
        assert!(decode_page_token("not base64!").is_err());
    }

    #[test]
    fn page_token_sets_offset() {
        let compiled = compile_run_search(
            &RunSearchParams {
                page_token: Some(encode_page_token(7)),
                max_results: 5,
                ..Default::default()
            },
            Dialect::Sqlite,
        )
        .unwrap();
        assert_eq!(compiled.offset, 7);
        assert_eq!(compiled.limit, 5);
        let (sql, _) = compiled.select.build(Dialect::Sqlite);
        assert!(sql.ends_with("LIMIT 5 OFFSET 7"));
    }

    #[test]
    fn experiment_search_name_and_tag() {
        let select = compile_experiment_search(
            "attributes.name LIKE 'E%' AND tags.team = 'ml'",
            ViewType::ActiveOnly,
            Dialect::Sqlite,
        )
        .unwrap();
        let (sql, binds) = select.build(Dialect::Sqlite);
        assert!(sql.contains("experiments.name LIKE ?"));
        assert!(sql.contains(
            "JOIN (SELECT experiment_id, value FROM experiment_tags WHERE key = ? AND value = ?) \
             AS filter_1"
        ));
        assert_eq!(binds.len(), 4);
    }
}
