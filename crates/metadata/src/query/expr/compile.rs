//! Lowering of the expression AST to SQL fragments.

use super::parser::{self, CmpOp, Expr, Number};
use crate::error::{MetadataError, MetadataResult};
use crate::query::select::{Bind, Dialect, Fragment, Select};

/// Predicate injected when the user's query does not mention the configured
/// contains-term. Used to exclude archived runs by default.
#[derive(Debug, Clone, Default)]
pub struct DefaultExpression {
    pub contains: String,
    pub expression: String,
}

/// Physical table names the compiler may reference. `metrics` is only set on
/// endpoints where the bare `metric` entity is addressable (metric search).
#[derive(Debug, Clone)]
pub struct Tables {
    pub runs: String,
    pub experiments: Option<String>,
    pub metrics: Option<String>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            runs: "runs".to_string(),
            experiments: Some("experiments".to_string()),
            metrics: None,
        }
    }
}

/// Dashboard query compiler. One instance per request.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    pub default: DefaultExpression,
    pub tables: Tables,
    /// Client timezone offset in minutes, applied to `datetime(...)` literals.
    pub tz_offset: i64,
    pub dialect: Dialect,
}

/// A compiled query: side-table joins plus one predicate fragment.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    joins: Vec<Fragment>,
    predicate: Fragment,
    metric_selected: bool,
}

impl ParsedQuery {
    /// Whether the query references any metric, directly or via
    /// `run.metrics[...]`. The metric-search endpoint rejects queries where
    /// this is false.
    pub fn is_metric_selected(&self) -> bool {
        self.metric_selected
    }

    pub fn joins(&self) -> &[Fragment] {
        &self.joins
    }

    pub fn predicate(&self) -> &Fragment {
        &self.predicate
    }

    /// Attach the joins and predicate to a SELECT under construction.
    pub fn apply(&self, select: &mut Select) {
        for join in &self.joins {
            select.join(join.clone());
        }
        if !self.predicate.sql.is_empty() {
            select.filter(self.predicate.clone());
        }
    }
}

impl QueryParser {
    /// Parse and lower a query. An empty query compiles to the default
    /// expression alone.
    pub fn parse(&self, query: &str) -> MetadataResult<ParsedQuery> {
        let trimmed = query.trim();
        let effective = if trimmed.is_empty() {
            self.default.expression.clone()
        } else if !self.default.expression.is_empty()
            && !trimmed.contains(self.default.contains.as_str())
        {
            format!("{trimmed} and {}", self.default.expression)
        } else {
            trimmed.to_string()
        };

        if effective.trim().is_empty() {
            return Ok(ParsedQuery {
                joins: Vec::new(),
                predicate: Fragment::new(""),
                metric_selected: false,
            });
        }

        let ast = parser::parse(&effective)?;
        let mut compiler = Compiler {
            qp: self,
            joins: Vec::new(),
            metric_aliases: Vec::new(),
            tag_aliases: Vec::new(),
            metric_selected: false,
        };
        let predicate = compiler.condition(&ast, false)?;
        Ok(ParsedQuery {
            joins: compiler.joins,
            predicate,
            metric_selected: compiler.metric_selected,
        })
    }
}

/// Entities addressable by bare names and reserved attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entity {
    Run,
    RunMetrics,
    RunTags,
    Re,
    Metric,
    Datetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodKind {
    StartsWith,
    EndsWith,
}

/// Intermediate value produced while lowering a subexpression.
#[derive(Debug, Clone)]
enum Operand {
    Column(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    /// A finished boolean fragment (negation already applied).
    Cond(Fragment),
    /// A latent `column = value` predicate (run.active / run.archived);
    /// negation is decided where it becomes a condition.
    PendingEq { column: String, value: String },
    /// A joined `run.metrics['k']` reference awaiting `.last`/`.last_step`.
    MetricRef(String),
    Entity(Entity),
    Method { column: String, kind: MethodKind },
    ReFn { anchored: bool },
}

struct Compiler<'a> {
    qp: &'a QueryParser,
    joins: Vec<Fragment>,
    metric_aliases: Vec<(String, String)>,
    tag_aliases: Vec<(String, String)>,
    metric_selected: bool,
}

impl Compiler<'_> {
    fn run_col(&self, name: &str) -> String {
        format!("\"{}\".\"{}\"", self.qp.tables.runs, name)
    }

    fn invalid(&self, message: impl Into<String>) -> MetadataError {
        MetadataError::InvalidQuery(message.into())
    }

    /// Compile an expression expected to be a boolean condition.
    fn condition(&mut self, expr: &Expr, negate: bool) -> MetadataResult<Fragment> {
        let operand = self.compile(expr, negate)?;
        self.to_cond(operand, negate)
    }

    fn to_cond(&self, operand: Operand, negate: bool) -> MetadataResult<Fragment> {
        match operand {
            Operand::Cond(f) => Ok(f),
            Operand::PendingEq { column, value } => Ok(Fragment::with_binds(
                format!("{column} {} ?", if negate { "<>" } else { "=" }),
                vec![Bind::Str(value)],
            )),
            other => Err(self.invalid(format!("expression is not a condition: {other:?}"))),
        }
    }

    fn compile(&mut self, expr: &Expr, negate: bool) -> MetadataResult<Operand> {
        match expr {
            Expr::Num(Number::Int(v)) => Ok(Operand::Int(*v)),
            Expr::Num(Number::Float(v)) => Ok(Operand::Float(*v)),
            Expr::Str(v) => Ok(Operand::Str(v.clone())),
            Expr::Bool(v) => Ok(Operand::Bool(*v)),
            Expr::None => Ok(Operand::None),
            Expr::Name(name) => self.name(name),
            Expr::Not(inner) => {
                let operand = self.compile(inner, !negate)?;
                // latent predicates must absorb the flip here, or it is lost
                match operand {
                    Operand::PendingEq { .. } => {
                        Ok(Operand::Cond(self.to_cond(operand, !negate)?))
                    }
                    other => Ok(other),
                }
            }
            Expr::And(values) | Expr::Or(values) => {
                let is_or = matches!(expr, Expr::Or(_));
                // negation distributes over the combinator
                let effective_or = if negate { !is_or } else { is_or };
                let mut parts = Vec::with_capacity(values.len());
                let mut binds = Vec::new();
                for value in values {
                    let frag = self.condition(value, negate)?;
                    parts.push(frag.sql);
                    binds.extend(frag.binds);
                }
                let sql = if effective_or {
                    format!("({})", parts.join(" OR "))
                } else {
                    parts.join(" AND ")
                };
                Ok(Operand::Cond(Fragment::with_binds(sql, binds)))
            }
            Expr::Compare { left, rest } => {
                let mut parts = Vec::with_capacity(rest.len());
                let mut binds = Vec::new();
                let mut lhs = left.as_ref().clone();
                for (op, rhs) in rest {
                    let frag = self.compare(&lhs, *op, rhs, negate)?;
                    parts.push(frag.sql);
                    binds.extend(frag.binds);
                    lhs = rhs.clone();
                }
                let sql = if parts.len() == 1 {
                    parts.pop().unwrap()
                } else if negate {
                    // not (a AND b) == (not a) OR (not b); each part already
                    // carries its own negation
                    format!("({})", parts.join(" OR "))
                } else {
                    parts.join(" AND ")
                };
                Ok(Operand::Cond(Fragment::with_binds(sql, binds)))
            }
            Expr::Attr { value, name } => self.attr(value, name),
            Expr::Subscript { value, key } => self.subscript(value, key),
            Expr::Call { func, args } => self.call(func, args, negate),
        }
    }

    fn name(&self, name: &str) -> MetadataResult<Operand> {
        match name {
            "run" => Ok(Operand::Entity(Entity::Run)),
            "re" => Ok(Operand::Entity(Entity::Re)),
            "datetime" => Ok(Operand::Entity(Entity::Datetime)),
            "metric" if self.qp.tables.metrics.is_some() => Ok(Operand::Entity(Entity::Metric)),
            other => Err(self.invalid(format!("unknown name '{other}'"))),
        }
    }

    fn attr(&mut self, value: &Expr, name: &str) -> MetadataResult<Operand> {
        let base = self.compile(value, false)?;
        match base {
            Operand::Entity(Entity::Run) => match name {
                "name" => Ok(Operand::Column(self.run_col("name"))),
                "hash" => Ok(Operand::Column(self.run_col("run_uuid"))),
                "created_at" => Ok(Operand::Column(self.run_col("start_time"))),
                "finalized_at" => Ok(Operand::Column(self.run_col("end_time"))),
                "duration" => Ok(Operand::Column(format!(
                    "({} - {}) / 1000",
                    self.run_col("end_time"),
                    self.run_col("start_time")
                ))),
                "experiment" => {
                    let table = self.qp.tables.experiments.as_ref().ok_or_else(|| {
                        self.invalid("experiment is not addressable in this query")
                    })?;
                    Ok(Operand::Column(format!("\"{table}\".\"name\"")))
                }
                "active" => Ok(Operand::PendingEq {
                    column: self.run_col("status"),
                    value: "RUNNING".to_string(),
                }),
                "archived" => Ok(Operand::PendingEq {
                    column: self.run_col("lifecycle_stage"),
                    value: "deleted".to_string(),
                }),
                "metrics" => Ok(Operand::Entity(Entity::RunMetrics)),
                "tags" => Ok(Operand::Entity(Entity::RunTags)),
                other => Err(self.invalid(format!("unknown run attribute '{other}'"))),
            },
            Operand::Entity(Entity::Metric) => {
                let table = self
                    .qp
                    .tables
                    .metrics
                    .clone()
                    .expect("metric entity resolved without a metrics table");
                self.metric_selected = true;
                match name {
                    "name" => Ok(Operand::Column(format!("\"{table}\".\"key\""))),
                    "last" => Ok(Operand::Column(format!("\"{table}\".\"value\""))),
                    "last_step" => Ok(Operand::Column(format!("\"{table}\".\"last_iter\""))),
                    other => Err(self.invalid(format!("unknown metric attribute '{other}'"))),
                }
            }
            Operand::Entity(Entity::Re) => match name {
                "match" => Ok(Operand::ReFn { anchored: true }),
                "search" => Ok(Operand::ReFn { anchored: false }),
                other => Err(self.invalid(format!("unknown re function '{other}'"))),
            },
            Operand::MetricRef(alias) => match name {
                "last" => Ok(Operand::Column(format!("\"{alias}\".\"value\""))),
                "last_step" => Ok(Operand::Column(format!("\"{alias}\".\"last_iter\""))),
                other => Err(self.invalid(format!("unknown metric attribute '{other}'"))),
            },
            Operand::Column(column) => match name {
                "startswith" => Ok(Operand::Method {
                    column,
                    kind: MethodKind::StartsWith,
                }),
                "endswith" => Ok(Operand::Method {
                    column,
                    kind: MethodKind::EndsWith,
                }),
                other => Err(self.invalid(format!("unknown attribute '{other}'"))),
            },
            other => Err(self.invalid(format!("attribute access on non-entity: {other:?}"))),
        }
    }

    fn subscript(&mut self, value: &Expr, key: &str) -> MetadataResult<Operand> {
        let base = self.compile(value, false)?;
        match base {
            Operand::Entity(Entity::RunMetrics) => {
                self.metric_selected = true;
                let alias = self.metric_alias(key);
                Ok(Operand::MetricRef(alias))
            }
            Operand::Entity(Entity::RunTags) => {
                let alias = self.tag_alias(key);
                Ok(Operand::Column(format!("\"{alias}\".\"value\"")))
            }
            other => Err(self.invalid(format!("subscript on non-container: {other:?}"))),
        }
    }

    fn metric_alias(&mut self, key: &str) -> String {
        if let Some((_, alias)) = self.metric_aliases.iter().find(|(k, _)| k == key) {
            return alias.clone();
        }
        let alias = format!("metrics_{}", self.metric_aliases.len());
        self.joins.push(Fragment::with_binds(
            format!(
                "LEFT JOIN latest_metrics {alias} ON {runs}.run_uuid = {alias}.run_uuid AND \
                 {alias}.key = ?",
                runs = self.qp.tables.runs,
            ),
            vec![Bind::from(key)],
        ));
        self.metric_aliases.push((key.to_string(), alias.clone()));
        alias
    }

    fn tag_alias(&mut self, key: &str) -> String {
        if let Some((_, alias)) = self.tag_aliases.iter().find(|(k, _)| k == key) {
            return alias.clone();
        }
        let alias = format!("tags_{}", self.tag_aliases.len());
        self.joins.push(Fragment::with_binds(
            format!(
                "LEFT JOIN tags {alias} ON {runs}.run_uuid = {alias}.run_uuid AND {alias}.key = ?",
                runs = self.qp.tables.runs,
            ),
            vec![Bind::from(key)],
        ));
        self.tag_aliases.push((key.to_string(), alias.clone()));
        alias
    }

    fn call(&mut self, func: &Expr, args: &[Expr], negate: bool) -> MetadataResult<Operand> {
        let callee = self.compile(func, false)?;
        match callee {
            Operand::ReFn { anchored } => {
                if args.len() != 2 {
                    return Err(self.invalid("re functions take (pattern, expression)"));
                }
                let pattern = match self.compile(&args[0], false)? {
                    Operand::Str(p) => p,
                    other => {
                        return Err(
                            self.invalid(format!("regex pattern must be a string: {other:?}"))
                        );
                    }
                };
                let column = match self.compile(&args[1], false)? {
                    Operand::Column(c) => c,
                    other => {
                        return Err(
                            self.invalid(format!("regex target must be a column: {other:?}"))
                        );
                    }
                };
                let pattern = if anchored {
                    format!("^{pattern}")
                } else {
                    pattern
                };
                Ok(Operand::Cond(self.regex_cond(&column, pattern, negate)))
            }
            Operand::Method { column, kind } => {
                if args.len() != 1 {
                    return Err(self.invalid("startswith/endswith take one argument"));
                }
                let needle = match self.compile(&args[0], false)? {
                    Operand::Str(s) => s,
                    other => {
                        return Err(self.invalid(format!("argument must be a string: {other:?}")));
                    }
                };
                let pattern = match kind {
                    MethodKind::StartsWith => format!("{needle}%"),
                    MethodKind::EndsWith => format!("%{needle}"),
                };
                Ok(Operand::Cond(Fragment::with_binds(
                    format!("{column} {} ?", if negate { "NOT LIKE" } else { "LIKE" }),
                    vec![Bind::Str(pattern)],
                )))
            }
            Operand::Entity(Entity::Datetime) => {
                if !(3..=6).contains(&args.len()) {
                    return Err(self.invalid("datetime takes 3 to 6 integer arguments"));
                }
                let mut parts = [0i64; 6];
                for (i, arg) in args.iter().enumerate() {
                    match self.compile(arg, false)? {
                        Operand::Int(v) => parts[i] = v,
                        other => {
                            return Err(self.invalid(format!(
                                "datetime arguments must be integers: {other:?}"
                            )));
                        }
                    }
                }
                let ms = epoch_ms(parts[0], parts[1], parts[2], parts[3], parts[4], parts[5])
                    + self.qp.tz_offset * 60_000;
                Ok(Operand::Int(ms))
            }
            other => Err(self.invalid(format!("expression is not callable: {other:?}"))),
        }
    }

    fn regex_cond(&self, column: &str, pattern: String, negate: bool) -> Fragment {
        match self.qp.dialect {
            Dialect::Postgres => Fragment::with_binds(
                format!("{column} {} ?", if negate { "!~" } else { "~" }),
                vec![Bind::Str(pattern)],
            ),
            Dialect::Sqlite => Fragment::with_binds(
                format!(
                    "IFNULL({column}, '') {} ?",
                    if negate { "NOT REGEXP" } else { "REGEXP" }
                ),
                vec![Bind::Str(pattern)],
            ),
        }
    }

    fn compare(
        &mut self,
        left: &Expr,
        op: CmpOp,
        right: &Expr,
        negate: bool,
    ) -> MetadataResult<Fragment> {
        let lhs = self.compile(left, false)?;
        let rhs = self.compile(right, false)?;
        let eff = if negate { op.negated() } else { op };

        // membership only composes a string literal with a column
        if matches!(eff, CmpOp::In | CmpOp::NotIn) {
            return match (lhs, rhs) {
                (Operand::Str(needle), Operand::Column(column)) => Ok(Fragment::with_binds(
                    format!(
                        "{column} {} ?",
                        if eff == CmpOp::NotIn {
                            "NOT LIKE"
                        } else {
                            "LIKE"
                        }
                    ),
                    vec![Bind::Str(format!("%{needle}%"))],
                )),
                (lhs, rhs) => {
                    Err(self.invalid(format!("unsupported membership: {lhs:?} in {rhs:?}")))
                }
            };
        }

        match (lhs, rhs) {
            (Operand::Column(column), rhs) if matches!(rhs, Operand::None) => match eff {
                CmpOp::Eq => Ok(Fragment::new(format!("{column} IS NULL"))),
                CmpOp::Ne => Ok(Fragment::new(format!("{column} IS NOT NULL"))),
                _ => Err(self.invalid("None only supports equality comparison")),
            },
            (Operand::Column(column), Operand::Int(v)) => Ok(Fragment::with_binds(
                format!("{column} {} ?", eff.sql()),
                vec![Bind::Int(v)],
            )),
            (Operand::Column(column), Operand::Float(v)) => Ok(Fragment::with_binds(
                format!("{column} {} ?", eff.sql()),
                vec![Bind::Float(v)],
            )),
            (Operand::Column(column), Operand::Str(v)) => Ok(Fragment::with_binds(
                format!("{column} {} ?", eff.sql()),
                vec![Bind::Str(v)],
            )),
            (Operand::Int(v), Operand::Column(column)) => Ok(Fragment::with_binds(
                format!("{column} {} ?", flip_direction(eff).sql()),
                vec![Bind::Int(v)],
            )),
            (Operand::Float(v), Operand::Column(column)) => Ok(Fragment::with_binds(
                format!("{column} {} ?", flip_direction(eff).sql()),
                vec![Bind::Float(v)],
            )),
            (Operand::Column(a), Operand::Column(b)) => {
                Ok(Fragment::new(format!("{a} {} {b}", eff.sql())))
            }
            (Operand::PendingEq { column, value }, Operand::Bool(b))
            | (Operand::Bool(b), Operand::PendingEq { column, value }) => {
                let negated = negate ^ (op == CmpOp::Ne) ^ !b;
                self.to_cond(Operand::PendingEq { column, value }, negated)
            }
            (Operand::Cond(frag), Operand::Bool(b)) | (Operand::Bool(b), Operand::Cond(frag)) => {
                let negated = negate ^ (op == CmpOp::Ne) ^ !b;
                if negated {
                    Ok(Fragment::with_binds(format!("NOT ({})", frag.sql), frag.binds))
                } else {
                    Ok(frag)
                }
            }
            (Operand::MetricRef(_), _) | (_, Operand::MetricRef(_)) => Err(self.invalid(
                "metric reference requires '.last' or '.last_step' before comparison",
            )),
            (lhs, rhs) => Err(self.invalid(format!("unsupported comparison: {lhs:?} vs {rhs:?}"))),
        }
    }
}

/// Swap the direction of a comparison so the column lands on the left.
fn flip_direction(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::Le => CmpOp::Ge,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::Ge => CmpOp::Le,
        other => other,
    }
}

/// Milliseconds since the Unix epoch for a civil date-time (UTC).
fn epoch_ms(year: i64, month: i64, day: i64, hour: i64, minute: i64, second: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;
    ((days * 24 + hour) * 60 + minute) * 60_000 + second * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(dialect: Dialect) -> QueryParser {
        QueryParser {
            default: DefaultExpression {
                contains: "run.archived".to_string(),
                expression: "not run.archived".to_string(),
            },
            tables: Tables::default(),
            tz_offset: 0,
            dialect,
        }
    }

    fn compile(query: &str, dialect: Dialect) -> (String, Vec<Bind>) {
        let parsed = parser(dialect).parse(query).unwrap();
        let mut select = Select::new("\"runs\"");
        select.column("\"run_uuid\"");
        parsed.apply(&mut select);
        select.build(dialect)
    }

    #[test]
    fn name_equality_sqlite() {
        let (sql, binds) = compile("(run.name == 'run')", Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" WHERE (\"runs\".\"name\" = ? AND \
             \"runs\".\"lifecycle_stage\" <> ?)"
        );
        assert_eq!(binds, vec![Bind::from("run"), Bind::from("deleted")]);
    }

    #[test]
    fn contains_compiles_to_like() {
        let (sql, binds) = compile("('run' in run.name)", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"name\" LIKE ?"));
        assert_eq!(binds[0], Bind::from("%run%"));
    }

    #[test]
    fn not_contains_compiles_to_not_like() {
        let (sql, binds) = compile("('run' not in run.name)", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"name\" NOT LIKE ?"));
        assert_eq!(binds[0], Bind::from("%run%"));
    }

    #[test]
    fn startswith_and_endswith() {
        let (sql, binds) = compile("(run.name.startswith('run'))", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"name\" LIKE ?"));
        assert_eq!(binds[0], Bind::from("run%"));

        let (sql, binds) = compile("(run.name.endswith('run'))", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"name\" LIKE ?"));
        assert_eq!(binds[0], Bind::from("%run"));
    }

    #[test]
    fn regex_match_sqlite() {
        let (sql, binds) = compile("(re.match('TestRun1', run.name))", Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" WHERE (IFNULL(\"runs\".\"name\", '') REGEXP ? \
             AND \"runs\".\"lifecycle_stage\" <> ?)"
        );
        assert_eq!(binds[0], Bind::from("^TestRun1"));
    }

    #[test]
    fn regex_search_sqlite_is_unanchored() {
        let (_, binds) = compile("(re.search('run', run.name))", Dialect::Sqlite);
        assert_eq!(binds[0], Bind::from("run"));
    }

    #[test]
    fn regex_match_postgres() {
        let (sql, binds) = compile("(re.match('TestRun1', run.name))", Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" WHERE (\"runs\".\"name\" ~ $1 AND \
             \"runs\".\"lifecycle_stage\" <> $2)"
        );
        assert_eq!(binds[0], Bind::from("^TestRun1"));
    }

    #[test]
    fn negated_regex_both_dialects() {
        let (sql, _) = compile("not (re.match('run', run.name))", Dialect::Sqlite);
        assert!(sql.contains("IFNULL(\"runs\".\"name\", '') NOT REGEXP ?"));

        let (sql, _) = compile("not (re.search('run', run.name))", Dialect::Postgres);
        assert!(sql.contains("\"runs\".\"name\" !~ $1"));
    }

    #[test]
    fn negative_integer_keeps_int_type() {
        let (sql, binds) = compile("run.metrics['my_metric'].last < -1", Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" LEFT JOIN latest_metrics metrics_0 ON \
             runs.run_uuid = metrics_0.run_uuid AND metrics_0.key = ? WHERE \
             (\"metrics_0\".\"value\" < ? AND \"runs\".\"lifecycle_stage\" <> ?)"
        );
        assert_eq!(
            binds,
            vec![
                Bind::from("my_metric"),
                Bind::Int(-1),
                Bind::from("deleted")
            ]
        );
    }

    #[test]
    fn negative_float_keeps_float_type() {
        let (sql, binds) = compile("run.metrics['m'].last < -1.0", Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" LEFT JOIN latest_metrics metrics_0 ON \
             runs.run_uuid = metrics_0.run_uuid AND metrics_0.key = $1 WHERE \
             (\"metrics_0\".\"value\" < $2 AND \"runs\".\"lifecycle_stage\" <> $3)"
        );
        assert_eq!(
            binds,
            vec![
                Bind::from("m"),
                Bind::Float(-1.0),
                Bind::from("deleted")
            ]
        );
    }

    #[test]
    fn repeated_metric_key_reuses_join() {
        let parsed = parser(Dialect::Sqlite)
            .parse("run.metrics['m'].last > 0 and run.metrics['m'].last_step > 10")
            .unwrap();
        assert_eq!(parsed.joins().len(), 1);
        assert!(parsed.is_metric_selected());
    }

    #[test]
    fn tag_subscript_joins_tags() {
        let (sql, binds) = compile("run.tags['env'] == 'prod'", Dialect::Sqlite);
        assert!(sql.contains(
            "LEFT JOIN tags tags_0 ON runs.run_uuid = tags_0.run_uuid AND tags_0.key = ?"
        ));
        assert!(sql.contains("\"tags_0\".\"value\" = ?"));
        assert_eq!(binds[0], Bind::from("env"));
        assert_eq!(binds[1], Bind::from("prod"));
    }

    #[test]
    fn explicit_archived_suppresses_default() {
        let (sql, binds) = compile("run.archived == True", Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" WHERE (\"runs\".\"lifecycle_stage\" = ?)"
        );
        assert_eq!(binds, vec![Bind::from("deleted")]);
    }

    #[test]
    fn active_maps_to_status() {
        let (sql, binds) = compile("run.active", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"status\" = ?"));
        assert_eq!(binds[0], Bind::from("RUNNING"));

        let (sql, _) = compile("not run.active", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"status\" <> ?"));
    }

    #[test]
    fn duration_expression() {
        let (sql, binds) = compile("run.duration > 100", Dialect::Sqlite);
        assert!(
            sql.contains("(\"runs\".\"end_time\" - \"runs\".\"start_time\") / 1000 > ?")
        );
        assert_eq!(binds[0], Bind::Int(100));
    }

    #[test]
    fn finalized_at_none_is_null_check() {
        let (sql, _) = compile("run.finalized_at == None", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"end_time\" IS NULL"));

        let (sql, _) = compile("run.finalized_at != None", Dialect::Sqlite);
        assert!(sql.contains("\"runs\".\"end_time\" IS NOT NULL"));
    }

    #[test]
    fn comparison_chain_compiles_to_conjunction() {
        let (sql, binds) = compile("0 < run.metrics['m'].last < 10", Dialect::Sqlite);
        assert!(sql.contains("\"metrics_0\".\"value\" > ? AND \"metrics_0\".\"value\" < ?"));
        assert_eq!(binds[1], Bind::Int(0));
        assert_eq!(binds[2], Bind::Int(10));
    }

    #[test]
    fn datetime_literal_shifts_with_tz_offset() {
        let mut qp = parser(Dialect::Sqlite);
        qp.tz_offset = 60;
        let parsed = qp
            .parse("run.created_at > datetime(1970, 1, 2)")
            .unwrap();
        let mut select = Select::new("\"runs\"");
        parsed.apply(&mut select);
        let (_, binds) = select.build(Dialect::Sqlite);
        assert_eq!(binds[0], Bind::Int(86_400_000 + 3_600_000));
    }

    #[test]
    fn metric_entity_requires_table_mapping() {
        let err = parser(Dialect::Sqlite)
            .parse("metric.name == 'loss'")
            .unwrap_err();
        assert!(err.to_string().contains("unknown name 'metric'"));

        let mut qp = parser(Dialect::Sqlite);
        qp.tables.metrics = Some("latest_metrics".to_string());
        let parsed = qp.parse("metric.name == 'loss'").unwrap();
        assert!(parsed.is_metric_selected());
        assert!(
            parsed
                .predicate()
                .sql
                .contains("\"latest_metrics\".\"key\" = ?")
        );
    }

    #[test]
    fn metric_not_selected_without_reference() {
        let parsed = parser(Dialect::Sqlite).parse("run.name == 'x'").unwrap();
        assert!(!parsed.is_metric_selected());
    }

    #[test]
    fn empty_query_compiles_to_default() {
        let (sql, binds) = compile("", Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"run_uuid\" FROM \"runs\" WHERE (\"runs\".\"lifecycle_stage\" <> ?)"
        );
        assert_eq!(binds, vec![Bind::from("deleted")]);
    }

    #[test]
    fn de_morgan_over_disjunction() {
        let (sql, _) = compile("not (run.active or run.archived)", Dialect::Sqlite);
        // both disjuncts negate, and the combinator flips to AND
        assert!(sql.contains("\"runs\".\"status\" <> ?"));
        assert!(sql.contains("\"runs\".\"lifecycle_stage\" <> ?"));
        assert!(!sql.contains(" OR "));
    }

    #[test]
    fn rejects_non_condition() {
        let err = parser(Dialect::Sqlite).parse("run.name").unwrap_err();
        assert!(err.to_string().contains("not a condition"));
    }
}
