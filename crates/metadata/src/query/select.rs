//! Minimal SELECT statement model shared by the query compilers.

/// SQL dialect selector. Differences between the two supported dialects are
/// encoded here as a small strategy table rather than runtime polymorphism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    /// Null-safe inequality operator used by the param conflict query.
    pub fn null_safe_inequality(&self) -> &'static str {
        match self {
            Self::Sqlite => "IS NOT",
            Self::Postgres => "IS DISTINCT FROM",
        }
    }
}

/// A bind parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl From<i64> for Bind {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Bind {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A SQL fragment with positional `?` placeholders and its binds, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub binds: Vec<Bind>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn with_binds(sql: impl Into<String>, binds: Vec<Bind>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}

/// A single SELECT statement under construction.
///
/// Fragments always use `?` placeholders; [`Select::build`] renumbers them to
/// `$n` for PostgreSQL. Bind order is joins, then where conjuncts, in the
/// order they were added.
#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    joins: Vec<Fragment>,
    wheres: Vec<Fragment>,
    orders: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn column(&mut self, column: impl Into<String>) -> &mut Self {
        self.columns.push(column.into());
        self
    }

    pub fn join(&mut self, fragment: Fragment) -> &mut Self {
        self.joins.push(fragment);
        self
    }

    pub fn filter(&mut self, fragment: Fragment) -> &mut Self {
        self.wheres.push(fragment);
        self
    }

    pub fn order(&mut self, order: impl Into<String>) -> &mut Self {
        self.orders.push(order.into());
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Render the statement for the given dialect.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Bind>) {
        let mut sql = String::with_capacity(256);
        let mut binds = Vec::new();

        sql.push_str("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.sql);
            binds.extend(join.binds.iter().cloned());
        }

        if !self.wheres.is_empty() {
            sql.push_str(" WHERE (");
            for (i, w) in self.wheres.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                sql.push_str(&w.sql);
                binds.extend(w.binds.iter().cloned());
            }
            sql.push(')');
        }

        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        if dialect == Dialect::Postgres {
            sql = number_placeholders(&sql);
        }

        (sql, binds)
    }
}

/// Rewrite `?` placeholders to `$1..$n`. Fragments never carry `?` inside
/// string literals, so a plain scan is sufficient.
pub(crate) fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sqlite_statement() {
        let mut select = Select::new("runs");
        select
            .column("runs.*")
            .join(Fragment::with_binds(
                "JOIN (SELECT run_uuid, value FROM tags WHERE key = ? AND value = ?) AS filter_0 \
                 ON runs.run_uuid = filter_0.run_uuid",
                vec![Bind::from("k"), Bind::from("v")],
            ))
            .filter(Fragment::with_binds(
                "runs.start_time > ?",
                vec![Bind::Int(5)],
            ))
            .order("runs.start_time DESC")
            .limit(10)
            .offset(2);

        let (sql, binds) = select.build(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT runs.* FROM runs JOIN (SELECT run_uuid, value FROM tags WHERE key = ? AND \
             value = ?) AS filter_0 ON runs.run_uuid = filter_0.run_uuid WHERE \
             (runs.start_time > ?) ORDER BY runs.start_time DESC LIMIT 10 OFFSET 2"
        );
        assert_eq!(
            binds,
            vec![Bind::from("k"), Bind::from("v"), Bind::Int(5)]
        );
    }

    #[test]
    fn numbers_postgres_placeholders() {
        let mut select = Select::new("runs");
        select
            .filter(Fragment::with_binds("runs.name = ?", vec![Bind::from("a")]))
            .filter(Fragment::with_binds(
                "runs.start_time > ?",
                vec![Bind::Int(1)],
            ));
        let (sql, _) = select.build(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT * FROM runs WHERE (runs.name = $1 AND runs.start_time > $2)"
        );
    }
}
