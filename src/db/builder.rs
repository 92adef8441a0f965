//! Fluent SELECT builder.
//!
//! Minimal on purpose: a table, a column list (default `*`), and AND-joined
//! predicates with bound values. No joins, ordering, or OR predicates.
//! Construction is gated by `QUERY_BUILDER_ENABLED`.

use crate::config::Settings;
use crate::db::executor::QueryExecutor;
use crate::db::pool::{DbPool, PlaceholderStyle};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row};

const ALLOWED_OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE"];

/// Fluent builder for simple SELECT statements.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: Option<String>,
    columns: Vec<String>,
    predicates: Vec<(String, String, QueryParam)>,
}

impl QueryBuilder {
    /// Create a builder; fails with `QUERY_BUILDER_NOT_ENABLED` when the gate
    /// is off.
    pub fn new(settings: &Settings) -> DbResult<Self> {
        settings.require_query_builder()?;
        Ok(Self {
            table: None,
            columns: Vec::new(),
            predicates: Vec::new(),
        })
    }

    /// Target table.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Columns to select; without a call the statement selects `*`.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add an AND-joined predicate with a bound value.
    pub fn where_clause(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<QueryParam>,
    ) -> Self {
        self.predicates
            .push((field.into(), operator.into(), value.into()));
        self
    }

    /// Render the statement and its parameters for the given placeholder style.
    pub fn to_sql(&self, style: PlaceholderStyle) -> DbResult<(String, Vec<QueryParam>)> {
        let table = self.table.as_deref().ok_or_else(|| DbError::Database {
            message: "query builder has no table".to_string(),
            sql_state: None,
        })?;

        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {table}");
        let mut params = Vec::with_capacity(self.predicates.len());

        if !self.predicates.is_empty() {
            let mut clauses = Vec::with_capacity(self.predicates.len());
            for (i, (field, operator, value)) in self.predicates.iter().enumerate() {
                let op = operator.trim().to_uppercase();
                if !ALLOWED_OPERATORS.contains(&op.as_str()) {
                    return Err(DbError::Database {
                        message: format!("unsupported operator '{operator}' in query builder"),
                        sql_state: None,
                    });
                }
                clauses.push(format!("{field} {op} {}", style.render(i + 1)));
                params.push(value.clone());
            }
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        Ok((sql, params))
    }

    /// Execute the built SELECT on the given pool.
    pub async fn get(&self, executor: &QueryExecutor, pool: &DbPool) -> DbResult<Vec<Row>> {
        let (sql, params) = self.to_sql(pool.placeholder_style())?;
        executor.fetch_all(pool, &sql, &params).await
    }
}
