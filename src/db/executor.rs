//! Query execution engine.
//!
//! All statements are parameterized; parameters are bound, never concatenated
//! into statement text. Execution policies layered on top of the basic
//! operations:
//! - retry per [`RetryPolicy`] with `QUERY_RETRY_FAILED` on exhaustion,
//! - execution-time logging with a slow-query threshold (log-only),
//! - cached fetches through an injected [`ResultCache`],
//! - batch insert/update as a single all-or-nothing transaction.
//!
//! Database-specific code lives in the `mysql`/`postgres`/`sqlite` submodules;
//! each provides the same interface adapted to its driver. The structure is
//! intentionally parallel to make differences obvious.

use crate::config::{RetryPolicy, Settings};
use crate::db::cache::{ResultCache, fingerprint};
use crate::db::pool::{DbPool, PlaceholderStyle};
use crate::db::types::RowValues;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Parameter set for `:name`-style statements.
pub type NamedParams = HashMap<String, QueryParam>;

/// Query executor carrying the execution policies.
pub struct QueryExecutor {
    slow_threshold: Duration,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(slow_threshold: Duration, retry: RetryPolicy) -> Self {
        Self {
            slow_threshold,
            retry,
        }
    }

    /// Build an executor from settings (slow-query threshold + retry policy).
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.slow_query_threshold(), settings.retry_policy())
    }

    /// Execute a write statement and return the affected row count.
    pub async fn execute(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let start = Instant::now();
        let affected = self.run_write(pool, sql, params).await?;
        self.log_query_execution_time(sql, start.elapsed());
        Ok(affected)
    }

    async fn run_write(&self, pool: &DbPool, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        match pool {
            DbPool::MySql(p) => mysql::execute_write(p, sql, params).await,
            DbPool::Postgres(p) => postgres::execute_write(p, sql, params).await,
            DbPool::SQLite(p) => sqlite::execute_write(p, sql, params).await,
        }
    }

    /// Execute a SELECT and return every row.
    pub async fn fetch_all(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let rows = match pool {
            DbPool::MySql(p) => mysql::fetch_rows(p, sql, params)
                .await?
                .iter()
                .map(RowValues::to_row)
                .collect(),
            DbPool::Postgres(p) => postgres::fetch_rows(p, sql, params)
                .await?
                .iter()
                .map(RowValues::to_row)
                .collect(),
            DbPool::SQLite(p) => sqlite::fetch_rows(p, sql, params)
                .await?
                .iter()
                .map(RowValues::to_row)
                .collect(),
        };
        self.log_query_execution_time(sql, start.elapsed());
        Ok(rows)
    }

    /// Execute a SELECT and return the first row, if any.
    pub async fn fetch_one(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>> {
        Ok(self.fetch_all(pool, sql, params).await?.into_iter().next())
    }

    /// Execute a write statement with `:name` parameters.
    ///
    /// Named tokens are rewritten to the backend's positional placeholders
    /// before binding; a name without a bound value is an error.
    pub async fn execute_named(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &NamedParams,
    ) -> DbResult<u64> {
        let (sql, positional) = expand_named(sql, params, pool.placeholder_style())?;
        self.execute(pool, &sql, &positional).await
    }

    /// Execute a SELECT with `:name` parameters and return every row.
    pub async fn fetch_all_named(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &NamedParams,
    ) -> DbResult<Vec<Row>> {
        let (sql, positional) = expand_named(sql, params, pool.placeholder_style())?;
        self.fetch_all(pool, &sql, &positional).await
    }

    /// Execute a SELECT with `:name` parameters and return the first row.
    pub async fn fetch_one_named(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &NamedParams,
    ) -> DbResult<Option<Row>> {
        let (sql, positional) = expand_named(sql, params, pool.placeholder_style())?;
        self.fetch_one(pool, &sql, &positional).await
    }

    /// Execute a write statement without the prepared-statement cache.
    ///
    /// The bypass is call-scoped, so regular prepared execution resumes on the
    /// next call without any state to restore.
    pub async fn execute_async_query(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let start = Instant::now();
        let affected = match pool {
            DbPool::MySql(p) => mysql::execute_unprepared(p, sql, params).await?,
            DbPool::Postgres(p) => postgres::execute_unprepared(p, sql, params).await?,
            DbPool::SQLite(p) => sqlite::execute_unprepared(p, sql, params).await?,
        };
        self.log_query_execution_time(sql, start.elapsed());
        Ok(affected)
    }

    /// Execute a write statement, retrying per the retry policy.
    ///
    /// Fatal classification is not consulted here: every database-level failure
    /// is retried until the attempts are exhausted, then reported as
    /// `QUERY_RETRY_FAILED` carrying the attempt count and last message.
    pub async fn execute_with_retry(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.execute(pool, sql, params).await {
                Ok(affected) => return Ok(affected),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Query attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        Err(DbError::RetryExhausted {
            attempts: self.retry.max_attempts,
            message: last_error,
        })
    }

    /// Execute a write statement, logging its execution time at info level.
    ///
    /// The statement is timed once; a slow statement is warned about instead.
    pub async fn execute_with_logging(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let start = Instant::now();
        let result = self.run_write(pool, sql, params).await;
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed >= self.slow_threshold {
            warn!(sql = %sql, elapsed_ms, "Slow query detected");
        } else {
            info!(sql = %sql, elapsed_ms, "Query executed");
        }
        result
    }

    /// Record a statement's execution time; past the slow threshold it is
    /// warned about instead of traced.
    pub fn log_query_execution_time(&self, sql: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed >= self.slow_threshold {
            warn!(sql = %sql, elapsed_ms, "Slow query detected");
        } else {
            debug!(sql = %sql, elapsed_ms, "Query completed");
        }
    }

    /// Fetch through the result cache.
    ///
    /// A hit is returned verbatim. On a miss the statement executes and the
    /// result is stored best-effort; the caller never fails on a store problem.
    pub async fn fetch_with_cache(
        &self,
        pool: &DbPool,
        cache: &dyn ResultCache,
        sql: &str,
        params: &[QueryParam],
        ttl: Duration,
    ) -> DbResult<Vec<Row>> {
        let key = fingerprint(sql, params);
        if let Some(rows) = cache.get(&key).await {
            return Ok(rows);
        }
        debug!(key = %key, "Result cache miss");
        let rows = self.fetch_all(pool, sql, params).await?;
        cache.set(&key, rows.clone(), ttl).await;
        Ok(rows)
    }

    /// Insert every row in one transaction.
    ///
    /// Any failed statement rolls the whole batch back; the outcome is reported
    /// as a bool with the failure logged, not raised.
    pub async fn batch_insert(
        &self,
        pool: &DbPool,
        table: &str,
        columns: &[&str],
        rows: &[Vec<QueryParam>],
    ) -> DbResult<bool> {
        if rows.is_empty() {
            return Ok(true);
        }
        if rows.iter().any(|r| r.len() != columns.len()) {
            error!(table = %table, "Batch insert row width does not match column list");
            return Ok(false);
        }

        let sql = insert_statement(table, columns, pool.placeholder_style());
        match run_batch(pool, &sql, rows).await {
            Ok(affected) => {
                info!(table = %table, rows = rows.len(), affected, "Batch insert committed");
                Ok(true)
            }
            Err(e) => {
                error!(table = %table, error = %e, "Batch insert rolled back");
                Ok(false)
            }
        }
    }

    /// Update every row in one transaction, matching on `id_column`.
    ///
    /// Each entry pairs the new column values with the row's id. All-or-nothing
    /// like [`batch_insert`](Self::batch_insert).
    pub async fn batch_update(
        &self,
        pool: &DbPool,
        table: &str,
        columns: &[&str],
        rows: &[(Vec<QueryParam>, QueryParam)],
        id_column: &str,
    ) -> DbResult<bool> {
        if rows.is_empty() {
            return Ok(true);
        }
        if rows.iter().any(|(values, _)| values.len() != columns.len()) {
            error!(table = %table, "Batch update row width does not match column list");
            return Ok(false);
        }

        let sql = update_statement(table, columns, id_column, pool.placeholder_style());
        let bound: Vec<Vec<QueryParam>> = rows
            .iter()
            .map(|(values, id)| {
                let mut params = values.clone();
                params.push(id.clone());
                params
            })
            .collect();

        match run_batch(pool, &sql, &bound).await {
            Ok(affected) => {
                info!(table = %table, rows = rows.len(), affected, "Batch update committed");
                Ok(true)
            }
            Err(e) => {
                error!(table = %table, error = %e, "Batch update rolled back");
                Ok(false)
            }
        }
    }
}

fn insert_statement(table: &str, columns: &[&str], style: PlaceholderStyle) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        style.list(1, columns.len())
    )
}

fn update_statement(
    table: &str,
    columns: &[&str],
    id_column: &str,
    style: PlaceholderStyle,
) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = {}", style.render(i + 1)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} SET {assignments} WHERE {id_column} = {}",
        style.render(columns.len() + 1)
    )
}

/// Rewrite `:name` tokens to positional placeholders and collect the bound
/// values in token order.
///
/// Quoted literals are left untouched, as is the Postgres `::type` cast. A
/// name repeated in the statement binds its value once per occurrence.
fn expand_named(
    sql: &str,
    params: &NamedParams,
    style: PlaceholderStyle,
) -> DbResult<(String, Vec<QueryParam>)> {
    let mut out = String::with_capacity(sql.len());
    let mut bound = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            ':' => {
                if chars.peek() == Some(&':') {
                    // cast syntax, not a parameter
                    out.push(':');
                    out.push(chars.next().unwrap_or(':'));
                    continue;
                }
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(':');
                    continue;
                }
                let value = params.get(&name).ok_or_else(|| DbError::Database {
                    message: format!("no value bound for named parameter ':{name}'"),
                    sql_state: None,
                })?;
                bound.push(value.clone());
                out.push_str(&style.render(bound.len()));
            }
            _ => out.push(c),
        }
    }
    Ok((out, bound))
}

/// Run one statement per row inside a single transaction.
async fn run_batch(pool: &DbPool, sql: &str, rows: &[Vec<QueryParam>]) -> DbResult<u64> {
    match pool {
        DbPool::MySql(p) => mysql::run_batch(p, sql, rows).await,
        DbPool::Postgres(p) => postgres::run_batch(p, sql, rows).await,
        DbPool::SQLite(p) => sqlite::run_batch(p, sql, rows).await,
    }
}

pub(crate) mod mysql {
    use super::*;
    use sqlx::MySqlPool;
    use sqlx::mysql::{MySqlArguments, MySqlRow};

    pub async fn fetch_rows(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<MySqlRow>> {
        // Statements without parameters run unprepared; some DDL rejects
        // prepared execution
        if params.is_empty() {
            use sqlx::Executor;
            return pool.fetch_all(sql).await.map_err(DbError::from);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        query.fetch_all(pool).await.map_err(DbError::from)
    }

    pub async fn execute_write(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        if params.is_empty() {
            use sqlx::Executor;
            return Ok(pool.execute(sql).await?.rows_affected());
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    pub async fn execute_unprepared(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql).persistent(false);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    pub async fn run_batch(
        pool: &MySqlPool,
        sql: &str,
        rows: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        let mut tx = pool.begin().await?;
        let mut affected = 0u64;
        for params in rows {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub(crate) fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
        }
    }
}

pub(crate) mod postgres {
    use super::*;
    use sqlx::PgPool;
    use sqlx::postgres::{PgArguments, PgRow};

    pub async fn fetch_rows(
        pool: &PgPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<PgRow>> {
        if params.is_empty() {
            use sqlx::Executor;
            return pool.fetch_all(sql).await.map_err(DbError::from);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        query.fetch_all(pool).await.map_err(DbError::from)
    }

    pub async fn execute_write(pool: &PgPool, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        if params.is_empty() {
            use sqlx::Executor;
            return Ok(pool.execute(sql).await?.rows_affected());
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    pub async fn execute_unprepared(
        pool: &PgPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql).persistent(false);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    pub async fn run_batch(pool: &PgPool, sql: &str, rows: &[Vec<QueryParam>]) -> DbResult<u64> {
        let mut tx = pool.begin().await?;
        let mut affected = 0u64;
        for params in rows {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub(crate) fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
        }
    }
}

pub(crate) mod sqlite {
    use super::*;
    use sqlx::SqlitePool;
    use sqlx::sqlite::{SqliteArguments, SqliteRow};

    pub async fn fetch_rows(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<SqliteRow>> {
        if params.is_empty() {
            use sqlx::Executor;
            return pool.fetch_all(sql).await.map_err(DbError::from);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        query.fetch_all(pool).await.map_err(DbError::from)
    }

    pub async fn execute_write(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        if params.is_empty() {
            use sqlx::Executor;
            return Ok(pool.execute(sql).await?.rows_affected());
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    pub async fn execute_unprepared(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql).persistent(false);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    pub async fn run_batch(
        pool: &SqlitePool,
        sql: &str,
        rows: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        let mut tx = pool.begin().await?;
        let mut affected = 0u64;
        for params in rows {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub(crate) fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
        }
    }
}
