//! Maintenance operations.
//!
//! Schema validation, migrations, seeding, backups, replication configuration,
//! and table-metadata caching. Migrations and seeds run inside a single
//! transaction and report their outcome as a bool; schema, backup, and
//! replication problems are fatal coded errors.

use crate::config::Settings;
use crate::db::cache::ResultCache;
use crate::db::executor::QueryExecutor;
use crate::db::pool::DbPool;
use crate::db::resolver::ConnectionResolver;
use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ColumnMetadata, DbRole, QueryParam, Row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Runs maintenance operations against one pool.
pub struct MaintenanceRunner<'a> {
    executor: &'a QueryExecutor,
    pool: &'a DbPool,
}

impl<'a> MaintenanceRunner<'a> {
    pub fn new(executor: &'a QueryExecutor, pool: &'a DbPool) -> Self {
        Self { executor, pool }
    }

    /// Introspect the columns of a table.
    ///
    /// Uses `information_schema` on server backends and `PRAGMA table_info` on
    /// SQLite. An unknown table yields an empty list.
    pub async fn table_columns(&self, table: &str) -> DbResult<Vec<ColumnMetadata>> {
        match self.pool {
            DbPool::MySql(_) => {
                let sql = "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE \
                           FROM information_schema.COLUMNS \
                           WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                           ORDER BY ORDINAL_POSITION";
                let rows = self
                    .executor
                    .fetch_all(self.pool, sql, &[QueryParam::from(table)])
                    .await?;
                Ok(rows.iter().map(information_schema_column).collect())
            }
            DbPool::Postgres(_) => {
                let sql = "SELECT column_name AS \"COLUMN_NAME\", \
                                  data_type AS \"DATA_TYPE\", \
                                  is_nullable AS \"IS_NULLABLE\" \
                           FROM information_schema.columns \
                           WHERE table_name = $1 \
                           ORDER BY ordinal_position";
                let rows = self
                    .executor
                    .fetch_all(self.pool, sql, &[QueryParam::from(table)])
                    .await?;
                Ok(rows.iter().map(information_schema_column).collect())
            }
            DbPool::SQLite(_) => {
                // PRAGMA cannot bind parameters
                let table = validate_identifier(table)?;
                let sql = format!("PRAGMA table_info({table})");
                let rows = self.executor.fetch_all(self.pool, &sql, &[]).await?;
                Ok(rows.iter().map(pragma_column).collect())
            }
        }
    }

    /// Validate that every expected column exists.
    ///
    /// `expected` maps table name to required column names; the first missing
    /// column fails validation with an error naming table and column.
    pub async fn validate_schema(&self, expected: &[(&str, Vec<&str>)]) -> DbResult<()> {
        for (table, columns) in expected {
            let actual = self.table_columns(table).await?;
            for column in columns {
                if !actual.iter().any(|c| c.name == *column) {
                    error!(table = %table, column = %column, "Schema validation failed");
                    return Err(DbError::schema_validation(table, column));
                }
            }
        }
        info!("Schema validation passed");
        Ok(())
    }

    /// Run a migration script in one transaction.
    ///
    /// The whole script is applied or none of it is. Failures are logged and
    /// reported as `false`.
    pub async fn run_migration(&self, path: impl AsRef<Path>) -> DbResult<bool> {
        let path = path.as_ref();
        let script = match tokio::fs::read_to_string(path).await {
            Ok(script) => script,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Cannot read migration script");
                return Ok(false);
            }
        };

        match apply_script(self.pool, &script).await {
            Ok(()) => {
                info!(path = %path.display(), "Migration applied");
                Ok(true)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Migration rolled back");
                Ok(false)
            }
        }
    }

    /// Apply replication configuration: a JSON array of SQL statements
    /// executed in order.
    ///
    /// A missing or malformed file fails before any statement runs.
    pub async fn configure_replication(&self, path: impl AsRef<Path>) -> DbResult<()> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DbError::ReplicationFailed {
                detail: format!("cannot read {}: {e}", path.display()),
            })?;
        let statements: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| DbError::ReplicationFailed {
                detail: format!("invalid JSON in {}: {e}", path.display()),
            })?;

        for sql in &statements {
            self.executor
                .execute(self.pool, sql, &[])
                .await
                .map_err(|e| DbError::ReplicationFailed {
                    detail: format!("statement '{sql}' failed: {e}"),
                })?;
        }
        info!(statements = statements.len(), "Replication configuration applied");
        Ok(())
    }

    /// Cache a table's column metadata under `metadata_<table>`.
    pub async fn cache_table_metadata(
        &self,
        table: &str,
        cache: &dyn ResultCache,
        ttl: Duration,
    ) -> DbResult<Vec<ColumnMetadata>> {
        let columns = self
            .table_columns(table)
            .await
            .map_err(|e| DbError::MetadataCache {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        if columns.is_empty() {
            return Err(DbError::MetadataCache {
                table: table.to_string(),
                message: "table has no columns or does not exist".to_string(),
            });
        }

        let rows: Vec<Row> = columns
            .iter()
            .filter_map(|c| match serde_json::to_value(c) {
                Ok(serde_json::Value::Object(map)) => Some(map),
                _ => None,
            })
            .collect();
        cache.set(&format!("metadata_{table}"), rows, ttl).await;
        info!(table = %table, columns = columns.len(), "Table metadata cached");
        Ok(columns)
    }

    /// Point the server's general query log at `log_file_path`.
    ///
    /// MySQL/MariaDB only: the server must already log to files
    /// (`log_output = FILE`); when the current `general_log_file` differs it is
    /// redirected via `SET GLOBAL`. Every failure is the fatal
    /// `SERVER_LOG_MANAGEMENT_FAILED`.
    pub async fn manage_server_logs(&self, log_file_path: &str) -> DbResult<()> {
        if !matches!(self.pool, DbPool::MySql(_)) {
            return Err(DbError::LogManagement {
                detail: "server log management requires a MySQL or MariaDB connection"
                    .to_string(),
            });
        }

        let log_output =
            self.server_variable("log_output")
                .await?
                .ok_or_else(|| DbError::LogManagement {
                    detail: "Unable to retrieve log output setting.".to_string(),
                })?;
        if !log_output.eq_ignore_ascii_case("FILE") {
            return Err(DbError::LogManagement {
                detail: "Log output is not set to FILE.".to_string(),
            });
        }

        let current =
            self.server_variable("general_log_file")
                .await?
                .ok_or_else(|| DbError::LogManagement {
                    detail: "Unable to retrieve current log file path.".to_string(),
                })?;
        if current == log_file_path {
            return Ok(());
        }

        self.executor
            .execute(
                self.pool,
                "SET GLOBAL general_log_file = ?",
                &[QueryParam::from(log_file_path)],
            )
            .await
            .map_err(|e| DbError::LogManagement {
                detail: e.to_string(),
            })?;
        info!(path = %log_file_path, "General log file updated");
        Ok(())
    }

    /// Read one server variable via `SHOW VARIABLES LIKE`.
    ///
    /// The pattern cannot be bound in a prepared SHOW statement; callers pass
    /// fixed variable names only.
    async fn server_variable(&self, name: &str) -> DbResult<Option<String>> {
        let name = validate_identifier(name)?;
        let sql = format!("SHOW VARIABLES LIKE '{name}'");
        let row = self
            .executor
            .fetch_one(self.pool, &sql, &[])
            .await
            .map_err(|e| DbError::LogManagement {
                detail: e.to_string(),
            })?;
        Ok(row
            .and_then(|r| r.get("Value").and_then(|v| v.as_str()).map(String::from)))
    }
}

fn information_schema_column(row: &Row) -> ColumnMetadata {
    let text = |key: &str| {
        row.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    ColumnMetadata {
        name: text("COLUMN_NAME"),
        type_name: text("DATA_TYPE"),
        nullable: text("IS_NULLABLE").eq_ignore_ascii_case("YES"),
    }
}

fn pragma_column(row: &Row) -> ColumnMetadata {
    ColumnMetadata {
        name: row
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        type_name: row
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        nullable: row.get("notnull").and_then(|v| v.as_i64()) == Some(0),
    }
}

/// Run a whole SQL script inside one transaction.
async fn apply_script(pool: &DbPool, script: &str) -> DbResult<()> {
    match pool {
        DbPool::MySql(p) => {
            let mut tx = p.begin().await?;
            sqlx::raw_sql(script).execute(&mut *tx).await?;
            tx.commit().await?;
        }
        DbPool::Postgres(p) => {
            let mut tx = p.begin().await?;
            sqlx::raw_sql(script).execute(&mut *tx).await?;
            tx.commit().await?;
        }
        DbPool::SQLite(p) => {
            let mut tx = p.begin().await?;
            sqlx::raw_sql(script).execute(&mut *tx).await?;
            tx.commit().await?;
        }
    }
    Ok(())
}

/// Table and savepoint names interpolated into statement text must be plain
/// identifiers.
fn validate_identifier(name: &str) -> DbResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(DbError::Database {
            message: format!("invalid identifier '{name}'"),
            sql_state: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// A registered data seeder. Each seeder runs inside its own transaction; an
/// error rolls every statement back.
#[async_trait]
pub trait Seeder: Send + Sync {
    /// Registry lookup name.
    fn name(&self) -> &str;

    async fn run(&self, tx: &mut DbTransaction) -> DbResult<()>;
}

/// Static lookup of seeders by name.
#[derive(Default)]
pub struct SeederRegistry {
    seeders: HashMap<String, Arc<dyn Seeder>>,
}

impl SeederRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, seeder: Arc<dyn Seeder>) {
        self.seeders.insert(seeder.name().to_string(), seeder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seeders.contains_key(name)
    }

    /// Run the named seeder in one transaction.
    ///
    /// An unknown name or a failed seeder is logged and reported as `false`.
    pub async fn seed(&self, name: &str, pool: &DbPool) -> DbResult<bool> {
        let Some(seeder) = self.seeders.get(name) else {
            warn!(seeder = %name, "Seeder not registered");
            return Ok(false);
        };

        let mut tx = DbTransaction::begin(pool).await?;
        match seeder.run(&mut tx).await {
            Ok(()) => {
                tx.commit().await?;
                info!(seeder = %name, "Seeding completed");
                Ok(true)
            }
            Err(e) => {
                error!(seeder = %name, error = %e, "Seeding rolled back");
                tx.rollback().await?;
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

/// Output of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Narrow collaborator for running external dump tools, so backups are
/// testable without the tools installed.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> DbResult<CommandOutput>;
}

/// Runs commands through the system shell environment.
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> DbResult<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await?;
        Ok(CommandOutput {
            status_code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Back up the primary database into `dir` using the backend's dump tool
/// (`mysqldump` / `pg_dump`); SQLite databases are copied as files.
///
/// Returns the path of the written backup file. A nonzero exit is fatal and
/// carries the captured tool output.
pub async fn backup(
    settings: &Settings,
    runner: &dyn CommandRunner,
    dir: impl AsRef<Path>,
) -> DbResult<PathBuf> {
    let descriptor = ConnectionResolver::resolve(settings, DbRole::Primary)?;
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(backup_filename(
        &descriptor.database,
        descriptor.kind,
        Utc::now(),
    ));

    match descriptor.kind {
        BackendKind::SQLite => {
            tokio::fs::copy(&descriptor.database, &target)
                .await
                .map_err(|e| DbError::BackupFailed {
                    output: format!("copying {}: {e}", descriptor.database),
                })?;
        }
        BackendKind::MySql | BackendKind::MariaDb => {
            let args = vec![
                format!("--host={}", descriptor.host),
                format!("--port={}", descriptor.port),
                format!("--user={}", descriptor.credentials.username),
                "--single-transaction".to_string(),
                descriptor.database.clone(),
            ];
            let envs = vec![(
                "MYSQL_PWD".to_string(),
                descriptor.credentials.password.clone(),
            )];
            let output = runner.run("mysqldump", &args, &envs).await?;
            if !output.success() {
                return Err(DbError::BackupFailed {
                    output: output.stderr,
                });
            }
            tokio::fs::write(&target, &output.stdout).await?;
        }
        BackendKind::Postgres => {
            let args = vec![
                format!("--host={}", descriptor.host),
                format!("--port={}", descriptor.port),
                format!("--username={}", descriptor.credentials.username),
                format!("--dbname={}", descriptor.database),
            ];
            let envs = vec![(
                "PGPASSWORD".to_string(),
                descriptor.credentials.password.clone(),
            )];
            let output = runner.run("pg_dump", &args, &envs).await?;
            if !output.success() {
                return Err(DbError::BackupFailed {
                    output: output.stderr,
                });
            }
            tokio::fs::write(&target, &output.stdout).await?;
        }
        kind => {
            return Err(DbError::BackupFailed {
                output: format!("no backup tool configured for {kind}"),
            });
        }
    }

    info!(path = %target.display(), "Backup written");
    Ok(target)
}

fn backup_filename(database: &str, kind: BackendKind, now: DateTime<Utc>) -> String {
    let stem = Path::new(database)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(database);
    let extension = match kind {
        BackendKind::SQLite => "sqlite",
        _ => "sql",
    };
    format!("backup_{stem}_{}.{extension}", now.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn identifiers_are_validated() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("user_accounts").is_ok());
        assert!(validate_identifier("users; DROP TABLE x").is_err());
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn backup_filenames_are_timestamped() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            backup_filename("appdb", BackendKind::MySql, now),
            "backup_appdb_20260314092653.sql"
        );
        assert_eq!(
            backup_filename("/var/lib/app/data.db", BackendKind::SQLite, now),
            "backup_data_20260314092653.sqlite"
        );
    }

    #[test]
    fn pragma_columns_map_nullability() {
        let mut row = Row::new();
        row.insert("name".to_string(), serde_json::json!("email"));
        row.insert("type".to_string(), serde_json::json!("TEXT"));
        row.insert("notnull".to_string(), serde_json::json!(1));
        let col = pragma_column(&row);
        assert_eq!(col.name, "email");
        assert_eq!(col.type_name, "TEXT");
        assert!(!col.nullable);
    }

    #[test]
    fn information_schema_columns_map_nullability() {
        let mut row = Row::new();
        row.insert("COLUMN_NAME".to_string(), serde_json::json!("id"));
        row.insert("DATA_TYPE".to_string(), serde_json::json!("bigint"));
        row.insert("IS_NULLABLE".to_string(), serde_json::json!("NO"));
        let col = information_schema_column(&row);
        assert_eq!(col.name, "id");
        assert!(!col.nullable);
    }

    #[test]
    fn registry_tracks_registered_names() {
        struct NoopSeeder;

        #[async_trait]
        impl Seeder for NoopSeeder {
            fn name(&self) -> &str {
                "noop"
            }

            async fn run(&self, _tx: &mut DbTransaction) -> DbResult<()> {
                Ok(())
            }
        }

        let mut registry = SeederRegistry::new();
        registry.register(Arc::new(NoopSeeder));
        assert!(registry.contains("noop"));
        assert!(!registry.contains("users"));
    }
}
