//! Integration tests for maintenance operations against temp-file SQLite.
//!
//! Covers schema validation, transactional migrations, registered seeders,
//! replication configuration, table-metadata caching, and backups (file copy
//! for SQLite, mocked dump tool for server backends).

use async_trait::async_trait;
use db_gateway::config::Settings;
use db_gateway::db::{
    CommandOutput, CommandRunner, ConnectionManager, DbPool, DbTransaction, MaintenanceRunner,
    MemoryCache, QueryExecutor, ResultCache, Seeder, SeederRegistry, backup,
};
use db_gateway::error::DbResult;
use db_gateway::models::QueryParam;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, tempdir};

fn temp_db_path() -> String {
    NamedTempFile::new()
        .unwrap()
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn sqlite_settings(db_path: &str) -> Settings {
    Settings {
        db_type: Some("sqlite".to_string()),
        db_host: Some("localhost".to_string()),
        db_port: Some(0),
        db_name: Some(db_path.to_string()),
        db_username: Some("app".to_string()),
        db_password: Some(String::new()),
        ..Settings::default()
    }
}

async fn setup() -> (ConnectionManager, QueryExecutor, DbPool) {
    let manager = ConnectionManager::connect(sqlite_settings(&temp_db_path()))
        .await
        .unwrap();
    let executor = QueryExecutor::from_settings(manager.settings());
    let pool = manager.primary().await.unwrap();
    executor
        .execute(
            &pool,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, age INTEGER)",
            &[],
        )
        .await
        .unwrap();
    (manager, executor, pool)
}

#[tokio::test]
async fn schema_validation_passes_on_existing_columns() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);
    runner
        .validate_schema(&[("users", vec!["id", "email", "age"])])
        .await
        .unwrap();
}

#[tokio::test]
async fn schema_validation_names_table_and_column() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);
    let err = runner
        .validate_schema(&[("users", vec!["id", "phone"])])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SCHEMA_VALIDATION_FAILED");
    let message = err.to_string();
    assert!(message.contains("users"));
    assert!(message.contains("phone"));
}

#[tokio::test]
async fn migration_applies_whole_script() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);

    let mut script = NamedTempFile::new().unwrap();
    script
        .write_all(
            b"CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL);\n\
              INSERT INTO orders (total) VALUES (9.5);\n",
        )
        .unwrap();

    assert!(runner.run_migration(script.path()).await.unwrap());
    let rows = executor
        .fetch_all(&pool, "SELECT * FROM orders", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn failed_migration_rolls_back_entirely() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);

    let mut script = NamedTempFile::new().unwrap();
    script
        .write_all(
            b"CREATE TABLE orders (id INTEGER PRIMARY KEY);\n\
              INSERT INTO no_such_table (x) VALUES (1);\n",
        )
        .unwrap();

    assert!(!runner.run_migration(script.path()).await.unwrap());
    // The first statement must not have survived
    let err = executor.fetch_all(&pool, "SELECT * FROM orders", &[]).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn missing_migration_script_reports_false() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);
    assert!(
        !runner
            .run_migration("/nonexistent/migration.sql")
            .await
            .unwrap()
    );
}

struct UserSeeder;

#[async_trait]
impl Seeder for UserSeeder {
    fn name(&self) -> &str {
        "users"
    }

    async fn run(&self, tx: &mut DbTransaction) -> DbResult<()> {
        tx.execute(
            "INSERT INTO users (email, age) VALUES (?, ?)",
            &[QueryParam::from("a@example.com"), QueryParam::from(30)],
        )
        .await?;
        tx.execute(
            "INSERT INTO users (email, age) VALUES (?, ?)",
            &[QueryParam::from("b@example.com"), QueryParam::from(40)],
        )
        .await?;
        Ok(())
    }
}

struct BrokenSeeder;

#[async_trait]
impl Seeder for BrokenSeeder {
    fn name(&self) -> &str {
        "broken"
    }

    async fn run(&self, tx: &mut DbTransaction) -> DbResult<()> {
        tx.execute(
            "INSERT INTO users (email, age) VALUES (?, ?)",
            &[QueryParam::from("c@example.com"), QueryParam::from(50)],
        )
        .await?;
        // NOT NULL violation
        tx.execute(
            "INSERT INTO users (email, age) VALUES (?, ?)",
            &[QueryParam::Null, QueryParam::from(60)],
        )
        .await?;
        Ok(())
    }
}

#[tokio::test]
async fn registered_seeder_commits() {
    let (_manager, executor, pool) = setup().await;
    let mut registry = SeederRegistry::new();
    registry.register(Arc::new(UserSeeder));

    assert!(registry.seed("users", &pool).await.unwrap());
    let rows = executor
        .fetch_all(&pool, "SELECT * FROM users", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn failed_seeder_rolls_back() {
    let (_manager, executor, pool) = setup().await;
    let mut registry = SeederRegistry::new();
    registry.register(Arc::new(BrokenSeeder));

    assert!(!registry.seed("broken", &pool).await.unwrap());
    let rows = executor
        .fetch_all(&pool, "SELECT * FROM users", &[])
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn unregistered_seeder_reports_false() {
    let (_manager, _executor, pool) = setup().await;
    let registry = SeederRegistry::new();
    assert!(!registry.seed("users", &pool).await.unwrap());
}

#[tokio::test]
async fn replication_config_runs_statements_in_order() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);

    let mut config = NamedTempFile::new().unwrap();
    config
        .write_all(
            br#"[
                "CREATE TABLE repl_state (pos INTEGER)",
                "INSERT INTO repl_state (pos) VALUES (0)"
            ]"#,
        )
        .unwrap();

    runner.configure_replication(config.path()).await.unwrap();
    let rows = executor
        .fetch_all(&pool, "SELECT * FROM repl_state", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn malformed_replication_config_fails_before_any_statement() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);

    let mut config = NamedTempFile::new().unwrap();
    config.write_all(b"{ not an array").unwrap();

    let err = runner
        .configure_replication(config.path())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SERVER_REPLICATION_FAILED");

    let err = runner
        .configure_replication("/nonexistent/replication.json")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SERVER_REPLICATION_FAILED");
}

#[tokio::test]
async fn table_metadata_is_cached_under_metadata_key() {
    let (manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);
    let cache = MemoryCache::new();

    let columns = runner
        .cache_table_metadata("users", &cache, manager.settings().metadata_cache_ttl())
        .await
        .unwrap();
    assert_eq!(columns.len(), 3);
    let email = columns.iter().find(|c| c.name == "email").unwrap();
    assert!(!email.nullable);

    let cached = cache.get("metadata_users").await.unwrap();
    assert_eq!(cached.len(), 3);
}

#[tokio::test]
async fn metadata_caching_fails_for_unknown_table() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);
    let cache = MemoryCache::new();

    let err = runner
        .cache_table_metadata("missing", &cache, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "METADATA_CACHE_FAILED");
}

#[tokio::test]
async fn server_log_management_requires_mysql() {
    let (_manager, executor, pool) = setup().await;
    let runner = MaintenanceRunner::new(&executor, &pool);
    let err = runner
        .manage_server_logs("/var/log/mysql/general.log")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SERVER_LOG_MANAGEMENT_FAILED");
    assert!(err.is_fatal());
}

struct MockRunner {
    status_code: i32,
    stdout: Vec<u8>,
    stderr: String,
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        _program: &str,
        _args: &[String],
        _envs: &[(String, String)],
    ) -> DbResult<CommandOutput> {
        Ok(CommandOutput {
            status_code: Some(self.status_code),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

fn mysql_settings() -> Settings {
    Settings {
        db_type: Some("mysql".to_string()),
        db_host: Some("db.internal".to_string()),
        db_port: Some(3306),
        db_name: Some("appdb".to_string()),
        db_username: Some("app".to_string()),
        db_password: Some("secret".to_string()),
        ..Settings::default()
    }
}

#[tokio::test]
async fn sqlite_backup_copies_the_database_file() {
    let (manager, executor, pool) = setup().await;
    executor
        .execute(
            &pool,
            "INSERT INTO users (email, age) VALUES (?, ?)",
            &[QueryParam::from("a@example.com"), QueryParam::from(30)],
        )
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    let target = backup(
        manager.settings(),
        &MockRunner {
            status_code: 0,
            stdout: Vec::new(),
            stderr: String::new(),
        },
        dir.path(),
    )
    .await
    .unwrap();

    let name = target.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("backup_"));
    assert!(name.ends_with(".sqlite"));
    assert!(target.metadata().unwrap().len() > 0);
}

#[tokio::test]
async fn dump_tool_output_is_written_to_the_backup_file() {
    let dir = tempdir().unwrap();
    let target = backup(
        &mysql_settings(),
        &MockRunner {
            status_code: 0,
            stdout: b"-- dump\nCREATE TABLE users (id INT);\n".to_vec(),
            stderr: String::new(),
        },
        dir.path(),
    )
    .await
    .unwrap();

    let contents = std::fs::read_to_string(&target).unwrap();
    assert!(contents.starts_with("-- dump"));
    assert!(target.file_name().unwrap().to_str().unwrap().ends_with(".sql"));
}

#[tokio::test]
async fn failed_dump_carries_tool_output() {
    let dir = tempdir().unwrap();
    let err = backup(
        &mysql_settings(),
        &MockRunner {
            status_code: 1,
            stdout: Vec::new(),
            stderr: "Access denied for user 'app'".to_string(),
        },
        dir.path(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "SERVER_BACKUP_FAILED");
    assert!(err.to_string().contains("Access denied"));
}
