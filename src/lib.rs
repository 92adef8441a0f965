//! Database access gateway.
//!
//! Resolves connection parameters from configuration, manages primary,
//! failover, replica, and shard connections (SQLite, PostgreSQL, MySQL and
//! MariaDB), executes queries with retry/caching/logging policies, and runs
//! schema, migration, seeding, backup, and replication maintenance operations.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{RetryPolicy, Settings};
pub use db::{ConnectionManager, DbPool, QueryBuilder, QueryExecutor};
pub use error::{DbError, DbResult};
