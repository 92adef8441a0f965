//! Error types for the database gateway.
//!
//! All failures are classified into one of two tiers before they cross a module
//! boundary: fatal configuration/connection errors (the caller should give up or
//! terminate) and operation-level failures (the caller may retry or abort).
//! Every error carries a stable string code so hosting applications can map it
//! to a user-facing message.

use crate::models::DbRole;
use thiserror::Error;

/// A required configuration field that was absent or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingField {
    DbType,
    DbHost,
    DbPort,
    DbName,
    DbUsername,
    DbPassword,
}

impl SettingField {
    /// The stable error code reported when this field is missing.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DbType => "DB_TYPE_NOT_PROVIDED",
            Self::DbHost => "DB_HOST_NOT_PROVIDED",
            Self::DbPort => "DB_PORT_NOT_PROVIDED",
            Self::DbName => "DB_NAME_NOT_PROVIDED",
            Self::DbUsername => "DB_USERNAME_NOT_PROVIDED",
            Self::DbPassword => "DB_PASSWORD_NOT_PROVIDED",
        }
    }

    /// Configuration key name, for error messages.
    pub fn key(&self) -> &'static str {
        match self {
            Self::DbType => "DB_TYPE",
            Self::DbHost => "DB_HOST",
            Self::DbPort => "DB_PORT",
            Self::DbName => "DB_NAME",
            Self::DbUsername => "DB_USERNAME",
            Self::DbPassword => "DB_PASSWORD",
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Required setting {} is not provided", field.key())]
    MissingSetting { field: SettingField },

    #[error("Unsupported database type: {value}")]
    UnsupportedBackend { value: String },

    #[error("{role} database connection failed: {message}")]
    ConnectionFailed { role: DbRole, message: String },

    #[error("Failover database connection failed: {message}")]
    FailoverFailed { message: String },

    #[error("Connection timeout configuration failed: {message}")]
    ConnectionTimeout { message: String },

    #[error("Sharding configuration not provided or shard key unknown: {detail}")]
    ShardConfig { detail: String },

    #[error("Query retry failed after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },

    #[error("Query builder is not enabled (set QUERY_BUILDER_ENABLED=true)")]
    QueryBuilderDisabled,

    #[error("Schema validation failed: {detail}")]
    SchemaValidation { detail: String },

    #[error("Metadata caching failed for table '{table}': {message}")]
    MetadataCache { table: String, message: String },

    #[error("Server backup failed: {output}")]
    BackupFailed { output: String },

    #[error("Server replication configuration failed: {detail}")]
    ReplicationFailed { detail: String },

    #[error("Server log management failed: {detail}")]
    LogManagement { detail: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g. "42P01" for an undefined table
        sql_state: Option<String>,
    },

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl DbError {
    /// Create a missing-setting error for the given field.
    pub fn missing(field: SettingField) -> Self {
        Self::MissingSetting { field }
    }

    /// Create an unsupported-backend error naming the offending value.
    pub fn unsupported(value: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            value: value.into(),
        }
    }

    /// Create a connection error for the given role.
    pub fn connection(role: DbRole, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            role,
            message: message.into(),
        }
    }

    /// Create a shard-configuration error.
    pub fn shard_config(detail: impl Into<String>) -> Self {
        Self::ShardConfig {
            detail: detail.into(),
        }
    }

    /// Create a schema-validation error naming table and column.
    pub fn schema_validation(table: &str, column: &str) -> Self {
        Self::SchemaValidation {
            detail: format!("Column {column} not found in table {table}"),
        }
    }

    /// The stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSetting { field } => field.code(),
            Self::UnsupportedBackend { .. } => "UNSUPPORTED_DB_TYPE",
            Self::ConnectionFailed {
                role: DbRole::Shard,
                ..
            } => "SHARDING_CONNECTION_FAILED",
            Self::ConnectionFailed { .. } => "DATABASE_CONNECTION_FAILED",
            Self::FailoverFailed { .. } => "DATABASE_CONNECTION_FAILOVER_FAILED",
            Self::ConnectionTimeout { .. } => "DATABASE_CONNECTION_TIMEOUT",
            Self::ShardConfig { .. } => "SHARDING_CONFIG_NOT_PROVIDED",
            Self::RetryExhausted { .. } => "QUERY_RETRY_FAILED",
            Self::QueryBuilderDisabled => "QUERY_BUILDER_NOT_ENABLED",
            Self::SchemaValidation { .. } => "SCHEMA_VALIDATION_FAILED",
            Self::MetadataCache { .. } => "METADATA_CACHE_FAILED",
            Self::BackupFailed { .. } => "SERVER_BACKUP_FAILED",
            Self::ReplicationFailed { .. } => "SERVER_REPLICATION_FAILED",
            Self::LogManagement { .. } => "SERVER_LOG_MANAGEMENT_FAILED",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    /// Whether this error belongs to the fatal tier (configuration/connection
    /// problems the caller cannot recover from) rather than the operation tier.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Database { .. } | Self::Io { .. })
    }
}

/// Classify sqlx errors so no driver exception crosses the executor boundary raw.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                DbError::Database {
                    message: db_err.message().to_string(),
                    sql_state,
                }
            }
            sqlx::Error::Io(io_err) => DbError::Io {
                message: io_err.to_string(),
            },
            sqlx::Error::PoolTimedOut => DbError::ConnectionTimeout {
                message: "connection pool acquire timed out".to_string(),
            },
            other => DbError::Database {
                message: other.to_string(),
                sql_state: None,
            },
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setting_codes() {
        assert_eq!(
            DbError::missing(SettingField::DbType).code(),
            "DB_TYPE_NOT_PROVIDED"
        );
        assert_eq!(
            DbError::missing(SettingField::DbHost).code(),
            "DB_HOST_NOT_PROVIDED"
        );
        assert_eq!(
            DbError::missing(SettingField::DbPort).code(),
            "DB_PORT_NOT_PROVIDED"
        );
        assert_eq!(
            DbError::missing(SettingField::DbName).code(),
            "DB_NAME_NOT_PROVIDED"
        );
    }

    #[test]
    fn unsupported_backend_names_value() {
        let err = DbError::unsupported("mongodb");
        assert_eq!(err.code(), "UNSUPPORTED_DB_TYPE");
        assert!(err.to_string().contains("mongodb"));
    }

    #[test]
    fn shard_connection_code() {
        let err = DbError::connection(DbRole::Shard, "refused");
        assert_eq!(err.code(), "SHARDING_CONNECTION_FAILED");
        let err = DbError::connection(DbRole::Primary, "refused");
        assert_eq!(err.code(), "DATABASE_CONNECTION_FAILED");
    }

    #[test]
    fn tier_classification() {
        assert!(DbError::missing(SettingField::DbType).is_fatal());
        assert!(
            DbError::RetryExhausted {
                attempts: 3,
                message: "x".into()
            }
            .is_fatal()
        );
        assert!(
            !DbError::Database {
                message: "syntax error".into(),
                sql_state: None
            }
            .is_fatal()
        );
    }

    #[test]
    fn log_management_is_fatal() {
        let err = DbError::LogManagement {
            detail: "Log output is not set to FILE.".into(),
        };
        assert_eq!(err.code(), "SERVER_LOG_MANAGEMENT_FAILED");
        assert!(err.is_fatal());
    }

    #[test]
    fn schema_validation_names_table_and_column() {
        let err = DbError::schema_validation("users", "email");
        assert!(err.to_string().contains("users"));
        assert!(err.to_string().contains("email"));
        assert_eq!(err.code(), "SCHEMA_VALIDATION_FAILED");
    }
}
