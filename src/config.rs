//! Configuration handling for the database gateway.
//!
//! Settings are assembled once per process from CLI arguments and environment
//! variables and treated as immutable for the duration of any database
//! operation. Required fields are optional at parse time; the connection
//! resolver enforces presence so that missing values surface as coded errors
//! instead of argument-parser failures.

use crate::error::DbResult;
use crate::models::DbRole;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_METADATA_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_SLOW_QUERY_THRESHOLD_SECS: u64 = 2;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Retry policy applied per statement execution (not per transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Configuration for the database gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-gateway",
    about = "Database access layer with primary/failover/replica/shard routing",
    version
)]
pub struct Settings {
    /// Backend kind (mysql, mariadb, postgres, sqlserver, oracle, ibmdb2, sqlite)
    #[arg(long, env = "DB_TYPE")]
    pub db_type: Option<String>,

    /// Primary database host
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Primary database port
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name (file path for sqlite)
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Primary credentials
    #[arg(long, env = "DB_USERNAME")]
    pub db_username: Option<String>,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Connection charset
    #[arg(long, env = "DB_CHARSET")]
    pub db_charset: Option<String>,

    /// Unix socket path (mysql/mariadb); overrides host/port when set
    #[arg(long, env = "DB_SOCKET")]
    pub db_socket: Option<String>,

    /// Append TLS parameters to connection URLs for roles in encryption_roles
    #[arg(long, env = "USE_ENCRYPTION")]
    pub use_encryption: bool,

    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Roles that get TLS parameters when use_encryption is set.
    /// Observed legacy behavior encrypts the primary only.
    #[arg(
        long,
        env = "ENCRYPTION_ROLES",
        value_delimiter = ',',
        default_value = "primary"
    )]
    pub encryption_roles: Vec<String>,

    /// Connect timeout in seconds
    #[arg(
        long,
        env = "DB_CONNECTION_TIMEOUT",
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_SECS
    )]
    pub db_connection_timeout: u64,

    // Failover target (same backend kind and database name as primary)
    #[arg(long, env = "DB_FAILOVER_HOST")]
    pub db_failover_host: Option<String>,

    #[arg(long, env = "DB_FAILOVER_PORT")]
    pub db_failover_port: Option<u16>,

    #[arg(long, env = "DB_FAILOVER_USERNAME")]
    pub db_failover_username: Option<String>,

    #[arg(long, env = "DB_FAILOVER_PASSWORD", hide_env_values = true)]
    pub db_failover_password: Option<String>,

    // Read replica target
    #[arg(long, env = "REPLICA_DB_HOST")]
    pub replica_db_host: Option<String>,

    #[arg(long, env = "REPLICA_DB_PORT")]
    pub replica_db_port: Option<u16>,

    #[arg(long, env = "REPLICA_DB_USERNAME")]
    pub replica_db_username: Option<String>,

    #[arg(long, env = "REPLICA_DB_PASSWORD", hide_env_values = true)]
    pub replica_db_password: Option<String>,

    /// Path to the JSON shard map
    #[arg(long, env = "SHARDING_CONFIG")]
    pub sharding_config: Option<String>,

    /// Gate for the fluent query builder
    #[arg(long, env = "QUERY_BUILDER_ENABLED")]
    pub query_builder_enabled: bool,

    /// Result cache TTL in seconds
    #[arg(long, env = "CACHE_TTL", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl: u64,

    /// Table metadata cache TTL in seconds
    #[arg(
        long,
        env = "METADATA_CACHE_TTL",
        default_value_t = DEFAULT_METADATA_CACHE_TTL_SECS
    )]
    pub metadata_cache_ttl: u64,

    /// Slow query threshold in seconds (log-only)
    #[arg(
        long,
        env = "SLOW_QUERY_THRESHOLD",
        default_value_t = DEFAULT_SLOW_QUERY_THRESHOLD_SECS
    )]
    pub slow_query_threshold: u64,

    /// Statement retry attempts
    #[arg(
        long,
        env = "QUERY_RETRY_ATTEMPTS",
        default_value_t = DEFAULT_RETRY_ATTEMPTS
    )]
    pub query_retry_attempts: u32,

    /// Delay between retry attempts in milliseconds
    #[arg(
        long,
        env = "QUERY_RETRY_DELAY",
        default_value_t = DEFAULT_RETRY_DELAY_MS
    )]
    pub query_retry_delay: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Settings {
    /// Create default settings (useful for testing).
    pub fn default_settings() -> Self {
        Self {
            db_type: None,
            db_host: None,
            db_port: None,
            db_name: None,
            db_username: None,
            db_password: None,
            db_charset: None,
            db_socket: None,
            use_encryption: false,
            encryption_key: None,
            encryption_roles: vec!["primary".to_string()],
            db_connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
            db_failover_host: None,
            db_failover_port: None,
            db_failover_username: None,
            db_failover_password: None,
            replica_db_host: None,
            replica_db_port: None,
            replica_db_username: None,
            replica_db_password: None,
            sharding_config: None,
            query_builder_enabled: false,
            cache_ttl: DEFAULT_CACHE_TTL_SECS,
            metadata_cache_ttl: DEFAULT_METADATA_CACHE_TTL_SECS,
            slow_query_threshold: DEFAULT_SLOW_QUERY_THRESHOLD_SECS,
            query_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            query_retry_delay: DEFAULT_RETRY_DELAY_MS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// The charset with its default applied.
    pub fn charset(&self) -> &str {
        self.db_charset.as_deref().unwrap_or(DEFAULT_CHARSET)
    }

    /// Connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connection_timeout)
    }

    /// Result cache TTL as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    /// Metadata cache TTL as a Duration.
    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_cache_ttl)
    }

    /// Slow query threshold as a Duration.
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_query_threshold)
    }

    /// Retry policy for statement execution.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.query_retry_attempts.max(1),
            delay: Duration::from_millis(self.query_retry_delay),
        }
    }

    /// Whether encryption parameters apply to the given role.
    pub fn encryption_applies_to(&self, role: DbRole) -> bool {
        if !self.use_encryption {
            return false;
        }
        self.encryption_roles.iter().any(|r| {
            matches!(
                (r.to_ascii_lowercase().as_str(), role),
                ("primary", DbRole::Primary)
                    | ("failover", DbRole::Failover)
                    | ("replica", DbRole::Replica)
                    | ("shard", DbRole::Shard)
            )
        })
    }

    /// Fail when the query builder gate is off.
    pub fn require_query_builder(&self) -> DbResult<()> {
        if self.query_builder_enabled {
            Ok(())
        } else {
            Err(crate::error::DbError::QueryBuilderDisabled)
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.charset(), "utf8");
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(settings.slow_query_threshold(), Duration::from_secs(2));
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(1000));
    }

    #[test]
    fn encryption_defaults_to_primary_only() {
        let settings = Settings {
            use_encryption: true,
            ..Settings::default()
        };
        assert!(settings.encryption_applies_to(DbRole::Primary));
        assert!(!settings.encryption_applies_to(DbRole::Replica));
        assert!(!settings.encryption_applies_to(DbRole::Failover));
        assert!(!settings.encryption_applies_to(DbRole::Shard));
    }

    #[test]
    fn encryption_roles_are_configurable() {
        let settings = Settings {
            use_encryption: true,
            encryption_roles: vec!["primary".to_string(), "replica".to_string()],
            ..Settings::default()
        };
        assert!(settings.encryption_applies_to(DbRole::Primary));
        assert!(settings.encryption_applies_to(DbRole::Replica));
        assert!(!settings.encryption_applies_to(DbRole::Shard));
    }

    #[test]
    fn encryption_off_applies_nowhere() {
        let settings = Settings {
            use_encryption: false,
            encryption_roles: vec!["primary".to_string(), "shard".to_string()],
            ..Settings::default()
        };
        assert!(!settings.encryption_applies_to(DbRole::Primary));
        assert!(!settings.encryption_applies_to(DbRole::Shard));
    }

    #[test]
    fn query_builder_gate() {
        let settings = Settings::default();
        let err = settings.require_query_builder().unwrap_err();
        assert_eq!(err.code(), "QUERY_BUILDER_NOT_ENABLED");

        let settings = Settings {
            query_builder_enabled: true,
            ..Settings::default()
        };
        assert!(settings.require_query_builder().is_ok());
    }

    #[test]
    fn retry_attempts_floor_at_one() {
        let settings = Settings {
            query_retry_attempts: 0,
            ..Settings::default()
        };
        assert_eq!(settings.retry_policy().max_attempts, 1);
    }

    #[test]
    fn settings_parse_from_flags() {
        let settings = Settings::parse_from([
            "db-gateway",
            "--db-type",
            "mysql",
            "--db-host",
            "localhost",
            "--db-port",
            "3306",
            "--db-name",
            "appdb",
        ]);
        assert_eq!(settings.db_type.as_deref(), Some("mysql"));
        assert_eq!(settings.db_port, Some(3306));
    }
}
