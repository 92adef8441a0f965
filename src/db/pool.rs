//! Connection management.
//!
//! The [`ConnectionManager`] owns the live handles for each role (primary,
//! replica, current shard) as sqlx pools. Pool reuse provides the persistent
//! connection semantics; sqlx's Result-based API provides raise-on-error.
//! Connection failures are returned as typed errors so the service entry point
//! decides whether to terminate or retry.

use crate::config::Settings;
use crate::db::resolver::ConnectionResolver;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ConnectionDescriptor, ConnectionState, DbRole};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
// Keeping at least one connection open gives persistent-connection reuse.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Placeholder style a backend expects in prepared statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` placeholders (MySQL, MariaDB, SQLite)
    Question,
    /// `$1, $2, ...` placeholders (PostgreSQL)
    Dollar,
}

impl PlaceholderStyle {
    /// Render the placeholder for the 1-based position `n`.
    pub fn render(&self, n: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Dollar => format!("${n}"),
        }
    }

    /// Comma-joined placeholder list for `count` parameters starting at
    /// 1-based position `start`.
    pub fn list(&self, start: usize, count: usize) -> String {
        (0..count)
            .map(|i| self.render(start + i))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the pool and its underlying connections.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// The placeholder style this backend expects.
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            DbPool::Postgres(_) => PlaceholderStyle::Dollar,
            _ => PlaceholderStyle::Question,
        }
    }
}

#[derive(Debug, Default)]
struct RoleSlot {
    pool: Option<DbPool>,
    state: ConnectionState,
}

impl RoleSlot {
    /// Install a new handle, fully replacing (and closing) the prior one.
    async fn replace(&mut self, pool: DbPool) {
        if let Some(old) = self.pool.take() {
            old.close().await;
        }
        self.pool = Some(pool);
        self.state = ConnectionState::Connected;
    }
}

/// Owns the live connection handles, one per role.
pub struct ConnectionManager {
    settings: Settings,
    primary: RwLock<RoleSlot>,
    replica: RwLock<RoleSlot>,
    shard: RwLock<RoleSlot>,
    shard_key: RwLock<Option<String>>,
}

impl ConnectionManager {
    /// Create a manager with no live connections.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            primary: RwLock::new(RoleSlot::default()),
            replica: RwLock::new(RoleSlot::default()),
            shard: RwLock::new(RoleSlot::default()),
            shard_key: RwLock::new(None),
        }
    }

    /// Create a manager and connect the primary immediately.
    pub async fn connect(settings: Settings) -> DbResult<Self> {
        let manager = Self::new(settings);
        manager.connect_primary().await?;
        Ok(manager)
    }

    /// The settings this manager was built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Connect (or reconnect) the primary handle.
    pub async fn connect_primary(&self) -> DbResult<()> {
        let descriptor = ConnectionResolver::resolve(&self.settings, DbRole::Primary)?;
        self.connect_role(&self.primary, descriptor).await
    }

    /// Connect the primary, falling back to the failover target if the primary
    /// attempt fails. The failover handle replaces the primary slot; only when
    /// both attempts fail is an error returned.
    pub async fn connect_with_failover(&self) -> DbResult<()> {
        match self.connect_primary().await {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                error!(error = %primary_err, "Primary database connection failed");
                info!("Attempting to connect to failover database");
                let descriptor = ConnectionResolver::resolve(&self.settings, DbRole::Failover)?;
                self.connect_role(&self.primary, descriptor)
                    .await
                    .map_err(|failover_err| DbError::FailoverFailed {
                        message: failover_err.to_string(),
                    })
            }
        }
    }

    /// Connect the read replica handle.
    pub async fn connect_to_replica(&self) -> DbResult<()> {
        let descriptor = ConnectionResolver::resolve(&self.settings, DbRole::Replica)?;
        self.connect_role(&self.replica, descriptor).await?;
        info!("Connected to replica database successfully");
        Ok(())
    }

    /// Connect to the shard selected by `shard_key`, fully replacing any prior
    /// shard handle.
    pub async fn connect_to_shard(&self, shard_key: &str) -> DbResult<()> {
        let descriptor = ConnectionResolver::resolve_shard(&self.settings, shard_key).await?;
        self.connect_role(&self.shard, descriptor).await?;
        *self.shard_key.write().await = Some(shard_key.to_string());
        info!(shard_key = %shard_key, "Connected to shard successfully");
        Ok(())
    }

    async fn connect_role(
        &self,
        slot: &RwLock<RoleSlot>,
        descriptor: ConnectionDescriptor,
    ) -> DbResult<()> {
        let role = descriptor.role;
        {
            let mut guard = slot.write().await;
            guard.state = ConnectionState::Connecting;
        }
        info!(
            role = %role,
            backend = %descriptor.kind,
            url = %descriptor.masked_url(),
            "Connecting to database"
        );

        match open_pool(&descriptor, self.settings.connect_timeout()).await {
            Ok(pool) => {
                let mut guard = slot.write().await;
                guard.replace(pool).await;
                info!(role = %role, "Connected");
                Ok(())
            }
            Err(err) => {
                let mut guard = slot.write().await;
                guard.state = ConnectionState::Failed;
                error!(role = %role, error = %err, "Database connection failed");
                Err(err)
            }
        }
    }

    /// The current primary handle.
    pub async fn primary(&self) -> DbResult<DbPool> {
        self.handle(&self.primary, DbRole::Primary).await
    }

    /// The current replica handle.
    pub async fn replica(&self) -> DbResult<DbPool> {
        self.handle(&self.replica, DbRole::Replica).await
    }

    /// The current shard handle.
    pub async fn shard(&self) -> DbResult<DbPool> {
        self.handle(&self.shard, DbRole::Shard).await
    }

    /// The shard key of the current shard handle, if one is connected.
    pub async fn current_shard_key(&self) -> Option<String> {
        self.shard_key.read().await.clone()
    }

    async fn handle(&self, slot: &RwLock<RoleSlot>, role: DbRole) -> DbResult<DbPool> {
        let guard = slot.read().await;
        guard
            .pool
            .clone()
            .ok_or_else(|| DbError::connection(role, "not connected"))
    }

    /// The connection state of the given role.
    ///
    /// A failover connection that succeeded reports through the primary slot,
    /// since the failover handle replaces the primary.
    pub async fn state(&self, role: DbRole) -> ConnectionState {
        match role {
            DbRole::Primary | DbRole::Failover => self.primary.read().await.state,
            DbRole::Replica => self.replica.read().await.state,
            DbRole::Shard => self.shard.read().await.state,
        }
    }

    /// Cheap liveness check against the primary.
    pub async fn ping(&self) -> DbResult<()> {
        let pool = self.primary().await?;
        let result = match &pool {
            DbPool::MySql(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            DbPool::Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            DbPool::SQLite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
        };
        match result {
            Ok(()) => {
                info!("Database server is reachable");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Database ping failed");
                Err(DbError::from(e))
            }
        }
    }

    /// Close every live handle.
    pub async fn close_all(&self) {
        for slot in [&self.primary, &self.replica, &self.shard] {
            let mut guard = slot.write().await;
            if let Some(pool) = guard.pool.take() {
                pool.close().await;
            }
            guard.state = ConnectionState::Disconnected;
        }
        *self.shard_key.write().await = None;
        info!("All connections closed");
    }
}

/// Open a pool for the descriptor's backend kind.
async fn open_pool(descriptor: &ConnectionDescriptor, connect_timeout: Duration) -> DbResult<DbPool> {
    let role = descriptor.role;
    match descriptor.kind {
        BackendKind::MySql | BackendKind::MariaDb => {
            let mut options = MySqlConnectOptions::new()
                .username(&descriptor.credentials.username)
                .password(&descriptor.credentials.password)
                .database(&descriptor.database)
                .charset(&descriptor.charset);
            options = match &descriptor.socket {
                Some(socket) => options.socket(socket),
                None => options.host(&descriptor.host).port(descriptor.port),
            };
            if descriptor.use_encryption {
                options = options.ssl_mode(MySqlSslMode::Required);
                if let Some(key) = &descriptor.encryption_key {
                    options = options.ssl_client_key(key);
                }
            }
            let pool = MySqlPoolOptions::new()
                .min_connections(DEFAULT_MIN_CONNECTIONS)
                .max_connections(DEFAULT_MAX_CONNECTIONS)
                .acquire_timeout(connect_timeout)
                .test_before_acquire(true)
                .connect_with(options)
                .await
                .map_err(|e| DbError::connection(role, e.to_string()))?;
            Ok(DbPool::MySql(pool))
        }
        BackendKind::Postgres => {
            let mut options = PgConnectOptions::new()
                .host(&descriptor.host)
                .port(descriptor.port)
                .username(&descriptor.credentials.username)
                .password(&descriptor.credentials.password)
                .database(&descriptor.database);
            if descriptor.use_encryption {
                options = options.ssl_mode(PgSslMode::Require);
            }
            let pool = PgPoolOptions::new()
                .min_connections(DEFAULT_MIN_CONNECTIONS)
                .max_connections(DEFAULT_MAX_CONNECTIONS)
                .acquire_timeout(connect_timeout)
                .test_before_acquire(true)
                .connect_with(options)
                .await
                .map_err(|e| DbError::connection(role, e.to_string()))?;
            Ok(DbPool::Postgres(pool))
        }
        BackendKind::SQLite => {
            let options = SqliteConnectOptions::new()
                .filename(&descriptor.database)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .min_connections(DEFAULT_MIN_CONNECTIONS)
                .max_connections(1)
                .acquire_timeout(connect_timeout)
                .connect_with(options)
                .await
                .map_err(|e| DbError::connection(role, e.to_string()))?;
            Ok(DbPool::SQLite(pool))
        }
        kind @ (BackendKind::SqlServer | BackendKind::Oracle | BackendKind::IbmDb2) => {
            Err(DbError::connection(
                role,
                format!("no driver available for {kind} connections"),
            ))
        }
    }
}
