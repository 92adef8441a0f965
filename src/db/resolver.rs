//! Connection resolution.
//!
//! One resolver serves every role (primary, failover, replica, shard) instead
//! of a per-role copy of the backend-kind switch. Given validated settings and
//! a role it produces a [`ConnectionDescriptor`], from which the connection URL
//! is assembled.

use crate::config::Settings;
use crate::db::shard::ShardMap;
use crate::error::{DbError, DbResult, SettingField};
use crate::models::{BackendKind, ConnectionDescriptor, Credentials, DbRole};

/// Resolves connection descriptors from settings.
pub struct ConnectionResolver;

impl ConnectionResolver {
    /// Resolve a descriptor for the given role.
    ///
    /// Backend kind, host, database name, and port are mandatory; each missing
    /// field is a fatal configuration error with its own code. Failover and
    /// replica roles share the primary's backend kind, database name, and
    /// charset but use their own host, port, and credentials.
    pub fn resolve(settings: &Settings, role: DbRole) -> DbResult<ConnectionDescriptor> {
        let kind = BackendKind::parse(require(
            settings.db_type.as_deref(),
            SettingField::DbType,
        )?)?;

        let (host, port, username, password) = match role {
            DbRole::Primary => (
                require(settings.db_host.as_deref(), SettingField::DbHost)?,
                settings.db_port.ok_or(DbError::missing(SettingField::DbPort))?,
                require(settings.db_username.as_deref(), SettingField::DbUsername)?,
                settings
                    .db_password
                    .as_deref()
                    .ok_or(DbError::missing(SettingField::DbPassword))?,
            ),
            DbRole::Failover => (
                require(settings.db_failover_host.as_deref(), SettingField::DbHost)?,
                settings
                    .db_failover_port
                    .ok_or(DbError::missing(SettingField::DbPort))?,
                require(
                    settings.db_failover_username.as_deref(),
                    SettingField::DbUsername,
                )?,
                settings
                    .db_failover_password
                    .as_deref()
                    .ok_or(DbError::missing(SettingField::DbPassword))?,
            ),
            DbRole::Replica => (
                require(settings.replica_db_host.as_deref(), SettingField::DbHost)?,
                settings
                    .replica_db_port
                    .ok_or(DbError::missing(SettingField::DbPort))?,
                require(
                    settings.replica_db_username.as_deref(),
                    SettingField::DbUsername,
                )?,
                settings
                    .replica_db_password
                    .as_deref()
                    .ok_or(DbError::missing(SettingField::DbPassword))?,
            ),
            DbRole::Shard => {
                return Err(DbError::shard_config(
                    "shard descriptors are resolved through the shard map",
                ));
            }
        };

        let database = require(settings.db_name.as_deref(), SettingField::DbName)?;
        let encrypt = settings.encryption_applies_to(role) && kind.supports_encryption();

        Ok(ConnectionDescriptor {
            kind,
            role,
            host: host.to_string(),
            port,
            database: database.to_string(),
            charset: settings.charset().to_string(),
            socket: settings.db_socket.clone().filter(|s| !s.is_empty()),
            use_encryption: encrypt,
            encryption_key: if encrypt {
                settings.encryption_key.clone()
            } else {
                None
            },
            credentials: Credentials::new(username, password),
        })
    }

    /// Resolve a shard descriptor by key via the configured shard map.
    pub async fn resolve_shard(
        settings: &Settings,
        shard_key: &str,
    ) -> DbResult<ConnectionDescriptor> {
        let path = settings
            .sharding_config
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DbError::shard_config("SHARDING_CONFIG is not set"))?;

        let map = ShardMap::load(path).await?;
        let mut descriptor = map.get(shard_key)?.descriptor()?;

        if settings.encryption_applies_to(DbRole::Shard)
            && descriptor.kind.supports_encryption()
        {
            descriptor.use_encryption = true;
            descriptor.encryption_key = settings.encryption_key.clone();
        }
        Ok(descriptor)
    }
}

fn require<'a>(value: Option<&'a str>, field: SettingField) -> DbResult<&'a str> {
    value
        .filter(|s| !s.is_empty())
        .ok_or(DbError::missing(field))
}
