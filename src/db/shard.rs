//! Shard map loading.
//!
//! The shard map is an external JSON document keyed by shard key; each value
//! carries the same fields as a connection descriptor plus credentials. The map
//! is read-only after load.

use crate::error::{DbError, DbResult, SettingField};
use crate::models::{BackendKind, ConnectionDescriptor, Credentials, DbRole};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One shard target as it appears in the shard map file.
///
/// Field names mirror the configuration keys so the same document can seed
/// either a process environment or a shard map.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardEntry {
    #[serde(rename = "DB_TYPE")]
    pub db_type: Option<String>,
    #[serde(rename = "DB_HOST")]
    pub host: Option<String>,
    #[serde(rename = "DB_PORT")]
    pub port: Option<u16>,
    #[serde(rename = "DB_NAME")]
    pub database: Option<String>,
    #[serde(rename = "DB_CHARSET")]
    pub charset: Option<String>,
    #[serde(rename = "DB_SOCKET")]
    pub socket: Option<String>,
    #[serde(rename = "DB_USERNAME")]
    pub username: Option<String>,
    #[serde(rename = "DB_PASSWORD")]
    pub password: Option<String>,
}

impl ShardEntry {
    /// Validate the entry and build a connection descriptor from it.
    pub fn descriptor(&self) -> DbResult<ConnectionDescriptor> {
        let kind = BackendKind::parse(
            self.db_type
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or(DbError::missing(SettingField::DbType))?,
        )?;
        let host = self
            .host
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(DbError::missing(SettingField::DbHost))?;
        let database = self
            .database
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(DbError::missing(SettingField::DbName))?;
        let port = self.port.ok_or(DbError::missing(SettingField::DbPort))?;
        let username = self
            .username
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(DbError::missing(SettingField::DbUsername))?;
        let password = self
            .password
            .clone()
            .ok_or(DbError::missing(SettingField::DbPassword))?;

        Ok(ConnectionDescriptor {
            kind,
            role: DbRole::Shard,
            host,
            port,
            database,
            charset: self
                .charset
                .clone()
                .unwrap_or_else(|| crate::config::DEFAULT_CHARSET.to_string()),
            socket: self.socket.clone().filter(|s| !s.is_empty()),
            use_encryption: false,
            encryption_key: None,
            credentials: Credentials::new(username, password),
        })
    }
}

/// Mapping from shard key to shard target. Loaded once, looked up per connect.
#[derive(Debug, Clone)]
pub struct ShardMap {
    entries: HashMap<String, ShardEntry>,
}

impl ShardMap {
    /// Load the shard map from a JSON file.
    ///
    /// A missing file or malformed document is a fatal configuration error.
    pub async fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            DbError::shard_config(format!("cannot read {}: {e}", path.display()))
        })?;
        let entries: HashMap<String, ShardEntry> = serde_json::from_str(&raw)
            .map_err(|e| DbError::shard_config(format!("invalid JSON in {}: {e}", path.display())))?;
        Ok(Self { entries })
    }

    /// Look up a shard entry by key.
    pub fn get(&self, shard_key: &str) -> DbResult<&ShardEntry> {
        self.entries
            .get(shard_key)
            .ok_or_else(|| DbError::shard_config(format!("shard key '{shard_key}' not found")))
    }

    /// Number of configured shards.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "eu-west": {
            "DB_TYPE": "mysql",
            "DB_HOST": "shard-eu.internal",
            "DB_PORT": 3306,
            "DB_NAME": "app_eu",
            "DB_USERNAME": "shard_user",
            "DB_PASSWORD": "shard_pass"
        },
        "us-east": {
            "DB_TYPE": "postgres",
            "DB_HOST": "shard-us.internal",
            "DB_PORT": 5432,
            "DB_NAME": "app_us",
            "DB_CHARSET": "utf8",
            "DB_USERNAME": "shard_user",
            "DB_PASSWORD": "shard_pass"
        }
    }"#;

    fn sample_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn load_and_lookup() {
        let file = sample_file();
        let map = ShardMap::load(file.path()).await.unwrap();
        assert_eq!(map.len(), 2);

        let desc = map.get("eu-west").unwrap().descriptor().unwrap();
        assert_eq!(desc.kind, BackendKind::MySql);
        assert_eq!(desc.role, DbRole::Shard);
        assert_eq!(desc.host, "shard-eu.internal");
        assert_eq!(desc.port, 3306);
        assert_eq!(desc.database, "app_eu");
        assert_eq!(desc.charset, "utf8");
    }

    #[tokio::test]
    async fn missing_file_is_shard_config_error() {
        let err = ShardMap::load("/nonexistent/shards.json").await.unwrap_err();
        assert_eq!(err.code(), "SHARDING_CONFIG_NOT_PROVIDED");
    }

    #[tokio::test]
    async fn malformed_json_is_shard_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = ShardMap::load(file.path()).await.unwrap_err();
        assert_eq!(err.code(), "SHARDING_CONFIG_NOT_PROVIDED");
    }

    #[tokio::test]
    async fn unknown_key_is_shard_config_error() {
        let file = sample_file();
        let map = ShardMap::load(file.path()).await.unwrap();
        let err = map.get("ap-south").unwrap_err();
        assert_eq!(err.code(), "SHARDING_CONFIG_NOT_PROVIDED");
        assert!(err.to_string().contains("ap-south"));
    }

    #[test]
    fn entry_missing_field_uses_field_code() {
        let entry = ShardEntry {
            db_type: Some("mysql".to_string()),
            host: None,
            port: Some(3306),
            database: Some("app".to_string()),
            charset: None,
            socket: None,
            username: Some("u".to_string()),
            password: Some("p".to_string()),
        };
        let err = entry.descriptor().unwrap_err();
        assert_eq!(err.code(), "DB_HOST_NOT_PROVIDED");
    }
}
