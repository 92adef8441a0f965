//! Explicit transactions with named savepoints.
//!
//! A [`DbTransaction`] wraps a driver transaction begun from a [`DbPool`].
//! Dropping it without committing rolls back, so a failed statement inside a
//! unit of work never half-applies. Savepoint names are restricted to
//! identifier characters because savepoint statements cannot take bound
//! parameters.

use crate::db::executor::{mysql, postgres, sqlite};
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::debug;

/// An open transaction on one backend.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Begin a transaction on the pool's backend.
    pub async fn begin(pool: &DbPool) -> DbResult<Self> {
        let tx = match pool {
            DbPool::MySql(p) => Self::MySql(p.begin().await?),
            DbPool::Postgres(p) => Self::Postgres(p.begin().await?),
            DbPool::SQLite(p) => Self::SQLite(p.begin().await?),
        };
        debug!("Transaction started");
        Ok(tx)
    }

    /// Execute a parameterized statement inside this transaction.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let affected = match self {
            Self::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = mysql::bind_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
            Self::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = postgres::bind_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
            Self::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = sqlite::bind_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self {
            Self::MySql(tx) => tx.commit().await?,
            Self::Postgres(tx) => tx.commit().await?,
            Self::SQLite(tx) => tx.commit().await?,
        }
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll the transaction back explicitly.
    pub async fn rollback(self) -> DbResult<()> {
        match self {
            Self::MySql(tx) => tx.rollback().await?,
            Self::Postgres(tx) => tx.rollback().await?,
            Self::SQLite(tx) => tx.rollback().await?,
        }
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Create a named savepoint.
    pub async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        let name = validate_savepoint_name(name)?;
        self.execute(&format!("SAVEPOINT {name}"), &[]).await?;
        debug!(savepoint = %name, "Savepoint created");
        Ok(())
    }

    /// Roll back to a named savepoint, keeping the transaction open.
    pub async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        let name = validate_savepoint_name(name)?;
        self.execute(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
            .await?;
        debug!(savepoint = %name, "Rolled back to savepoint");
        Ok(())
    }

    /// Release a named savepoint.
    pub async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        let name = validate_savepoint_name(name)?;
        self.execute(&format!("RELEASE SAVEPOINT {name}"), &[])
            .await?;
        debug!(savepoint = %name, "Savepoint released");
        Ok(())
    }
}

/// Savepoint statements cannot bind parameters, so names are restricted to
/// identifier characters.
fn validate_savepoint_name(name: &str) -> DbResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(DbError::Database {
            message: format!("invalid savepoint name '{name}'"),
            sql_state: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_names_are_identifiers() {
        assert!(validate_savepoint_name("sp1").is_ok());
        assert!(validate_savepoint_name("before_seed").is_ok());
        assert!(validate_savepoint_name("").is_err());
        assert!(validate_savepoint_name("1sp").is_err());
        assert!(validate_savepoint_name("sp; DROP TABLE users").is_err());
    }
}
