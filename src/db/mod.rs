//! Database access layer.
//!
//! - Connection resolution from settings (primary/failover/replica/shard)
//! - Pool-backed connection management with per-role state
//! - Query execution with retry, caching, and timing policies
//! - Fluent SELECT builder
//! - Transactions with named savepoints
//! - Maintenance: schema validation, migrations, seeding, backups, replication

pub mod builder;
pub mod cache;
pub mod executor;
pub mod maintenance;
pub mod pool;
pub mod resolver;
pub mod shard;
pub mod transaction;
pub mod types;

pub use builder::QueryBuilder;
pub use cache::{MemoryCache, ResultCache, fingerprint};
pub use executor::{NamedParams, QueryExecutor};
pub use maintenance::{
    CommandOutput, CommandRunner, MaintenanceRunner, Seeder, SeederRegistry, SystemCommandRunner,
    backup,
};
pub use pool::{ConnectionManager, DbPool, PlaceholderStyle};
pub use resolver::ConnectionResolver;
pub use shard::{ShardEntry, ShardMap};
pub use transaction::DbTransaction;
