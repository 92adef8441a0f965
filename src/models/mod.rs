//! Data models for the database gateway.

pub mod connection;
pub mod query;

pub use connection::{
    BackendKind, ConnectionDescriptor, ConnectionState, Credentials, DbRole,
};
pub use query::{ColumnMetadata, QueryParam, Row};
