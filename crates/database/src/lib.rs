pub mod connection;
pub mod error;
pub mod schema_registry;

pub use connection::{Database, DatabaseConfig, PoolStats};
pub use error::{DatabaseError, Result};
pub use schema_registry::{
    is_valid_identifier, lock_namespace, quote_ident, Reconciliation, SchemaRegistry,
};
