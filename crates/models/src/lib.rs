// Shared types for the tenant schema & migration engine
pub mod migration;
pub mod tenant;

pub use migration::{AppliedMigration, MigrationReport, MigrationSet, NamespaceOutcome, RunSummary};
pub use tenant::{InvalidTenantId, TenantId, TenantRecord, TenantStatus, TENANT_SCHEMA_PREFIX};
