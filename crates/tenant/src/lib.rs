// Tenant-scoped execution and namespace provisioning.
// Business modules go through `TenantExecutor`; onboarding goes through
// `SchemaProvisioner`.

pub mod baseline;
pub mod context;
pub mod provisioner;

pub use context::{current_namespace, TenantExecutor, TenantLease};
pub use provisioner::{ProvisionOutcome, SchemaProvisioner};
