pub mod artifact;
pub mod config;
pub mod embedded;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod procedures;
pub mod runner;
pub mod source;

pub use artifact::{content_hash, ArtifactBody, ArtifactId, MigrationArtifact, MigrationProcedure};
pub use config::{DriftPolicy, MigrationConfig, TenantDiscovery};
pub use error::{MigrationError, Result};
pub use orchestrator::{
    migrate_namespaces, MigrationOrchestrator, NamespaceMigrator, StartupReport, TenantTargets,
};
pub use runner::{plan, MigrationRunner, PlanStep};
pub use source::{MigrationCatalog, ScriptSource};
