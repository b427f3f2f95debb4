//! Tenant Migration Orchestrator
//!
//! The only component that knows about "all tenants". Runs the `main` set
//! against the default namespace and the `tenant` set against every tenant
//! namespace with bounded concurrency. A failing namespace is recorded in
//! the report and never stops the pass.

use crate::config::{MigrationConfig, TenantDiscovery};
use crate::error::Result;
use crate::runner::MigrationRunner;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use gymdesk_database::{DatabaseError, Reconciliation, SchemaRegistry};
use gymdesk_models::{MigrationReport, MigrationSet, NamespaceOutcome, RunSummary, TenantId};
use serde::Serialize;

/// Anything that can bring one namespace up to date with one set
#[async_trait]
pub trait NamespaceMigrator: Send + Sync {
    async fn migrate(&self, set: MigrationSet, namespace: &str) -> Result<RunSummary>;
}

#[async_trait]
impl NamespaceMigrator for MigrationRunner {
    async fn migrate(&self, set: MigrationSet, namespace: &str) -> Result<RunSummary> {
        self.run(set, namespace).await
    }
}

/// Migrate each namespace with at most `max_concurrency` in flight and
/// collect one outcome per namespace, in input order.
pub async fn migrate_namespaces<M>(
    migrator: &M,
    set: MigrationSet,
    namespaces: Vec<String>,
    max_concurrency: usize,
) -> Vec<NamespaceOutcome>
where
    M: NamespaceMigrator + ?Sized,
{
    let mut outcomes: Vec<(usize, NamespaceOutcome)> = stream::iter(namespaces.into_iter().enumerate())
        .map(|(index, namespace)| async move {
            let outcome = match migrator.migrate(set, &namespace).await {
                Ok(summary) => NamespaceOutcome::Migrated(summary),
                Err(e) => {
                    tracing::error!("Migrating {} ({} set) failed: {}", namespace, set, e);
                    NamespaceOutcome::Failed {
                        namespace,
                        error: e.to_string(),
                    }
                }
            };
            (index, outcome)
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Reports of a startup pass. The tenant pass is skipped when the main set
/// fails, since tenant migrations may depend on shared objects.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub main: MigrationReport,
    pub tenant: Option<MigrationReport>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.main.is_clean() && self.tenant.as_ref().map_or(true, |r| r.is_clean())
    }
}

/// Namespaces a tenant pass migrates, plus registered tenants whose
/// namespace is gone (reported as failures)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantTargets {
    pub namespaces: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Clone)]
pub struct MigrationOrchestrator {
    runner: MigrationRunner,
    registry: SchemaRegistry,
    config: MigrationConfig,
}

impl MigrationOrchestrator {
    pub fn new(runner: MigrationRunner, registry: SchemaRegistry, config: MigrationConfig) -> Self {
        Self {
            runner,
            registry,
            config,
        }
    }

    pub fn runner(&self) -> &MigrationRunner {
        &self.runner
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Migrate every namespace the set targets. Errors only when the set of
    /// namespaces cannot be determined; per-namespace failures are reported.
    pub async fn migrate_all(&self, set: MigrationSet) -> Result<MigrationReport> {
        let started_at = Utc::now();

        let outcomes = match set {
            MigrationSet::Main => {
                let namespace = self.runner.database().default_schema().to_string();
                migrate_namespaces(&self.runner, set, vec![namespace], 1).await
            }
            MigrationSet::Tenant => {
                let targets = self.tenant_targets().await?;
                tracing::info!(
                    "Migrating {} tenant namespace(s), {} at a time",
                    targets.namespaces.len(),
                    self.config.max_concurrency
                );

                let mut outcomes = migrate_namespaces(
                    &self.runner,
                    set,
                    targets.namespaces,
                    self.config.max_concurrency,
                )
                .await;
                outcomes.extend(targets.missing.into_iter().map(|namespace| {
                    NamespaceOutcome::Failed {
                        namespace,
                        error: "registered in tenant_registry but the namespace does not exist"
                            .to_string(),
                    }
                }));
                outcomes
            }
        };

        let report = MigrationReport::from_outcomes(set, outcomes, started_at);
        if report.is_clean() {
            tracing::info!(
                "{} set: {} namespace(s) migrated, {} migration(s) applied, {} drifted",
                set,
                report.succeeded,
                report.applied,
                report.drifted
            );
        } else {
            tracing::error!(
                "{} set: {} of {} namespace(s) failed",
                set,
                report.failed,
                report.namespaces
            );
        }
        Ok(report)
    }

    /// Bring one tenant up to date, e.g. right after provisioning it
    pub async fn migrate_one(&self, tenant_id: TenantId) -> Result<RunSummary> {
        let namespace = SchemaRegistry::namespace_for(tenant_id);
        if !self.registry.exists(tenant_id).await? {
            return Err(DatabaseError::not_found("Tenant namespace", &namespace).into());
        }
        self.runner.run(MigrationSet::Tenant, &namespace).await
    }

    /// `main` then `tenant`, as run at application startup
    pub async fn migrate_startup(&self) -> Result<StartupReport> {
        let main = self.migrate_all(MigrationSet::Main).await?;
        if !main.is_clean() {
            tracing::error!("Main migrations failed, skipping tenant migrations");
            return Ok(StartupReport { main, tenant: None });
        }

        let tenant = self.migrate_all(MigrationSet::Tenant).await?;
        Ok(StartupReport {
            main,
            tenant: Some(tenant),
        })
    }

    /// Every catalog namespace following the tenant naming convention. In
    /// registry mode the registry is read once and compared: orphans are
    /// warned about and still migrated, missing namespaces become failures.
    pub async fn tenant_targets(&self) -> Result<TenantTargets> {
        let catalog = self.registry.list_tenant_namespaces().await?;

        if self.config.discovery == TenantDiscovery::Registry {
            if self.registry.registry_available().await? {
                let registered: Vec<String> = self
                    .registry
                    .list_registered()
                    .await?
                    .into_iter()
                    .map(|record| record.schema_name)
                    .collect();
                let reconciliation = Reconciliation::between(&registered, &catalog);
                reconciliation.log_warnings();
                return Ok(TenantTargets::from_reconciliation(catalog, reconciliation));
            }
            tracing::warn!("Tenant registry not available, migrating catalog namespaces only");
        }

        Ok(TenantTargets {
            namespaces: catalog,
            missing: Vec::new(),
        })
    }
}

impl TenantTargets {
    fn from_reconciliation(catalog: Vec<String>, reconciliation: Reconciliation) -> Self {
        Self {
            namespaces: catalog,
            missing: reconciliation.missing_namespaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails for the namespaces it is told to, tracks peak concurrency
    struct FakeMigrator {
        failing: Vec<&'static str>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeMigrator {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NamespaceMigrator for FakeMigrator {
        async fn migrate(&self, _set: MigrationSet, namespace: &str) -> Result<RunSummary> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.iter().any(|failing| *failing == namespace) {
                return Err(MigrationError::MigrationExecutionFailed {
                    namespace: namespace.to_string(),
                    version: 4,
                    name: "add_column".to_string(),
                    source: anyhow::anyhow!("syntax error"),
                });
            }

            let mut summary = RunSummary::new(namespace);
            summary.applied.push(4);
            Ok(summary)
        }
    }

    fn namespaces(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("tenant_{}", i)).collect()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_pass() {
        let migrator = FakeMigrator::new(vec!["tenant_2"]);

        let outcomes = migrate_namespaces(&migrator, MigrationSet::Tenant, namespaces(3), 2).await;

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].is_failed());
        assert!(outcomes[1].is_failed());
        assert!(!outcomes[2].is_failed());

        let report = MigrationReport::from_outcomes(MigrationSet::Tenant, outcomes, Utc::now());
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures[0].0, "tenant_2");
        assert!(failures[0].1.contains("syntax error"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let migrator = FakeMigrator::new(vec![]);

        let outcomes = migrate_namespaces(&migrator, MigrationSet::Tenant, namespaces(12), 3).await;

        assert_eq!(outcomes.len(), 12);
        assert!(migrator.peak.load(Ordering::SeqCst) <= 3);
        assert!(migrator.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_outcomes_keep_input_order() {
        let migrator = FakeMigrator::new(vec![]);
        let input = namespaces(8);

        let outcomes = migrate_namespaces(&migrator, MigrationSet::Tenant, input.clone(), 8).await;

        let order: Vec<&str> = outcomes.iter().map(|o| o.namespace()).collect();
        assert_eq!(order, input.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let migrator = FakeMigrator::new(vec![]);
        let outcomes = migrate_namespaces(&migrator, MigrationSet::Tenant, namespaces(2), 0).await;
        assert_eq!(outcomes.len(), 2);
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unregistered_namespaces_are_still_targeted() {
        // tenant_3 was provisioned before the registry existed
        let registered = names(&["tenant_1", "tenant_2"]);
        let catalog = names(&["tenant_1", "tenant_3"]);

        let reconciliation = Reconciliation::between(&registered, &catalog);
        assert_eq!(reconciliation.orphaned_namespaces, vec!["tenant_3"]);

        let targets = TenantTargets::from_reconciliation(catalog, reconciliation);
        assert_eq!(targets.namespaces, vec!["tenant_1", "tenant_3"]);
        assert_eq!(targets.missing, vec!["tenant_2"]);
    }

    #[test]
    fn test_consistent_registry_targets_the_catalog() {
        let catalog = names(&["tenant_1", "tenant_2"]);
        let reconciliation = Reconciliation::between(&catalog, &catalog);

        let targets = TenantTargets::from_reconciliation(catalog.clone(), reconciliation);
        assert_eq!(
            targets,
            TenantTargets {
                namespaces: catalog,
                missing: Vec::new(),
            }
        );
    }

    #[test]
    fn test_startup_report_cleanliness() {
        let clean = MigrationReport::from_outcomes(MigrationSet::Main, vec![], Utc::now());
        let report = StartupReport {
            main: clean.clone(),
            tenant: None,
        };
        assert!(report.is_clean());

        let failed = MigrationReport::from_outcomes(
            MigrationSet::Tenant,
            vec![NamespaceOutcome::Failed {
                namespace: "tenant_9".to_string(),
                error: "boom".to_string(),
            }],
            Utc::now(),
        );
        let report = StartupReport {
            main: clean,
            tenant: Some(failed),
        };
        assert!(!report.is_clean());
    }
}
