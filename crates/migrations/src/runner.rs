//! Migration Runner
//!
//! Brings one namespace up to date with one migration set:
//!
//! 1. ensure the namespace's ledger table exists
//! 2. discover the set's artifacts, sorted by version
//! 3. load the ledger rows
//! 4. plan each artifact as apply, skip or drift, and execute in order
//!
//! Every applied artifact runs in its own transaction holding the
//! namespace's advisory lock, so concurrent runners (two deploys starting at
//! once) serialise per namespace and never apply a version twice.

use crate::artifact::{ArtifactBody, MigrationArtifact};
use crate::config::DriftPolicy;
use crate::error::{MigrationError, Result};
use crate::ledger;
use crate::source::MigrationCatalog;
use gymdesk_database::{lock_namespace, quote_ident, Database, DatabaseError};
use gymdesk_models::{AppliedMigration, MigrationSet, RunSummary};
use sqlx::{Connection, PgConnection};
use std::collections::HashMap;
use std::sync::Arc;

/// Decision for one artifact against the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    Apply { version: i64 },
    Skip { version: i64 },
    Drift { version: i64, recorded: String, current: String },
}

/// Compare the (sorted) artifacts against the ledger. Pure; the runner
/// re-checks every `Apply` under the lock before executing it.
pub fn plan(artifacts: &[MigrationArtifact], applied: &[AppliedMigration]) -> Vec<PlanStep> {
    let recorded: HashMap<i64, &str> = applied
        .iter()
        .map(|row| (row.version, row.content_hash.trim()))
        .collect();

    artifacts
        .iter()
        .map(|artifact| {
            let current = artifact.content_hash();
            match recorded.get(&artifact.version) {
                None => PlanStep::Apply {
                    version: artifact.version,
                },
                Some(hash) if *hash == current => PlanStep::Skip {
                    version: artifact.version,
                },
                Some(hash) => PlanStep::Drift {
                    version: artifact.version,
                    recorded: hash.to_string(),
                    current,
                },
            }
        })
        .collect()
}

/// Plan one artifact against the ledger row read under the lock
fn recheck(artifact: &MigrationArtifact, recorded: Option<AppliedMigration>) -> PlanStep {
    let recorded: Vec<AppliedMigration> = recorded.into_iter().collect();
    plan(std::slice::from_ref(artifact), &recorded)
        .pop()
        .unwrap_or(PlanStep::Apply {
            version: artifact.version,
        })
}

#[derive(Clone)]
pub struct MigrationRunner {
    db: Database,
    catalog: Arc<MigrationCatalog>,
    drift_policy: DriftPolicy,
}

impl MigrationRunner {
    pub fn new(db: Database, catalog: MigrationCatalog, drift_policy: DriftPolicy) -> Self {
        Self {
            db,
            catalog: Arc::new(catalog),
            drift_policy,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    /// Apply pending `main` artifacts to the default namespace
    pub async fn run_main(&self) -> Result<RunSummary> {
        let namespace = self.db.default_schema().to_string();
        self.run(MigrationSet::Main, &namespace).await
    }

    /// Apply every pending artifact of `set` to `namespace`, in version
    /// order. Stops at the first failing artifact; earlier ones stay applied.
    pub async fn run(&self, set: MigrationSet, namespace: &str) -> Result<RunSummary> {
        let artifacts = self.catalog.discover(set).await?;
        let mut conn = self.db.acquire().await?;

        if !namespace_exists(&mut conn, namespace).await? {
            return Err(DatabaseError::not_found("Namespace", namespace).into());
        }

        {
            let mut tx = conn.begin().await?;
            lock_namespace(&mut tx, namespace).await?;
            ledger::ensure(&mut tx, namespace).await?;
            tx.commit().await?;
        }

        let applied = ledger::load(&mut conn, namespace).await?;
        let by_version: HashMap<i64, &MigrationArtifact> =
            artifacts.iter().map(|a| (a.version, a)).collect();

        let mut summary = RunSummary::new(namespace);

        for step in plan(&artifacts, &applied) {
            match step {
                PlanStep::Skip { version } => {
                    tracing::debug!("{}: {} v{} already applied", namespace, set, version);
                    summary.skipped += 1;
                }
                PlanStep::Drift {
                    version,
                    recorded,
                    current,
                } => {
                    let name = by_version
                        .get(&version)
                        .map(|a| a.name.clone())
                        .unwrap_or_default();
                    self.on_drift(namespace, version, name, recorded, current)?;
                    summary.drifted.push(version);
                }
                PlanStep::Apply { version } => {
                    let Some(artifact) = by_version.get(&version) else {
                        continue;
                    };
                    match self.apply(&mut conn, set, namespace, artifact).await? {
                        PlanStep::Apply { version } => summary.applied.push(version),
                        PlanStep::Skip { .. } => summary.skipped += 1,
                        PlanStep::Drift {
                            version,
                            recorded,
                            current,
                        } => {
                            self.on_drift(namespace, version, artifact.name.clone(), recorded, current)?;
                            summary.drifted.push(version);
                        }
                    }
                }
            }
        }

        if summary.applied.is_empty() {
            tracing::debug!("{}: {} set up to date", namespace, set);
        } else {
            tracing::info!(
                "{}: applied {} {} migration(s) {:?}",
                namespace,
                summary.applied.len(),
                set,
                summary.applied
            );
        }

        Ok(summary)
    }

    /// Ledger rows of `namespace`, empty if it has never been migrated
    pub async fn status(&self, namespace: &str) -> Result<Vec<AppliedMigration>> {
        let mut conn = self.db.acquire().await?;
        if !namespace_exists(&mut conn, namespace).await? {
            return Err(DatabaseError::not_found("Namespace", namespace).into());
        }
        if !ledger::exists(&mut conn, namespace).await? {
            return Ok(Vec::new());
        }
        Ok(ledger::load(&mut conn, namespace).await?)
    }

    fn on_drift(
        &self,
        namespace: &str,
        version: i64,
        name: String,
        recorded: String,
        current: String,
    ) -> Result<()> {
        match self.drift_policy {
            DriftPolicy::Warn => {
                tracing::warn!(
                    "{}: migration {} ({}) changed after it was applied (recorded {}, current {}); skipping",
                    namespace,
                    version,
                    name,
                    recorded,
                    current
                );
                Ok(())
            }
            DriftPolicy::Fail => Err(MigrationError::MigrationDrift {
                namespace: namespace.to_string(),
                version,
                name,
                recorded,
                current,
            }),
        }
    }

    /// Apply one artifact in its own transaction. When another runner
    /// recorded the version while this one waited for the lock, nothing runs
    /// and the returned step is `Skip` or, if its content differs, `Drift`.
    async fn apply(
        &self,
        conn: &mut PgConnection,
        set: MigrationSet,
        namespace: &str,
        artifact: &MigrationArtifact,
    ) -> Result<PlanStep> {
        let content_hash = artifact.content_hash();
        let mut tx = conn.begin().await?;

        lock_namespace(&mut tx, namespace).await?;

        let recorded = ledger::find(&mut tx, namespace, artifact.version).await?;
        match recheck(artifact, recorded) {
            PlanStep::Apply { .. } => {}
            step => {
                tracing::debug!(
                    "{}: {} v{} recorded concurrently",
                    namespace,
                    set,
                    artifact.version
                );
                tx.rollback().await?;
                return Ok(step);
            }
        }

        if let Err(source) = self.execute_body(&mut tx, set, namespace, artifact).await {
            // Dropping `tx` rolls the artifact back.
            tracing::error!("{}: {} failed: {:#}", namespace, artifact.label(), source);
            return Err(MigrationError::MigrationExecutionFailed {
                namespace: namespace.to_string(),
                version: artifact.version,
                name: artifact.name.clone(),
                source,
            });
        }

        ledger::record(
            &mut tx,
            namespace,
            artifact.version,
            &artifact.name,
            &content_hash,
        )
        .await?;
        tx.commit().await?;

        tracing::info!("{}: applied {}", namespace, artifact.label());
        Ok(PlanStep::Apply {
            version: artifact.version,
        })
    }

    async fn execute_body(
        &self,
        conn: &mut PgConnection,
        set: MigrationSet,
        namespace: &str,
        artifact: &MigrationArtifact,
    ) -> anyhow::Result<()> {
        // Transaction-local: reverts at commit or rollback.
        sqlx::query("SELECT pg_catalog.set_config('search_path', $1, true)")
            .bind(self.search_path(set, namespace))
            .execute(&mut *conn)
            .await?;

        match &artifact.body {
            ArtifactBody::Script(sql) => {
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?;
            }
            ArtifactBody::Procedure(procedure) => {
                procedure.apply(conn, namespace).await?;
            }
        }
        Ok(())
    }

    fn search_path(&self, set: MigrationSet, namespace: &str) -> String {
        let default_schema = self.db.default_schema();
        match set {
            MigrationSet::Tenant if namespace != default_schema => {
                format!("{}, {}", quote_ident(namespace), quote_ident(default_schema))
            }
            _ => quote_ident(namespace),
        }
    }
}

async fn namespace_exists(conn: &mut PgConnection, namespace: &str) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)")
        .bind(namespace)
        .fetch_one(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::content_hash;
    use chrono::Utc;

    fn script(version: i64, sql: &str) -> MigrationArtifact {
        MigrationArtifact::script(
            MigrationSet::Tenant,
            &format!("{:03}_step.sql", version),
            sql,
        )
        .unwrap()
    }

    fn row(version: i64, sql: &str) -> AppliedMigration {
        AppliedMigration {
            schema_name: "tenant_1".to_string(),
            version,
            name: "step".to_string(),
            content_hash: content_hash(sql),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_namespace_applies_everything_in_order() {
        let artifacts = vec![script(1, "A"), script(2, "B"), script(3, "C")];
        let steps = plan(&artifacts, &[]);
        assert_eq!(
            steps,
            vec![
                PlanStep::Apply { version: 1 },
                PlanStep::Apply { version: 2 },
                PlanStep::Apply { version: 3 },
            ]
        );
    }

    #[test]
    fn test_second_pass_is_all_skips() {
        let artifacts = vec![script(1, "A"), script(2, "B")];
        let applied = vec![row(1, "A"), row(2, "B")];
        assert!(plan(&artifacts, &applied)
            .iter()
            .all(|s| matches!(s, PlanStep::Skip { .. })));
    }

    #[test]
    fn test_only_new_versions_are_applied() {
        let artifacts = vec![script(1, "A"), script(2, "B"), script(4, "ADD COLUMN")];
        let applied = vec![row(1, "A"), row(2, "B")];
        assert_eq!(
            plan(&artifacts, &applied)[2],
            PlanStep::Apply { version: 4 }
        );
    }

    #[test]
    fn test_changed_content_is_drift_not_reapply() {
        let artifacts = vec![script(1, "A edited"), script(2, "B")];
        let applied = vec![row(1, "A")];
        let steps = plan(&artifacts, &applied);

        assert_eq!(
            steps[0],
            PlanStep::Drift {
                version: 1,
                recorded: content_hash("A"),
                current: content_hash("A edited"),
            }
        );
        assert_eq!(steps[1], PlanStep::Apply { version: 2 });
    }

    #[test]
    fn test_padded_hash_column_matches() {
        let artifacts = vec![script(1, "A")];
        let mut padded = row(1, "A");
        padded.content_hash.push(' ');
        assert_eq!(plan(&artifacts, &[padded]), vec![PlanStep::Skip { version: 1 }]);
    }

    #[test]
    fn test_ledger_rows_without_artifact_are_ignored() {
        let artifacts = vec![script(2, "B")];
        let applied = vec![row(1, "retired"), row(2, "B")];
        assert_eq!(plan(&artifacts, &applied), vec![PlanStep::Skip { version: 2 }]);
    }

    #[test]
    fn test_recheck_under_lock() {
        let artifact = script(4, "ALTER TABLE members ADD COLUMN nickname TEXT");

        assert_eq!(recheck(&artifact, None), PlanStep::Apply { version: 4 });
        assert_eq!(
            recheck(&artifact, Some(row(4, "ALTER TABLE members ADD COLUMN nickname TEXT"))),
            PlanStep::Skip { version: 4 }
        );
    }

    #[test]
    fn test_recheck_reports_concurrent_write_with_other_content() {
        // Another runner recorded v4 from a different script while we waited
        let artifact = script(4, "ALTER TABLE members ADD COLUMN nickname TEXT");
        let theirs = row(4, "ALTER TABLE members ADD COLUMN nickname VARCHAR(64)");

        assert_eq!(
            recheck(&artifact, Some(theirs)),
            PlanStep::Drift {
                version: 4,
                recorded: content_hash("ALTER TABLE members ADD COLUMN nickname VARCHAR(64)"),
                current: artifact.content_hash(),
            }
        );
    }
}
