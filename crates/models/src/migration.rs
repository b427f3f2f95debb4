use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Which namespaces a migration set applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationSet {
    /// Applied once, to the shared default namespace
    Main,
    /// Applied to every tenant namespace
    Tenant,
}

impl MigrationSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for MigrationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "tenant" => Ok(Self::Tenant),
            other => Err(format!("unknown migration set '{}'", other)),
        }
    }
}

/// Ledger row: one applied migration in one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AppliedMigration {
    pub schema_name: String,
    pub version: i64,
    pub name: String,
    pub content_hash: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of one runner pass over a single namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub namespace: String,
    pub applied: Vec<i64>,
    pub skipped: usize,
    pub drifted: Vec<i64>,
}

impl RunSummary {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Per-namespace entry of an orchestrator report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NamespaceOutcome {
    Migrated(RunSummary),
    Failed { namespace: String, error: String },
}

impl NamespaceOutcome {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Migrated(summary) => &summary.namespace,
            Self::Failed { namespace, .. } => namespace,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Aggregate result of migrating a whole set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub set: MigrationSet,
    pub namespaces: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub applied: usize,
    pub drifted: usize,
    pub outcomes: Vec<NamespaceOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    /// Build a report from per-namespace outcomes. Outcomes are sorted by
    /// namespace so reports are stable regardless of completion order.
    pub fn from_outcomes(
        set: MigrationSet,
        mut outcomes: Vec<NamespaceOutcome>,
        started_at: DateTime<Utc>,
    ) -> Self {
        outcomes.sort_by(|a, b| a.namespace().cmp(b.namespace()));

        let mut report = Self {
            set,
            namespaces: outcomes.len(),
            succeeded: 0,
            failed: 0,
            applied: 0,
            drifted: 0,
            outcomes: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        };

        for outcome in &outcomes {
            match outcome {
                NamespaceOutcome::Migrated(summary) => {
                    report.succeeded += 1;
                    report.applied += summary.applied.len();
                    report.drifted += summary.drifted.len();
                }
                NamespaceOutcome::Failed { .. } => report.failed += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            NamespaceOutcome::Failed { namespace, error } => Some((namespace.as_str(), error.as_str())),
            NamespaceOutcome::Migrated(_) => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_set_parse() {
        assert_eq!("main".parse::<MigrationSet>().unwrap(), MigrationSet::Main);
        assert_eq!("Tenant".parse::<MigrationSet>().unwrap(), MigrationSet::Tenant);
        assert!("all".parse::<MigrationSet>().is_err());
    }

    #[test]
    fn test_report_aggregates_outcomes() {
        let ok = RunSummary {
            namespace: "tenant_2".to_string(),
            applied: vec![4, 5],
            skipped: 3,
            drifted: vec![1],
        };
        let outcomes = vec![
            NamespaceOutcome::Failed {
                namespace: "tenant_3".to_string(),
                error: "boom".to_string(),
            },
            NamespaceOutcome::Migrated(ok),
            NamespaceOutcome::Migrated(RunSummary::new("tenant_1")),
        ];

        let report = MigrationReport::from_outcomes(MigrationSet::Tenant, outcomes, Utc::now());

        assert_eq!(report.namespaces, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 2);
        assert_eq!(report.drifted, 1);
        assert!(!report.is_clean());
        assert_eq!(report.outcomes[0].namespace(), "tenant_1");
        assert_eq!(report.failures().collect::<Vec<_>>(), vec![("tenant_3", "boom")]);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = NamespaceOutcome::Failed {
            namespace: "tenant_9".to_string(),
            error: "x".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["namespace"], "tenant_9");
    }
}
