use crate::source::ScriptSource;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

/// What the runner does when an applied migration's content has changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Log a warning, skip the artifact and carry on
    #[default]
    Warn,
    /// Abort the namespace's run with `MigrationDrift`
    Fail,
}

impl FromStr for DriftPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown drift policy '{}' (expected warn or fail)", other)),
        }
    }
}

/// How the orchestrator enumerates tenant namespaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantDiscovery {
    /// Active rows of `tenant_registry`, reconciled against the catalog
    #[default]
    Registry,
    /// Catalog scan by naming convention only
    Catalog,
}

impl FromStr for TenantDiscovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "registry" => Ok(Self::Registry),
            "catalog" => Ok(Self::Catalog),
            other => Err(format!(
                "unknown tenant discovery '{}' (expected registry or catalog)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Root holding `main/` and `tenant/`; `None` uses the embedded scripts
    pub migrations_dir: Option<PathBuf>,
    pub drift_policy: DriftPolicy,
    /// Namespaces migrated at the same time during a tenant pass
    pub max_concurrency: usize,
    pub discovery: TenantDiscovery,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: None,
            drift_policy: DriftPolicy::Warn,
            max_concurrency: 4,
            discovery: TenantDiscovery::Registry,
        }
    }
}

impl MigrationConfig {
    /// Load configuration from environment variables. Unparseable values
    /// fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            migrations_dir: std::env::var("MIGRATIONS_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            drift_policy: parse_env("MIGRATION_DRIFT_POLICY", defaults.drift_policy),
            max_concurrency: parse_env("MIGRATION_MAX_CONCURRENCY", defaults.max_concurrency).max(1),
            discovery: parse_env("TENANT_DISCOVERY", defaults.discovery),
        }
    }

    pub fn script_source(&self) -> ScriptSource {
        match &self.migrations_dir {
            Some(dir) => ScriptSource::Directory(dir.clone()),
            None => ScriptSource::Embedded,
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            tracing::warn!("Ignoring {}={:?}: {}; using {:?}", key, raw, e, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("warn".parse::<DriftPolicy>().unwrap(), DriftPolicy::Warn);
        assert_eq!("FAIL".parse::<DriftPolicy>().unwrap(), DriftPolicy::Fail);
        assert!("ignore".parse::<DriftPolicy>().is_err());
        assert_eq!("catalog".parse::<TenantDiscovery>().unwrap(), TenantDiscovery::Catalog);
        assert!("dns".parse::<TenantDiscovery>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.drift_policy, DriftPolicy::Warn);
        assert_eq!(config.discovery, TenantDiscovery::Registry);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.script_source(), ScriptSource::Embedded);
    }

    #[test]
    fn test_directory_source_when_dir_configured() {
        let config = MigrationConfig {
            migrations_dir: Some(PathBuf::from("/srv/migrations")),
            ..Default::default()
        };
        assert_eq!(
            config.script_source(),
            ScriptSource::Directory(PathBuf::from("/srv/migrations"))
        );
    }
}
