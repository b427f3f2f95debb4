//! Migration artifacts
//!
//! An artifact is one immutable, versioned unit of schema change identified
//! by `(set, version)`. Script artifacts come from `<version>_<name>.sql`
//! files; procedure artifacts are registered in code under a
//! `<version>_<name>` identifier.

use crate::error::{MigrationError, Result};
use async_trait::async_trait;
use gymdesk_models::MigrationSet;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use std::fmt;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref ARTIFACT_ID_REGEX: regex::Regex =
        regex::Regex::new(r"^(\d+)_([a-z0-9][a-z0-9_]*)(?:\.([A-Za-z0-9]+))?$").unwrap();
}

/// File extensions the script source understands
pub const SCRIPT_EXTENSION: &str = "sql";

/// Imperative migration step, run inside the runner's transaction with the
/// namespace already on the search path.
#[async_trait]
pub trait MigrationProcedure: Send + Sync {
    /// Stable text the content hash is computed from. Change it whenever the
    /// procedure's behaviour changes, the way a script body would change.
    fn fingerprint(&self) -> &str;

    async fn apply(&self, conn: &mut PgConnection, namespace: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub enum ArtifactBody {
    /// SQL executed verbatim (may contain several statements)
    Script(String),
    Procedure(Arc<dyn MigrationProcedure>),
}

impl fmt::Debug for ArtifactBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(sql) => f.debug_tuple("Script").field(&sql.len()).finish(),
            Self::Procedure(p) => f.debug_tuple("Procedure").field(&p.fingerprint()).finish(),
        }
    }
}

/// Parsed `<version>_<name>[.<ext>]` identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactId {
    pub version: i64,
    pub name: String,
    pub extension: Option<String>,
}

impl ArtifactId {
    pub fn parse(identifier: &str) -> Result<Self> {
        let caps = ARTIFACT_ID_REGEX.captures(identifier).ok_or_else(|| {
            MigrationError::invalid(identifier, "expected <version>_<name>.<ext>")
        })?;

        let version: i64 = caps[1]
            .parse()
            .map_err(|_| MigrationError::invalid(identifier, "version out of range"))?;
        if version == 0 {
            return Err(MigrationError::invalid(identifier, "versions start at 1"));
        }

        Ok(Self {
            version,
            name: caps[2].to_string(),
            extension: caps.get(3).map(|m| m.as_str().to_lowercase()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrationArtifact {
    pub set: MigrationSet,
    pub version: i64,
    pub name: String,
    pub body: ArtifactBody,
}

impl MigrationArtifact {
    /// Build a script artifact from a file name and its contents
    pub fn script(set: MigrationSet, file_name: &str, sql: impl Into<String>) -> Result<Self> {
        let id = ArtifactId::parse(file_name)?;
        match id.extension.as_deref() {
            Some(SCRIPT_EXTENSION) => {}
            Some(other) => {
                return Err(MigrationError::invalid(
                    file_name,
                    format!("unsupported extension .{}", other),
                ))
            }
            None => return Err(MigrationError::invalid(file_name, "missing .sql extension")),
        }

        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(MigrationError::invalid(file_name, "empty script"));
        }

        Ok(Self {
            set,
            version: id.version,
            name: id.name,
            body: ArtifactBody::Script(sql),
        })
    }

    /// Build a procedure artifact from a `<version>_<name>` identifier
    pub fn procedure(
        set: MigrationSet,
        identifier: &str,
        procedure: Arc<dyn MigrationProcedure>,
    ) -> Result<Self> {
        let id = ArtifactId::parse(identifier)?;
        if id.extension.is_some() {
            return Err(MigrationError::invalid(
                identifier,
                "procedure identifiers have no extension",
            ));
        }

        Ok(Self {
            set,
            version: id.version,
            name: id.name,
            body: ArtifactBody::Procedure(procedure),
        })
    }

    /// SHA-256 (hex) of the artifact's current content
    pub fn content_hash(&self) -> String {
        match &self.body {
            ArtifactBody::Script(sql) => content_hash(sql),
            ArtifactBody::Procedure(p) => content_hash(p.fingerprint()),
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{:03}_{}", self.set, self.version, self.name)
    }
}

/// Line endings are normalised so a checkout with CRLF does not read as drift.
pub fn content_hash(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Sort by version and reject duplicate versions within the set
pub fn order_artifacts(mut artifacts: Vec<MigrationArtifact>) -> Result<Vec<MigrationArtifact>> {
    artifacts.sort_by_key(|a| a.version);
    for pair in artifacts.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(MigrationError::invalid(
                pair[1].label(),
                format!("duplicate version {} (also {})", pair[1].version, pair[0].label()),
            ));
        }
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl MigrationProcedure for Noop {
        fn fingerprint(&self) -> &str {
            "noop v1"
        }

        async fn apply(&self, _conn: &mut PgConnection, _namespace: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_identifier() {
        let id = ArtifactId::parse("004_add_column.sql").unwrap();
        assert_eq!(id.version, 4);
        assert_eq!(id.name, "add_column");
        assert_eq!(id.extension.as_deref(), Some("sql"));

        let id = ArtifactId::parse("12_backfill").unwrap();
        assert_eq!(id.version, 12);
        assert_eq!(id.extension, None);
    }

    #[test]
    fn test_parse_rejects_malformed_identifiers() {
        for bad in [
            "add_column.sql",
            "004-add_column.sql",
            "004_.sql",
            "004_Add Column.sql",
            "v004_add.sql",
            "000_zero.sql",
            "",
        ] {
            assert!(
                matches!(
                    ArtifactId::parse(bad),
                    Err(MigrationError::MigrationArtifactInvalid { .. })
                ),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_script_requires_sql_extension_and_body() {
        assert!(MigrationArtifact::script(MigrationSet::Tenant, "001_a.sql", "SELECT 1").is_ok());
        assert!(MigrationArtifact::script(MigrationSet::Tenant, "001_a.js", "x").is_err());
        assert!(MigrationArtifact::script(MigrationSet::Tenant, "001_a", "SELECT 1").is_err());
        assert!(MigrationArtifact::script(MigrationSet::Tenant, "001_a.sql", "  \n").is_err());
    }

    #[test]
    fn test_procedure_identifier_has_no_extension() {
        assert!(MigrationArtifact::procedure(MigrationSet::Tenant, "003_fix", Arc::new(Noop)).is_ok());
        assert!(
            MigrationArtifact::procedure(MigrationSet::Tenant, "003_fix.rs", Arc::new(Noop)).is_err()
        );
    }

    #[test]
    fn test_content_hash_ignores_line_endings() {
        assert_eq!(content_hash("a\r\nb\r\n"), content_hash("a\nb\n"));
        assert_ne!(content_hash("a\nb\n"), content_hash("a\nc\n"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn test_procedure_hash_uses_fingerprint() {
        let artifact = MigrationArtifact::procedure(MigrationSet::Tenant, "003_fix", Arc::new(Noop)).unwrap();
        assert_eq!(artifact.content_hash(), content_hash("noop v1"));
    }

    #[test]
    fn test_order_artifacts_sorts_and_rejects_duplicates() {
        let a = MigrationArtifact::script(MigrationSet::Main, "010_b.sql", "SELECT 1").unwrap();
        let b = MigrationArtifact::script(MigrationSet::Main, "002_a.sql", "SELECT 1").unwrap();
        let ordered = order_artifacts(vec![a.clone(), b]).unwrap();
        assert_eq!(ordered.iter().map(|a| a.version).collect::<Vec<_>>(), vec![2, 10]);

        let dup = MigrationArtifact::script(MigrationSet::Main, "10_other.sql", "SELECT 2").unwrap();
        assert!(order_artifacts(vec![a, dup]).is_err());
    }
}
