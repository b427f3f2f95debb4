//! Schema Registry
//!
//! Maps tenant ids to namespace names and answers existence questions from
//! catalog metadata. Two sources describe "all tenants":
//! - the `tenant_registry` table in the default namespace (lifecycle record)
//! - a catalog scan over `pg_namespace` by the `tenant_` naming convention
//!
//! `reconcile` compares the two. Disagreement is reported, never repaired.

use crate::connection::Database;
use crate::error::Result;
use gymdesk_models::{TenantId, TenantRecord, TENANT_SCHEMA_PREFIX};
use moka::future::Cache;
use serde::Serialize;
use sqlx::PgConnection;
use std::collections::BTreeSet;
use std::time::Duration;

/// Quote an identifier for interpolation into DDL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Lowercase unquoted-safe identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Serialise provisioning, dropping and migrating of one namespace. The lock
/// is transaction-scoped and released at commit or rollback.
pub async fn lock_namespace(conn: &mut PgConnection, namespace: &str) -> sqlx::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(namespace)
        .execute(conn)
        .await?;
    Ok(())
}

/// Difference between the tenant registry and the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Namespaces present in the catalog with no active registry row
    pub orphaned_namespaces: Vec<String>,
    /// Active registry rows whose namespace does not exist
    pub missing_namespaces: Vec<String>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_namespaces.is_empty() && self.missing_namespaces.is_empty()
    }

    /// Compare one read of the registry with one catalog scan
    pub fn between(registered: &[String], catalog: &[String]) -> Self {
        let registered: BTreeSet<&String> = registered.iter().collect();
        let catalog: BTreeSet<&String> = catalog.iter().collect();

        Self {
            orphaned_namespaces: catalog.difference(&registered).map(|s| s.to_string()).collect(),
            missing_namespaces: registered.difference(&catalog).map(|s| s.to_string()).collect(),
        }
    }

    pub fn log_warnings(&self) {
        for namespace in &self.orphaned_namespaces {
            tracing::warn!("Namespace {} exists but is not in the tenant registry", namespace);
        }
        for namespace in &self.missing_namespaces {
            tracing::warn!("Tenant registry lists {} but the namespace does not exist", namespace);
        }
    }
}

#[derive(Clone)]
pub struct SchemaRegistry {
    db: Database,
    /// Namespaces known to exist. Namespaces are never renamed, so only
    /// positive answers are cached; `forget` is called on drop.
    known: Cache<String, ()>,
}

impl SchemaRegistry {
    pub fn new(db: Database) -> Self {
        let known = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(300))
            .build();

        Self { db, known }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Namespace name for a tenant. Pure and total.
    pub fn namespace_for(tenant_id: TenantId) -> String {
        tenant_id.namespace()
    }

    pub fn tenant_id_from_namespace(namespace: &str) -> Option<TenantId> {
        TenantId::from_namespace(namespace)
    }

    /// Whether the tenant's namespace exists in the catalog
    pub async fn exists(&self, tenant_id: TenantId) -> Result<bool> {
        self.namespace_exists(&Self::namespace_for(tenant_id)).await
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        if self.known.contains_key(namespace) {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        )
        .bind(namespace)
        .fetch_one(self.db.pool())
        .await?;

        if exists {
            self.known.insert(namespace.to_string(), ()).await;
        }
        Ok(exists)
    }

    /// Drop a cached positive answer (after the namespace is dropped)
    pub async fn forget(&self, namespace: &str) {
        self.known.invalidate(namespace).await;
    }

    /// Catalog scan: every namespace following the tenant naming
    /// convention, ordered by tenant id.
    pub async fn list_tenant_namespaces(&self) -> Result<Vec<String>> {
        let pattern = format!("{}%", TENANT_SCHEMA_PREFIX.replace('_', "\\_"));
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT nspname::text FROM pg_catalog.pg_namespace WHERE nspname LIKE $1",
        )
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await?;

        let mut tenants: Vec<(TenantId, String)> = names
            .into_iter()
            .filter_map(|name| TenantId::from_namespace(&name).map(|id| (id, name)))
            .collect();
        tenants.sort();

        Ok(tenants.into_iter().map(|(_, name)| name).collect())
    }

    /// Whether the registry table has been created by the main migration set
    pub async fn registry_available(&self) -> Result<bool> {
        let regclass: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(format!("{}.tenant_registry", quote_ident(self.db.default_schema())))
            .fetch_one(self.db.pool())
            .await?;
        Ok(regclass.is_some())
    }

    /// Active rows of the tenant registry, ordered by tenant id
    pub async fn list_registered(&self) -> Result<Vec<TenantRecord>> {
        let query = format!(
            r#"
            SELECT tenant_id, schema_name, status, created_at, updated_at
            FROM {}.tenant_registry
            WHERE status = 'active'
            ORDER BY tenant_id
            "#,
            quote_ident(self.db.default_schema())
        );

        Ok(sqlx::query_as::<_, TenantRecord>(&query)
            .fetch_all(self.db.pool())
            .await?)
    }

    /// Compare registry rows against the catalog scan
    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let registered: Vec<String> = self
            .list_registered()
            .await?
            .into_iter()
            .map(|r| r.schema_name)
            .collect();
        let catalog = self.list_tenant_namespaces().await?;

        let reconciliation = Reconciliation::between(&registered, &catalog);
        reconciliation.log_warnings();
        Ok(reconciliation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_for_is_deterministic() {
        let id = TenantId::new(42).unwrap();
        assert_eq!(SchemaRegistry::namespace_for(id), "tenant_42");
        assert_eq!(SchemaRegistry::namespace_for(id), SchemaRegistry::namespace_for(id));
        assert_eq!(SchemaRegistry::tenant_id_from_namespace("tenant_42"), Some(id));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("tenant_1"), "\"tenant_1\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("public"));
        assert!(is_valid_identifier("_shared2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("Public"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_reconciliation_difference() {
        let registered = vec!["tenant_1".to_string(), "tenant_2".to_string()];
        let catalog = vec!["tenant_2".to_string(), "tenant_3".to_string()];

        let r = Reconciliation::between(&registered, &catalog);
        assert_eq!(r.orphaned_namespaces, vec!["tenant_3".to_string()]);
        assert_eq!(r.missing_namespaces, vec!["tenant_1".to_string()]);
        assert!(!r.is_consistent());
        assert!(Reconciliation::between(&catalog, &catalog).is_consistent());
    }
}
