use crate::baseline;
use gymdesk_database::{lock_namespace, quote_ident, DatabaseError, Result, SchemaRegistry};
use gymdesk_models::{TenantId, TenantStatus};
use sqlx::{Connection, PgConnection};

/// Result of a provisioning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub namespace: String,
    /// False when the namespace already existed
    pub created: bool,
}

/// Creates and drops tenant namespaces.
///
/// Every step runs in one transaction under a namespace-scoped advisory
/// lock, so a partially created namespace is never observable.
#[derive(Clone)]
pub struct SchemaProvisioner {
    registry: SchemaRegistry,
}

impl SchemaProvisioner {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Create the tenant's namespace and its baseline tables.
    pub async fn provision(&self, tenant_id: TenantId) -> Result<ProvisionOutcome> {
        let namespace = SchemaRegistry::namespace_for(tenant_id);
        let mut conn = self.registry.database().acquire().await?;

        let created = self
            .provision_in_transaction(&mut conn, tenant_id, &namespace)
            .await
            .map_err(|source| {
                tracing::error!("Provisioning {} rolled back: {}", namespace, source);
                DatabaseError::ProvisioningFailed {
                    namespace: namespace.clone(),
                    source,
                }
            })?;

        if created {
            tracing::info!("Provisioned tenant namespace: {}", namespace);
        } else {
            tracing::info!("Tenant namespace {} already existed, baseline verified", namespace);
        }

        Ok(ProvisionOutcome { namespace, created })
    }

    async fn provision_in_transaction(
        &self,
        conn: &mut PgConnection,
        tenant_id: TenantId,
        namespace: &str,
    ) -> sqlx::Result<bool> {
        let quoted = quote_ident(namespace);
        let mut tx = conn.begin().await?;

        lock_namespace(&mut tx, namespace).await?;

        let existed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        )
        .bind(namespace)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::raw_sql(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted))
            .execute(&mut *tx)
            .await?;

        for statement in baseline::statements(&quoted) {
            sqlx::raw_sql(&statement).execute(&mut *tx).await?;
        }

        self.write_registry(&mut tx, tenant_id, namespace, TenantStatus::Active)
            .await?;

        tx.commit().await?;
        Ok(!existed)
    }

    /// Drop the tenant's namespace and everything in it. Destructive and
    /// outside the normal lifecycle; callers are expected to confirm first.
    pub async fn drop_namespace(&self, tenant_id: TenantId) -> Result<bool> {
        let namespace = SchemaRegistry::namespace_for(tenant_id);
        let quoted = quote_ident(&namespace);
        let mut conn = self.registry.database().acquire().await?;
        let mut tx = conn.begin().await?;

        lock_namespace(&mut tx, &namespace).await?;

        let existed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        )
        .bind(&namespace)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quoted))
            .execute(&mut *tx)
            .await?;

        self.write_registry(&mut tx, tenant_id, &namespace, TenantStatus::Dropped)
            .await?;

        tx.commit().await?;
        self.registry.forget(&namespace).await;

        tracing::warn!(
            "Dropped tenant namespace {} (tenant_id={}, existed={})",
            namespace,
            tenant_id,
            existed
        );
        Ok(existed)
    }

    /// Upsert the tenant's registry row if the registry table exists yet
    /// (it is created by the `main` migration set).
    async fn write_registry(
        &self,
        conn: &mut PgConnection,
        tenant_id: TenantId,
        namespace: &str,
        status: TenantStatus,
    ) -> sqlx::Result<()> {
        let default_schema = quote_ident(self.registry.database().default_schema());

        let available: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(format!("{}.tenant_registry", default_schema))
            .fetch_one(&mut *conn)
            .await?;

        if available.is_none() {
            tracing::warn!(
                "Tenant registry not found; {} is discoverable by catalog scan only until main migrations run",
                namespace
            );
            return Ok(());
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO {}.tenant_registry (tenant_id, schema_name, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id) DO UPDATE
            SET schema_name = EXCLUDED.schema_name,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
            default_schema
        ))
        .bind(tenant_id.get())
        .bind(namespace)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymdesk_database::{Database, DatabaseConfig};

    async fn provisioner() -> SchemaProvisioner {
        let db = Database::new(DatabaseConfig::from_env())
            .await
            .expect("Failed to connect to database");
        SchemaProvisioner::new(SchemaRegistry::new(db))
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_provision_twice_is_safe() {
        let provisioner = provisioner().await;
        let tenant_id = TenantId::new(910_001).unwrap();
        provisioner.drop_namespace(tenant_id).await.unwrap();

        let first = provisioner.provision(tenant_id).await.unwrap();
        let second = provisioner.provision(tenant_id).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.namespace, "tenant_910001");

        assert!(provisioner.drop_namespace(tenant_id).await.unwrap());
        assert!(!provisioner.registry.exists(tenant_id).await.unwrap());
    }
}
