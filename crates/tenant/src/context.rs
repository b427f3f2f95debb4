// Execution context: the only sanctioned way to run work against a tenant.
//
// A pooled connection is bound to the tenant's namespace (search_path) for
// the duration of one operation and unbound before it goes back to the
// pool. A connection is never returned to the pool still bound.

use futures_util::future::BoxFuture;
use gymdesk_database::{quote_ident, Database, DatabaseError, Result};
use gymdesk_models::TenantId;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, Postgres};

/// One pooled connection bound to one namespace.
///
/// If the lease is dropped while still bound (the operation future was
/// cancelled, or it panicked) the connection is closed rather than returned
/// to the pool.
pub struct TenantLease {
    conn: PoolConnection<Postgres>,
    namespace: String,
    bound: bool,
}

impl TenantLease {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Clear the binding and hand the connection back to the pool. If the
    /// reset fails the connection stays marked bound and is closed on drop.
    async fn release(mut self, default_schema: &str) {
        match set_search_path(&mut self.conn, &quote_ident(default_schema)).await {
            Ok(()) => self.bound = false,
            Err(e) => tracing::warn!(
                "Failed to reset namespace {} before release: {}",
                self.namespace,
                e
            ),
        }
    }
}

impl Drop for TenantLease {
    fn drop(&mut self) {
        if self.bound {
            tracing::warn!(
                "Lease on {} dropped while bound, closing connection",
                self.namespace
            );
            self.conn.close_on_drop();
        }
    }
}

async fn set_search_path(conn: &mut PgConnection, search_path: &str) -> sqlx::Result<()> {
    sqlx::query("SELECT pg_catalog.set_config('search_path', $1, false)")
        .bind(search_path)
        .execute(conn)
        .await?;
    Ok(())
}

/// Namespace unqualified names currently resolve to on this connection
pub async fn current_namespace(conn: &mut PgConnection) -> Result<String> {
    let schema: Option<String> = sqlx::query_scalar("SELECT current_schema()::text")
        .fetch_one(conn)
        .await?;
    Ok(schema.unwrap_or_default())
}

#[derive(Clone)]
pub struct TenantExecutor {
    db: Database,
}

impl TenantExecutor {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Acquire a connection and bind it to the tenant's namespace, with the
    /// default namespace as fallback for unqualified shared objects.
    async fn lease(&self, tenant_id: TenantId) -> Result<TenantLease> {
        let namespace = tenant_id.namespace();
        let mut conn = self.db.acquire().await?;

        let search_path = format!(
            "{}, {}",
            quote_ident(&namespace),
            quote_ident(self.db.default_schema())
        );

        // Postgres accepts a search_path naming a missing schema, so the bind
        // is verified: current_schema() is the first schema that exists.
        let bound = match set_search_path(&mut conn, &search_path).await {
            Ok(()) => current_namespace(&mut conn).await,
            Err(e) => Err(DatabaseError::from(e)),
        };

        match bound {
            Ok(current) if current == namespace => {
                tracing::debug!("Bound connection to {}", namespace);
                Ok(TenantLease {
                    conn,
                    namespace,
                    bound: true,
                })
            }
            Ok(_) => {
                conn.close_on_drop();
                Err(DatabaseError::NamespaceBindingFailed {
                    namespace,
                    reason: "namespace does not exist".to_string(),
                })
            }
            Err(e) => {
                conn.close_on_drop();
                Err(DatabaseError::NamespaceBindingFailed {
                    namespace,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Run `operation` on a connection bound to the tenant's namespace.
    ///
    /// Setup failures are returned as `DatabaseError` (converted into `E`);
    /// operation errors are returned untouched after cleanup.
    ///
    /// ```ignore
    /// let count = executor
    ///     .with_tenant(tenant_id, |conn| {
    ///         Box::pin(async move {
    ///             let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members")
    ///                 .fetch_one(conn)
    ///                 .await?;
    ///             Ok::<_, DatabaseError>(n)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_tenant<T, E, F>(&self, tenant_id: TenantId, operation: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<DatabaseError>,
    {
        let mut lease = self.lease(tenant_id).await?;
        let result = operation(lease.connection()).await;
        lease.release(self.db.default_schema()).await;
        result
    }

    /// Like `with_tenant`, but `operation` runs inside a transaction that is
    /// committed on `Ok` and rolled back on `Err`. Row locks taken with
    /// `SELECT ... FOR UPDATE` are held until the commit.
    pub async fn with_tenant_transaction<T, E, F>(
        &self,
        tenant_id: TenantId,
        operation: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<DatabaseError>,
    {
        let mut lease = self.lease(tenant_id).await?;
        let namespace = lease.namespace().to_string();

        let result = match lease.connection().begin().await {
            Ok(mut tx) => match operation(&mut *tx).await {
                Ok(value) => tx
                    .commit()
                    .await
                    .map(|_| value)
                    .map_err(|e| E::from(DatabaseError::from(e))),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!("Rollback failed on {}: {}", namespace, rollback_err);
                    }
                    Err(e)
                }
            },
            Err(e) => Err(E::from(DatabaseError::from(e))),
        };

        lease.release(self.db.default_schema()).await;
        result
    }
}
