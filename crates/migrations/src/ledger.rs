// Applied-migration ledger: one `schema_migrations` table inside each
// namespace, so a namespace carries its own history when copied or dumped.

use gymdesk_database::quote_ident;
use gymdesk_models::AppliedMigration;
use sqlx::PgConnection;

pub const LEDGER_TABLE: &str = "schema_migrations";

fn ledger(namespace: &str) -> String {
    format!("{}.{}", quote_ident(namespace), LEDGER_TABLE)
}

/// Create the ledger table if absent. Call under the namespace lock:
/// concurrent `CREATE TABLE IF NOT EXISTS` can still collide in the catalog.
pub async fn ensure(conn: &mut PgConnection, namespace: &str) -> sqlx::Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            schema_name   TEXT NOT NULL,
            version       BIGINT NOT NULL CHECK (version > 0),
            name          TEXT NOT NULL,
            content_hash  CHAR(64) NOT NULL,
            applied_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (schema_name, version)
        )
        "#,
        ledger(namespace)
    );
    sqlx::Executor::execute(conn, sqlx::raw_sql(&sql)).await?;
    Ok(())
}

/// Whether the ledger exists yet (read paths must not create it)
pub async fn exists(conn: &mut PgConnection, namespace: &str) -> sqlx::Result<bool> {
    let regclass: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
        .bind(ledger(namespace))
        .fetch_one(conn)
        .await?;
    Ok(regclass.is_some())
}

/// Applied rows in version order
pub async fn load(conn: &mut PgConnection, namespace: &str) -> sqlx::Result<Vec<AppliedMigration>> {
    sqlx::query_as::<_, AppliedMigration>(&format!(
        r#"
        SELECT schema_name, version, name, content_hash::text AS content_hash, applied_at
        FROM {}
        WHERE schema_name = $1
        ORDER BY version
        "#,
        ledger(namespace)
    ))
    .bind(namespace)
    .fetch_all(conn)
    .await
}

pub async fn find(
    conn: &mut PgConnection,
    namespace: &str,
    version: i64,
) -> sqlx::Result<Option<AppliedMigration>> {
    sqlx::query_as::<_, AppliedMigration>(&format!(
        r#"
        SELECT schema_name, version, name, content_hash::text AS content_hash, applied_at
        FROM {}
        WHERE schema_name = $1 AND version = $2
        "#,
        ledger(namespace)
    ))
    .bind(namespace)
    .bind(version)
    .fetch_optional(conn)
    .await
}

pub async fn record(
    conn: &mut PgConnection,
    namespace: &str,
    version: i64,
    name: &str,
    content_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {} (schema_name, version, name, content_hash) VALUES ($1, $2, $3, $4)",
        ledger(namespace)
    ))
    .bind(namespace)
    .bind(version)
    .bind(name)
    .bind(content_hash)
    .execute(conn)
    .await?;
    Ok(())
}
