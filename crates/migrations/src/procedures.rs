//! Built-in imperative migrations
//!
//! Steps that are awkward as a single script (row-by-row data fixes,
//! conditional DDL) are written as `MigrationProcedure`s and registered on
//! the catalog next to the SQL files.

use crate::artifact::MigrationProcedure;
use async_trait::async_trait;
use gymdesk_models::MigrationSet;
use sqlx::PgConnection;
use std::sync::Arc;

/// `(set, identifier, procedure)` triples registered by
/// `MigrationCatalog::with_builtin_procedures`
pub fn builtin() -> Vec<(MigrationSet, &'static str, Arc<dyn MigrationProcedure>)> {
    vec![(
        MigrationSet::Tenant,
        "003_normalize_member_emails",
        Arc::new(NormalizeMemberEmails),
    )]
}

/// Lowercases and trims member emails, then replaces the case-sensitive
/// unique constraint with a unique index on `lower(email)`.
///
/// Fails without touching any row when two members would end up with the
/// same address; those need manual cleanup before the tenant can move on.
pub struct NormalizeMemberEmails;

#[async_trait]
impl MigrationProcedure for NormalizeMemberEmails {
    fn fingerprint(&self) -> &str {
        "normalize_member_emails v1: lower(trim(email)); \
         unique index members_email_lower_key on lower(email)"
    }

    async fn apply(&self, conn: &mut PgConnection, namespace: &str) -> anyhow::Result<()> {
        let collisions: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT lower(trim(email)) FROM members
                GROUP BY lower(trim(email))
                HAVING COUNT(*) > 1
            ) dup
            "#,
        )
        .fetch_one(&mut *conn)
        .await?;

        if collisions > 0 {
            anyhow::bail!(
                "{} member email(s) in {} collide after normalisation",
                collisions,
                namespace
            );
        }

        let normalized = sqlx::query(
            "UPDATE members SET email = lower(trim(email)), updated_at = NOW() \
             WHERE email <> lower(trim(email))",
        )
        .execute(&mut *conn)
        .await?
        .rows_affected();

        sqlx::Executor::execute(
            &mut *conn,
            sqlx::raw_sql(
                r#"
            ALTER TABLE members DROP CONSTRAINT IF EXISTS members_email_key;
            CREATE UNIQUE INDEX IF NOT EXISTS members_email_lower_key ON members (lower(email));
            "#,
            ),
        )
        .await?;

        tracing::info!("{}: normalised {} member email(s)", namespace, normalized);
        Ok(())
    }
}
