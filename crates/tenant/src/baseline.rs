// Baseline object set of a freshly provisioned tenant namespace.
//
// Every statement is idempotent (IF NOT EXISTS) so provisioning an existing
// namespace is a no-op. Later changes to tenant tables go through the
// `tenant` migration set, never through this file.

const SCHEMA: &str = "{schema}";

/// Tables created by provisioning, in creation order
pub const BASELINE_TABLES: &[&str] = &[
    "members",
    "membership_plans",
    "memberships",
    "class_types",
    "class_sessions",
    "bookings",
    "attendance",
    "invoices",
    "payments",
    "support_tickets",
];

const STATEMENTS: &[&str] = &[
    // --- Members ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.members (
        id            BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        email         VARCHAR(255) NOT NULL,
        first_name    VARCHAR(128) NOT NULL,
        last_name     VARCHAR(128) NOT NULL,
        phone         VARCHAR(32),
        status        VARCHAR(16) NOT NULL DEFAULT 'active'
                      CHECK (status IN ('active', 'frozen', 'cancelled')),
        joined_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT members_email_key UNIQUE (email)
    )"#,
    // --- Membership plans ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.membership_plans (
        id             BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        name           VARCHAR(128) NOT NULL,
        price_cents    BIGINT NOT NULL CHECK (price_cents >= 0),
        billing_period VARCHAR(16) NOT NULL DEFAULT 'monthly'
                       CHECK (billing_period IN ('weekly', 'monthly', 'yearly', 'once')),
        class_credits  INTEGER,
        is_active      BOOLEAN NOT NULL DEFAULT TRUE,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Memberships ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.memberships (
        id          BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        member_id   BIGINT NOT NULL REFERENCES {schema}.members(id) ON DELETE CASCADE,
        plan_id     BIGINT NOT NULL REFERENCES {schema}.membership_plans(id),
        starts_on   DATE NOT NULL,
        ends_on     DATE,
        status      VARCHAR(16) NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'paused', 'expired', 'cancelled')),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (ends_on IS NULL OR ends_on >= starts_on)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_memberships_member ON {schema}.memberships (member_id)"#,
    // --- Classes ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.class_types (
        id           BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        name         VARCHAR(128) NOT NULL,
        description  TEXT,
        capacity     INTEGER NOT NULL CHECK (capacity > 0),
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS {schema}.class_sessions (
        id             BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        class_type_id  BIGINT NOT NULL REFERENCES {schema}.class_types(id) ON DELETE CASCADE,
        starts_at      TIMESTAMPTZ NOT NULL,
        ends_at        TIMESTAMPTZ NOT NULL,
        instructor     VARCHAR(128),
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (ends_at > starts_at)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_class_sessions_starts_at ON {schema}.class_sessions (starts_at)"#,
    // --- Bookings (interval locking happens on these rows) ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.bookings (
        id                BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        member_id         BIGINT NOT NULL REFERENCES {schema}.members(id) ON DELETE CASCADE,
        class_session_id  BIGINT REFERENCES {schema}.class_sessions(id) ON DELETE CASCADE,
        resource_id       BIGINT,
        starts_at         TIMESTAMPTZ NOT NULL,
        ends_at           TIMESTAMPTZ NOT NULL,
        status            VARCHAR(16) NOT NULL DEFAULT 'confirmed'
                          CHECK (status IN ('confirmed', 'cancelled', 'no_show')),
        created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (ends_at > starts_at)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_bookings_resource_window ON {schema}.bookings (resource_id, starts_at, ends_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_bookings_member ON {schema}.bookings (member_id)"#,
    // --- Attendance ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.attendance (
        id             BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        member_id      BIGINT NOT NULL REFERENCES {schema}.members(id) ON DELETE CASCADE,
        booking_id     BIGINT REFERENCES {schema}.bookings(id) ON DELETE SET NULL,
        checked_in_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        checked_out_at TIMESTAMPTZ
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_attendance_member_time ON {schema}.attendance (member_id, checked_in_at)"#,
    // --- Billing ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.invoices (
        id            BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        member_id     BIGINT NOT NULL REFERENCES {schema}.members(id),
        membership_id BIGINT REFERENCES {schema}.memberships(id) ON DELETE SET NULL,
        amount_cents  BIGINT NOT NULL CHECK (amount_cents >= 0),
        currency      CHAR(3) NOT NULL DEFAULT 'EUR',
        status        VARCHAR(16) NOT NULL DEFAULT 'open'
                      CHECK (status IN ('draft', 'open', 'paid', 'void')),
        due_on        DATE NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_invoices_member_status ON {schema}.invoices (member_id, status)"#,
    r#"CREATE TABLE IF NOT EXISTS {schema}.payments (
        id           BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        invoice_id   BIGINT NOT NULL REFERENCES {schema}.invoices(id) ON DELETE CASCADE,
        amount_cents BIGINT NOT NULL CHECK (amount_cents > 0),
        method       VARCHAR(16) NOT NULL,
        paid_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Support ---
    r#"CREATE TABLE IF NOT EXISTS {schema}.support_tickets (
        id          BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        member_id   BIGINT REFERENCES {schema}.members(id) ON DELETE SET NULL,
        subject     VARCHAR(255) NOT NULL,
        body        TEXT NOT NULL,
        status      VARCHAR(16) NOT NULL DEFAULT 'open'
                    CHECK (status IN ('open', 'pending', 'closed')),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        closed_at   TIMESTAMPTZ
    )"#,
];

/// Baseline DDL for `quoted_schema` (an already-quoted identifier)
pub fn statements(quoted_schema: &str) -> Vec<String> {
    STATEMENTS
        .iter()
        .map(|template| template.replace(SCHEMA, quoted_schema))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_qualified_and_idempotent() {
        let stmts = statements("\"tenant_42\"");
        assert_eq!(stmts.len(), STATEMENTS.len());
        for stmt in &stmts {
            assert!(stmt.contains("\"tenant_42\"."), "unqualified: {}", stmt);
            assert!(stmt.contains("IF NOT EXISTS"), "not idempotent: {}", stmt);
            assert!(!stmt.contains(SCHEMA));
        }
    }

    #[test]
    fn test_every_baseline_table_is_created() {
        let stmts = statements("\"t\"");
        for table in BASELINE_TABLES {
            let needle = format!("CREATE TABLE IF NOT EXISTS \"t\".{} ", table);
            assert!(
                stmts.iter().any(|s| s.starts_with(&needle)),
                "missing table {}",
                table
            );
        }
    }

    #[test]
    fn test_referenced_tables_are_created_first() {
        let stmts = statements("\"t\"");
        for (i, stmt) in stmts.iter().enumerate() {
            for table in BASELINE_TABLES {
                let reference = format!("REFERENCES \"t\".{}(", table);
                if stmt.contains(&reference) {
                    let created_at = stmts
                        .iter()
                        .position(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS \"t\".{} ", table)))
                        .unwrap();
                    assert!(created_at < i, "{} referenced before creation", table);
                }
            }
        }
    }
}
