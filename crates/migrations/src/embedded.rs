// Script manifest compiled into the binary. Adding a migration means adding
// the file under sql/<set>/ and a line here.

use gymdesk_models::MigrationSet;

pub const MAIN: &[(&str, &str)] = &[
    (
        "001_create_tenant_registry.sql",
        include_str!("../sql/main/001_create_tenant_registry.sql"),
    ),
    (
        "002_create_platform_settings.sql",
        include_str!("../sql/main/002_create_platform_settings.sql"),
    ),
    (
        "003_backfill_tenant_registry.sql",
        include_str!("../sql/main/003_backfill_tenant_registry.sql"),
    ),
];

pub const TENANT: &[(&str, &str)] = &[
    (
        "001_add_member_emergency_contact.sql",
        include_str!("../sql/tenant/001_add_member_emergency_contact.sql"),
    ),
    (
        "002_create_class_waitlist.sql",
        include_str!("../sql/tenant/002_create_class_waitlist.sql"),
    ),
];

pub fn scripts(set: MigrationSet) -> &'static [(&'static str, &'static str)] {
    match set {
        MigrationSet::Main => MAIN,
        MigrationSet::Tenant => TENANT,
    }
}
