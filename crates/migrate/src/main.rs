// Gymdesk migration tool
// Provisions tenant namespaces and runs the main and tenant migration sets

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use dotenvy::dotenv;
use gymdesk_database::{Database, SchemaRegistry};
use gymdesk_migrations::{
    plan, MigrationCatalog, MigrationOrchestrator, MigrationRunner, PlanStep,
};
use gymdesk_models::{AppliedMigration, MigrationSet, TenantId};
use gymdesk_tenant::SchemaProvisioner;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "gymdesk-migrate", about = "Tenant namespace provisioning and schema migrations")]
struct Cli {
    /// Read scripts from <dir>/main and <dir>/tenant instead of the embedded set
    #[arg(long, env = "MIGRATIONS_DIR", global = true)]
    migrations_dir: Option<PathBuf>,

    /// Tenant namespaces migrated at the same time
    #[arg(long, env = "MIGRATION_MAX_CONCURRENCY", global = true)]
    max_concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run migration sets; `all` runs main, then every tenant
    Migrate {
        #[arg(long, value_enum, default_value_t = SetArg::All)]
        set: SetArg,
    },
    /// Create a tenant's namespace and bring it up to date
    Provision { tenant_id: TenantId },
    /// Run the tenant set against one tenant
    MigrateTenant { tenant_id: TenantId },
    /// Show applied and pending tenant migrations
    Status { tenant_id: TenantId },
    /// Compare the tenant registry with the namespaces in the catalog
    Reconcile,
    /// Drop a tenant's namespace and all of its data
    Drop {
        tenant_id: TenantId,
        /// Required; there is no undo
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SetArg {
    Main,
    Tenant,
    All,
}

#[derive(Serialize)]
struct StatusReport {
    namespace: String,
    applied: Vec<AppliedMigration>,
    pending: Vec<i64>,
    drifted: Vec<i64>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,gymdesk_migrate=debug,sqlx=warn".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    tracing::info!("🚀 Starting Gymdesk migrate");
    tracing::info!("📦 Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    if let Some(dir) = cli.migrations_dir {
        config.migrations.migrations_dir = Some(dir);
    }
    if let Some(n) = cli.max_concurrency {
        config.migrations.max_concurrency = n.max(1);
    }
    tracing::info!("📜 Migration scripts: {:?}", config.migrations.script_source());

    tracing::info!("🗄️  Connecting to database...");
    let database = Database::new(config.database.clone())
        .await
        .context("Failed to connect to database")?;
    tracing::info!("✅ Database connected");

    let registry = SchemaRegistry::new(database.clone());
    let catalog = MigrationCatalog::new(config.migrations.script_source()).with_builtin_procedures();
    let runner = MigrationRunner::new(database.clone(), catalog, config.migrations.drift_policy);
    let orchestrator =
        MigrationOrchestrator::new(runner.clone(), registry.clone(), config.migrations.clone());
    let provisioner = SchemaProvisioner::new(registry.clone());

    let code = match cli.command {
        Command::Migrate { set } => {
            let main_ok = match set {
                SetArg::Main => {
                    let report = orchestrator.migrate_all(MigrationSet::Main).await?;
                    print_json(&report)?;
                    report.is_clean()
                }
                SetArg::Tenant => {
                    let report = orchestrator.migrate_all(MigrationSet::Tenant).await?;
                    print_json(&report)?;
                    true
                }
                SetArg::All => {
                    let report = orchestrator.migrate_startup().await?;
                    print_json(&report)?;
                    report.main.is_clean()
                }
            };

            // Tenant failures are in the report; only a broken main set fails the run
            if main_ok {
                ExitCode::SUCCESS
            } else {
                tracing::error!("❌ Main migrations failed");
                ExitCode::FAILURE
            }
        }
        Command::Provision { tenant_id } => {
            let outcome = provisioner.provision(tenant_id).await?;
            tracing::info!("🏢 Namespace {} ready (created={})", outcome.namespace, outcome.created);
            let summary = orchestrator.migrate_one(tenant_id).await?;
            print_json(&summary)?;
            ExitCode::SUCCESS
        }
        Command::MigrateTenant { tenant_id } => {
            let summary = orchestrator.migrate_one(tenant_id).await?;
            print_json(&summary)?;
            ExitCode::SUCCESS
        }
        Command::Status { tenant_id } => {
            let namespace = SchemaRegistry::namespace_for(tenant_id);
            let applied = runner.status(&namespace).await?;
            let artifacts = runner.catalog().discover(MigrationSet::Tenant).await?;

            let mut status = StatusReport {
                namespace,
                applied: Vec::new(),
                pending: Vec::new(),
                drifted: Vec::new(),
            };
            for step in plan(&artifacts, &applied) {
                match step {
                    PlanStep::Apply { version } => status.pending.push(version),
                    PlanStep::Drift { version, .. } => status.drifted.push(version),
                    PlanStep::Skip { .. } => {}
                }
            }
            status.applied = applied;
            print_json(&status)?;
            ExitCode::SUCCESS
        }
        Command::Reconcile => {
            if !registry.registry_available().await? {
                anyhow::bail!("tenant_registry does not exist yet; run `migrate --set main` first");
            }
            let reconciliation = registry.reconcile().await?;
            print_json(&reconciliation)?;
            if reconciliation.is_consistent() {
                tracing::info!("✅ Tenant registry matches the catalog");
            }
            ExitCode::SUCCESS
        }
        Command::Drop { tenant_id, yes } => {
            if !yes {
                anyhow::bail!(
                    "refusing to drop {} without --yes",
                    SchemaRegistry::namespace_for(tenant_id)
                );
            }
            let existed = provisioner.drop_namespace(tenant_id).await?;
            tracing::warn!("🗑️  Dropped {} (existed={})", tenant_id.namespace(), existed);
            ExitCode::SUCCESS
        }
    };

    database.close().await;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["gymdesk-migrate", "migrate", "--set", "tenant"]).unwrap();
        assert!(matches!(cli.command, Command::Migrate { set: SetArg::Tenant }));

        let cli = Cli::try_parse_from(["gymdesk-migrate", "provision", "42"]).unwrap();
        assert!(matches!(cli.command, Command::Provision { tenant_id } if tenant_id.get() == 42));

        let cli = Cli::try_parse_from(["gymdesk-migrate", "drop", "7"]).unwrap();
        assert!(matches!(cli.command, Command::Drop { yes: false, .. }));
    }

    #[test]
    fn test_rejects_invalid_tenant_id() {
        assert!(Cli::try_parse_from(["gymdesk-migrate", "status", "0"]).is_err());
        assert!(Cli::try_parse_from(["gymdesk-migrate", "status", "gym"]).is_err());
    }
}
