use gymdesk_database::DatabaseConfig;
use gymdesk_migrations::MigrationConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub migrations: MigrationConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env(),
            migrations: MigrationConfig::from_env(),
        }
    }
}
