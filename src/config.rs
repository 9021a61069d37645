use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Engine configuration.
///
/// Loaded from an optional `config/default` file with `LEDGERLINE_`-prefixed
/// environment variables layered on top, so deployments override individual
/// keys without shipping a file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    /// Run embedded migrations on connect. Tests and single-node
    /// deployments set this; fleets run the migrator separately.
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl AppConfig {
    /// Minimal in-code construction, used by tests and embedders that do
    /// their own configuration management.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            auto_migrate: false,
            log_level: default_log_level(),
            log_json: false,
            environment: default_environment(),
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("LEDGERLINE").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::new("sqlite::memory:");
        assert_eq!(cfg.db_max_connections, 10);
        assert!(!cfg.auto_migrate);
        assert!(!cfg.is_production());
    }
}
