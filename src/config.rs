use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub alertsync: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const ALERTSYNC_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            alertsync: Self::ALERTSYNC_LEVEL.to_string(),
        }
    }

    /// flexi_logger spec string, e.g. `alertsync=info`
    pub fn log_spec(&self) -> String {
        format!("alertsync={}", self.alertsync)
    }

    fn ensure_valid(&mut self) {
        let str_original = self.alertsync.clone();
        self.alertsync = self.alertsync.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.alertsync.as_str()) {
            eprintln!(
                "Config error: alertsync log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::ALERTSYNC_LEVEL
            );
            self.alertsync = Self::ALERTSYNC_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file. Relative paths resolve against the working directory;
    /// when unset the file lives in the project data directory.
    path: Option<String>,
    pool_size: u32,
    busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: None,
            pool_size: Self::POOL_SIZE,
            busy_timeout_ms: Self::BUSY_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    const POOL_SIZE: u32 = 4;
    const BUSY_TIMEOUT_MS: u64 = 5_000;
    const DB_FILENAME: &str = "alertsync.db";

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms
    }

    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None => data_dir.join(Self::DB_FILENAME),
        }
    }

    pub fn set_path(&mut self, path: String) {
        self.path = Some(path);
    }

    fn ensure_valid(&mut self) {
        if self.pool_size == 0 {
            eprintln!(
                "Config error: database pool_size of 0 is invalid - using default of '{}'",
                Self::POOL_SIZE
            );
            self.pool_size = Self::POOL_SIZE;
        }

        if let Some(path) = &self.path {
            if path.trim().is_empty() {
                self.path = None;
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

impl Config {
    fn default_config() -> Self {
        Config {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
        }
    }

    /// Loads the configuration from a TOML file located in the app's data directory
    /// (or `config_override` when given), then applies `ALERTSYNC_` environment
    /// variables. If the file is missing or fails to parse, defaults are used.
    /// Writes the default config to disk if no file exists at the default location.
    pub fn load_config(project_dirs: &ProjectDirs, config_override: Option<&Path>) -> Self {
        let config_path = match config_override {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = project_dirs.data_local_dir().join("config.toml");
                Self::write_default_if_missing(&default_path);
                default_path
            }
        };

        let default_config = Self::default_config();
        let figment = Self::figment(&config_path, &default_config);

        // Attempt to extract the configuration; on error, log a message and fall back to defaults.
        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn figment(config_path: &Path, default_config: &Config) -> Figment {
        Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("ALERTSYNC_").split("__"))
    }

    fn write_default_if_missing(config_path: &Path) {
        if config_path.exists() {
            return;
        }

        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        if let Ok(toml_string) = toml::to_string_pretty(&Self::default_config()) {
            if let Err(e) = fs::write(config_path, toml_string) {
                eprintln!(
                    "Failed to write default config to {}: {}",
                    config_path.display(),
                    e
                );
            }
        } else {
            eprintln!("Failed to serialize default config.");
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.database.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                alertsync = "debug"

                [database]
                pool_size = 8
                busy_timeout_ms = 250
                "#,
            )?;
            jail.set_env("ALERTSYNC_DATABASE__POOL_SIZE", "2");

            let config: Config =
                Config::figment(Path::new("config.toml"), &Config::default_config()).extract()?;

            assert_eq!(config.logging.alertsync, "debug");
            assert_eq!(config.database.pool_size(), 2);
            assert_eq!(config.database.busy_timeout_ms(), 250);
            Ok(())
        });
    }

    #[test]
    fn test_ensure_valid_replaces_bad_values() {
        let mut config = Config::default_config();
        config.logging.alertsync = " LOUD ".to_string();
        config.database.pool_size = 0;
        config.database.path = Some("   ".to_string());

        config.ensure_valid();

        assert_eq!(config.logging.alertsync, "info");
        assert_eq!(config.database.pool_size(), 4);
        assert_eq!(
            config.database.db_path(Path::new("/data")),
            PathBuf::from("/data/alertsync.db")
        );
    }

    #[test]
    fn test_log_level_is_normalized() {
        let mut logging = LoggingConfig {
            alertsync: " Debug ".to_string(),
        };
        logging.ensure_valid();
        assert_eq!(logging.log_spec(), "alertsync=debug");
    }
}
