use crate::error::ConfigError;
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "ordersync";

/// Runtime settings.
///
/// Sources, later ones winning: built-in defaults, an optional config file
/// (`ordersync.toml` or `--config`), environment variables using the field
/// names (`google_cred`, `spreadsheet_id`, `host`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path to the service-account JSON key
    pub google_cred: Option<String>,
    pub spreadsheet_id: Option<String>,

    pub host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: Option<String>,
    pub db_name: String,
    /// Takes precedence over the individual `db_*` settings when set
    pub database_url: Option<String>,

    pub sync_interval_secs: u64,
    pub log_file: PathBuf,

    pub rate_base_url: String,
    pub currency_code: String,
    pub max_lookback_days: u32,

    pub sheets_base_url: String,
    pub sheets_requests_per_minute: u32,
    pub sheet_first_row: u32,
    pub sheet_window_rows: u32,
}

impl Settings {
    /// Load settings; `config_file` replaces the default `ordersync.toml` lookup
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .set_default("host", "db")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "postgres")?
            .set_default("db_name", "orders")?
            .set_default("sync_interval_secs", 60)?
            .set_default("log_file", "log.txt")?
            .set_default("rate_base_url", crate::api::cbr::CBR_API_BASE)?
            .set_default("currency_code", crate::api::cbr::USD_CODE)?
            .set_default(
                "max_lookback_days",
                crate::fetch::rate::DEFAULT_MAX_LOOKBACK_DAYS,
            )?
            .set_default("sheets_base_url", crate::api::sheets::SHEETS_API_BASE)?
            .set_default(
                "sheets_requests_per_minute",
                crate::api::sheets::DEFAULT_REQUESTS_PER_MINUTE,
            )?
            .set_default("sheet_first_row", crate::fetch::source::DEFAULT_FIRST_ROW)?
            .set_default("sheet_window_rows", crate::fetch::source::DEFAULT_WINDOW_ROWS)?
            .add_source(file)
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Fail fast on settings the service cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        required(&self.google_cred, "google_cred")?;
        required(&self.spreadsheet_id, "spreadsheet_id")?;

        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sync_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.sheet_window_rows == 0 {
            return Err(ConfigError::Invalid {
                field: "sheet_window_rows",
                reason: "must be greater than zero".into(),
            });
        }
        if self.sheet_first_row == 0 {
            return Err(ConfigError::Invalid {
                field: "sheet_first_row",
                reason: "rows are 1-based".into(),
            });
        }
        Ok(())
    }

    pub fn google_cred(&self) -> &str {
        self.google_cred.as_deref().unwrap_or_default()
    }

    pub fn spreadsheet_id(&self) -> &str {
        self.spreadsheet_id.as_deref().unwrap_or_default()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn pg_connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.db_port)
            .username(&self.db_user)
            .database(&self.db_name);

        match &self.db_password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<(), ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(field)),
    }
}
