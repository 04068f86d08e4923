use clap::Parser;
use ordersync::api::{CbrClient, ServiceAccountAuth, SheetsClient};
use ordersync::db::{OrderStore, PgOrderStore};
use ordersync::fetch::{RateFetcher, SourceFetcher};
use ordersync::sync::{CycleOutcome, Synchronizer};
use ordersync::{telemetry, Result, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Keep the orders table in step with the order sheet
#[derive(Parser, Debug)]
#[command(name = "ordersync", version, about)]
struct Cli {
    /// Config file (defaults to ./ordersync.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,

    /// Seconds between cycles (overrides sync_interval_secs)
    #[arg(short, long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = telemetry::init(telemetry::DEFAULT_FILTER, &settings.log_file)?;

    tracing::info!("🚀 ordersync starting");

    let store = connect_store(&settings)?;
    if let Err(e) = store.ensure_schema().await {
        tracing::warn!("Could not prepare orders table yet ({}), will retry each cycle", e);
    }

    let rates = RateFetcher::new(CbrClient::new(
        &settings.rate_base_url,
        &settings.currency_code,
    ))
    .with_max_lookback_days(settings.max_lookback_days);

    let auth = ServiceAccountAuth::from_file(settings.google_cred())?;
    let sheets = SheetsClient::new(
        &settings.sheets_base_url,
        settings.spreadsheet_id(),
        Arc::new(auth),
        settings.sheets_requests_per_minute,
    );
    let source = SourceFetcher::new(sheets)
        .with_window(settings.sheet_first_row, settings.sheet_window_rows);

    let synchronizer = Synchronizer::new(rates, source, Box::new(store));

    if cli.once {
        return match synchronizer.run_cycle().await {
            CycleOutcome::Completed(_) => Ok(()),
            CycleOutcome::Skipped(reason) => Err(format!("cycle skipped: {}", reason).into()),
        };
    }

    let period = match cli.interval {
        Some(0) => return Err("--interval must be greater than zero".into()),
        Some(secs) => Duration::from_secs(secs),
        None => settings.sync_interval(),
    };

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Spreadsheet: {}", settings.spreadsheet_id());
    tracing::info!("  Currency: {}", settings.currency_code);
    tracing::info!("  Interval: {}s", period.as_secs());
    tracing::info!("  Failure log: {}", settings.log_file.display());
    tracing::info!("\nPress Ctrl+C to stop...\n");

    synchronizer.run(period).await;

    tracing::info!("👋 ordersync stopped");
    Ok(())
}

fn connect_store(settings: &Settings) -> Result<PgOrderStore> {
    match &settings.database_url {
        Some(url) => {
            tracing::info!("Postgres pool configured from database_url");
            Ok(PgOrderStore::connect_lazy_url(url)?)
        }
        None => {
            tracing::info!(
                "Postgres pool configured for {}:{}/{}",
                settings.host,
                settings.db_port,
                settings.db_name
            );
            Ok(PgOrderStore::connect_lazy(settings.pg_connect_options()))
        }
    }
}
