//! CLI entry point for the weather forecast engine.
//!
//! Provides subcommands for a single bootstrap run, a long-running worker
//! that re-runs the bootstrap on demand, and an ad-hoc forecast for one
//! station's history file.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use wx_forecast::{
    bootstrap,
    config::Settings,
    fetch::{ApiKey, BasicClient, HttpClient},
    forecast::{StationForecaster, StationOutcome},
    inputs::{InputSource, PgInputs, csv_dir},
    output::{append_forecast, append_run_stats, print_json},
    stats::RunStats,
    store::{MemoryStore, PgStore, PredictionStore},
    worker::{self, BootstrapWorker},
};

#[derive(Parser)]
#[command(name = "wx_forecast")]
#[command(about = "Station ensemble forecasts propagated to gridpoints", long_about = None)]
struct Cli {
    /// Directory or base URL holding the input CSV files
    #[arg(long, global = true, default_value = "data")]
    data_dir: String,

    /// PostgreSQL URL; overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// CSV file used as the prediction store instead of the database
    #[arg(long, global = true)]
    store_file: Option<String>,

    /// Forecast date (YYYY-MM-DD); defaults to today in UTC
    #[arg(long, global = true)]
    as_of: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast every station and gridpoint once, then exit
    Bootstrap {
        /// Optional CSV file to append the run statistics to
        #[arg(long)]
        stats_output: Option<String>,
    },
    /// Run at start, then again on SIGHUP or every BOOTSTRAP_INTERVAL_SECS
    Watch,
    /// Forecast a single station from a history CSV
    ForecastStation {
        /// Path or URL of a history CSV (station_id,date,tmax_c,tmin_c,prcp_mm)
        #[arg(value_name = "FILE_OR_URL")]
        history: String,

        /// Station id to forecast
        #[arg(short, long)]
        station: String,

        /// CSV file to append forecast points to
        #[arg(short, long, default_value = "forecast.csv")]
        output: String,

        /// Live temperature used for bias correction
        #[arg(long)]
        current_temp: Option<f64>,

        /// Also log the forecast as JSON
        #[arg(long)]
        json: bool,
    },
}

enum StoreBackend {
    Memory {
        store: Arc<MemoryStore>,
        path: Option<String>,
    },
    Postgres(Arc<PgStore>),
}

impl StoreBackend {
    fn store(&self) -> Arc<dyn PredictionStore> {
        match self {
            StoreBackend::Memory { store, .. } => store.clone() as Arc<dyn PredictionStore>,
            StoreBackend::Postgres(store) => store.clone() as Arc<dyn PredictionStore>,
        }
    }

    /// Writes the in-memory store back to its file, if it has one.
    async fn persist(&self) -> Result<()> {
        if let StoreBackend::Memory {
            store,
            path: Some(path),
        } = self
        {
            store.save_csv(path).await?;
        }
        Ok(())
    }
}

/// Everything a bootstrap run needs, shared across worker runs.
struct AppContext {
    settings: Settings,
    data_dir: String,
    as_of: Option<NaiveDate>,
    http: Arc<dyn HttpClient>,
    pg_inputs: Option<PgInputs>,
    store: StoreBackend,
}

impl AppContext {
    async fn build(cli: &Cli) -> Result<Self> {
        let mut settings = Settings::from_env();
        if cli.database_url.is_some() {
            settings.database_url = cli.database_url.clone();
        }

        let pool = match &settings.database_url {
            Some(url) => Some(wx_forecast::store::connect_pool(url).await?),
            None => None,
        };

        let store = match (&cli.store_file, &pool) {
            (Some(path), _) => StoreBackend::Memory {
                store: Arc::new(MemoryStore::from_csv(path)?),
                path: Some(path.clone()),
            },
            (None, Some(pool)) => StoreBackend::Postgres(Arc::new(PgStore::from_pool(pool.clone()))),
            (None, None) => {
                warn!("No database or store file configured, forecasts are kept in memory only");
                StoreBackend::Memory {
                    store: Arc::new(MemoryStore::new()),
                    path: None,
                }
            }
        };

        Ok(Self {
            settings,
            data_dir: cli.data_dir.clone(),
            as_of: cli.as_of,
            http: http_client()?,
            pg_inputs: pool.map(PgInputs::new),
            store,
        })
    }

    /// Fresh inputs for one run. CSV directories are re-read every time.
    async fn inputs(&self) -> Result<Box<dyn InputSource>> {
        let inputs: Box<dyn InputSource> = match &self.pg_inputs {
            Some(pg) => Box::new(pg.clone()),
            None => Box::new(csv_dir::load(&self.data_dir, self.http.as_ref()).await?),
        };
        Ok(inputs)
    }

    async fn bootstrap_once(&self) -> RunStats {
        let as_of = self.as_of.unwrap_or_else(bootstrap::today);
        let inputs = match self.inputs().await {
            Ok(inputs) => inputs,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Failed to load inputs");
                return RunStats {
                    error_message: Some(format!("{e:#}")),
                    ..Default::default()
                };
            }
        };

        let store = self.store.store();
        let stats = bootstrap::run_logged(&self.settings, inputs.as_ref(), store.as_ref(), as_of).await;
        if let Err(e) = self.store.persist().await {
            error!(error = %format!("{e:#}"), "Failed to save store file");
        }
        stats
    }
}

/// Plain HTTP client, with a bearer token when `DATA_DIR_TOKEN` is set.
fn http_client() -> Result<Arc<dyn HttpClient>> {
    let basic = BasicClient::new()?;
    let client: Arc<dyn HttpClient> = match std::env::var("DATA_DIR_TOKEN") {
        Ok(token) if !token.trim().is_empty() => Arc::new(ApiKey::bearer(basic, token.trim())?),
        _ => Arc::new(basic),
    };
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/wx_forecast.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("wx_forecast.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Bootstrap { stats_output } => {
            let ctx = AppContext::build(&cli).await?;
            let stats = ctx.bootstrap_once().await;
            if let Some(path) = stats_output {
                append_run_stats(path, &stats)?;
            }
            if let Some(message) = stats.error_message {
                anyhow::bail!("bootstrap failed: {message}");
            }
        }
        Commands::Watch => {
            let ctx = Arc::new(AppContext::build(&cli).await?);
            watch(ctx).await?;
        }
        Commands::ForecastStation {
            history,
            station,
            output,
            current_temp,
            json,
        } => {
            forecast_station(history, station, output, *current_temp, *json, cli.as_of).await?;
        }
    }

    Ok(())
}

/// Keeps a [`BootstrapWorker`] running until Ctrl+C.
#[tracing::instrument(skip(ctx))]
async fn watch(ctx: Arc<AppContext>) -> Result<()> {
    let interval_secs = ctx.settings.interval_secs;
    let run_ctx = ctx.clone();
    let worker = BootstrapWorker::spawn(move |_trigger| {
        let ctx = run_ctx.clone();
        async move { ctx.bootstrap_once().await }
    });

    let mut helpers = Vec::new();
    if interval_secs > 0 {
        info!(interval_secs, "Scheduled re-runs enabled");
        helpers.push(worker::spawn_interval(
            worker.sender(),
            Duration::from_secs(interval_secs),
        ));
    }
    #[cfg(unix)]
    helpers.push(worker::spawn_sighup(worker.sender())?);

    info!("Bootstrap worker running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutting down, waiting for the current run");

    for helper in helpers {
        helper.abort();
    }
    worker.join().await;
    Ok(())
}

/// Runs the ensemble for one station of a history file and appends the
/// points to `output`.
#[tracing::instrument(skip(current_temp, json, as_of))]
async fn forecast_station(
    history: &str,
    station: &str,
    output: &str,
    current_temp: Option<f64>,
    json: bool,
    as_of: Option<NaiveDate>,
) -> Result<()> {
    let settings = Settings::from_env();
    let client = http_client()?;
    let bytes = csv_dir::read_source(history, client.as_ref()).await?;
    let by_station = csv_dir::parse_history(&bytes)?;
    let rows = by_station
        .get(station)
        .with_context(|| format!("station '{station}' not found in {history}"))?;

    let as_of = as_of.unwrap_or_else(bootstrap::today);
    let forecaster =
        StationForecaster::new(&settings.ensemble(), settings.horizon_days, settings.min_rows);
    match forecaster.forecast(station, rows, current_temp, as_of) {
        StationOutcome::Forecast(set) => {
            append_forecast(output, &set.points)?;
            if json {
                print_json(&set.points)?;
            }
            info!(points = set.len(), output, "Station forecast written");
        }
        StationOutcome::NoSeries => {
            warn!(rows = rows.len(), min_rows = settings.min_rows, "Not enough history to forecast");
        }
        StationOutcome::EmptyEnsemble => {
            warn!("Every model variant failed for this station");
        }
    }
    Ok(())
}
