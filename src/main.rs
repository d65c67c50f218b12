//! Demo CLI binary for the FX backtesting core.
//!
//! Loads a CSV candle file through [`fx_backtester::data_provider::CsvDataProvider`],
//! drives a [`fx_backtester::Backtester`] to completion, optionally hosting the
//! streaming surface for a browser UI to connect to, and prints a final
//! statistics summary. CLI parsing, strategy logic, and report rendering
//! beyond this summary are out of this core's scope (spec §1) — this binary
//! exists only to exercise the engine end-to-end.

use anyhow::{Context, Result};
use clap::Parser;
use fx_backtester::backtester::Backtester;
use fx_backtester::config::{Config, StreamConfig};
use fx_backtester::data_provider::CsvDataProvider;
use fx_backtester::market::Market;
use fx_backtester::streaming::{serve, AppState, Hub};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Replay historical OHLCV candles through the FX backtesting engine.
#[derive(Parser, Debug)]
#[command(name = "fx-backtester", version, about)]
struct Cli {
    /// Path to a `timestamp,open,high,low,close,volume` CSV file.
    #[arg(long, env = "FX_DATA_FILE")]
    data_file: PathBuf,

    /// Optional TOML config file; CLI flags below override its values.
    #[arg(long, env = "FX_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[arg(long, default_value = "EURUSD", env = "FX_SYMBOL")]
    symbol: String,

    #[arg(long, default_value_t = 10_000.0, env = "FX_INITIAL_BALANCE")]
    initial_balance: f64,

    #[arg(long, default_value_t = 0.0001, env = "FX_SPREAD")]
    spread: f64,

    #[arg(long, default_value_t = 100.0, env = "FX_LEVERAGE")]
    leverage: f64,

    /// Upper bound on the number of ticks to replay, independent of when
    /// the data source itself runs out (§4.3.1).
    #[arg(long, env = "FX_MAX_STEPS")]
    max_steps: Option<u64>,

    /// Serve the streaming surface on this port; omit to run headless.
    #[arg(long, env = "FX_STREAM_PORT")]
    stream_port: Option<u16>,
}

/// Exit codes for embedding scripts (spec §6): 0 success, 1 configuration
/// error, 2 data error, 3 runtime error.
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIGURATION: i32 = 1;
    pub const DATA: i32 = 2;
    pub const RUNTIME: i32 = 3;
}

#[tokio::main]
async fn main() {
    init_tracing();
    let _ = dotenv::dotenv();

    let code = match run().await {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            error!("{e:?}");
            classify_failure(&e)
        }
    };
    std::process::exit(code);
}

fn classify_failure(e: &anyhow::Error) -> i32 {
    let msg = e.to_string();
    if msg.contains("configuration") {
        exit_code::CONFIGURATION
    } else if msg.contains("data") || msg.contains("csv") || msg.contains("candle") {
        exit_code::DATA
    } else {
        exit_code::RUNTIME
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(path) => Config::from_toml_file(path).map_err(|e| anyhow::anyhow!("{e}"))?,
        None => Config::default(),
    };
    config.market.symbol = cli.symbol.clone();
    config.market.data_path = cli.data_file.to_string_lossy().to_string();
    config.broker.initial_balance = cli.initial_balance;
    config.broker.spread = cli.spread;
    config.broker.leverage = cli.leverage;
    if let Some(max_steps) = cli.max_steps {
        config.backtest.max_steps = Some(max_steps);
    }
    if let Some(port) = cli.stream_port {
        config.stream.enabled = true;
        config.stream.port = port;
    }
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    info!(path = %cli.data_file.display(), "loading candle data");
    let provider = CsvDataProvider::load(&cli.data_file)
        .with_context(|| format!("data error: loading candles from {}", cli.data_file.display()))?;
    let candle_count = provider.len();
    info!(candle_count, "candle data loaded");

    let market = Arc::new(Market::new(Arc::new(provider)));

    let backtester = Arc::new(Backtester::new(
        config.market.symbol.clone(),
        market,
        config.broker.clone(),
        config.backtest.clone(),
    ));
    backtester.initialize().map_err(|e| anyhow::anyhow!("runtime error: {e}"))?;

    let stream_handle = if config.stream.enabled {
        Some(start_streaming_surface(backtester.clone(), config.stream.clone()))
    } else {
        None
    };

    info!(symbol = %cli.symbol, "backtest starting");
    backtester.playback().play(1.0);
    while backtester.forward().await {}

    if let Some(handle) = stream_handle {
        handle.abort();
    }

    print_summary(&backtester);
    Ok(())
}

/// Binds the axum router (spec §4.5.1) and spawns it as its own task so
/// the time loop above can run independently of the accept loop. `Backtester`
/// implements `ControlSink` directly (§9): the hub reaches playback control
/// through that trait object, sharing the same `Arc`, rather than holding a
/// concrete back-pointer into the facade.
fn start_streaming_surface(backtester: Arc<Backtester>, stream: StreamConfig) -> tokio::task::JoinHandle<()> {
    let hub = Hub::spawn(stream.buffer_size);
    backtester.attach_hub(hub.clone());
    let control: Arc<dyn fx_backtester::streaming::ControlSink> = backtester;

    let state = AppState { hub, control, config: stream.clone(), running: Arc::new(AtomicBool::new(true)) };
    let port = stream.port;
    info!(port, "streaming surface enabled");
    tokio::spawn(async move {
        if let Err(e) = serve(state, port).await {
            warn!("streaming surface exited: {e}");
        }
    })
}

fn print_summary(backtester: &Backtester) {
    let stats = backtester.statistics();
    println!("--- backtest summary ---");
    println!("final balance:     {:.2}", backtester.balance());
    println!("trades closed:     {}", stats.total_trades);
    println!("win rate:          {:.2}%", stats.win_rate);
    println!("profit factor:     {:.4}", stats.profit_factor);
    println!("max win streak:    {}", stats.max_consecutive_wins);
    println!("max loss streak:   {}", stats.max_consecutive_losses);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fx_backtester=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
