//! Supertrend spot trader entry point.

use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use supertrend_trader::config::Config;
use supertrend_trader::exchange::{BinanceClient, KlineStream, SpotExchange};
use supertrend_trader::persistence::TradeStore;
use supertrend_trader::strategy::{reconcile, ExitMonitor, Scanner};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "supertrend-trader")]
#[command(version, about = "Supertrend/SMA momentum trader for Binance spot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print recorded trades and exit
    Status {
        /// Path to the SQLite trade database
        #[arg(short, long, default_value = "data/trades.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Some(Commands::Status { db }) => show_status(&db),
        None => run().await,
    }
}

fn init_logging() -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "supertrend-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // The guard must outlive main or buffered log lines are lost.
    Box::leak(Box::new(guard));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("supertrend_trader=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    Ok(())
}

fn show_status(db: &str) -> Result<()> {
    let store = TradeStore::new(db)?;
    let trades = store.list_all_trades()?;
    if trades.is_empty() {
        println!("no trades recorded");
        return Ok(());
    }

    println!(
        "{:<6} {:<12} {:<16} {:>14} {:>14} {:>12} {:>12}",
        "id", "pair", "status", "entry", "exit", "qty", "pnl"
    );
    for trade in trades {
        println!(
            "{:<6} {:<12} {:<16} {:>14} {:>14} {:>12} {:>12}",
            trade.id,
            trade.pair,
            trade.status.as_str(),
            trade.entry_price.to_string(),
            trade
                .exit_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            trade.quantity.to_string(),
            trade
                .profit_loss
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

async fn run() -> Result<()> {
    info!("supertrend-trader v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    ensure!(
        config.binance.has_credentials(),
        "Binance API credentials are required (STT__BINANCE__API_KEY / STT__BINANCE__SECRET_KEY)"
    );

    let exchange: Arc<dyn SpotExchange> = Arc::new(BinanceClient::new(&config.binance)?);
    let store = Arc::new(TradeStore::new(&config.persistence.db_path)?);

    // Venue truth wins over local state before anything trades.
    match reconcile(exchange.as_ref(), &store).await {
        Ok(report) if report.skipped => warn!("starting without reconciliation"),
        Ok(report) => info!(
            closed_manually = report.closed_manually,
            unknown_venue_orders = report.unknown_venue_orders,
            "reconciliation complete"
        ),
        Err(e) => error!(error = %e, "reconciliation failed"),
    }

    let monitor = Arc::new(ExitMonitor::new(
        exchange.clone(),
        store.clone(),
        KlineStream::new(&config.binance),
        config.binance.default_interval.clone(),
        config.trade.exit_candle_limit,
    ));
    if let Err(e) = monitor.sync().await {
        error!(error = %e, "initial exit monitor sync failed");
    }

    let scanner = Arc::new(Scanner::new(
        exchange.clone(),
        store.clone(),
        config.trade.clone(),
        config.binance.default_interval.clone(),
    ));

    if !config.scheduler.enabled {
        info!("scheduler disabled, monitoring open positions only");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        return Ok(());
    }

    // Rounds run as spawned tasks; a round outlasting the interval makes the
    // next tick skip instead of stacking up.
    let round_guard = Arc::new(tokio::sync::Mutex::new(()));
    let mut ticker = tokio::time::interval(Duration::from_secs(config.scheduler.interval_secs));
    if !config.scheduler.run_on_start {
        // Swallow the immediate first tick so the first round waits a full
        // interval.
        ticker.tick().await;
    }

    info!(
        interval_secs = config.scheduler.interval_secs,
        run_on_start = config.scheduler.run_on_start,
        "scheduler started"
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let scanner = scanner.clone();
                let monitor = monitor.clone();
                let guard = round_guard.clone();
                tokio::spawn(async move {
                    match guard.try_lock() {
                        Ok(_held) => {
                            scanner.scan_round().await;
                            if let Err(e) = monitor.sync().await {
                                error!(error = %e, "exit monitor sync failed");
                            }
                        }
                        Err(_) => warn!("previous round still running, skipping tick"),
                    }
                });
            }
        }
    }

    Ok(())
}
