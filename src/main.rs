//! Gemini Trader - Main Entry Point
//!
//! Runs declarative strategies against Gemini, or against a paper order book
//! fed by live Gemini prices.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gemini_trader::config::Config;
use gemini_trader::exchange::{
    ExchangeGateway, GeminiClient, PaperExchange, RetryPolicy, RetryingGateway,
};
use gemini_trader::persistence::{SqliteStore, StrategyStore};
use gemini_trader::strategy::{
    ProfitAccountant, Scheduler, StrategyDescriptor, StrategyManager, StrategyStatus,
};
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Gemini Trader CLI
#[derive(Parser)]
#[command(name = "gemini-trader")]
#[command(version, about = "Range, breakout and take-profit strategies on Gemini")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the strategy monitor loop (default)
    Run,

    /// Submit strategy descriptors from a JSON file, or the configured ones
    Submit {
        /// JSON file with one descriptor or a list of descriptors
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show strategies, their state and profit
    Status {
        /// Show open orders and config for each strategy
        #[arg(short, long)]
        verbose: bool,
    },

    /// Cancel a strategy's orders and pause it
    Pause { name: String },

    /// Resume a paused strategy
    Resume { name: String },

    /// Cancel a strategy's orders and mark it canceled
    Cancel { name: String },

    /// List orders currently open on the exchange
    OpenOrders,
}

/// Trading mode: Live (real money) or Paper (simulated fills).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

impl TradingMode {
    fn from_env() -> Self {
        if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
            TradingMode::Live
        } else {
            TradingMode::Paper
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;
    let mode = TradingMode::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, mode).await,
        Commands::Submit { file } => {
            let descriptors = match file {
                Some(path) => read_descriptors(&path)?,
                None => config.strategies.clone(),
            };
            let manager = build_manager(&config, mode)?;
            let failures = submit_all(&manager, &descriptors).await;
            anyhow::ensure!(failures == 0, "{failures} descriptor(s) rejected");
            Ok(())
        }
        Commands::Status { verbose } => {
            let manager = build_manager(&config, mode)?;
            print_status(&manager.status()?, verbose);
            Ok(())
        }
        Commands::Pause { name } => {
            let strategy = build_manager(&config, mode)?.pause(&name).await?;
            println!("{} is now {}", strategy.name, strategy.state);
            Ok(())
        }
        Commands::Resume { name } => {
            let strategy = build_manager(&config, mode)?.resume(&name).await?;
            println!("{} is now {}", strategy.name, strategy.state);
            Ok(())
        }
        Commands::Cancel { name } => {
            let strategy = build_manager(&config, mode)?.cancel(&name).await?;
            println!("{} is now {}", strategy.name, strategy.state);
            Ok(())
        }
        Commands::OpenOrders => {
            let gateway = build_gateway(&config, mode)?;
            let orders = gateway.get_active_orders().await?;
            if orders.is_empty() {
                println!("No open orders");
            }
            for order in orders {
                println!(
                    "{:>14}  {:<4}  {:>14} @ {:<12}  executed {:<14}  {}",
                    order.order_id,
                    order.side,
                    order.original_amount,
                    order.price,
                    order.executed_amount,
                    order.status
                );
            }
            Ok(())
        }
    }
}

/// Start the monitor loop and drive strategies until Ctrl+C.
async fn run(config: Config, mode: TradingMode) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Gemini Trader v{} - Strategy Engine            ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    match mode {
        TradingMode::Live => warn!("⚠️  LIVE TRADING MODE - Real money at risk!"),
        TradingMode::Paper => info!("📝 PAPER TRADING MODE - Orders are simulated"),
    }
    log_config(&config);

    let store = open_store(&config)?;
    let gateway = build_gateway(&config, mode)?;

    let manager = StrategyManager::new(gateway.clone(), store.clone());
    let failures = submit_all(&manager, &config.strategies).await;
    if failures > 0 {
        warn!(failures, "Some configured strategies were rejected");
    }

    let scheduler = Scheduler::new(
        gateway,
        store,
        ProfitAccountant::from(&config.profit),
        config.scheduler.clone(),
    );

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });

    info!("🚀 Starting strategy monitor...");
    scheduler.run().await;

    info!("👋 Gemini Trader shutdown complete");
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<dyn StrategyStore>> {
    let store = SqliteStore::open(&config.database.path)?;
    Ok(Arc::new(store))
}

/// Gemini client for live trading, or a paper book priced by Gemini.
/// Either way every call goes through the retry wrapper.
fn build_gateway(config: &Config, mode: TradingMode) -> Result<Arc<dyn ExchangeGateway>> {
    let client = GeminiClient::new(&config.gemini)?;
    let policy = RetryPolicy::from(&config.retry);

    let gateway: Arc<dyn ExchangeGateway> = match mode {
        TradingMode::Live => {
            anyhow::ensure!(
                config.gemini.has_credentials(),
                "LIVE_TRADING requires GEMINI_API_KEY and GEMINI_API_SECRET"
            );
            Arc::new(RetryingGateway::new(client, policy))
        }
        TradingMode::Paper => Arc::new(RetryingGateway::new(PaperExchange::new(client), policy)),
    };
    Ok(gateway)
}

fn build_manager(config: &Config, mode: TradingMode) -> Result<StrategyManager> {
    Ok(StrategyManager::new(
        build_gateway(config, mode)?,
        open_store(config)?,
    ))
}

/// Submit each descriptor, logging rejections. Returns the number rejected.
async fn submit_all(manager: &StrategyManager, descriptors: &[StrategyDescriptor]) -> usize {
    let mut failures = 0;
    for descriptor in descriptors {
        match manager.submit(descriptor).await {
            Ok(strategy) => info!(
                "✅ {} ({}, {}) is {}",
                strategy.name, strategy.kind, strategy.symbol, strategy.state
            ),
            Err(e) => {
                error!("❌ Strategy {} rejected: {}", descriptor.name, e);
                failures += 1;
            }
        }
    }
    failures
}

/// Parse a JSON file holding one descriptor or a list of them.
fn read_descriptors(path: &Path) -> Result<Vec<StrategyDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read descriptor file {path:?}"))?;

    if let Ok(list) = serde_json::from_str::<Vec<StrategyDescriptor>>(&raw) {
        return Ok(list);
    }
    let single: StrategyDescriptor = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse descriptor file {path:?}"))?;
    Ok(vec![single])
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "gemini-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the life of the process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gemini_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!(
        "   Exchange: {}{}",
        config.gemini.base_url(),
        if config.gemini.has_credentials() {
            ""
        } else {
            " (no credentials)"
        }
    );
    info!("   Tick Interval: {}ms", config.scheduler.tick_interval_ms);
    info!(
        "   Retries: {} attempts, {}ms base delay",
        config.retry.max_retries, config.retry.base_delay_ms
    );
    info!(
        "   Tax Reserve: {:.0}%",
        config.profit.tax_reserve_rate * dec!(100)
    );
    info!("   Database: {}", config.database.path);
    info!("   Configured Strategies: {}", config.strategies.len());
}

fn print_status(report: &[StrategyStatus], verbose: bool) {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                    STRATEGY STATUS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if report.is_empty() {
        println!("\nNo strategies submitted yet.");
        return;
    }

    for entry in report {
        let s = &entry.strategy;
        println!("\n┌─ {} #{} ({}, {})", s.name, s.id, s.kind, s.symbol);
        println!("├─ State:            {}", s.state);
        println!("├─ Total Profit:     ${:.4}", s.total_profit);
        println!("├─ Realized Profit:  ${:.4}", s.realized_profit);
        println!("├─ Tax Reserve:      ${:.4}", s.tax_reserve);
        println!("├─ Available Profit: ${:.4}", s.available_profit);
        match s.last_checked_at {
            Some(at) => println!("└─ Last Checked:     {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("└─ Last Checked:     never"),
        }

        if verbose {
            for (key, value) in &s.config {
                println!("     {key} = {value}");
            }
            for order in &entry.open_orders {
                println!(
                    "     open {} {} {} @ {} ({}, executed {})",
                    order.order_id,
                    order.side,
                    order.amount,
                    order.price,
                    order.status,
                    order.executed_amount
                );
            }
        }
    }
    println!();
}
