mod allocation;
mod backtest;
mod config;
mod error;
mod exchange;
mod indicator;
mod model;
mod notifier;
mod position;
mod series;
mod storage;
mod strategy;
mod trader;

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use backtest::BacktestSettings;
use config::AppConfig;
use exchange::Exchange;
use exchange::auth::Credentials;
use exchange::paper::PaperExchange;
use exchange::upbit::UpbitExchange;
use indicator::engine::IndicatorEngine;
use notifier::Notifier;
use notifier::slack::SlackNotifier;
use notifier::terminal::TerminalNotifier;
use storage::Storage;
use storage::sqlite::SqliteStorage;
use trader::{Trader, TraderSettings};

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("exchange error")]
    Exchange,
    #[display("trader error")]
    Trader,
    #[display("backtest error")]
    Backtest,
}

#[derive(Parser)]
#[command(name = "rsi-bucket-trader", about = "RSI bucket trading bot for Upbit KRW markets")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading loop
    Run {
        /// Trade against an in-memory paper account fed by live Upbit prices
        #[arg(long)]
        dry_run: bool,

        /// Starting KRW of the paper account
        #[arg(long, default_value_t = 1_000_000.0)]
        paper_krw: f64,
    },
    /// Replay the strategy over historical candles from `[backtest]`
    Backtest,
    /// Lift the halt on an instrument once its balance has been reconciled
    /// by hand; a running trader picks it up on its next cycle
    Resume {
        /// Instrument to resume, e.g. KRW-BTC
        instrument: String,

        /// Target the paper-trading database
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    match cli.command {
        Command::Run { dry_run, paper_krw } => run_trader(&config, dry_run, paper_krw).await,
        Command::Backtest => run_backtest(&config).await,
        Command::Resume {
            instrument,
            dry_run,
        } => resume(&config, &instrument, dry_run).await,
    }
}

async fn open_storage(config: &AppConfig, dry_run: bool) -> Result<SqliteStorage, Report<AppError>> {
    let data_dir = &config.general.data_dir;
    std::fs::create_dir_all(data_dir)
        .change_context(AppError::Storage)
        .attach_with(|| format!("data_dir: {data_dir}"))?;

    let db_name = if dry_run {
        "rsi-bucket-trader-paper.db"
    } else {
        "rsi-bucket-trader.db"
    };
    SqliteStorage::open(&Path::new(data_dir).join(db_name))
        .await
        .change_context(AppError::Storage)
}

async fn resume(config: &AppConfig, instrument: &str, dry_run: bool) -> Result<(), Report<AppError>> {
    let storage = open_storage(config, dry_run).await?;
    if storage
        .clear_halt(instrument)
        .await
        .change_context(AppError::Storage)?
    {
        info!(instrument, "halt cleared");
        println!("{instrument}: halt cleared, trading resumes on the next cycle");
    } else {
        println!("{instrument}: not halted");
    }
    Ok(())
}

async fn run_trader(config: &AppConfig, dry_run: bool, paper_krw: f64) -> Result<(), Report<AppError>> {
    if config.coins.is_empty() {
        warn!("no coins configured; nothing to do");
        return Ok(());
    }

    // ── Storage ───────────────────────────────────────────────────────────────
    let storage: Arc<dyn Storage> = Arc::new(open_storage(config, dry_run).await?);

    // ── Exchange & notifier ───────────────────────────────────────────────────
    let exchange = build_exchange(config, dry_run, paper_krw)?;
    let notifier: Arc<dyn Notifier> = match &config.slack {
        Some(slack) => Arc::new(SlackNotifier::new(slack)),
        None => Arc::new(TerminalNotifier),
    };

    let engine = IndicatorEngine::new(&config.indicators).change_context(AppError::Config)?;
    info!(exchange = exchange.name(), coins = ?config.coins, dry_run, "starting trader");
    let mut trader = Trader::new(
        exchange,
        notifier,
        storage,
        engine,
        TraderSettings::from_config(config),
    );

    // ── Shutdown ──────────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl+c received, shutting down");
        }
        ctrl_c_cancel.cancel();
    });

    trader.run(cancel).await.change_context(AppError::Trader)?;

    info!("shutdown complete");
    Ok(())
}

fn build_exchange(
    config: &AppConfig,
    dry_run: bool,
    paper_krw: f64,
) -> Result<Arc<dyn Exchange>, Report<AppError>> {
    if dry_run {
        let market: Arc<dyn Exchange> = Arc::new(UpbitExchange::public());
        return Ok(Arc::new(PaperExchange::with_market(
            paper_krw,
            config.general.fee_bps,
            market,
        )));
    }

    let credentials = Credentials::new(&config.upbit.access_key, &config.upbit.secret_key);
    if credentials.is_empty() {
        return Err(Report::new(AppError::Config).attach(
            "upbit.access_key / upbit.secret_key are required for live trading (or pass --dry-run)",
        ));
    }
    Ok(Arc::new(UpbitExchange::new(credentials)))
}

async fn run_backtest(config: &AppConfig) -> Result<(), Report<AppError>> {
    let settings = config
        .backtest
        .as_ref()
        .ok_or_else(|| Report::new(AppError::Config).attach("[backtest] section is required"))?;

    info!(
        symbol = %settings.symbol,
        timeframe = %settings.timeframe,
        candles = settings.candles,
        "fetching historical candles"
    );
    let candles = UpbitExchange::public()
        .get_candles(&settings.symbol, settings.timeframe, settings.candles)
        .await
        .change_context(AppError::Exchange)?;

    let engine = IndicatorEngine::new(&config.indicators).change_context(AppError::Config)?;
    let report = backtest::run(
        &candles,
        &engine,
        &BacktestSettings::from_config(config, settings),
    )
    .change_context(AppError::Backtest)?;

    for trade in &report.trades {
        debug!(
            bucket = %trade.bucket,
            entry_time = %trade.entry_time,
            exit_time = %trade.exit_time,
            entry_price = trade.entry_price,
            exit_price = trade.exit_price,
            quantity = trade.quantity,
            net_pnl = trade.net_pnl,
            reason = trade.reason,
            "backtest trade"
        );
    }
    info!(
        symbol = %settings.symbol,
        final_equity = report.final_equity,
        total_return_pct = report.total_return_pct,
        max_drawdown_pct = report.max_drawdown_pct,
        win_rate_pct = report.win_rate_pct,
        trades = report.trade_count,
        "backtest complete"
    );
    println!(
        "{} {} x{}: return {:+.2}%, max drawdown {:.2}%, win rate {:.1}%, {} trades (equity {:.0} -> {:.0} KRW)",
        settings.symbol,
        settings.timeframe,
        candles.len(),
        report.total_return_pct,
        report.max_drawdown_pct,
        report.win_rate_pct,
        report.trade_count,
        report.initial_capital,
        report.final_equity,
    );
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
