//! leverage_desk - Main Entry Point
//!
//! Streams normalized ticks for a set of symbols and, when a user is
//! given, marks that user's committed positions to market.

use anyhow::Result;
use clap::Parser;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use leverage_desk::common::traits::Connector;
use leverage_desk::config::{load_config, loader::parse_symbol_list};
use leverage_desk::feed::{CryptoVenue, ForexVenue, PriceFeedMultiplexer, VenueProtocol, WsConnector};
use leverage_desk::session::TradingSession;
use leverage_desk::store::RestStore;

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Comma-separated list of symbols to stream, e.g. BTCUSDT,FX:EUR/USD,XAUUSD
    #[arg(long)]
    symbols: Option<String>,

    /// Load this user's open and pending positions and log their live PnL
    #[arg(long, env = "USER_ID")]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting leverage_desk");
    info!("Configuration file: {}", args.config);

    let config = load_config(Some(&args.config))?;

    let mut venues: Vec<Arc<dyn VenueProtocol>> = Vec::new();
    if config.crypto_feed.enabled {
        venues.push(Arc::new(CryptoVenue::from_config(&config.crypto_feed)));
    }
    if config.forex_feed.enabled {
        if config.forex_feed.api_key.is_none() {
            warn!("Forex feed enabled without an API key; the provider will likely refuse it");
        }
        venues.push(Arc::new(ForexVenue::from_config(&config.forex_feed)));
    }

    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new());
    let feed = PriceFeedMultiplexer::start(connector, venues, &config.settings);

    let session = match &args.user_id {
        Some(user_id) => {
            let store = RestStore::from_config(
                &config.store,
                Duration::from_secs(config.settings.request_timeout_seconds),
            )?;
            let session = TradingSession::load(Arc::new(store), user_id).await?;
            feed.sync_positions(&session.committed_positions())?;
            Some(Arc::new(session))
        }
        None => None,
    };

    let mut symbols: BTreeSet<String> = args
        .symbols
        .as_deref()
        .map(parse_symbol_list)
        .unwrap_or_else(|| config.watch_symbols.clone())
        .into_iter()
        .collect();
    if let Some(session) = &session {
        symbols.extend(session.symbols_of_interest());
    }
    if symbols.is_empty() {
        warn!("No symbols to stream; pass --symbols or set watch_symbols");
    }

    let mut tasks = Vec::new();
    for symbol in symbols {
        let mut subscription = match feed.subscribe(&symbol) {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Cannot subscribe {}: {}", symbol, e);
                continue;
            }
        };
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(tick) = subscription.next_tick().await {
                info!(
                    "{} bid={} ask={} last={} change={}%",
                    tick.symbol, tick.bid, tick.ask, tick.price, tick.change
                );
                let Some(session) = &session else { continue };
                for position in session.committed_positions() {
                    if position.symbol != tick.symbol {
                        continue;
                    }
                    match session.live_pnl(&position.id, &tick) {
                        Ok(pnl) => info!(
                            "  {} {} {} lots: pnl {}",
                            position.id, position.side, position.lots, pnl
                        ),
                        Err(e) => warn!("  {}: {}", position.id, e),
                    }
                }
            }
        }));
    }

    info!("Application initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    for task in &tasks {
        task.abort();
    }
    feed.shutdown().await;

    Ok(())
}
