/*
[INPUT]:  CLI arguments, optional YAML configuration, OS shutdown signals
[OUTPUT]: Logged ticker updates and connection state changes
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use ticker_feed_adapter::{FeedEnvironment, TickerMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ticker_feed_client::{FeedConfig, TickerManager};

#[derive(Parser, Debug)]
#[command(name = "ticker-watch", version, about = "Stream live ticker updates for a set of instruments")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    /// Instrument to watch; repeat for several
    #[arg(long = "symbol", value_name = "ID", required = true)]
    symbols: Vec<String>,
    #[arg(long)]
    simulate: bool,
    #[arg(long)]
    production: bool,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    let config = load_config(&args)?;
    info!(
        environment = %config.environment,
        simulate = config.simulate,
        symbols = ?args.symbols,
        "starting ticker-watch"
    );

    let manager = TickerManager::start(config).context("start ticker feed")?;
    let _state_listener = manager.on_state_change(|state| info!(%state, "feed state"));

    let subscriptions: Vec<_> = args
        .symbols
        .iter()
        .map(|symbol| manager.subscribe_fn(symbol, log_update))
        .collect();

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());
    shutdown.cancelled().await;
    info!("shutdown signal received");

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    manager.flush().await;
    manager.shutdown();
    info!("ticker feed shutdown complete");

    Ok(())
}

fn log_update(message: &TickerMessage) {
    info!(
        instrument = message.instrument_key().unwrap_or_default(),
        price = %message.price,
        change = %message.effective_change_price(),
        change_pct = %message.effective_change_percent().round_dp(2),
        "ticker"
    );
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(args: &Cli) -> Result<FeedConfig> {
    let config = match &args.config_path {
        Some(path) => FeedConfig::from_file(path).context("load config")?,
        None => FeedConfig::default(),
    };
    let mut config = config.apply_env().context("apply environment overrides")?;

    if args.simulate {
        config.simulate = true;
    }
    if args.production {
        config.environment = FeedEnvironment::Production;
    }
    if args.symbols.iter().any(|symbol| symbol.trim().is_empty()) {
        bail!("--symbol must not be empty");
    }
    config.validate().context("validate config")?;
    Ok(config)
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
