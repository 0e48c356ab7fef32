use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use marlin::config::BotConfig;
use marlin::core::{ExchangeGateway, Strategy, Symbol};
use marlin::engine::LiveEngine;
use marlin::exchanges::Binance;
use marlin::strategies::{GridParams, GridStrategy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,marlin=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();

    let config = BotConfig::load_default()?;
    let symbol = Symbol::new(&config.symbol);

    let api_key = std::env::var(&config.api_key_env)
        .with_context(|| format!("missing {}", config.api_key_env))?;
    let api_secret = std::env::var(&config.api_secret_env)
        .with_context(|| format!("missing {}", config.api_secret_env))?;

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(Binance::new(
        symbol.clone(),
        api_key,
        api_secret,
        config.testnet,
    ));
    let strategy: Arc<dyn Strategy> = Arc::new(GridStrategy::new(
        symbol,
        GridParams::from_config(&config)?,
    ));

    LiveEngine::new(config, gateway, strategy).run().await?;
    Ok(())
}
