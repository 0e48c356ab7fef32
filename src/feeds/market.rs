//! Public market-data feed supervisor.
//!
//! Aggregates trade ticks into one-minute candles and, every strategy
//! cadence interval, flushes the accumulated window into a market-driven
//! reaction.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::core::{Candle, Error, ExchangeGateway, MarketTick, Result, Strategy, Symbol};
use crate::engine::Reactor;

/// Short fixed wait before reconnecting the public stream.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub struct MarketFeed {
    symbol: Symbol,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    reactor: Reactor,
}

impl MarketFeed {
    pub fn new(
        symbol: Symbol,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
        reactor: Reactor,
    ) -> Self {
        Self {
            symbol,
            gateway,
            strategy,
            reactor,
        }
    }

    /// Reconnect loop; never terminates on transient errors.
    pub async fn run(self) {
        loop {
            if let Err(e) = self.cycle().await {
                warn!(error = %e, "market feed disconnected");
            }
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }

    async fn cycle(&self) -> Result<()> {
        let mut ticks = self.gateway.market_events(&self.symbol).await?;
        info!(exchange = self.gateway.name(), symbol = %self.symbol, "market feed connected");

        let interval = self.strategy.call_interval();
        let mut window = CandleWindow::new();
        let mut last_eval = Instant::now();

        while let Some(item) = ticks.next().await {
            match item {
                Ok(tick) => {
                    window.apply(&tick);
                    if last_eval.elapsed() >= interval {
                        last_eval = Instant::now();
                        let candles = window.flush();
                        let reactor = self.reactor.clone();
                        tokio::spawn(async move {
                            if let Err(e) = reactor.react_with_prices(candles).await {
                                error!(error = %e, "market-driven reaction failed");
                            }
                        });
                    }
                }
                Err(e) if e.is_decode() => {
                    warn!(error = %e, "dropping malformed tick");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Transport("market stream ended".into()))
    }
}

/// Truncate a timestamp to its one-minute bucket.
fn minute_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp() - at.timestamp().rem_euclid(60);
    DateTime::from_timestamp(secs, 0).unwrap_or(at)
}

/// Rolling candle plus the ordered sequence accumulated since the last flush.
///
/// Owned exclusively by the market feed; nothing else mutates candles.
struct CandleWindow {
    completed: Vec<Candle>,
    current: Option<Candle>,
}

impl CandleWindow {
    fn new() -> Self {
        Self {
            completed: Vec::new(),
            current: None,
        }
    }

    /// Extend the rolling candle, or roll into a new minute bucket.
    fn apply(&mut self, tick: &MarketTick) {
        let bucket = minute_bucket(tick.timestamp);
        match &mut self.current {
            Some(candle) if candle.bucket == bucket => {
                candle.high = candle.high.max(tick.price);
                candle.low = candle.low.min(tick.price);
                candle.close = tick.price;
                candle.volume += tick.quantity;
            }
            current => {
                if let Some(done) = current.take() {
                    self.completed.push(done);
                }
                *current = Some(Candle {
                    open: tick.price,
                    high: tick.price,
                    low: tick.price,
                    close: tick.price,
                    volume: tick.quantity,
                    bucket,
                });
            }
        }
    }

    /// Drain everything accumulated (completed candles plus the partial)
    /// and reset the window to empty.
    fn flush(&mut self) -> Vec<Candle> {
        let mut out = std::mem::take(&mut self.completed);
        if let Some(partial) = self.current.take() {
            out.push(partial);
        }
        out
    }
}
