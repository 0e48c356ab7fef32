//! Engine wiring - reaction coordination, heartbeat and task supervision

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::core::{Candle, ExchangeGateway, Order, OrderRequest, Result, Strategy, Symbol};
use crate::feeds::{AccountFeed, MarketFeed};
use crate::state::{SharedState, StateStore};

/// Fixed period between private-session keep-alives.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Reaction coordinator: one strategy recomputation plus concurrent dispatch
/// of the resulting order mutations.
///
/// `react` returns once both batches are scheduled, not once they complete.
/// In-flight batches are never cancelled; a feed reconnect happening after
/// dispatch lets them run to completion or failure independently.
#[derive(Clone)]
pub struct Reactor {
    state: SharedState,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
}

impl Reactor {
    pub fn new(
        state: SharedState,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
    ) -> Self {
        Self {
            state,
            gateway,
            strategy,
        }
    }

    /// Account-driven reaction: decide on the current snapshot alone.
    pub async fn react(&self) -> Result<()> {
        self.react_with_prices(Vec::new()).await
    }

    /// Recompute the strategy decision and dispatch it.
    ///
    /// Strategy errors propagate (fatal to this reaction cycle only).
    pub async fn react_with_prices(&self, prices: Vec<Candle>) -> Result<()> {
        let (balance, position, orders) = self.state.lock().snapshot();
        let (to_create, to_cancel) = self
            .strategy
            .decide(balance, &position, &orders, &prices)?;

        debug!(
            strategy = self.strategy.name(),
            creates = to_create.len(),
            cancels = to_cancel.len(),
            "dispatching strategy decision"
        );

        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move { cancel_batch(gateway, to_cancel).await });
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move { create_batch(gateway, to_create).await });
        Ok(())
    }
}

/// Cancel each order independently; a failure never aborts the batch.
async fn cancel_batch(gateway: Arc<dyn ExchangeGateway>, orders: Vec<Order>) {
    for order in orders {
        match gateway.cancel_order(&order).await {
            Ok(()) => debug!(order_id = %order.id, "order cancelled"),
            Err(e) => warn!(order_id = %order.id, error = %e, "cancel failed"),
        }
    }
}

/// Submit each order independently; a failure never aborts the batch.
async fn create_batch(gateway: Arc<dyn ExchangeGateway>, requests: Vec<OrderRequest>) {
    for request in requests {
        match gateway.create_order(&request).await {
            Ok(order) => debug!(order_id = %order.id, side = %order.side, "order created"),
            Err(e) => warn!(side = %request.side, error = %e, "create failed"),
        }
    }
}

/// Periodic session keep-alive. Failures are logged, never escalated.
pub async fn heartbeat(gateway: Arc<dyn ExchangeGateway>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;
        if let Err(e) = gateway.renew_session().await {
            warn!(error = %e, "session keep-alive failed");
        }
    }
}

/// The live trading engine: owns the state store and supervises the two feed
/// tasks plus the heartbeat. `run` only returns on process shutdown.
pub struct LiveEngine {
    config: BotConfig,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    state: SharedState,
}

impl LiveEngine {
    pub fn new(
        config: BotConfig,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
    ) -> Self {
        let state = Arc::new(parking_lot::Mutex::new(StateStore::new(Symbol::new(
            &config.symbol,
        ))));
        Self {
            config,
            gateway,
            strategy,
            state,
        }
    }

    pub async fn run(self) -> Result<()> {
        if let Err(e) = self.gateway.set_leverage(self.config.leverage).await {
            warn!(leverage = self.config.leverage, error = %e, "failed to apply leverage");
        }

        let symbol = Symbol::new(&self.config.symbol);
        let reactor = Reactor::new(
            Arc::clone(&self.state),
            Arc::clone(&self.gateway),
            Arc::clone(&self.strategy),
        );
        let account = AccountFeed::new(
            Arc::clone(&self.state),
            Arc::clone(&self.gateway),
            Arc::clone(&self.strategy),
            reactor.clone(),
        );
        let market = MarketFeed::new(
            symbol,
            Arc::clone(&self.gateway),
            Arc::clone(&self.strategy),
            reactor,
        );

        info!(
            exchange = self.gateway.name(),
            symbol = %self.config.symbol,
            user = %self.config.user,
            strategy = self.strategy.name(),
            "live engine started"
        );

        tokio::join!(
            account.run(),
            market.run(),
            heartbeat(Arc::clone(&self.gateway), HEARTBEAT_PERIOD),
        );
        Ok(())
    }
}
