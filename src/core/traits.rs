//! Seams between the engine and its collaborators

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::core::{
    Candle, EventStream, MarketTick, Order, OrderRequest, PositionPair, PrivateEvent, Result,
    Symbol,
};

/// Exchange gateway - authenticated REST operations plus feed endpoints.
///
/// The engine depends only on this trait; each exchange is an adapter
/// implementing it. All operations target the single configured symbol.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Full current open-order set.
    async fn fetch_orders(&self) -> Result<Vec<Order>>;

    /// Current (long, short) position records.
    async fn fetch_position(&self) -> Result<PositionPair>;

    /// Available balance.
    async fn fetch_balance(&self) -> Result<Decimal>;

    /// Submit a new order.
    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    /// Cancel by id; fails if already filled or cancelled.
    async fn cancel_order(&self, order: &Order) -> Result<()>;

    /// Apply account leverage for the configured symbol.
    async fn set_leverage(&self, leverage: u32) -> Result<()>;

    /// Keep-alive for the private stream subscription.
    async fn renew_session(&self) -> Result<()>;

    /// Open the private account/order event stream.
    async fn private_events(&self) -> Result<EventStream<PrivateEvent>>;

    /// Open the public per-symbol tick stream.
    async fn market_events(&self, symbol: &Symbol) -> Result<EventStream<MarketTick>>;

    /// Exchange name
    fn name(&self) -> &str;
}

/// Decision strategy - a pure mapping from local state to order deltas.
#[allow(clippy::type_complexity)]
pub trait Strategy: Send + Sync {
    /// Strategy name
    fn name(&self) -> &str;

    /// Wall-clock cadence for market-driven evaluation.
    fn call_interval(&self) -> Duration;

    /// Called with the fresh snapshot after every resync.
    fn on_snapshot(&self, balance: Decimal, position: &PositionPair, orders: &[Order]);

    /// Produce (orders to create, orders to cancel) for the current state.
    ///
    /// `prices` is the candle window flushed by the market feed; it is empty
    /// for account-driven reactions.
    fn decide(
        &self,
        balance: Decimal,
        position: &PositionPair,
        orders: &[Order],
        prices: &[Candle],
    ) -> Result<(Vec<OrderRequest>, Vec<Order>)>;
}
