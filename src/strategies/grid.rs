//! Symmetric re-quote strategy
//!
//! Quotes one bid and one ask around the last traded price, cancelling
//! quotes that have drifted. Deliberately simple; it exists to exercise the
//! decide contract end to end.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::info;

use crate::config::BotConfig;
use crate::core::{
    Candle, Error, Order, OrderRequest, OrderType, PositionPair, Result, Side, Strategy, Symbol,
};

#[derive(Debug, Clone)]
pub struct GridParams {
    /// Half-spread from mid, in basis points
    pub spacing_bps: Decimal,
    /// Fraction of balance committed per quote
    pub order_fraction: Decimal,
    /// Maximum size held per side
    pub max_position: Decimal,
    /// Evaluation cadence
    pub call_interval: Duration,
}

impl GridParams {
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let grid = &config.grid;
        Ok(Self {
            spacing_bps: Decimal::try_from(grid.spacing_bps)
                .map_err(|e| Error::Config(format!("spacing_bps: {e}")))?,
            order_fraction: Decimal::try_from(grid.order_fraction)
                .map_err(|e| Error::Config(format!("order_fraction: {e}")))?,
            max_position: Decimal::try_from(grid.max_position)
                .map_err(|e| Error::Config(format!("max_position: {e}")))?,
            call_interval: Duration::from_secs(config.call_interval_secs),
        })
    }
}

pub struct GridStrategy {
    symbol: Symbol,
    params: GridParams,
    /// Close of the most recent candle seen; quotes need a reference price.
    last_close: Mutex<Option<Decimal>>,
}

impl GridStrategy {
    pub fn new(symbol: Symbol, params: GridParams) -> Self {
        Self {
            symbol,
            params,
            last_close: Mutex::new(None),
        }
    }

    fn half_spread(&self, mid: Decimal) -> Decimal {
        mid * self.params.spacing_bps / Decimal::from(10_000)
    }

    fn quote(&self, side: Side, price: Decimal, balance: Decimal, mid: Decimal) -> OrderRequest {
        let quantity = (balance * self.params.order_fraction / mid).round_dp(3);
        OrderRequest {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price.round_dp(2)),
            reduce_only: false,
            post_only: true,
        }
    }
}

impl Strategy for GridStrategy {
    fn name(&self) -> &str {
        "grid"
    }

    fn call_interval(&self) -> Duration {
        self.params.call_interval
    }

    fn on_snapshot(&self, balance: Decimal, position: &PositionPair, orders: &[Order]) {
        info!(
            %balance,
            long = %position.long.size,
            short = %position.short.size,
            open_orders = orders.len(),
            "grid strategy snapshot"
        );
    }

    fn decide(
        &self,
        balance: Decimal,
        position: &PositionPair,
        orders: &[Order],
        prices: &[Candle],
    ) -> Result<(Vec<OrderRequest>, Vec<Order>)> {
        let mut last_close = self.last_close.lock();
        if let Some(candle) = prices.last() {
            *last_close = Some(candle.close);
        }
        let Some(mid) = *last_close else {
            // no reference price yet: nothing to quote
            return Ok((Vec::new(), Vec::new()));
        };

        let half_spread = self.half_spread(mid);
        let bid = mid - half_spread;
        let ask = mid + half_spread;

        // cancel quotes that drifted more than half the spread from target
        let tolerance = half_spread / Decimal::from(2);
        let mut to_cancel = Vec::new();
        let mut have_bid = false;
        let mut have_ask = false;
        for order in orders {
            let Some(price) = order.price else { continue };
            let target = match order.side {
                Side::Buy => bid,
                Side::Sell => ask,
            };
            if (price - target).abs() > tolerance {
                to_cancel.push(order.clone());
            } else {
                match order.side {
                    Side::Buy => have_bid = true,
                    Side::Sell => have_ask = true,
                }
            }
        }

        let mut to_create = Vec::new();
        if !have_bid && position.long.size < self.params.max_position {
            to_create.push(self.quote(Side::Buy, bid, balance, mid));
        }
        if !have_ask && position.short.size < self.params.max_position {
            to_create.push(self.quote(Side::Sell, ask, balance, mid));
        }

        Ok((to_create, to_cancel))
    }
}
