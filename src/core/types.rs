//! Core types - strong typing for exchange state and feed events

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::Result;

/// Tradeable symbol (e.g. "BTCUSDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Statuses that keep an order in the open set.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

/// An order as known to the exchange. Identity is the exchange-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub updated_at_ms: u64,
}

/// A new order prior to submission (no exchange id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub post_only: bool,
}

/// One side of a hedged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }
}

/// Paired long/short position records, replaced wholesale on resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPair {
    pub long: Position,
    pub short: Position,
}

impl PositionPair {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            long: Position::flat(symbol.clone()),
            short: Position::flat(symbol),
        }
    }
}

/// OHLCV candle for a fixed one-minute bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub bucket: DateTime<Utc>,
}

/// One trade tick from the public market stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketTick {
    pub symbol: Symbol,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Order delta carried by a private feed message.
///
/// `sequence` is the exchange event time, used to drop duplicate or stale
/// deliveries (the feed is at-least-once).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order: Order,
    pub fill_quantity: Decimal,
    pub sequence: u64,
}

/// Position/balance delta carried by a private feed message.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    pub symbol: Symbol,
    pub balance: Option<Decimal>,
    pub long: Option<Position>,
    pub short: Option<Position>,
    pub sequence: u64,
}

/// Classified private feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum PrivateEvent {
    Order(OrderUpdate),
    Account(AccountUpdate),
    /// Recognized but non-actionable (subscription acks, keep-alive echoes).
    Ack,
}

/// A long-lived server-pushed event stream.
///
/// `Err(Error::Decode(_))` items are malformed payloads the consumer may skip;
/// any other error (or the stream ending) means the connection is gone.
pub type EventStream<T> = BoxStream<'static, Result<T>>;
