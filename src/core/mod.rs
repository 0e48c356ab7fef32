//! Core types, errors and traits

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{ExchangeGateway, Strategy};
pub use types::{
    AccountUpdate, Candle, EventStream, MarketTick, Order, OrderRequest, OrderStatus, OrderType,
    OrderUpdate, Position, PositionPair, PrivateEvent, Side, Symbol,
};
