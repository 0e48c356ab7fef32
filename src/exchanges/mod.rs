//! Exchange gateway implementations

pub mod binance;

pub use binance::Binance;
