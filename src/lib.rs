//! marlin - live-market synchronization and reaction engine
//!
//! Keeps a local mirror of exchange-side state (orders, position, balance)
//! synchronized over two reconnecting event feeds and dispatches strategy
//! decisions back to the exchange.

pub mod config;
pub mod core;
pub mod engine;
pub mod exchanges;
pub mod feeds;
pub mod state;
pub mod strategies;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::BotConfig;
pub use core::{Error, Result};
pub use engine::LiveEngine;
