//! Feed supervisors - reconnecting long-lived event streams

pub mod account;
pub mod market;

pub use account::AccountFeed;
pub use market::MarketFeed;
