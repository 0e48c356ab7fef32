//! Strategy implementations

pub mod grid;

pub use grid::{GridParams, GridStrategy};
