//! Derived data computed locally from stored market history and creator posts.

pub mod indicators;
pub mod tickers;
