//! Momentum/mean-reversion spot trading engine.
//!
//! Scans a quote market for pairs in a confirmed uptrend that have pulled
//! back below their recent lows, buys fixed-notional units from a budgeted
//! fraction of the free balance, and exits each position from its own kline
//! stream when price clears the recent high average.

pub mod config;
pub mod exchange;
pub mod indicators;
pub mod persistence;
pub mod sizing;
pub mod strategy;
