//! Binance spot exchange gateway.
//!
//! Provides REST connectivity (balance, candles, symbol metadata, market
//! orders, open-order listing) and a per-pair kline WebSocket stream. The
//! [`SpotExchange`] trait is the seam the core trades through; the mock
//! implementation backs tests and paper runs.

mod client;
mod error;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::BinanceClient;
pub use error::ExchangeError;
pub use mock::MockExchange;
pub use traits::SpotExchange;
pub use types::{AssetBalance, Candle, OpenOrder, OrderFill, SymbolFilters, SymbolInfo};
pub use websocket::{KlineEvent, KlineStream, KlineSubscription};
