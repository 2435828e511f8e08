//! Venue-agnostic trait for spot trading operations.
//!
//! The core (scanner, exit monitor, reconciler, sizer) talks to the venue
//! through this seam so it can run against the real Binance client or the
//! mock used by tests and paper trading.

use crate::exchange::error::ExchangeError;
use crate::exchange::types::{AssetBalance, Candle, OpenOrder, OrderFill, SymbolFilters};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Spot market operations the trading core consumes.
///
/// All remote calls carry an explicit deadline in the implementation;
/// deadline hits surface as [`ExchangeError::Timeout`] and are treated like
/// any other remote failure by callers.
#[async_trait]
pub trait SpotExchange: Send + Sync {
    /// Free balance of one asset. Fails with [`ExchangeError::Auth`] when
    /// credentials are missing or invalid.
    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError>;

    /// Fixed-length candle window for a pair, ordered oldest to newest.
    async fn get_candles(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Latest traded price for a pair.
    async fn get_price(&self, pair: &str) -> Result<Decimal, ExchangeError>;

    /// Precision filters for a pair, served from the cached metadata snapshot.
    async fn get_symbol_filters(&self, pair: &str) -> Result<SymbolFilters, ExchangeError>;

    /// All actively trading pairs quoted in `quote_asset`.
    async fn list_quote_pairs(&self, quote_asset: &str) -> Result<Vec<String>, ExchangeError>;

    /// Place a market buy for a pre-sized quantity.
    async fn place_market_buy(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError>;

    /// Place a market sell for a pre-sized quantity.
    async fn place_market_sell(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError>;

    /// All open orders across pairs, the venue's authoritative view.
    async fn list_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError>;
}
