//! Mock exchange for tests and paper runs.
//!
//! Implements [`SpotExchange`] over in-memory state with failure injection
//! hooks, so the scanner, exit monitor, and reconciler can be exercised
//! without network access.

use crate::exchange::error::ExchangeError;
use crate::exchange::traits::SpotExchange;
use crate::exchange::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct MockState {
    balances: HashMap<String, Decimal>,
    prices: HashMap<String, Decimal>,
    candles: HashMap<String, Vec<Candle>>,
    filters: HashMap<String, SymbolFilters>,
    pairs: Vec<String>,
    open_orders: Vec<OpenOrder>,
    fail_balance: bool,
    fail_open_orders: bool,
    failing_candles: HashSet<String>,
    rejecting_orders: HashSet<String>,
    buys: Vec<(String, Decimal)>,
    sells: Vec<(String, Decimal)>,
}

/// In-memory [`SpotExchange`] implementation.
pub struct MockExchange {
    state: RwLock<MockState>,
    order_ids: AtomicI64,
    candle_fetches: AtomicU64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            order_ids: AtomicI64::new(1),
            candle_fetches: AtomicU64::new(0),
        }
    }

    /// Register a tradable pair with its current price and candle window.
    pub async fn add_pair(&self, pair: &str, price: Decimal, candles: Vec<Candle>) {
        let mut state = self.state.write().await;
        state.pairs.push(pair.to_string());
        state.prices.insert(pair.to_string(), price);
        state.candles.insert(pair.to_string(), candles);
    }

    pub async fn set_balance(&self, asset: &str, available: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), available);
    }

    pub async fn set_filters(&self, pair: &str, filters: SymbolFilters) {
        self.state
            .write()
            .await
            .filters
            .insert(pair.to_string(), filters);
    }

    pub async fn set_candles(&self, pair: &str, candles: Vec<Candle>) {
        self.state
            .write()
            .await
            .candles
            .insert(pair.to_string(), candles);
    }

    pub async fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        self.state.write().await.open_orders = orders;
    }

    pub async fn fail_balance(&self, fail: bool) {
        self.state.write().await.fail_balance = fail;
    }

    pub async fn fail_open_orders(&self, fail: bool) {
        self.state.write().await.fail_open_orders = fail;
    }

    /// Make candle fetches for one pair fail until cleared.
    pub async fn fail_candles_for(&self, pair: &str) {
        self.state
            .write()
            .await
            .failing_candles
            .insert(pair.to_string());
    }

    pub async fn clear_candle_failure(&self, pair: &str) {
        self.state.write().await.failing_candles.remove(pair);
    }

    /// Make order placement for one pair fail with a venue rejection.
    pub async fn reject_orders_for(&self, pair: &str) {
        self.state
            .write()
            .await
            .rejecting_orders
            .insert(pair.to_string());
    }

    /// Executed buys as `(pair, quantity)` in placement order.
    pub async fn buys(&self) -> Vec<(String, Decimal)> {
        self.state.read().await.buys.clone()
    }

    /// Executed sells as `(pair, quantity)` in placement order.
    pub async fn sells(&self) -> Vec<(String, Decimal)> {
        self.state.read().await.sells.clone()
    }

    /// Total candle windows served (failed fetches are not counted).
    pub fn candle_fetch_count(&self) -> u64 {
        self.candle_fetches.load(Ordering::SeqCst)
    }

    fn next_order_id(&self) -> i64 {
        self.order_ids.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl SpotExchange for MockExchange {
    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError> {
        let state = self.state.read().await;
        if state.fail_balance {
            return Err(ExchangeError::Timeout {
                operation: "balance".to_string(),
            });
        }
        Ok(AssetBalance {
            asset: asset.to_string(),
            available: state.balances.get(asset).copied().unwrap_or(Decimal::ZERO),
        })
    }

    async fn get_candles(
        &self,
        pair: &str,
        _interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.read().await;
        if state.failing_candles.contains(pair) {
            return Err(ExchangeError::Timeout {
                operation: format!("klines {pair}"),
            });
        }
        let candles = state
            .candles
            .get(pair)
            .ok_or_else(|| ExchangeError::NotFound(pair.to_string()))?;
        self.candle_fetches.fetch_add(1, Ordering::SeqCst);
        let start = candles.len().saturating_sub(limit as usize);
        Ok(candles[start..].to_vec())
    }

    async fn get_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        self.state
            .read()
            .await
            .prices
            .get(pair)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(pair.to_string()))
    }

    async fn get_symbol_filters(&self, pair: &str) -> Result<SymbolFilters, ExchangeError> {
        Ok(self
            .state
            .read()
            .await
            .filters
            .get(pair)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_quote_pairs(&self, quote_asset: &str) -> Result<Vec<String>, ExchangeError> {
        Ok(self
            .state
            .read()
            .await
            .pairs
            .iter()
            .filter(|p| p.ends_with(quote_asset))
            .cloned()
            .collect())
    }

    async fn place_market_buy(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        let mut state = self.state.write().await;
        if state.rejecting_orders.contains(pair) {
            return Err(ExchangeError::Rejected {
                code: -2010,
                message: format!("order rejected for {pair}"),
            });
        }
        let price = state
            .prices
            .get(pair)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(pair.to_string()))?;
        state.buys.push((pair.to_string(), quantity));
        Ok(OrderFill {
            order_id: self.next_order_id(),
            executed_qty: quantity,
            avg_price: price,
        })
    }

    async fn place_market_sell(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        let mut state = self.state.write().await;
        if state.rejecting_orders.contains(pair) {
            return Err(ExchangeError::Rejected {
                code: -2010,
                message: format!("order rejected for {pair}"),
            });
        }
        let price = state
            .prices
            .get(pair)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(pair.to_string()))?;
        state.sells.push((pair.to_string(), quantity));
        Ok(OrderFill {
            order_id: self.next_order_id(),
            executed_qty: quantity,
            avg_price: price,
        })
    }

    async fn list_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        let state = self.state.read().await;
        if state.fail_open_orders {
            return Err(ExchangeError::Timeout {
                operation: "openOrders".to_string(),
            });
        }
        Ok(state.open_orders.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_order_ids_are_unique() {
        let mock = MockExchange::new();
        mock.add_pair("BTCUSDT", dec!(50000), Vec::new()).await;

        let first = mock.place_market_buy("BTCUSDT", dec!(0.001)).await.unwrap();
        let second = mock.place_market_buy("BTCUSDT", dec!(0.002)).await.unwrap();
        assert_ne!(first.order_id, second.order_id);
        assert_eq!(mock.buys().await.len(), 2);
    }

    #[tokio::test]
    async fn test_candle_failure_injection() {
        let mock = MockExchange::new();
        mock.add_pair("BTCUSDT", dec!(50000), vec![Candle::new(
            dec!(1),
            dec!(2),
            dec!(1),
            dec!(2),
        )])
        .await;

        mock.fail_candles_for("BTCUSDT").await;
        assert!(mock.get_candles("BTCUSDT", "1h", 10).await.is_err());
        assert_eq!(mock.candle_fetch_count(), 0);

        mock.clear_candle_failure("BTCUSDT").await;
        assert_eq!(mock.get_candles("BTCUSDT", "1h", 10).await.unwrap().len(), 1);
        assert_eq!(mock.candle_fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_filters_default_to_passthrough() {
        let mock = MockExchange::new();
        let filters = mock.get_symbol_filters("ANYUSDT").await.unwrap();
        assert_eq!(filters, SymbolFilters::default());
    }
}
