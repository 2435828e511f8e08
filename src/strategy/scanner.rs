//! Market scanner: evaluates the quote market for entry signals once per
//! round, then spends the round's budget one unit at a time.

use crate::config::TradeConfig;
use crate::exchange::SpotExchange;
use crate::indicators::IndicatorSnapshot;
use crate::persistence::{NewTrade, TradeStore};
use crate::sizing::OrderSizer;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A pair whose latest closed window satisfies the entry rule.
#[derive(Debug, Clone)]
pub struct BuyCandidate {
    pub pair: String,
    pub last_close: Decimal,
    pub supertrend: Decimal,
    pub sma_low_3: Decimal,
}

/// Outcome of one scan round.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub asset: String,
    pub asset_available: Decimal,
    pub capital_for_buys: Decimal,
    pub open_trade_count: u64,
    pub pairs_scanned: usize,
    pub candidates: usize,
    pub trades_opened: usize,
}

impl ScanSummary {
    fn idle(asset: &str, open_trade_count: u64) -> Self {
        Self {
            asset: asset.to_string(),
            asset_available: Decimal::ZERO,
            capital_for_buys: Decimal::ZERO,
            open_trade_count,
            pairs_scanned: 0,
            candidates: 0,
            trades_opened: 0,
        }
    }
}

enum EvalOutcome {
    Candidate(BuyCandidate),
    NoSignal,
    Failed,
}

pub struct Scanner {
    exchange: Arc<dyn SpotExchange>,
    store: Arc<TradeStore>,
    sizer: OrderSizer,
    config: TradeConfig,
    interval: String,
}

impl Scanner {
    pub fn new(
        exchange: Arc<dyn SpotExchange>,
        store: Arc<TradeStore>,
        config: TradeConfig,
        interval: String,
    ) -> Self {
        let sizer = OrderSizer::new(exchange.clone());
        Self {
            exchange,
            store,
            sizer,
            config,
            interval,
        }
    }

    /// One full scan round: budget, evaluate, buy.
    pub async fn scan_round(&self) -> ScanSummary {
        let open_trade_count = self.store.open_trade_count().unwrap_or(0);

        let balance = match self.exchange.get_balance(&self.config.quote_asset).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "balance unavailable, skipping round");
                return ScanSummary::idle(&self.config.quote_asset, open_trade_count);
            }
        };
        let budget = balance.available * self.config.buy_budget_pct;

        let pairs = match self.eligible_pairs().await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "pair listing unavailable, skipping round");
                return ScanSummary::idle(&self.config.quote_asset, open_trade_count);
            }
        };
        info!(
            available = %balance.available,
            budget = %budget,
            pairs = pairs.len(),
            open_trades = open_trade_count,
            "scan round started"
        );

        let candidates = self.evaluate_pairs(&pairs).await;
        let trades_opened = self.buy_candidates(&candidates, budget).await;

        // Re-sample so the summary includes positions this round just opened.
        let open_trade_count = self
            .store
            .open_trade_count()
            .unwrap_or(open_trade_count + trades_opened as u64);

        let summary = ScanSummary {
            asset: self.config.quote_asset.clone(),
            asset_available: balance.available,
            capital_for_buys: budget,
            open_trade_count,
            pairs_scanned: pairs.len(),
            candidates: candidates.len(),
            trades_opened,
        };
        info!(
            candidates = summary.candidates,
            trades_opened = summary.trades_opened,
            "scan round finished"
        );
        summary
    }

    /// Quote pairs without an open position, capped per round.
    async fn eligible_pairs(&self) -> Result<Vec<String>, crate::exchange::ExchangeError> {
        let open_pairs: HashSet<String> = match self.store.list_open_trades() {
            Ok(trades) => trades.into_iter().map(|t| t.pair).collect(),
            Err(e) => {
                warn!(error = %e, "open trade listing failed, scanning all pairs");
                HashSet::new()
            }
        };

        let mut pairs = self
            .exchange
            .list_quote_pairs(&self.config.quote_asset)
            .await?;
        pairs.retain(|p| !open_pairs.contains(p));
        pairs.truncate(self.config.max_pairs_per_round);
        Ok(pairs)
    }

    /// Evaluate pairs with a bounded worker pool, preserving listing order
    /// in the returned candidates.
    async fn evaluate_pairs(&self, pairs: &[String]) -> Vec<BuyCandidate> {
        let pairs = Arc::new(pairs.to_vec());
        let next = Arc::new(AtomicUsize::new(0));
        let workers = self.config.concurrent_requests.min(pairs.len().max(1));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let pairs = pairs.clone();
            let next = next.clone();
            let exchange = self.exchange.clone();
            let interval = self.interval.clone();
            let candle_limit = self.config.candle_limit;

            handles.push(tokio::spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(pair) = pairs.get(idx) else {
                        return outcomes;
                    };
                    let outcome =
                        Self::evaluate_pair(exchange.as_ref(), pair, &interval, candle_limit).await;
                    outcomes.push((idx, outcome));
                }
            }));
        }

        let mut slots: Vec<Option<EvalOutcome>> = Vec::new();
        slots.resize_with(pairs.len(), || None);
        for handle in handles {
            match handle.await {
                Ok(outcomes) => {
                    for (idx, outcome) in outcomes {
                        slots[idx] = Some(outcome);
                    }
                }
                Err(e) => error!(error = %e, "scan worker panicked"),
            }
        }

        slots
            .into_iter()
            .flatten()
            .filter_map(|outcome| match outcome {
                EvalOutcome::Candidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    async fn evaluate_pair(
        exchange: &dyn SpotExchange,
        pair: &str,
        interval: &str,
        candle_limit: u32,
    ) -> EvalOutcome {
        let candles = match exchange.get_candles(pair, interval, candle_limit).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(%pair, error = %e, "candle fetch failed");
                return EvalOutcome::Failed;
            }
        };
        let snapshot = match IndicatorSnapshot::compute(&candles) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(%pair, error = %e, "skipping pair");
                return EvalOutcome::Failed;
            }
        };

        if snapshot.entry_signal() {
            info!(
                %pair,
                close = %snapshot.last_close,
                supertrend = %snapshot.supertrend,
                sma_low = %snapshot.sma_low_3,
                "entry signal"
            );
            EvalOutcome::Candidate(BuyCandidate {
                pair: pair.to_string(),
                last_close: snapshot.last_close,
                supertrend: snapshot.supertrend,
                sma_low_3: snapshot.sma_low_3,
            })
        } else {
            EvalOutcome::NoSignal
        }
    }

    /// Walk candidates in discovery order, spending one unit per buy until
    /// the budget cannot cover another unit.
    async fn buy_candidates(&self, candidates: &[BuyCandidate], budget: Decimal) -> usize {
        let unit = self.config.unit_notional;
        let mut remaining = budget;
        let mut opened = 0;

        for candidate in candidates {
            if remaining < unit {
                debug!(%remaining, %unit, "budget exhausted");
                break;
            }
            if self.execute_buy(&candidate.pair, unit).await {
                remaining -= unit;
                opened += 1;
            }
        }
        opened
    }

    /// Size, place, and record one entry. A failure leaves the budget
    /// untouched so the next candidate still gets its chance.
    async fn execute_buy(&self, pair: &str, unit: Decimal) -> bool {
        let sized = match self.sizer.size_buy(pair, unit).await {
            Ok(sized) => sized,
            Err(e) => {
                warn!(%pair, error = %e, "sizing failed");
                return false;
            }
        };

        let fill = match self.exchange.place_market_buy(pair, sized.quantity).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(%pair, error = %e, "buy order failed");
                return false;
            }
        };

        let entry_price = if fill.avg_price > Decimal::ZERO {
            fill.avg_price
        } else {
            sized.price
        };
        let quantity = if fill.executed_qty > Decimal::ZERO {
            fill.executed_qty
        } else {
            sized.quantity
        };

        info!(%pair, order_id = fill.order_id, %entry_price, %quantity, "position opened");
        if let Err(e) = self.store.create_open_trade(&NewTrade {
            pair: pair.to_string(),
            order_id: fill.order_id,
            entry_price,
            quantity,
        }) {
            error!(%pair, order_id = fill.order_id, error = %e, "failed to record trade");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Candle, MockExchange};
    use rust_decimal_macros::dec;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(
            Decimal::try_from(open).unwrap(),
            Decimal::try_from(high).unwrap(),
            Decimal::try_from(low).unwrap(),
            Decimal::try_from(close).unwrap(),
        )
    }

    /// Uptrend that pulled back under its 3-period low average, so the
    /// entry rule fires on the last close.
    fn qualifying_candles() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..17)
            .map(|i| {
                let close = 100.0 + 5.0 * i as f64;
                candle(close - 4.0, close + 1.0, close - 1.0, close)
            })
            .collect();
        candles.push(candle(180.0, 183.0, 181.0, 182.0));
        candles.push(candle(182.0, 185.0, 183.0, 184.0));
        candles.push(candle(184.0, 184.5, 180.5, 181.0));
        candles
    }

    fn flat_candles() -> Vec<Candle> {
        (0..20).map(|_| candle(100.0, 102.0, 99.0, 100.0)).collect()
    }

    fn scanner_with(
        mock: Arc<MockExchange>,
        store: Arc<TradeStore>,
        config: TradeConfig,
    ) -> Scanner {
        Scanner::new(mock, store, config, "1h".to_string())
    }

    async fn seed_qualifying_pairs(mock: &MockExchange, count: usize) {
        for i in 0..count {
            mock.add_pair(&format!("PAIR{i}USDT"), dec!(181), qualifying_candles())
                .await;
        }
    }

    #[tokio::test]
    async fn test_budget_limits_buys_to_seven_units() {
        let mock = Arc::new(MockExchange::new());
        mock.set_balance("USDT", dec!(100)).await;
        seed_qualifying_pairs(&mock, 10).await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store.clone(), TradeConfig::default());
        let summary = scanner.scan_round().await;

        // 100 * 0.9 = 90 budget; 90 / 12 covers 7 whole units.
        assert_eq!(summary.capital_for_buys, dec!(90.0));
        assert_eq!(summary.candidates, 10);
        assert_eq!(summary.trades_opened, 7);
        // The summary reflects positions opened during this round.
        assert_eq!(summary.open_trade_count, 7);
        assert_eq!(mock.buys().await.len(), 7);
        assert_eq!(store.open_trade_count().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_all_candidates_bought_when_budget_allows() {
        let mock = Arc::new(MockExchange::new());
        mock.set_balance("USDT", dec!(100)).await;
        seed_qualifying_pairs(&mock, 5).await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store, TradeConfig::default());
        let summary = scanner.scan_round().await;

        assert_eq!(summary.candidates, 5);
        assert_eq!(summary.trades_opened, 5);
    }

    #[tokio::test]
    async fn test_open_pairs_are_not_reevaluated() {
        let mock = Arc::new(MockExchange::new());
        mock.set_balance("USDT", dec!(100)).await;
        seed_qualifying_pairs(&mock, 3).await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        store
            .create_open_trade(&NewTrade {
                pair: "PAIR0USDT".to_string(),
                order_id: 77,
                entry_price: dec!(181),
                quantity: dec!(0.06),
            })
            .unwrap();

        let scanner = scanner_with(mock.clone(), store, TradeConfig::default());
        let summary = scanner.scan_round().await;

        assert_eq!(summary.pairs_scanned, 2);
        // One pre-existing position plus the two opened this round.
        assert_eq!(summary.open_trade_count, 3);
        let buys = mock.buys().await;
        assert!(buys.iter().all(|(pair, _)| pair != "PAIR0USDT"));
    }

    #[tokio::test]
    async fn test_round_cap_truncates_pair_list() {
        let mock = Arc::new(MockExchange::new());
        mock.set_balance("USDT", dec!(1000)).await;
        seed_qualifying_pairs(&mock, 5).await;

        let config = TradeConfig {
            max_pairs_per_round: 3,
            ..TradeConfig::default()
        };
        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store, config);
        let summary = scanner.scan_round().await;

        assert_eq!(summary.pairs_scanned, 3);
        assert_eq!(mock.candle_fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_one_failing_pair_does_not_stop_the_round() {
        let mock = Arc::new(MockExchange::new());
        mock.set_balance("USDT", dec!(100)).await;
        seed_qualifying_pairs(&mock, 3).await;
        mock.fail_candles_for("PAIR1USDT").await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store, TradeConfig::default());
        let summary = scanner.scan_round().await;

        assert_eq!(summary.pairs_scanned, 3);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.trades_opened, 2);
    }

    #[tokio::test]
    async fn test_balance_failure_skips_the_round() {
        let mock = Arc::new(MockExchange::new());
        seed_qualifying_pairs(&mock, 3).await;
        mock.fail_balance(true).await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store, TradeConfig::default());
        let summary = scanner.scan_round().await;

        assert_eq!(summary.trades_opened, 0);
        assert_eq!(summary.capital_for_buys, Decimal::ZERO);
        assert_eq!(mock.candle_fetch_count(), 0);
        assert!(mock.buys().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_signal_means_no_buys() {
        let mock = Arc::new(MockExchange::new());
        mock.set_balance("USDT", dec!(100)).await;
        mock.add_pair("FLATUSDT", dec!(100), flat_candles()).await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store, TradeConfig::default());
        let summary = scanner.scan_round().await;

        assert_eq!(summary.pairs_scanned, 1);
        assert_eq!(summary.candidates, 0);
        assert!(mock.buys().await.is_empty());
    }

    #[tokio::test]
    async fn test_order_rejection_leaves_budget_for_next_candidate() {
        let mock = Arc::new(MockExchange::new());
        // Budget of 22.5 covers one unit of 12 but not two.
        mock.set_balance("USDT", dec!(25)).await;
        seed_qualifying_pairs(&mock, 3).await;
        mock.reject_orders_for("PAIR0USDT").await;

        let store = Arc::new(TradeStore::in_memory().unwrap());
        let scanner = scanner_with(mock.clone(), store, TradeConfig::default());
        let summary = scanner.scan_round().await;

        // The rejected buy consumed no budget, so PAIR1USDT still fits.
        assert_eq!(summary.trades_opened, 1);
        let buys = mock.buys().await;
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].0, "PAIR1USDT");
    }
}
