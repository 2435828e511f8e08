//! Streamed exit monitoring.
//!
//! Each open position gets its own kline subscription. Exit evaluation runs
//! only when a bar closes; intra-bar ticks never trigger a sell.

use crate::exchange::{KlineStream, KlineSubscription, SpotExchange};
use crate::indicators::IndicatorSnapshot;
use crate::persistence::TradeStore;
use crate::sizing::OrderSizer;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ExitMonitor {
    exchange: Arc<dyn SpotExchange>,
    store: Arc<TradeStore>,
    sizer: OrderSizer,
    stream: KlineStream,
    interval: String,
    candle_limit: u32,
    watched: Mutex<HashSet<String>>,
}

impl ExitMonitor {
    pub fn new(
        exchange: Arc<dyn SpotExchange>,
        store: Arc<TradeStore>,
        stream: KlineStream,
        interval: String,
        candle_limit: u32,
    ) -> Self {
        let sizer = OrderSizer::new(exchange.clone());
        Self {
            exchange,
            store,
            sizer,
            stream,
            interval,
            candle_limit,
            watched: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe every open position that is not already being watched.
    /// Called at boot and again after each scan round.
    pub async fn sync(self: &Arc<Self>) -> Result<()> {
        let open = self.store.list_open_trades()?;
        for trade in open {
            let mut watched = self.watched.lock().await;
            if !watched.insert(trade.pair.clone()) {
                continue;
            }
            drop(watched);

            match self.stream.subscribe(&trade.pair, &self.interval).await {
                Ok(subscription) => {
                    let monitor = self.clone();
                    tokio::spawn(async move {
                        monitor.watch(subscription).await;
                    });
                }
                Err(e) => {
                    warn!(pair = %trade.pair, error = %e, "exit subscription failed");
                    self.watched.lock().await.remove(&trade.pair);
                }
            }
        }
        Ok(())
    }

    /// Consume one subscription until the position is closed or the stream
    /// ends. Evaluation errors keep the subscription alive.
    pub async fn watch(self: Arc<Self>, mut subscription: KlineSubscription) {
        let pair = subscription.pair.clone();
        info!(%pair, "watching for exit");

        while let Some(event) = subscription.next_event().await {
            if !event.is_closed {
                continue;
            }
            match self.check_exit(&pair).await {
                Ok(true) => {
                    subscription.unsubscribe();
                    self.watched.lock().await.remove(&pair);
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!(%pair, error = %e, "exit check failed"),
            }
        }

        debug!(%pair, "exit stream ended");
        self.watched.lock().await.remove(&pair);
    }

    /// Evaluate the exit rule on the freshly closed window and sell when it
    /// fires. Returns true once the position is closed.
    async fn check_exit(&self, pair: &str) -> Result<bool> {
        let candles = self
            .exchange
            .get_candles(pair, &self.interval, self.candle_limit)
            .await?;
        let snapshot = IndicatorSnapshot::compute(&candles)?;
        if !snapshot.exit_signal() {
            return Ok(false);
        }

        let Some(trade) = self.store.find_open_by_pair(pair)? else {
            warn!(%pair, "exit signal without an open trade");
            return Ok(false);
        };

        let quantity = self.sizer.size_sell(pair, trade.quantity).await?;
        let fill = self
            .exchange
            .place_market_sell(pair, quantity)
            .await
            .with_context(|| format!("selling {pair}"))?;

        // The recorded exit price is the signal bar's close, not the fill
        // average, so P&L stays tied to the rule that triggered the sell.
        let exit_price = snapshot.last_close;
        self.store.close_trade(trade.id, exit_price)?;
        info!(
            %pair,
            trade_id = trade.id,
            order_id = fill.order_id,
            %exit_price,
            fill_avg = %fill.avg_price,
            sma_high = %snapshot.sma_high_5,
            "position closed"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinanceConfig;
    use crate::exchange::{Candle, KlineEvent, MockExchange};
    use crate::persistence::{NewTrade, TradeStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(
            Decimal::try_from(open).unwrap(),
            Decimal::try_from(high).unwrap(),
            Decimal::try_from(low).unwrap(),
            Decimal::try_from(close).unwrap(),
        )
    }

    /// Rising series whose last close clears the 5-period high average.
    fn exit_candles() -> Vec<Candle> {
        (0..20)
            .map(|i| {
                let close = 100.0 + 5.0 * i as f64;
                candle(close - 4.0, close + 1.0, close - 1.0, close)
            })
            .collect()
    }

    fn flat_candles() -> Vec<Candle> {
        (0..20).map(|_| candle(100.0, 102.0, 99.0, 100.0)).collect()
    }

    fn event(pair: &str, is_closed: bool) -> KlineEvent {
        KlineEvent {
            pair: pair.to_string(),
            is_closed,
            candle: candle(100.0, 101.0, 99.0, 100.5),
        }
    }

    async fn monitor_with(mock: Arc<MockExchange>, store: Arc<TradeStore>) -> Arc<ExitMonitor> {
        Arc::new(ExitMonitor::new(
            mock,
            store,
            KlineStream::new(&BinanceConfig::default()),
            "1h".to_string(),
            50,
        ))
    }

    fn open_trade(store: &TradeStore, pair: &str) -> i64 {
        store
            .create_open_trade(&NewTrade {
                pair: pair.to_string(),
                order_id: 1,
                entry_price: dec!(150),
                quantity: dec!(0.08),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_unclosed_bars_never_trigger_an_exit() {
        let mock = Arc::new(MockExchange::new());
        mock.add_pair("ABCUSDT", dec!(195), exit_candles()).await;
        let store = Arc::new(TradeStore::in_memory().unwrap());
        open_trade(&store, "ABCUSDT");

        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(event("ABCUSDT", false)).await.unwrap();
        }
        drop(tx);

        let monitor = monitor_with(mock.clone(), store.clone()).await;
        monitor.watch(KlineSubscription::from_channel("ABCUSDT", rx)).await;

        assert!(mock.sells().await.is_empty());
        assert_eq!(store.open_trade_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_bar_with_exit_signal_sells_and_closes() {
        let mock = Arc::new(MockExchange::new());
        mock.add_pair("ABCUSDT", dec!(195), exit_candles()).await;
        let store = Arc::new(TradeStore::in_memory().unwrap());
        open_trade(&store, "ABCUSDT");

        let (tx, rx) = mpsc::channel(8);
        tx.send(event("ABCUSDT", true)).await.unwrap();
        drop(tx);

        let monitor = monitor_with(mock.clone(), store.clone()).await;
        monitor.watch(KlineSubscription::from_channel("ABCUSDT", rx)).await;

        let sells = mock.sells().await;
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].1, dec!(0.08));

        let all = store.list_all_trades().unwrap();
        assert_eq!(all[0].status, TradeStatus::Closed);
        assert_eq!(all[0].exit_price, Some(dec!(195)));
        // (195 - 150) * 0.08
        assert_eq!(all[0].profit_loss, Some(dec!(3.6)));
    }

    #[tokio::test]
    async fn test_exit_price_is_signal_bar_close_not_fill_average() {
        let mock = Arc::new(MockExchange::new());
        // The venue fills at 200 while the signal bar closed at 195.
        mock.add_pair("ABCUSDT", dec!(200), exit_candles()).await;
        let store = Arc::new(TradeStore::in_memory().unwrap());
        open_trade(&store, "ABCUSDT");

        let (tx, rx) = mpsc::channel(8);
        tx.send(event("ABCUSDT", true)).await.unwrap();
        drop(tx);

        let monitor = monitor_with(mock.clone(), store.clone()).await;
        monitor.watch(KlineSubscription::from_channel("ABCUSDT", rx)).await;

        assert_eq!(mock.sells().await.len(), 1);
        let all = store.list_all_trades().unwrap();
        assert_eq!(all[0].exit_price, Some(dec!(195)));
        // (195 - 150) * 0.08
        assert_eq!(all[0].profit_loss, Some(dec!(3.6)));
    }

    #[tokio::test]
    async fn test_no_exit_while_rule_is_quiet() {
        let mock = Arc::new(MockExchange::new());
        mock.add_pair("ABCUSDT", dec!(100), flat_candles()).await;
        let store = Arc::new(TradeStore::in_memory().unwrap());
        open_trade(&store, "ABCUSDT");

        let (tx, rx) = mpsc::channel(8);
        tx.send(event("ABCUSDT", true)).await.unwrap();
        drop(tx);

        let monitor = monitor_with(mock.clone(), store.clone()).await;
        monitor.watch(KlineSubscription::from_channel("ABCUSDT", rx)).await;

        assert!(mock.sells().await.is_empty());
        assert_eq!(store.open_trade_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evaluation_failure_keeps_the_subscription() {
        let mock = Arc::new(MockExchange::new());
        mock.add_pair("ABCUSDT", dec!(195), exit_candles()).await;
        mock.fail_candles_for("ABCUSDT").await;
        let store = Arc::new(TradeStore::in_memory().unwrap());
        open_trade(&store, "ABCUSDT");

        let (tx, rx) = mpsc::channel(8);
        let monitor = monitor_with(mock.clone(), store.clone()).await;
        let handle = tokio::spawn({
            let monitor = monitor.clone();
            async move {
                monitor.watch(KlineSubscription::from_channel("ABCUSDT", rx)).await;
            }
        });

        // First closed bar fails to evaluate; the watcher must survive it.
        tx.send(event("ABCUSDT", true)).await.unwrap();
        tokio::task::yield_now().await;
        mock.clear_candle_failure("ABCUSDT").await;
        tx.send(event("ABCUSDT", true)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(mock.sells().await.len(), 1);
        assert_eq!(store.open_trade_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exit_signal_without_trade_keeps_watching() {
        let mock = Arc::new(MockExchange::new());
        mock.add_pair("ABCUSDT", dec!(195), exit_candles()).await;
        let store = Arc::new(TradeStore::in_memory().unwrap());

        let (tx, rx) = mpsc::channel(8);
        tx.send(event("ABCUSDT", true)).await.unwrap();
        drop(tx);

        let monitor = monitor_with(mock.clone(), store.clone()).await;
        monitor.watch(KlineSubscription::from_channel("ABCUSDT", rx)).await;

        assert!(mock.sells().await.is_empty());
    }
}
