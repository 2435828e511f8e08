//! Boot-time reconciliation of local state against the venue.
//!
//! A trade recorded OPEN locally whose order no longer exists on the venue
//! was closed outside the bot; it is marked CLOSED_MANUALLY so the scanner
//! and exit monitor stop acting on it.

use crate::exchange::SpotExchange;
use crate::persistence::TradeStore;
use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Local OPEN trades with no matching venue order.
    pub closed_manually: usize,
    /// Venue orders with no matching local trade. Reported, never touched.
    pub unknown_venue_orders: usize,
    /// True when the venue could not be queried and nothing was changed.
    pub skipped: bool,
}

pub async fn reconcile(
    exchange: &dyn SpotExchange,
    store: &TradeStore,
) -> Result<ReconcileReport> {
    let open_trades = store.list_open_trades()?;

    let venue_orders = match exchange.list_open_orders().await {
        Ok(orders) => orders,
        Err(e) => {
            warn!(error = %e, "venue unreachable, reconciliation skipped");
            return Ok(ReconcileReport {
                skipped: true,
                ..ReconcileReport::default()
            });
        }
    };

    let venue_keys: HashSet<(String, i64)> = venue_orders
        .iter()
        .map(|o| (o.pair.clone(), o.order_id))
        .collect();
    let local_keys: HashSet<(String, i64)> = open_trades
        .iter()
        .map(|t| (t.pair.clone(), t.order_id))
        .collect();

    let mut closed_manually = 0;
    for trade in &open_trades {
        if !venue_keys.contains(&(trade.pair.clone(), trade.order_id)) {
            if store.mark_closed_manually(&trade.pair, trade.order_id)? {
                info!(
                    pair = %trade.pair,
                    order_id = trade.order_id,
                    "order gone from venue, trade marked closed manually"
                );
                closed_manually += 1;
            }
        }
    }

    let mut unknown_venue_orders = 0;
    for order in &venue_orders {
        if !local_keys.contains(&(order.pair.clone(), order.order_id)) {
            warn!(
                pair = %order.pair,
                order_id = order.order_id,
                "venue order not tracked locally"
            );
            unknown_venue_orders += 1;
        }
    }

    info!(
        open_trades = open_trades.len(),
        venue_orders = venue_orders.len(),
        closed_manually,
        unknown_venue_orders,
        "reconciliation finished"
    );
    Ok(ReconcileReport {
        closed_manually,
        unknown_venue_orders,
        skipped: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockExchange, OpenOrder};
    use crate::persistence::{NewTrade, TradeStatus};
    use rust_decimal_macros::dec;

    fn trade(pair: &str, order_id: i64) -> NewTrade {
        NewTrade {
            pair: pair.to_string(),
            order_id,
            entry_price: dec!(2),
            quantity: dec!(5),
        }
    }

    fn order(pair: &str, order_id: i64) -> OpenOrder {
        OpenOrder {
            pair: pair.to_string(),
            order_id,
        }
    }

    #[tokio::test]
    async fn test_missing_venue_order_marks_trade_closed_manually() {
        let mock = MockExchange::new();
        let store = TradeStore::in_memory().unwrap();
        store.create_open_trade(&trade("XYZUSDT", 111)).unwrap();

        let report = reconcile(&mock, &store).await.unwrap();
        assert_eq!(report.closed_manually, 1);
        assert!(!report.skipped);

        let all = store.list_all_trades().unwrap();
        assert_eq!(all[0].status, TradeStatus::ClosedManually);
    }

    #[tokio::test]
    async fn test_matching_order_keeps_trade_open() {
        let mock = MockExchange::new();
        mock.set_open_orders(vec![order("XYZUSDT", 111)]).await;
        let store = TradeStore::in_memory().unwrap();
        store.create_open_trade(&trade("XYZUSDT", 111)).unwrap();

        let report = reconcile(&mock, &store).await.unwrap();
        assert_eq!(report.closed_manually, 0);
        assert_eq!(store.open_trade_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_venue_order_is_reported_not_touched() {
        let mock = MockExchange::new();
        mock.set_open_orders(vec![order("GHOSTUSDT", 999)]).await;
        let store = TradeStore::in_memory().unwrap();

        let report = reconcile(&mock, &store).await.unwrap();
        assert_eq!(report.unknown_venue_orders, 1);
        assert_eq!(report.closed_manually, 0);
        assert!(store.list_all_trades().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_venue_failure_skips_without_changes() {
        let mock = MockExchange::new();
        mock.fail_open_orders(true).await;
        let store = TradeStore::in_memory().unwrap();
        store.create_open_trade(&trade("XYZUSDT", 111)).unwrap();

        let report = reconcile(&mock, &store).await.unwrap();
        assert!(report.skipped);
        assert_eq!(store.open_trade_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let mock = MockExchange::new();
        let store = TradeStore::in_memory().unwrap();
        store.create_open_trade(&trade("XYZUSDT", 111)).unwrap();

        let first = reconcile(&mock, &store).await.unwrap();
        assert_eq!(first.closed_manually, 1);
        let second = reconcile(&mock, &store).await.unwrap();
        assert_eq!(second.closed_manually, 0);
    }
}
