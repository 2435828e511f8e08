//! Type definitions for Binance spot API responses.

use rust_decimal::Decimal;
use serde::Deserialize;

/// One OHLC bucket. Sequences are ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    pub fn new(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            open,
            high,
            low,
            close,
        }
    }
}

/// Free balance for one asset.
#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub asset: String,
    pub available: Decimal,
}

/// Confirmed fill of a market order.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: i64,
    pub executed_qty: Decimal,
    /// Volume-weighted average fill price; zero when the venue reported no fills.
    pub avg_price: Decimal,
}

/// An order resting on the venue's book.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    #[serde(rename = "symbol")]
    pub pair: String,
    #[serde(rename = "orderId")]
    pub order_id: i64,
}

/// Per-pair precision filters extracted from `exchangeInfo`.
///
/// `tick_size` is carried for completeness but unused in sizing; absent
/// filters leave the corresponding field `None` and sizing passes values
/// through unrounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolFilters {
    pub step_size: Option<Decimal>,
    pub tick_size: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl SymbolFilters {
    pub(crate) fn from_raw(filters: &[RawFilter]) -> Self {
        let mut out = SymbolFilters::default();
        for f in filters {
            match f.filter_type.as_str() {
                "LOT_SIZE" => out.step_size = f.step_size,
                "PRICE_FILTER" => out.tick_size = f.tick_size,
                // Binance renamed MIN_NOTIONAL to NOTIONAL on spot; accept both
                "MIN_NOTIONAL" | "NOTIONAL" => {
                    out.min_notional = out.min_notional.or(f.min_notional)
                }
                _ => {}
            }
        }
        out
    }
}

// ==================== Raw wire types ====================

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub quote_asset: String,
    #[serde(default)]
    pub(crate) filters: Vec<RawFilter>,
}

/// Single entry of a symbol's `filters` array. Fields vary by filter type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawFilter {
    pub filter_type: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub step_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub tick_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub min_notional: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccountInfo {
    pub balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriceTicker {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrderResponse {
    pub order_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty", with = "rust_decimal::serde::str")]
    pub cummulative_quote_qty: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VenueError {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_filters_from_raw() {
        let raw: Vec<RawFilter> = serde_json::from_str(
            r#"[
                {"filterType": "PRICE_FILTER", "tickSize": "0.01000000", "minPrice": "0.01"},
                {"filterType": "LOT_SIZE", "stepSize": "0.00100000", "minQty": "0.001"},
                {"filterType": "NOTIONAL", "minNotional": "5.00000000"}
            ]"#,
        )
        .unwrap();

        let filters = SymbolFilters::from_raw(&raw);
        assert_eq!(filters.step_size, Some(dec!(0.001)));
        assert_eq!(filters.tick_size, Some(dec!(0.01)));
        assert_eq!(filters.min_notional, Some(dec!(5)));
    }

    #[test]
    fn test_filters_absent_fields() {
        let raw: Vec<RawFilter> =
            serde_json::from_str(r#"[{"filterType": "ICEBERG_PARTS", "limit": 10}]"#).unwrap();
        let filters = SymbolFilters::from_raw(&raw);
        assert_eq!(filters, SymbolFilters::default());
    }
}
