//! Order sizing against exchange precision filters.

use crate::exchange::{ExchangeError, SpotExchange};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SizingError {
    #[error("{pair}: notional {notional} below venue minimum {min_notional}")]
    BelowMinNotional {
        pair: String,
        notional: Decimal,
        min_notional: Decimal,
    },
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Round `value` down to a multiple of `step`. Passes through unchanged when
/// the venue publishes no step.
pub fn round_down_to_step(value: Decimal, step: Option<Decimal>) -> Decimal {
    match step {
        Some(step) if step > Decimal::ZERO => (value / step).floor() * step,
        _ => value,
    }
}

/// A buy quantity ready for submission, with the price it was sized at.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedBuy {
    pub quantity: Decimal,
    pub price: Decimal,
}

/// Converts notional budgets into venue-legal quantities.
pub struct OrderSizer {
    exchange: Arc<dyn SpotExchange>,
}

impl OrderSizer {
    pub fn new(exchange: Arc<dyn SpotExchange>) -> Self {
        Self { exchange }
    }

    /// Size a market buy spending `notional` of the quote asset.
    ///
    /// The raw quantity `notional / price` is floored to the pair's lot step,
    /// then the resulting notional is checked against the venue minimum.
    pub async fn size_buy(&self, pair: &str, notional: Decimal) -> Result<SizedBuy, SizingError> {
        let price = self.exchange.get_price(pair).await?;
        let filters = self.exchange.get_symbol_filters(pair).await?;

        let quantity = round_down_to_step(notional / price, filters.step_size);
        if let Some(min_notional) = filters.min_notional {
            let effective = quantity * price;
            if effective < min_notional {
                return Err(SizingError::BelowMinNotional {
                    pair: pair.to_string(),
                    notional: effective,
                    min_notional,
                });
            }
        }

        debug!(%pair, %price, %quantity, "sized market buy");
        Ok(SizedBuy { quantity, price })
    }

    /// Floor a held quantity to the pair's lot step for a market sell.
    pub async fn size_sell(&self, pair: &str, quantity: Decimal) -> Result<Decimal, SizingError> {
        let filters = self.exchange.get_symbol_filters(pair).await?;
        Ok(round_down_to_step(quantity, filters.step_size))
    }
}
