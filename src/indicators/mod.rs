//! Candle indicators driving entry and exit decisions.
//!
//! Entry: last close above the Supertrend line (uptrend) while still below
//! the 3-period SMA of lows, i.e. momentum confirmed but price near the
//! bottom of its recent range. Exit: last close above the 5-period SMA of
//! highs.

use crate::exchange::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

pub const SUPERTREND_ATR_PERIOD: usize = 10;
pub const SUPERTREND_MULTIPLIER: Decimal = dec!(3);
pub const SMA_LOW_PERIOD: usize = 3;
pub const SMA_HIGH_PERIOD: usize = 5;

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("insufficient candle history: need {required}, got {got}")]
    InsufficientHistory { required: usize, got: usize },
}

/// SMA over the trailing `period` values, or `None` when there are too few.
pub fn sma_last(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period as u64))
}

/// Wilder-smoothed ATR series.
///
/// True ranges start at the second candle, so the output covers candles
/// `period..n` and has length `n - period`. Empty when history is too short.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Decimal> {
    if period == 0 || candles.len() <= period {
        return Vec::new();
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let c = &pair[1];
            (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect();

    let period_dec = Decimal::from(period as u64);
    let seed: Decimal = true_ranges[..period].iter().copied().sum::<Decimal>() / period_dec;

    let mut series = Vec::with_capacity(true_ranges.len() - period + 1);
    let mut current = seed;
    series.push(current);
    for tr in &true_ranges[period..] {
        current = (current * (period_dec - Decimal::ONE) + *tr) / period_dec;
        series.push(current);
    }
    series
}

/// Supertrend line with band carryover.
///
/// Output is aligned with [`atr_series`]: one value per candle from index
/// `atr_period` onward. In an uptrend the line tracks the final lower band,
/// in a downtrend the final upper band.
pub fn supertrend_series(
    candles: &[Candle],
    atr_period: usize,
    multiplier: Decimal,
) -> Vec<Decimal> {
    let atr = atr_series(candles, atr_period);
    if atr.is_empty() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(atr.len());
    let mut prev_final_upper = Decimal::ZERO;
    let mut prev_final_lower = Decimal::ZERO;
    let mut prev_value = Decimal::ZERO;

    for (i, atr_value) in atr.iter().enumerate() {
        let candle = &candles[atr_period + i];
        let mid = (candle.high + candle.low) / dec!(2);
        let basic_upper = mid + multiplier * *atr_value;
        let basic_lower = mid - multiplier * *atr_value;

        if i == 0 {
            prev_final_upper = basic_upper;
            prev_final_lower = basic_lower;
            prev_value = basic_lower;
            series.push(prev_value);
            continue;
        }

        let prev_close = candles[atr_period + i - 1].close;
        let final_upper = if prev_close <= prev_final_upper {
            basic_upper.min(prev_final_upper)
        } else {
            basic_upper
        };
        let final_lower = if prev_close >= prev_final_lower {
            basic_lower.max(prev_final_lower)
        } else {
            basic_lower
        };

        let uptrend = if prev_value == prev_final_upper {
            candle.close > final_upper
        } else {
            candle.close >= final_lower
        };
        let value = if uptrend { final_lower } else { final_upper };

        prev_final_upper = final_upper;
        prev_final_lower = final_lower;
        prev_value = value;
        series.push(value);
    }

    series
}

/// Indicator values computed over one candle window.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub supertrend: Decimal,
    pub sma_low_3: Decimal,
    pub sma_high_5: Decimal,
    pub last_close: Decimal,
}

impl IndicatorSnapshot {
    /// Compute all indicators from a window ordered oldest to newest.
    pub fn compute(candles: &[Candle]) -> Result<Self, IndicatorError> {
        let required = (SUPERTREND_ATR_PERIOD + 1).max(SMA_HIGH_PERIOD);
        if candles.len() < required {
            return Err(IndicatorError::InsufficientHistory {
                required,
                got: candles.len(),
            });
        }

        let supertrend = supertrend_series(candles, SUPERTREND_ATR_PERIOD, SUPERTREND_MULTIPLIER);
        let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();
        let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();

        // Lengths are guaranteed by the history check above.
        let supertrend = supertrend.last().copied().ok_or(
            IndicatorError::InsufficientHistory {
                required,
                got: candles.len(),
            },
        )?;
        let sma_low_3 = sma_last(&lows, SMA_LOW_PERIOD).ok_or(
            IndicatorError::InsufficientHistory {
                required,
                got: candles.len(),
            },
        )?;
        let sma_high_5 = sma_last(&highs, SMA_HIGH_PERIOD).ok_or(
            IndicatorError::InsufficientHistory {
                required,
                got: candles.len(),
            },
        )?;
        let last_close = candles[candles.len() - 1].close;

        Ok(Self {
            supertrend,
            sma_low_3,
            sma_high_5,
            last_close,
        })
    }

    /// Uptrend confirmed while price sits below the recent low average.
    pub fn entry_signal(&self) -> bool {
        self.last_close > self.supertrend && self.last_close < self.sma_low_3
    }

    /// Price has cleared the recent high average.
    pub fn exit_signal(&self) -> bool {
        self.last_close > self.sma_high_5
    }
}
