//! Error taxonomy for the exchange gateway.

use thiserror::Error;

/// Failures surfaced by exchange operations.
///
/// Transient failures (timeouts, transport) are isolated per unit of work by
/// callers; they never abort a scan round or tear down a monitor subscription.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("missing or invalid API credentials: {0}")]
    Auth(String),

    #[error("timeout during {operation}")]
    Timeout { operation: String },

    #[error("unknown symbol: {0}")]
    NotFound(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("rejected by venue (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    Stream(String),

    #[error("failed to parse venue response: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Map a Binance error body (`{code, msg}`) onto the taxonomy.
    pub(crate) fn from_venue(code: i64, message: String) -> Self {
        match code {
            // -1022: invalid signature, -2014: bad API key format, -2015: rejected key/IP
            -1022 | -2014 | -2015 => ExchangeError::Auth(message),
            // -1121: invalid symbol
            -1121 => ExchangeError::NotFound(message),
            -2010 if message.to_ascii_lowercase().contains("insufficient") => {
                ExchangeError::InsufficientFunds
            }
            _ => ExchangeError::Rejected { code, message },
        }
    }

    /// Whether the failure is worth retrying on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout { .. } | ExchangeError::Transport(_) | ExchangeError::Stream(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_code_mapping() {
        assert!(matches!(
            ExchangeError::from_venue(-2015, "Invalid API-key".into()),
            ExchangeError::Auth(_)
        ));
        assert!(matches!(
            ExchangeError::from_venue(-1121, "Invalid symbol.".into()),
            ExchangeError::NotFound(_)
        ));
        assert!(matches!(
            ExchangeError::from_venue(-2010, "Account has insufficient balance".into()),
            ExchangeError::InsufficientFunds
        ));
        assert!(matches!(
            ExchangeError::from_venue(-1013, "Filter failure: MIN_NOTIONAL".into()),
            ExchangeError::Rejected { code: -1013, .. }
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Timeout {
            operation: "klines".into()
        }
        .is_transient());
        assert!(!ExchangeError::Auth("no key".into()).is_transient());
    }
}
