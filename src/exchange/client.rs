//! Binance spot REST API client.

use crate::config::BinanceConfig;
use crate::exchange::error::ExchangeError;
use crate::exchange::traits::SpotExchange;
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Freshness window for the process-wide exchange-info snapshot.
const EXCHANGE_INFO_TTL: Duration = Duration::from_secs(5 * 60);

/// One cached snapshot of all symbols, invalidated purely by age.
struct CachedExchangeInfo {
    symbols: Arc<Vec<SymbolInfo>>,
    fetched_at: Instant,
}

/// Binance spot API client.
///
/// Symbol metadata is cached process-wide; concurrent evaluators observing a
/// stale snapshot may refresh it simultaneously, which is a benign race since
/// the refreshed result is idempotent.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    exchange_info: RwLock<Option<CachedExchangeInfo>>,
}

impl BinanceClient {
    /// Create a new client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = config.api_base.clone().unwrap_or_else(|| {
            if config.testnet {
                SPOT_TESTNET_URL.to_string()
            } else {
                SPOT_BASE_URL.to_string()
            }
        });

        // Non-sensitive connection parameters for operational debugging
        info!(
            base = %base_url,
            testnet = config.testnet,
            timeout_secs = config.request_timeout_secs,
            "Binance spot client configured"
        );

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url,
            exchange_info: RwLock::new(None),
        })
    }

    fn require_credentials(&self) -> Result<(), ExchangeError> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ExchangeError::Auth(
                "API key/secret not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn transport(operation: &str, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::Timeout {
                operation: operation.to_string(),
            }
        } else {
            ExchangeError::Transport(err)
        }
    }

    /// Decode a response body, mapping venue error payloads onto the taxonomy.
    async fn decode<T: DeserializeOwned>(
        response: Response,
        operation: &str,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::transport(operation, e))?;

        if !status.is_success() {
            if let Ok(venue) = serde_json::from_str::<VenueError>(&body) {
                return Err(ExchangeError::from_venue(venue.code, venue.msg));
            }
            return Err(ExchangeError::Rejected {
                code: i64::from(status.as_u16()),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(format!("{operation}: {e}")))
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = Self::encode_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport(operation, e))?;
        Self::decode(response, operation).await
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.require_credentials()?;
        let mut query = Self::encode_query(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Self::timestamp()));
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::transport(operation, e))?;
        Self::decode(response, operation).await
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.require_credentials()?;
        let mut query = Self::encode_query(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Self::timestamp()));
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::transport(operation, e))?;
        Self::decode(response, operation).await
    }

    /// Symbol metadata snapshot, refreshed when older than five minutes.
    async fn exchange_info(&self) -> Result<Arc<Vec<SymbolInfo>>, ExchangeError> {
        {
            let cache = self.exchange_info.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < EXCHANGE_INFO_TTL {
                    return Ok(cached.symbols.clone());
                }
            }
        }

        let info: ExchangeInfo = self
            .public_get("/api/v3/exchangeInfo", "exchangeInfo", &[])
            .await?;
        let symbols = Arc::new(info.symbols);
        debug!(symbols = symbols.len(), "exchange info refreshed");

        *self.exchange_info.write().await = Some(CachedExchangeInfo {
            symbols: symbols.clone(),
            fetched_at: Instant::now(),
        });
        Ok(symbols)
    }

    fn parse_klines(rows: Vec<Vec<serde_json::Value>>) -> Result<Vec<Candle>, ExchangeError> {
        rows.iter()
            .map(|row| {
                let field = |i: usize| -> Result<Decimal, ExchangeError> {
                    let s = row.get(i).and_then(|v| v.as_str()).ok_or_else(|| {
                        ExchangeError::Parse(format!("kline row missing field {i}"))
                    })?;
                    Decimal::from_str(s)
                        .map_err(|e| ExchangeError::Parse(format!("kline field {i}: {e}")))
                };
                Ok(Candle::new(field(1)?, field(2)?, field(3)?, field(4)?))
            })
            .collect()
    }

    async fn place_market_order(
        &self,
        pair: &str,
        side: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        let params = [
            ("symbol", pair.to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
        ];
        let raw: RawOrderResponse = self.signed_post("/api/v3/order", "order", &params).await?;

        let avg_price = if raw.executed_qty > Decimal::ZERO {
            raw.cummulative_quote_qty / raw.executed_qty
        } else {
            Decimal::ZERO
        };

        Ok(OrderFill {
            order_id: raw.order_id,
            executed_qty: raw.executed_qty,
            avg_price,
        })
    }
}

#[async_trait]
impl SpotExchange for BinanceClient {
    #[instrument(skip(self))]
    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError> {
        let account: AccountInfo = self.signed_get("/api/v3/account", "balance", &[]).await?;
        let available = account
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);
        Ok(AssetBalance {
            asset: asset.to_string(),
            available,
        })
    }

    #[instrument(skip(self))]
    async fn get_candles(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let params = [
            ("symbol", pair.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<serde_json::Value>> =
            self.public_get("/api/v3/klines", "klines", &params).await?;
        Self::parse_klines(rows)
    }

    #[instrument(skip(self))]
    async fn get_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let params = [("symbol", pair.to_string())];
        let ticker: PriceTicker = self
            .public_get("/api/v3/ticker/price", "price", &params)
            .await?;
        Ok(ticker.price)
    }

    async fn get_symbol_filters(&self, pair: &str) -> Result<SymbolFilters, ExchangeError> {
        let symbols = self.exchange_info().await?;
        let info = symbols
            .iter()
            .find(|s| s.symbol == pair)
            .ok_or_else(|| ExchangeError::NotFound(pair.to_string()))?;
        Ok(SymbolFilters::from_raw(&info.filters))
    }

    async fn list_quote_pairs(&self, quote_asset: &str) -> Result<Vec<String>, ExchangeError> {
        let symbols = self.exchange_info().await?;
        Ok(symbols
            .iter()
            .filter(|s| s.status == "TRADING" && s.quote_asset == quote_asset)
            .map(|s| s.symbol.clone())
            .collect())
    }

    #[instrument(skip(self))]
    async fn place_market_buy(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        self.place_market_order(pair, "BUY", quantity).await
    }

    #[instrument(skip(self))]
    async fn place_market_sell(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        self.place_market_order(pair, "SELL", quantity).await
    }

    #[instrument(skip(self))]
    async fn list_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        self.signed_get("/api/v3/openOrders", "openOrders", &[])
            .await
    }
}
