//! Binance kline WebSocket stream for real-time exit monitoring.

use crate::config::BinanceConfig;
use crate::exchange::error::ExchangeError;
use crate::exchange::types::Candle;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

const SPOT_WS_URL: &str = "wss://stream.binance.com:9443";
const SPOT_TESTNET_WS_URL: &str = "wss://testnet.binance.vision";

/// Backpressure bound per pair; bar-close events are sparse, so a small
/// buffer is plenty.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// One kline tick for a pair. `is_closed` is true only once per bucket,
/// when its time window has fully elapsed.
#[derive(Debug, Clone)]
pub struct KlineEvent {
    pub pair: String,
    pub is_closed: bool,
    pub candle: Candle,
}

#[derive(Debug, Deserialize)]
struct KlineMessage {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "o", with = "rust_decimal::serde::str")]
    open: Decimal,
    #[serde(rename = "h", with = "rust_decimal::serde::str")]
    high: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    low: Decimal,
    #[serde(rename = "c", with = "rust_decimal::serde::str")]
    close: Decimal,
    #[serde(rename = "x")]
    is_closed: bool,
}

impl KlineMessage {
    fn into_event(self) -> KlineEvent {
        KlineEvent {
            pair: self.symbol,
            is_closed: self.kline.is_closed,
            candle: Candle::new(
                self.kline.open,
                self.kline.high,
                self.kline.low,
                self.kline.close,
            ),
        }
    }
}

/// Factory for per-pair kline subscriptions.
pub struct KlineStream {
    base_url: String,
}

impl KlineStream {
    pub fn new(config: &BinanceConfig) -> Self {
        let base_url = config.ws_base.clone().unwrap_or_else(|| {
            if config.testnet {
                SPOT_TESTNET_WS_URL.to_string()
            } else {
                SPOT_WS_URL.to_string()
            }
        });
        Self { base_url }
    }

    /// Open a dedicated connection for one pair's kline stream.
    ///
    /// Events are delivered through a bounded channel; the network read task
    /// never runs subscriber code. Dropping the returned handle (or calling
    /// [`KlineSubscription::unsubscribe`]) tears the connection down.
    pub async fn subscribe(
        &self,
        pair: &str,
        interval: &str,
    ) -> Result<KlineSubscription, ExchangeError> {
        let stream_name = format!("{}@kline_{}", pair.to_lowercase(), interval);
        let url = format!("{}/ws/{}", self.base_url, stream_name);
        info!(%stream_name, "subscribing to kline stream");

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| ExchangeError::Stream(format!("connect {stream_name}: {e}")))?;
        let (_write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task_stream = stream_name.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<KlineMessage>(&text) {
                            Ok(kline) => {
                                if tx.send(kline.into_event()).await.is_err() {
                                    debug!(stream = %task_stream, "event receiver dropped");
                                    return;
                                }
                            }
                            Err(e) => debug!(stream = %task_stream, error = %e, "unparseable frame"),
                        }
                    }
                    Ok(Message::Ping(_)) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(Message::Close(_)) => {
                        info!(stream = %task_stream, "kline stream closed by server");
                        return;
                    }
                    Err(e) => {
                        error!(stream = %task_stream, error = %e, "kline stream error");
                        return;
                    }
                    _ => {}
                }
            }
        });

        Ok(KlineSubscription {
            pair: pair.to_string(),
            events: rx,
            task: Some(task),
        })
    }
}

/// Cancellable handle to one pair's kline stream.
pub struct KlineSubscription {
    pub pair: String,
    events: mpsc::Receiver<KlineEvent>,
    task: Option<JoinHandle<()>>,
}

impl KlineSubscription {
    /// Build a subscription from a raw event channel, bypassing the network.
    /// Used by tests and paper-trading simulations.
    pub fn from_channel(pair: impl Into<String>, events: mpsc::Receiver<KlineEvent>) -> Self {
        Self {
            pair: pair.into(),
            events,
            task: None,
        }
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<KlineEvent> {
        self.events.recv().await
    }

    /// Terminate the subscription and its network task.
    pub fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!(pair = %self.pair, "kline subscription terminated");
    }
}

impl Drop for KlineSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
