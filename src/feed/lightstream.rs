//! bitFlyer Lightning realtime ticker feed (JSON-RPC over WebSocket)

use super::envelope::{decode_envelope, SubscribeRequest};
use super::{FeedError, StreamState, Tick, TickFeed, TickStream};
use crate::config::FeedConfig;
use crate::telemetry;
use crate::ws::{WsClient, WsConfig, WsError, WsMessage};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Lightstream JSON-RPC endpoint
pub const LIGHTSTREAM_WS_URL: &str = "wss://ws.lightstream.bitflyer.com/json-rpc";

/// Prefix of the ticker channel names
pub const TICKER_CHANNEL_PREFIX: &str = "lightning_ticker";

/// Connection parameters for one ticker subscription
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket endpoint
    pub endpoint: String,
    /// Instrument to subscribe to (e.g., "BTC_JPY")
    pub product_code: String,
    /// Channel name prefix; the channel is `<prefix>_<product_code>`
    pub channel_prefix: String,
    /// Capacity of the outbound tick channel
    pub buffer_size: usize,
    /// Transport settings (reconnects, keepalive)
    pub ws: WsConfig,
}

impl StreamConfig {
    /// Config for `product_code` on `endpoint` with default settings
    pub fn new(endpoint: impl Into<String>, product_code: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            ws: WsConfig::new(endpoint.clone()),
            endpoint,
            product_code: product_code.into(),
            channel_prefix: TICKER_CHANNEL_PREFIX.to_string(),
            buffer_size: 1024,
        }
    }
}

impl From<&FeedConfig> for StreamConfig {
    fn from(config: &FeedConfig) -> Self {
        let ws = WsConfig::new(config.endpoint.clone())
            .max_reconnects(config.max_reconnects)
            .initial_delay(Duration::from_millis(config.initial_reconnect_delay_ms))
            .max_delay(Duration::from_secs(config.max_reconnect_delay_secs))
            .ping_interval(Duration::from_secs(config.ping_interval_secs));

        Self {
            endpoint: config.endpoint.clone(),
            product_code: config.product_code.clone(),
            channel_prefix: config.channel_prefix.clone(),
            buffer_size: config.buffer_size,
            ws,
        }
    }
}

/// Realtime ticker feed for one instrument
pub struct LightstreamFeed {
    config: StreamConfig,
}

/// What the message loop needs to know about its subscription
struct Subscription {
    channel: String,
    product_code: String,
    request: String,
}

impl LightstreamFeed {
    /// Create a new feed
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    /// Channel carrying this instrument's ticker
    pub fn channel(&self) -> String {
        format!("{}_{}", self.config.channel_prefix, self.config.product_code)
    }

    /// Serialized subscribe request
    pub fn subscribe_request(&self) -> Result<String, FeedError> {
        let channel = self.channel();
        serde_json::to_string(&SubscribeRequest::new(&channel)).map_err(FeedError::Encode)
    }

    /// Drive one session: subscribe on connect, decode frames, forward ticks.
    ///
    /// Ends with `Ok(())` on cancellation, clean close, or when the tick
    /// receiver is dropped, and with `FeedError::Transport` when the socket
    /// fails or the transport task goes away without saying why. The state is `Terminated` when this returns.
    async fn run_message_loop(
        mut ws_rx: mpsc::Receiver<WsMessage>,
        ws_tx: mpsc::Sender<String>,
        tick_tx: mpsc::Sender<Tick>,
        state: watch::Sender<StreamState>,
        subscription: Subscription,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        let result = loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Feed cancelled");
                    break Ok(());
                }
                msg = ws_rx.recv() => msg,
            };

            match msg {
                Some(WsMessage::Connected) => {
                    if ws_tx.send(subscription.request.clone()).await.is_err() {
                        break Err(FeedError::Transport(WsError::ChannelClosed));
                    }
                    state.send_replace(StreamState::Subscribed);
                    tracing::info!(channel = %subscription.channel, "Subscribed to ticker channel");
                }
                Some(WsMessage::Text(text)) => {
                    let envelope = match decode_envelope(&text) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            telemetry::record_message_skipped(e.kind());
                            tracing::warn!(
                                error = %e,
                                preview = %text.chars().take(100).collect::<String>(),
                                "Skipping undecodable frame"
                            );
                            continue;
                        }
                    };

                    if *state.borrow() == StreamState::Subscribed {
                        state.send_replace(StreamState::Streaming);
                        tracing::debug!("First message decoded, streaming");
                    }

                    if let Some(error) = &envelope.error {
                        tracing::warn!(error = %error, id = ?envelope.id, "JSON-RPC error response");
                    }

                    let tick = match envelope.into_tick(&subscription.channel, &subscription.product_code) {
                        Ok(Some(tick)) => tick,
                        Ok(None) => continue,
                        Err(e) => {
                            telemetry::record_message_skipped(e.kind());
                            tracing::warn!(error = %e, "Skipping malformed channel message");
                            continue;
                        }
                    };

                    telemetry::record_tick_received();
                    tracing::trace!(tick_id = tick.tick_id, ltp = %tick.ltp, "Tick received");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::info!("Feed cancelled");
                            break Ok(());
                        }
                        sent = tick_tx.send(tick) => {
                            if sent.is_err() {
                                tracing::debug!("Tick receiver dropped, stopping feed");
                                break Ok(());
                            }
                        }
                    }
                }
                Some(WsMessage::Binary(_)) => {
                    // Lightstream only sends text frames
                }
                Some(WsMessage::Reconnecting { attempt }) => {
                    tracing::warn!(attempt, "Ticker feed reconnecting...");
                    state.send_replace(StreamState::Connecting);
                }
                Some(WsMessage::Failed(e)) => {
                    tracing::error!(error = %e, "Ticker feed transport failed");
                    break Err(FeedError::Transport(e));
                }
                Some(WsMessage::Disconnected) => {
                    tracing::info!("Ticker feed disconnected");
                    break Ok(());
                }
                None if cancel.is_cancelled() => break Ok(()),
                None => {
                    // Transport task ended without reporting a status
                    tracing::error!("Ticker feed transport task exited unexpectedly");
                    break Err(FeedError::Transport(WsError::ChannelClosed));
                }
            }
        };

        state.send_replace(StreamState::Terminated);
        result
    }
}

#[async_trait]
impl TickFeed for LightstreamFeed {
    async fn subscribe(&self, cancel: CancellationToken) -> Result<TickStream, FeedError> {
        let subscription = Subscription {
            channel: self.channel(),
            product_code: self.config.product_code.clone(),
            request: self.subscribe_request()?,
        };

        tracing::info!(
            endpoint = %self.config.endpoint,
            channel = %subscription.channel,
            "Starting ticker feed"
        );

        let (tick_tx, tick_rx) = mpsc::channel(self.config.buffer_size);
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);

        let client = WsClient::new(self.config.ws.clone());
        state_tx.send_replace(StreamState::Connecting);
        let (ws_rx, ws_tx) = client.connect(cancel.clone());

        let session = tokio::spawn(Self::run_message_loop(
            ws_rx,
            ws_tx,
            tick_tx,
            state_tx,
            subscription,
            cancel,
        ));

        Ok(TickStream::new(tick_rx, state_rx, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CHANNEL: &str = "lightning_ticker_BTC_JPY";

    fn ticker_frame(tick_id: u64, ltp: u32, with_product: bool) -> String {
        let product = if with_product {
            r#""product_code":"BTC_JPY","#
        } else {
            ""
        };
        format!(
            r#"{{"jsonrpc":"2.0","method":"channelMessage","params":{{"channel":"{}","message":{{{}"state":"RUNNING","timestamp":"2024-01-01T00:00:{:02}Z","tick_id":{},"best_bid":{},"best_ask":{},"best_bid_size":1,"best_ask_size":1,"total_bid_depth":1,"total_ask_depth":1,"market_bid_size":0,"market_ask_size":0,"ltp":{},"volume":1,"volume_by_product":1}}}}}}"#,
            CHANNEL, product, tick_id, tick_id, ltp, ltp, ltp
        )
    }

    struct Harness {
        ws_tx: mpsc::Sender<WsMessage>,
        out_rx: mpsc::Receiver<String>,
        tick_rx: mpsc::Receiver<Tick>,
        state_rx: watch::Receiver<StreamState>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<Result<(), FeedError>>,
    }

    fn spawn_loop() -> Harness {
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let (tick_tx, tick_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let cancel = CancellationToken::new();

        let subscription = Subscription {
            channel: CHANNEL.to_string(),
            product_code: "BTC_JPY".to_string(),
            request: "subscribe".to_string(),
        };

        let handle = tokio::spawn(LightstreamFeed::run_message_loop(
            ws_rx,
            out_tx,
            tick_tx,
            state_tx,
            subscription,
            cancel.clone(),
        ));

        Harness {
            ws_tx,
            out_rx,
            tick_rx,
            state_rx,
            cancel,
            handle,
        }
    }

    #[test]
    fn test_channel_name() {
        let feed = LightstreamFeed::new(StreamConfig::new(LIGHTSTREAM_WS_URL, "BTC_JPY"));
        assert_eq!(feed.channel(), CHANNEL);
    }

    #[test]
    fn test_subscribe_request() {
        let mut config = StreamConfig::new(LIGHTSTREAM_WS_URL, "FX_BTC_JPY");
        config.channel_prefix = "lightning_board".to_string();
        let feed = LightstreamFeed::new(config);

        let request: serde_json::Value =
            serde_json::from_str(&feed.subscribe_request().unwrap()).unwrap();
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "subscribe");
        assert_eq!(request["params"]["channel"], "lightning_board_FX_BTC_JPY");
    }

    #[tokio::test]
    async fn test_state_machine_and_tick_flow() {
        let mut h = spawn_loop();

        h.ws_tx.send(WsMessage::Connected).await.unwrap();
        assert_eq!(h.out_rx.recv().await.unwrap(), "subscribe");
        h.state_rx.changed().await.unwrap();
        assert_eq!(*h.state_rx.borrow(), StreamState::Subscribed);

        h.ws_tx
            .send(WsMessage::Text(ticker_frame(1, 100, true)))
            .await
            .unwrap();
        let tick = h.tick_rx.recv().await.unwrap();
        assert_eq!(tick.ltp, dec!(100));
        assert_eq!(*h.state_rx.borrow(), StreamState::Streaming);

        h.ws_tx.send(WsMessage::Disconnected).await.unwrap();
        assert!(h.handle.await.unwrap().is_ok());
        assert_eq!(*h.state_rx.borrow(), StreamState::Terminated);
        assert!(h.tick_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped_in_order() {
        let mut h = spawn_loop();
        h.ws_tx.send(WsMessage::Connected).await.unwrap();

        for msg in [
            ticker_frame(1, 100, true),
            "{garbage".to_string(),
            r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_ticker_BTC_JPY","message":{"ltp":"x"}}}"#.to_string(),
            r#"{"jsonrpc":"2.0","method":"somethingElse","params":{}}"#.to_string(),
            ticker_frame(2, 101, false),
        ] {
            h.ws_tx.send(WsMessage::Text(msg)).await.unwrap();
        }

        let first = h.tick_rx.recv().await.unwrap();
        let second = h.tick_rx.recv().await.unwrap();
        assert_eq!(first.tick_id, 1);
        assert_eq!(second.tick_id, 2);
        assert_eq!(second.instrument, "BTC_JPY");

        h.cancel.cancel();
        assert!(h.handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_transport_failure_terminates_with_error() {
        let mut h = spawn_loop();
        h.ws_tx
            .send(WsMessage::Failed(WsError::ConnectionFailed("reset".into())))
            .await
            .unwrap();

        let result = h.handle.await.unwrap();
        assert!(matches!(result, Err(FeedError::Transport(_))));
        assert_eq!(*h.state_rx.borrow(), StreamState::Terminated);
        assert!(h.tick_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_task_exit_is_an_error() {
        let mut h = spawn_loop();
        h.ws_tx.send(WsMessage::Connected).await.unwrap();
        assert_eq!(h.out_rx.recv().await.unwrap(), "subscribe");
        h.ws_tx
            .send(WsMessage::Text(ticker_frame(1, 100, true)))
            .await
            .unwrap();
        assert_eq!(h.tick_rx.recv().await.unwrap().tick_id, 1);

        // No Disconnected or Failed before the channel closes
        drop(h.ws_tx);

        let result = h.handle.await.unwrap();
        assert!(matches!(
            result,
            Err(FeedError::Transport(WsError::ChannelClosed))
        ));
        assert_eq!(*h.state_rx.borrow(), StreamState::Terminated);
        assert!(h.tick_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes() {
        let mut h = spawn_loop();
        h.ws_tx.send(WsMessage::Connected).await.unwrap();
        assert_eq!(h.out_rx.recv().await.unwrap(), "subscribe");

        h.ws_tx
            .send(WsMessage::Reconnecting { attempt: 1 })
            .await
            .unwrap();
        h.ws_tx.send(WsMessage::Connected).await.unwrap();
        assert_eq!(h.out_rx.recv().await.unwrap(), "subscribe");

        h.cancel.cancel();
        assert!(h.handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_full_tick_channel() {
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (out_tx, _out_rx) = mpsc::channel(16);
        let (tick_tx, mut tick_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(StreamState::Subscribed);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(LightstreamFeed::run_message_loop(
            ws_rx,
            out_tx,
            tick_tx,
            state_tx,
            Subscription {
                channel: CHANNEL.to_string(),
                product_code: "BTC_JPY".to_string(),
                request: "subscribe".to_string(),
            },
            cancel.clone(),
        ));

        // Second tick blocks on the full channel until cancellation
        ws_tx
            .send(WsMessage::Text(ticker_frame(1, 100, true)))
            .await
            .unwrap();
        ws_tx
            .send(WsMessage::Text(ticker_frame(2, 100, true)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop after cancellation");
        assert!(result.unwrap().is_ok());
        assert_eq!(*state_rx.borrow(), StreamState::Terminated);

        assert_eq!(tick_rx.recv().await.unwrap().tick_id, 1);
        assert!(tick_rx.recv().await.is_none());
    }
}
