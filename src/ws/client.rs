//! WebSocket client with cancellation and opt-in reconnection

use super::types::{WsConfig, WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Reusable WebSocket client with ping/pong handling
pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    /// Create a new WebSocket client with the given configuration
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Create a new client with just a URL using default config
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WsConfig::new(url))
    }

    /// Get the configured URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect and return both a receiver and a sender for bidirectional communication
    ///
    /// This spawns a background task that owns the socket. Inbound frames and
    /// connection status events (Connected, Disconnected, Reconnecting,
    /// Failed) arrive on the receiver; strings pushed into the sender are
    /// written as text frames.
    ///
    /// The task stops when `cancel` fires, when the receiver is dropped, or
    /// when the transport fails with no reconnection attempts left.
    pub fn connect(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<WsMessage>, mpsc::Sender<String>) {
        let (msg_tx, msg_rx) = mpsc::channel(1024);
        let (send_tx, send_rx) = mpsc::channel(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::run_connection_loop(config, msg_tx, send_rx, cancel).await {
                tracing::error!(error = %e, "WebSocket connection loop failed");
            }
        });

        (msg_rx, send_tx)
    }

    /// Run the connection loop, reconnecting only while attempts remain
    async fn run_connection_loop(
        config: WsConfig,
        tx: mpsc::Sender<WsMessage>,
        mut send_rx: mpsc::Receiver<String>,
        cancel: CancellationToken,
    ) -> Result<(), WsError> {
        let mut backoff = config.backoff();

        loop {
            match Self::connect_and_stream(&config, &tx, &mut send_rx, &cancel).await {
                Ok(()) => {
                    tracing::info!("WebSocket connection closed cleanly");
                    let _ = tx.send(WsMessage::Disconnected).await;
                    return Ok(());
                }
                Err(e) => {
                    if cancel.is_cancelled() || tx.is_closed() {
                        tracing::info!("WebSocket stopped during shutdown");
                        return Ok(());
                    }

                    let Some((attempt, delay)) = backoff.next_retry() else {
                        tracing::error!(
                            error = %e,
                            attempts = backoff.attempts(),
                            "WebSocket transport failed, not reconnecting"
                        );
                        let _ = tx.send(WsMessage::Failed(e.clone())).await;
                        return Err(e);
                    };

                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "WebSocket connection error, reconnecting..."
                    );
                    let _ = tx.send(WsMessage::Reconnecting { attempt }).await;

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect to WebSocket and stream messages until close, cancellation or error
    async fn connect_and_stream(
        config: &WsConfig,
        tx: &mpsc::Sender<WsMessage>,
        send_rx: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> Result<(), WsError> {
        tracing::info!(url = %config.url, "Connecting to WebSocket");

        let (ws_stream, _response) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = connect_async(config.url.as_str()) => {
                result.map_err(|e| WsError::ConnectionFailed(e.to_string()))?
            }
        };

        let (mut write, mut read) = ws_stream.split();

        tracing::info!("WebSocket connected");

        // Notify connected
        if tx.send(WsMessage::Connected).await.is_err() {
            return Ok(());
        }

        // interval() panics on a zero period
        let mut ping_interval = tokio::time::interval(config.ping_interval.max(MIN_PING_INTERVAL));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut waiting_for_pong = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Cancellation requested, closing WebSocket");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(WsMessage::Text(text)).await.is_err() {
                                tracing::debug!("Receiver dropped, closing connection");
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if tx.send(WsMessage::Binary(data)).await.is_err() {
                                tracing::debug!("Receiver dropped, closing connection");
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            waiting_for_pong = false;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Received close frame");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(WsError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return Err(WsError::ConnectionFailed("Stream ended unexpectedly".into()));
                        }
                        _ => {}
                    }
                }

                // Outgoing text frames
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            write.send(Message::Text(text)).await
                                .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        }
                        None => {
                            // Sender dropped, close connection
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                // Send periodic pings
                _ = ping_interval.tick() => {
                    if waiting_for_pong {
                        return Err(WsError::ConnectionFailed("Pong timeout".into()));
                    }
                    write.send(Message::Ping(vec![])).await
                        .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    waiting_for_pong = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_client_creation() {
        let client = WsClient::with_url("wss://example.com");
        assert_eq!(client.url(), "wss://example.com");
    }

    #[test]
    fn test_ws_client_with_config() {
        let config = WsConfig::new("wss://test.com")
            .max_reconnects(5)
            .ping_interval(Duration::from_secs(15));

        let client = WsClient::new(config);
        assert_eq!(client.url(), "wss://test.com");
        assert_eq!(client.config.max_reconnect_attempts, 5);
        assert_eq!(client.config.ping_interval, Duration::from_secs(15));
    }

    async fn unused_local_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_connection_failure_without_retry() {
        let client = WsClient::with_url(unused_local_url().await);
        let (mut rx, _tx) = client.connect(CancellationToken::new());

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Test timed out");

        assert!(matches!(msg, Some(WsMessage::Failed(WsError::ConnectionFailed(_)))));
    }

    #[tokio::test]
    async fn test_connection_failure_with_retries() {
        let client = WsClient::new(
            WsConfig::new(unused_local_url().await)
                .max_reconnects(2)
                .initial_delay(Duration::from_millis(10)),
        );
        let (mut rx, _tx) = client.connect(CancellationToken::new());

        let mut reconnects = 0;
        let mut failed = false;
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WsMessage::Reconnecting { .. } => reconnects += 1,
                    WsMessage::Failed(_) => {
                        failed = true;
                        break;
                    }
                    _ => {}
                }
            }
        })
        .await
        .expect("Test timed out");

        assert_eq!(reconnects, 2);
        assert!(failed, "Should receive Failed after retries are exhausted");
    }

    #[tokio::test]
    async fn test_zero_ping_interval_does_not_kill_the_task() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let cancel = CancellationToken::new();
        let client = WsClient::new(WsConfig::new(url).ping_interval(Duration::ZERO));
        let (mut rx, _tx) = client.connect(cancel.clone());

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Test timed out");
        assert!(matches!(first, Some(WsMessage::Connected)));

        // A panicking task would close the channel without a status event
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Test timed out");
        assert!(next.is_some());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_quietly() {
        let cancel = CancellationToken::new();
        let client = WsClient::new(
            WsConfig::new(unused_local_url().await)
                .max_reconnects(10)
                .initial_delay(Duration::from_secs(30)),
        );
        let (mut rx, _tx) = client.connect(cancel.clone());

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Test timed out");
        assert!(matches!(first, Some(WsMessage::Reconnecting { attempt: 1 })));

        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Test timed out");
        assert!(next.is_none());
    }
}
