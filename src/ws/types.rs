//! Transport configuration, status events and errors

use std::time::Duration;
use thiserror::Error;

/// Socket settings for one [`WsClient`](super::WsClient) session.
///
/// `max_reconnect_attempts = 0` keeps the session single-shot: the first
/// transport failure is reported as [`WsMessage::Failed`] and the task ends.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Retries after a transport failure (0 = never reconnect)
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    /// Ceiling for the doubling backoff delay
    pub max_reconnect_delay: Duration,
    /// Keepalive period; a pong must arrive before the next ping is due
    pub ping_interval: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_reconnect_delay = d;
        self
    }

    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// Fresh retry schedule for this config
    pub fn backoff(&self) -> Backoff {
        Backoff {
            attempt: 0,
            max_attempts: self.max_reconnect_attempts,
            delay: self.initial_reconnect_delay,
            max_delay: self.max_reconnect_delay,
        }
    }
}

/// Bounded exponential retry schedule
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    delay: Duration,
    max_delay: Duration,
}

impl Backoff {
    /// Next `(attempt, delay)`, or `None` once the attempts are spent
    pub fn next_retry(&mut self) -> Option<(u32, Duration)> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let delay = self.delay.min(self.max_delay);
        self.delay = self.delay.saturating_mul(2).min(self.max_delay);
        Some((self.attempt, delay))
    }

    /// Retries handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Frames and status events delivered by the transport task
#[derive(Debug, Clone)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    /// Handshake done; subscriptions must be (re)sent now
    Connected,
    /// Closed cleanly by the server or the local side
    Disconnected,
    /// Backing off before the given retry
    Reconnecting { attempt: u32 },
    /// Terminal transport failure; nothing follows this event
    Failed(WsError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single_shot() {
        let config = WsConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0);
        assert!(config.backoff().next_retry().is_none());
    }

    #[test]
    fn test_builder_sets_every_field() {
        let config = WsConfig::new("wss://ws.lightstream.bitflyer.com/json-rpc")
            .max_reconnects(5)
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(30))
            .ping_interval(Duration::from_secs(15));

        assert_eq!(config.url, "wss://ws.lightstream.bitflyer.com/json-rpc");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.ping_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_doubles_up_to_the_ceiling() {
        let mut backoff = WsConfig::new("ws://localhost")
            .max_reconnects(4)
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(3))
            .backoff();

        let schedule: Vec<_> = std::iter::from_fn(|| backoff.next_retry()).collect();
        assert_eq!(
            schedule,
            vec![
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(3)),
                (4, Duration::from_secs(3)),
            ]
        );
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn test_backoff_saturates_on_huge_delays() {
        let mut backoff = WsConfig::new("ws://localhost")
            .max_reconnects(3)
            .initial_delay(Duration::MAX)
            .max_delay(Duration::MAX)
            .backoff();

        assert_eq!(backoff.next_retry(), Some((1, Duration::MAX)));
        assert_eq!(backoff.next_retry(), Some((2, Duration::MAX)));
    }

    #[test]
    fn test_ws_error_display() {
        assert_eq!(
            WsError::ConnectionFailed("timeout".to_string()).to_string(),
            "Connection failed: timeout"
        );
        assert_eq!(WsError::ChannelClosed.to_string(), "Channel closed");
        assert_eq!(
            WsError::SendFailed("broken pipe".to_string()).to_string(),
            "Send failed: broken pipe"
        );
    }
}
