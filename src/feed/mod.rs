//! Ticker feed module
//!
//! Streams ticker observations for one instrument from the bitFlyer
//! Lightning realtime API and exposes them as an ordered, cancellable
//! sequence of [`Tick`]s.

mod envelope;
mod lightstream;
mod types;

pub use envelope::{decode_envelope, DecodeError, Envelope, SubscribeRequest};
pub use lightstream::{LightstreamFeed, StreamConfig, LIGHTSTREAM_WS_URL, TICKER_CHANNEL_PREFIX};
pub use types::{StreamState, Tick};

use crate::ws::WsError;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors that end a feed session
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(#[source] WsError),
    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Feed task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

/// Trait for ticker feed implementations
#[async_trait]
pub trait TickFeed: Send + Sync {
    /// Start a session; ticks stop when `cancel` fires or the session ends
    async fn subscribe(&self, cancel: CancellationToken) -> Result<TickStream, FeedError>;
}

/// Receiving side of a feed session
pub struct TickStream {
    ticks: mpsc::Receiver<Tick>,
    state: watch::Receiver<StreamState>,
    session: Option<JoinHandle<Result<(), FeedError>>>,
}

impl TickStream {
    /// Stream backed by a running session task
    pub fn new(
        ticks: mpsc::Receiver<Tick>,
        state: watch::Receiver<StreamState>,
        session: JoinHandle<Result<(), FeedError>>,
    ) -> Self {
        Self {
            ticks,
            state,
            session: Some(session),
        }
    }

    /// Stream over a plain channel; ends cleanly once the sender is dropped
    pub fn from_receiver(ticks: mpsc::Receiver<Tick>) -> Self {
        let (_, state) = watch::channel(StreamState::Streaming);
        Self {
            ticks,
            state,
            session: None,
        }
    }

    /// Next tick in arrival order, `None` once the session is over
    pub async fn next(&mut self) -> Option<Tick> {
        self.ticks.recv().await
    }

    /// Current session state
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watch handle for state transitions
    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Wait for the session to end and report how it ended
    pub async fn finish(mut self) -> Result<(), FeedError> {
        self.ticks.close();
        match self.session.take() {
            Some(handle) => handle.await.map_err(FeedError::Task)?,
            None => Ok(()),
        }
    }
}
