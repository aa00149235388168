//! tick-candles: real-time tick-to-candle aggregation for bitFlyer Lightning
//!
//! This library provides the core components for:
//! - Realtime ticker feed over the lightstream JSON-RPC WebSocket API
//! - OHLCV aggregation at any number of fixed resolutions
//! - Idempotent candle persistence to SQLite
//! - A cancellable fan-out pipeline tying feed, aggregators and store together
//! - REST ticker snapshots and signed account queries
//! - Structured logging and Prometheus metrics

pub mod candle;
pub mod cli;
pub mod config;
pub mod feed;
pub mod pipeline;
pub mod rest;
pub mod store;
pub mod telemetry;
pub mod ws;
