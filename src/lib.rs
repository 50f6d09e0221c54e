//! Risefall - Automated rise/fall contract trading engine.
//!
//! This crate connects to a broker's WebSocket API, watches a live tick
//! stream, and trades short-duration rise/fall contracts when several
//! independent signal generators agree.
//!
//! # Architecture
//!
//! One [`engine::Engine`] value owns the whole pipeline:
//!
//! - **`protocol`** - WebSocket client, frame types and listener
//!   fan-out
//! - **`engine::analyzer`** - market-condition gate over a rolling
//!   price window
//! - **`strategy`** - pluggable signal generators (momentum, mean
//!   reversion, breakout)
//! - **`engine::consensus`** - staged signal filtering with an
//!   online-trained classifier blend
//! - **`engine::risk`** - position sizing, loss recovery, drawdown
//!   locks and admission control
//! - **`engine::executor`** - order submission, settlement detection
//!   and outcome feedback
//! - **`engine::positions`** - idempotent contract bookkeeping
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with validation
//! - [`domain`] - trades, positions, signals, market types
//! - [`error`] - error types for the crate
//! - [`indicators`] - indicator math shared by the strategies
//! - [`store`] - persistence seams and in-memory implementations

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod protocol;
pub mod store;
pub mod strategy;
