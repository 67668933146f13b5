//! # Stratum Bridge
//!
//! A Stratum V1 relay that sits between downstream mining clients and a
//! single upstream pool account, featuring:
//! - Per-connection bidirectional relay with credential rewriting
//! - In-flight share correlation (accepted/rejected classification)
//! - Static port routing (pool identity, algorithm, nominal difficulty)
//! - Cluster health heartbeats and a real-time stats API
//!
//! ## Architecture
//!
//! The bridge is built with a modular architecture:
//! - **Protocol Layer**: incremental line codec and message rewriting
//! - **Network Layer**: TCP listeners and paired session relays
//! - **Service Layer**: stats aggregation, share/heartbeat sinks, pool sync
//! - **Configuration**: TOML-based configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum_bridge::services::sink::{NullSink, ShareRecorder};
//! use stratum_bridge::{Config, Listener, Manager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::default());
//!     let (recorder, _writer) = ShareRecorder::spawn(Arc::new(NullSink), 1024);
//!     let manager = Arc::new(Manager::new(config, recorder));
//!
//!     let listener = Listener::bind(manager).await?;
//!     listener.accept().await?;
//!
//!     Ok(())
//! }
//! ```

/// Core configuration management
pub mod config;

/// Typed error taxonomy for the bridge
pub mod error;

/// TCP listeners and the per-session relay
pub mod network;

/// Stratum V1 line codec and message rewriting
pub mod protocol;

/// Listen port to pool/algorithm routing
pub mod routing;

/// Service layer: stats, sinks, database gateway, pool sync, HTTP API
pub mod services;

/// Command-line interface
pub mod cli;

/// TCP listener surface (one listener per configured port)
pub mod listener;

/// Central coordinator shared by every session
pub mod manager;

pub use config::Config;
pub use error::{ConfigError, Result, StratumError};
pub use listener::Listener;
pub use manager::Manager;
