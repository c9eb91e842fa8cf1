//! # Retro Live - Real-time channel for collaborative retrospectives
//!
//! Keeps a client's view of a shared retrospective session up to date.
//!
//! ## Features
//!
//! - **One channel per session**: a websocket bound to the active session,
//!   replaced cleanly when the user switches sessions
//! - **Bounded reconnection**: 500ms / 1s / 2s backoff, then a fatal notice
//! - **Resync on open**: the full session snapshot is fetched after every
//!   (re)connect, so nothing missed while offline is lost
//! - **Exhaustive routing**: every `create|update|delete` of
//!   `question|retrospective|answer` maps to exactly one handler, checked at
//!   startup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use retro_live::{
//!     ClientConfig, Collaborators, ConnectionManager, ConsoleNotifier, HttpSnapshotFetcher,
//!     RetrospectiveStore, WsConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let store = RetrospectiveStore::new();
//!
//!     let manager = ConnectionManager::new(
//!         &config,
//!         Collaborators {
//!             connector: Arc::new(WsConnector),
//!             fetcher: Arc::new(HttpSnapshotFetcher::new(config.clone())?),
//!             sink: Arc::new(store.clone()),
//!             notifier: Arc::new(ConsoleNotifier),
//!         },
//!     )?;
//!
//!     manager.connect("sprint-42").await?;
//!     tokio::signal::ctrl_c().await?;
//!     manager.disconnect("The user left the retrospective").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod fetch;
pub mod notify;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-export main types for library consumers
pub use config::ClientConfig;
pub use connection::{Collaborators, ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{ErrorCategory, RetryPolicy, TransportError};
pub use fetch::{HttpSnapshotFetcher, SessionDataFetcher};
pub use notify::{ConsoleNotifier, Notifier, Severity};
pub use protocol::{Action, EntityType, EventKey, InboundEvent};
pub use store::{HandlerTable, RetrospectiveStore, SessionStateSink, Snapshot};
pub use transport::{CloseCode, Connector, Link, WsConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
