//! Live session channel
//!
//! [`ConnectionManager`] keeps one websocket per active retrospective open,
//! reconnects with a bounded backoff when it drops, resyncs the session
//! snapshot after each open and routes inbound events into the session state.

mod dispatch;
mod driver;
mod state;


use anyhow::{anyhow, bail, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub use dispatch::{dispatch_frame, Dispatch};
pub use driver::Collaborators;
pub use state::{ConnectionState, ConnectionStatus};

use crate::config::ClientConfig;
use crate::store::HandlerTable;
use driver::{Command, Driver};

/// Handle to the live channel of one client.
///
/// Calls are serialized through a background task; each `connect` and
/// `disconnect` returns once the driver has processed it. Dropping the
/// manager closes the channel without a notification.
pub struct ConnectionManager {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Start a manager using the handlers exposed by `collaborators.sink`.
    ///
    /// Fails if the sink does not cover every action/entity pair. Must be
    /// called from within a Tokio runtime.
    pub fn new(config: &ClientConfig, collaborators: Collaborators) -> Result<Self> {
        let handlers = HandlerTable::from_sink(collaborators.sink.as_ref())?;
        Self::with_handlers(config, collaborators, handlers)
    }

    /// Start a manager with an explicit handler table
    pub fn with_handlers(
        config: &ClientConfig,
        collaborators: Collaborators,
        handlers: HandlerTable,
    ) -> Result<Self> {
        config.validate()?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let task = Driver::spawn(
            collaborators,
            handlers,
            config.retry_policy(),
            commands_rx,
            status_tx,
        );

        Ok(Self {
            config: config.clone(),
            commands,
            status,
            task,
        })
    }

    /// Open (or keep) the channel for `session_id`.
    ///
    /// No-op while a channel for the same session is connecting or open.
    /// A channel bound to another session is closed first, as a client
    /// initiated close.
    pub async fn connect(&self, session_id: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            bail!("session id must not be empty");
        }
        let url = self.config.socket_url(session_id)?;

        let (ack, done) = oneshot::channel();
        self.send(Command::Connect {
            session_id: session_id.to_string(),
            url,
            ack,
        })?;
        done.await.map_err(|_| anyhow!("connection manager stopped"))
    }

    /// Tear the channel down for good and report `reason` as a user-initiated
    /// terminal notification. Cancels any pending reconnect. Safe to repeat.
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Disconnect {
            reason: reason.to_string(),
            ack,
        })?;
        done.await.map_err(|_| anyhow!("connection manager stopped"))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Watch lifecycle changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.task.is_finished() {
            bail!("connection manager stopped");
        }
        self.commands
            .send(command)
            .map_err(|_| anyhow!("connection manager stopped"))
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.config.host)
            .field("status", &*self.status.borrow())
            .finish()
    }
}
