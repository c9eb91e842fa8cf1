//! Background task owning the live channel
//!
//! All state transitions happen on this single task: commands from the
//! [`ConnectionManager`](super::ConnectionManager) handle, link events from
//! the handshake/reader tasks, snapshot results and the reconnect timer are
//! serialized through one `select!` loop.

use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use url::Url;

use super::dispatch::dispatch_frame;
use super::state::{ConnectionState, ConnectionStatus};
use crate::error::{categorize_error, ErrorCategory, RetryPolicy, TransportError};
use crate::fetch::SessionDataFetcher;
use crate::notify::{Notifier, Severity};
use crate::store::{HandlerTable, SessionStateSink, Snapshot};
use crate::transport::{CloseCode, Connector, FrameStream, Link, LinkCloser};

pub(crate) const CONNECTED_MESSAGE: &str = "Websocket connected";
pub(crate) const CLOSED_MESSAGE: &str = "The websocket connection has been closed";
pub(crate) const ABANDONED_MESSAGE: &str = "The websocket connection could not be re-established";

/// Upper bound for sending a close frame during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) enum Command {
    Connect {
        session_id: String,
        url: Url,
        ack: oneshot::Sender<()>,
    },
    Disconnect {
        reason: String,
        ack: oneshot::Sender<()>,
    },
}

/// Events from tasks spawned for a channel, tagged with the channel
/// generation so that anything from a replaced link is ignored
enum LinkEvent {
    Opened { generation: u64, link: Link },
    OpenFailed { generation: u64, error: TransportError },
    Frame { generation: u64, text: String },
    Error { generation: u64, error: TransportError },
    Closed { generation: u64 },
    Snapshot {
        generation: u64,
        result: anyhow::Result<Snapshot>,
    },
}

/// The live connection bound to one session
struct Channel {
    session_id: String,
    url: Url,
    state: ConnectionState,
    retries: u32,
    generation: u64,
    closer: Option<Box<dyn LinkCloser>>,
    /// Frame reader of the open link
    task: Option<JoinHandle<()>>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Channel {
    fn cancel_timer(&mut self) {
        self.timer = None;
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn stop(&mut self) {
        self.cancel_timer();
        self.abort_task();
    }
}

/// External components the manager drives
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub fetcher: Arc<dyn SessionDataFetcher>,
    pub sink: Arc<dyn SessionStateSink>,
    pub notifier: Arc<dyn Notifier>,
}

pub(crate) struct Driver {
    collaborators: Collaborators,
    handlers: HandlerTable,
    policy: RetryPolicy,
    channel: Option<Channel>,
    /// State reported while there is no channel: `Idle` or `Abandoned`
    rest_state: ConnectionState,
    next_generation: u64,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Driver {
    pub(crate) fn spawn(
        collaborators: Collaborators,
        handlers: HandlerTable,
        policy: RetryPolicy,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> JoinHandle<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            collaborators,
            handlers,
            policy,
            channel: None,
            rest_state: ConnectionState::Idle,
            next_generation: 0,
            events_tx,
            status_tx,
        };
        tokio::spawn(driver.run(commands, events_rx))
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect { session_id, url, ack }) => {
                        self.connect(session_id, url).await;
                        let _ = ack.send(());
                    }
                    Some(Command::Disconnect { reason, ack }) => {
                        self.disconnect(&reason).await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event).await,
                () = reconnect_due(&mut self.channel) => self.on_reconnect_due(),
            }
        }

        // Handle dropped: hang up quietly
        if let Some(channel) = self.channel.take() {
            tracing::debug!(session = %channel.session_id, "connection manager dropped");
            hang_up(channel).await;
        }
    }

    fn already_live(&self, session_id: &str) -> bool {
        matches!(
            &self.channel,
            Some(channel) if channel.session_id == session_id && channel.state.is_live()
        )
    }

    async fn connect(&mut self, session_id: String, url: Url) {
        if self.already_live(&session_id) {
            tracing::debug!(session = %session_id, "connect ignored, channel already live");
            return;
        }

        match self.channel.take() {
            Some(mut channel) if channel.session_id == session_id => {
                // Explicit connect while a reconnect is pending: go now
                channel.cancel_timer();
                channel.url = url;
                self.channel = Some(channel);
            }
            Some(channel) => {
                tracing::info!(
                    from = %channel.session_id,
                    to = %session_id,
                    "switching session"
                );
                hang_up(channel).await;
                self.channel = Some(Channel::new(session_id, url));
            }
            None => self.channel = Some(Channel::new(session_id, url)),
        }

        self.open();
    }

    /// Start a handshake for the current channel
    fn open(&mut self) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        channel.abort_task();
        channel.cancel_timer();
        channel.closer = None;
        channel.generation = generation;
        channel.state = ConnectionState::Connecting;

        tracing::debug!(session = %channel.session_id, attempt = channel.retries, "opening channel");

        // Not tracked by the channel: a handshake that outlives it still
        // reports back, so its link can be hung up properly
        let handshake = self.collaborators.connector.open(channel.url.clone());
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match handshake.await {
                Ok(link) => LinkEvent::Opened { generation, link },
                Err(error) => LinkEvent::OpenFailed { generation, error },
            };
            let _ = events.send(event);
        });

        self.publish();
    }

    async fn disconnect(&mut self, reason: &str) {
        let Some(channel) = self.channel.take() else {
            if self.rest_state != ConnectionState::Idle {
                self.rest_state = ConnectionState::Idle;
                self.publish();
            }
            tracing::info!(%reason, "disconnect without a channel");
            self.collaborators.notifier.panic(reason, None, true);
            return;
        };

        let session_id = channel.session_id.clone();
        hang_up(channel).await;

        self.rest_state = ConnectionState::Idle;
        self.publish();

        tracing::info!(session = %session_id, %reason, "channel disconnected");
        self.collaborators
            .notifier
            .panic(reason, Some(&session_id), true);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.channel
            .as_ref()
            .map(|c| c.generation == generation)
            .unwrap_or(false)
    }

    async fn on_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { generation, link } => {
                if self.is_current(generation) {
                    self.on_open(generation, link);
                } else {
                    // Handshake finished after the channel was replaced
                    tokio::spawn(link.closer.close(CloseCode::CLIENT_REQUESTED));
                }
            }
            LinkEvent::OpenFailed { generation, error } => {
                if self.is_current(generation) {
                    tracing::warn!("websocket handshake failed: {error}");
                    self.on_close();
                }
            }
            LinkEvent::Frame { generation, text } => {
                if self.is_current(generation) {
                    dispatch_frame(
                        &text,
                        &self.handlers,
                        self.collaborators.notifier.as_ref(),
                    );
                }
            }
            LinkEvent::Error { generation, error } => {
                if self.is_current(generation) {
                    tracing::warn!("websocket error: {error}");
                }
            }
            LinkEvent::Closed { generation } => {
                if self.is_current(generation) {
                    self.on_close();
                }
            }
            LinkEvent::Snapshot { generation, result } => {
                if self.is_current(generation) {
                    self.on_snapshot(result);
                }
            }
        }
    }

    fn on_open(&mut self, generation: u64, link: Link) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        channel.state = ConnectionState::Open;
        channel.retries = 0;
        channel.cancel_timer();
        channel.closer = Some(link.closer);
        channel.task = Some(tokio::spawn(pump_frames(
            generation,
            link.frames,
            self.events_tx.clone(),
        )));

        let resync = self.collaborators.fetcher.fetch(&channel.session_id);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = resync.await;
            let _ = events.send(LinkEvent::Snapshot { generation, result });
        });

        tracing::info!(session = %channel.session_id, "channel open");
        self.publish();
        self.collaborators
            .notifier
            .notify(CONNECTED_MESSAGE, Severity::Success);
    }

    fn on_snapshot(&mut self, result: anyhow::Result<Snapshot>) {
        match result {
            Ok(snapshot) => self.collaborators.sink.apply_snapshot(snapshot),
            Err(e) => {
                let session = self
                    .channel
                    .as_ref()
                    .map(|c| c.session_id.as_str())
                    .unwrap_or_default();
                let cause = categorize_error(&e);
                tracing::warn!(%session, ?cause, "resync failed: {e:#}");
                self.report(
                    ErrorCategory::SnapshotFetch,
                    &format!("Could not refresh the retrospective {session}: {e}"),
                );
            }
        }
    }

    fn on_close(&mut self) {
        self.report(ErrorCategory::ConnectionClosed, CLOSED_MESSAGE);

        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        channel.closer = None;
        channel.task = None;

        if self.policy.is_exhausted(channel.retries) {
            self.abandon();
            return;
        }

        let delay = self.policy.delay_for(channel.retries);
        channel.retries += 1;
        channel.state = ConnectionState::Reconnecting;
        channel.timer = Some(Box::pin(sleep(delay)));

        tracing::info!(
            session = %channel.session_id,
            attempt = channel.retries,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.publish();
    }

    /// Retry budget spent: drop the channel and report a terminal failure.
    /// The link is already gone, so there is nothing to hang up.
    fn abandon(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        channel.stop();
        let session_id = channel.session_id;

        self.rest_state = ConnectionState::Abandoned;
        self.publish();

        tracing::error!(
            session = %session_id,
            category = ?ErrorCategory::RetryExhausted,
            "retry budget exhausted, channel abandoned"
        );
        self.collaborators
            .notifier
            .panic(ABANDONED_MESSAGE, Some(&session_id), false);
    }

    fn on_reconnect_due(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.timer = None;
            tracing::info!(
                session = %channel.session_id,
                attempt = channel.retries,
                "retrying connection"
            );
        }
        self.open();
    }

    /// Surface a failure with the severity its category calls for
    fn report(&self, category: ErrorCategory, message: &str) {
        if let Some(severity) = category.severity() {
            self.collaborators.notifier.notify(message, severity);
        }
    }

    fn publish(&self) {
        let status = match &self.channel {
            Some(channel) => ConnectionStatus {
                state: channel.state,
                session_id: Some(channel.session_id.clone()),
                retries: channel.retries,
            },
            None => ConnectionStatus {
                state: self.rest_state,
                session_id: None,
                retries: 0,
            },
        };
        tracing::debug!(state = %status.state, "connection state");
        self.status_tx.send_replace(status);
    }
}

impl Channel {
    fn new(session_id: String, url: Url) -> Self {
        Self {
            session_id,
            url,
            state: ConnectionState::Idle,
            retries: 0,
            generation: 0,
            closer: None,
            task: None,
            timer: None,
        }
    }
}

/// Resolves when the pending reconnect timer fires; never without one
async fn reconnect_due(channel: &mut Option<Channel>) {
    match channel.as_mut().and_then(|c| c.timer.as_mut()) {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

/// Stop the channel and hang up its link, if any, as a client-requested close
async fn hang_up(mut channel: Channel) {
    channel.stop();
    if let Some(closer) = channel.closer.take() {
        if tokio::time::timeout(CLOSE_TIMEOUT, closer.close(CloseCode::CLIENT_REQUESTED))
            .await
            .is_err()
        {
            tracing::debug!(session = %channel.session_id, "close frame timed out");
        }
    }
}

/// Forward frames of one link in arrival order; a transport error ends it
async fn pump_frames(
    generation: u64,
    mut frames: FrameStream,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(text) => {
                if events.send(LinkEvent::Frame { generation, text }).is_err() {
                    return;
                }
            }
            Err(error) => {
                let _ = events.send(LinkEvent::Error { generation, error });
                break;
            }
        }
    }
    let _ = events.send(LinkEvent::Closed { generation });
}
