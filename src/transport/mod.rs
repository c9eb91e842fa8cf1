pub mod ws;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use url::Url;

use crate::error::TransportError;

pub use ws::WsConnector;

/// Inbound text frames of one link. The stream ending means the link closed.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Application-level close code and reason sent when the client hangs up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseCode {
    /// Deliberate close: user left the session or switched to another one.
    /// Error-path closes come from the server or the network and never carry it.
    pub const CLIENT_REQUESTED: CloseCode = CloseCode {
        code: 4000,
        reason: "client requested disconnect",
    };
}

/// Write half of an open link, used only to hang up
pub trait LinkCloser: Send + Sync {
    fn close(self: Box<Self>, code: CloseCode) -> BoxFuture<'static, ()>;
}

/// An open bidirectional channel to the backend
pub struct Link {
    pub frames: FrameStream,
    pub closer: Box<dyn LinkCloser>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("frames", &"<FrameStream>")
            .field("closer", &"<dyn LinkCloser>")
            .finish()
    }
}

/// Opens links; the future resolves once the handshake completed
pub trait Connector: Send + Sync {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<Link, TransportError>>;
}
