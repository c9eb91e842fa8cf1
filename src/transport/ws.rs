use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{CloseCode, Connector, Link, LinkCloser};
use crate::error::TransportError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Websocket connector backed by `tokio-tungstenite`
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<Link, TransportError>> {
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::new(format!("handshake with {url} failed: {e}")))?;

            let (ws_tx, ws_rx) = ws_stream.split();

            let frames = ws_rx
                .filter_map(|msg| async move {
                    match msg {
                        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                        Ok(Message::Close(frame)) => {
                            if let Some(frame) = frame {
                                let reason: &str = &frame.reason;
                                tracing::debug!(
                                    code = u16::from(frame.code),
                                    reason,
                                    "server closed websocket"
                                );
                            }
                            None
                        }
                        // Binary frames are not part of the protocol
                        Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => None,
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                        Err(e) => Some(Err(TransportError::new(e.to_string()))),
                    }
                })
                .boxed();

            Ok(Link {
                frames,
                closer: Box::new(WsCloser { sink: ws_tx }),
            })
        })
    }
}

struct WsCloser {
    sink: WsSink,
}

impl LinkCloser for WsCloser {
    fn close(self: Box<Self>, code: CloseCode) -> BoxFuture<'static, ()> {
        let mut sink = self.sink;
        Box::pin(async move {
            let frame = CloseFrame {
                code: WsCloseCode::from(code.code),
                reason: code.reason.to_string().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                tracing::debug!("close frame not sent: {e}");
            }
            let _ = sink.close().await;
        })
    }
}
