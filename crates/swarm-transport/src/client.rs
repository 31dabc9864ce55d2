//! Station-side WebSocket link.
//!
//! [`connect`] dials the CSMS with the `ocpp1.6` subprotocol and splits the
//! socket into a writer task (serialized frame order) and a reader task that
//! forwards text frames. The link is owned by one station agent at a time.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::{TransportConfig, OCPP_SUBPROTOCOL};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands accepted by the writer task.
#[derive(Debug)]
pub enum LinkCommand {
    /// Send a text frame.
    Send(String),
    /// Initiate a clean close (code 1000) and stop writing.
    Close,
}

/// Events produced by the reader task.
#[derive(Debug)]
pub enum LinkEvent {
    /// A text frame arrived.
    Text(String),
    /// The peer closed or the socket died.
    Closed { reason: String },
}

/// An established WebSocket link.
pub struct WsLink {
    /// Submit frames (and the close request) here; order is preserved.
    pub outbox: mpsc::Sender<LinkCommand>,
    /// Inbound text frames and the final close event.
    pub events: mpsc::Receiver<LinkEvent>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsLink {
    /// Request a clean close and wait for both tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.outbox.send(LinkCommand::Close).await;
        let _ = self.writer.await;
        let _ = self.reader.await;
    }

    /// Abort without the close handshake.
    pub fn abort(&self) {
        self.writer.abort();
        self.reader.abort();
    }

    /// Split the link into its channel halves and task handles. The caller
    /// takes over lifetime management; sending [`LinkCommand::Close`] and
    /// awaiting the handles reproduces [`WsLink::shutdown`].
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Sender<LinkCommand>,
        mpsc::Receiver<LinkEvent>,
        JoinHandle<()>,
        JoinHandle<()>,
    ) {
        (self.outbox, self.events, self.writer, self.reader)
    }
}

/// Dial `url` and return a running link.
pub async fn connect(url: &str, config: &TransportConfig) -> TransportResult<WsLink> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl {
            message: e.to_string(),
        })?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        tokio_tungstenite::tungstenite::http::HeaderValue::from_static(OCPP_SUBPROTOCOL),
    );

    info!("connecting to {url}");
    let (stream, response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            timeout_secs: config.connect_timeout.as_secs(),
        })??;

    let negotiated = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok());
    if negotiated != Some(OCPP_SUBPROTOCOL) {
        debug!("server did not echo subprotocol (got {negotiated:?})");
    }

    Ok(spawn_link(stream, config))
}

fn spawn_link(stream: WsStream, config: &TransportConfig) -> WsLink {
    let (mut sink, mut source) = stream.split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<LinkCommand>(config.outbox_depth);
    let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(config.outbox_depth);
    let max_frame = config.max_frame_bytes;

    let writer = tokio::spawn(async move {
        while let Some(command) = outbox_rx.recv().await {
            match command {
                LinkCommand::Send(text) => {
                    if text.len() > max_frame {
                        warn!("dropping oversized outbound frame ({} bytes)", text.len());
                        continue;
                    }
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        warn!("write failed: {e}");
                        break;
                    }
                }
                LinkCommand::Close => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                        debug!("close frame send failed: {e}");
                    }
                    let _ = sink.flush().await;
                    break;
                }
            }
        }
    });

    let reader = tokio::spawn(async move {
        let reason = loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if text.len() > max_frame {
                        warn!("dropping oversized inbound frame ({} bytes)", text.len());
                        continue;
                    }
                    if event_tx.send(LinkEvent::Text(text)).await.is_err() {
                        break "receiver dropped".to_string();
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!("ignoring unexpected binary frame ({} bytes)", data.len());
                }
                // Pings are answered by the protocol layer; nothing to do.
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by peer".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            }
        };
        let _ = event_tx.send(LinkEvent::Closed { reason }).await;
    });

    WsLink {
        outbox: outbox_tx,
        events: event_rx,
        writer,
        reader,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercises the full client link against a minimal in-process server.
    async fn echo_server() -> (std::net::SocketAddr, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    WsMessage::Text(text) => {
                        if ws.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn round_trip_over_loopback() {
        let (addr, server) = echo_server().await;
        let config = TransportConfig::default();
        let mut link = connect(&format!("ws://{addr}/ocpp/TEST-0001"), &config)
            .await
            .unwrap();

        link.outbox
            .send(LinkCommand::Send("[2,\"m1\",\"Heartbeat\",{}]".to_string()))
            .await
            .unwrap();

        match link.events.recv().await {
            Some(LinkEvent::Text(text)) => assert_eq!(text, "[2,\"m1\",\"Heartbeat\",{}]"),
            other => panic!("expected echoed frame, got {other:?}"),
        }

        link.shutdown().await;
        server.abort();
    }

    #[tokio::test]
    async fn connect_refused_is_reported() {
        let config = TransportConfig {
            connect_timeout: std::time::Duration::from_secs(2),
            ..Default::default()
        };
        // Port 9 (discard) is almost certainly closed.
        let result = connect("ws://127.0.0.1:9/ocpp/TEST-0001", &config).await;
        assert!(result.is_err());
    }
}
