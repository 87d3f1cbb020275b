use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{error, trace};

use hydrogen_core::Message;

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("hydrogen-client/", env!("CARGO_PKG_VERSION"));

/// Handle used by the connection actor to drive a live [`WsBackend`]: send
/// outbound frames, receive inbound messages, and learn when the backend
/// halts. Mirrors the teacher's `BackendDriver` / `WsBackend` split so the
/// actor can swap backends in place across a reconnect.
pub struct BackendDriver {
    pub to_handle: mpsc::UnboundedReceiver<Message>,
    pub error: oneshot::Receiver<ClientError>,
    pub dispatcher: mpsc::UnboundedSender<Message>,
    shutdown: oneshot::Sender<()>,
}

impl BackendDriver {
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
    }
}

/// Owns the live WebSocket connection. Reads frames and forwards decoded
/// [`Message`]s to the connection actor, writes frames handed to it via the
/// dispatcher channel, and pings on an interval to defeat idle-timeout
/// proxies, exactly as the teacher's `WsBackend::spawn` does.
pub struct WsBackend {
    stream: WsStream,
    handler: mpsc::UnboundedSender<Message>,
    error: oneshot::Sender<ClientError>,
    to_dispatch: mpsc::UnboundedReceiver<Message>,
    shutdown: oneshot::Receiver<()>,
}

impl WsBackend {
    /// Performs the WebSocket upgrade handshake, adding a client `User-Agent`
    /// header the way the teacher's `ConnectionDetails` adds an
    /// `Authorization` header in its `IntoClientRequest` impl. `Host` is set
    /// automatically from `url` by tungstenite.
    pub async fn connect(url: &str) -> Result<(Self, BackendDriver), ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        request
            .headers_mut()
            .insert(http::header::USER_AGENT, http::HeaderValue::from_static(USER_AGENT));

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: WsStream) -> (Self, BackendDriver) {
        let (handler, to_handle) = mpsc::unbounded_channel();
        let (dispatcher, to_dispatch) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        (
            WsBackend { stream, handler, error: error_tx, to_dispatch, shutdown: shutdown_rx },
            BackendDriver { to_handle, error: error_rx, dispatcher, shutdown: shutdown_tx },
        )
    }

    async fn handle_text(&mut self, text: String) -> Result<(), ClientError> {
        trace!(text = %text, "received frame");
        match Message::from_json(&text) {
            Ok(message) => {
                if self.handler.send(message).is_err() {
                    return Err(ClientError::DeadChannel);
                }
            }
            Err(e) => {
                error!(error = %e, "failed to decode message");
            }
        }
        Ok(())
    }

    async fn handle(&mut self, item: Result<WsMessage, tokio_tungstenite::tungstenite::Error>) -> Result<(), ClientError> {
        match item {
            Ok(WsMessage::Text(t)) => self.handle_text(t).await,
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => Ok(()),
            Ok(WsMessage::Binary(_)) => {
                error!("unexpected binary frame");
                Ok(())
            }
            Ok(WsMessage::Close(frame)) => {
                if let Some(frame) = frame {
                    trace!(%frame, "received close frame");
                }
                Err(ClientError::UnexpectedClose)
            }
            Err(e) => Err(ClientError::Transport(e.to_string())),
        }
    }

    pub fn spawn(mut self) {
        let fut = async move {
            let mut failure = None;
            loop {
                let keepalive = tokio::time::sleep(KEEPALIVE_INTERVAL);
                tokio::pin!(keepalive);

                tokio::select! {
                    _ = &mut keepalive => {
                        if let Err(e) = self.stream.send(WsMessage::Ping(Vec::new())).await {
                            failure = Some(ClientError::Transport(e.to_string()));
                            break;
                        }
                    }
                    frame = self.stream.next() => {
                        match frame {
                            Some(item) => {
                                if let Err(e) = self.handle(item).await {
                                    failure = Some(e);
                                    break;
                                }
                            }
                            None => {
                                failure = Some(ClientError::UnexpectedClose);
                                break;
                            }
                        }
                    }
                    outgoing = self.to_dispatch.recv() => {
                        match outgoing {
                            Some(message) => {
                                let text = match message.to_json() {
                                    Ok(t) => t,
                                    Err(e) => {
                                        error!(error = %e, "failed to encode outgoing message");
                                        continue;
                                    }
                                };
                                if let Err(e) = self.stream.send(WsMessage::Text(text)).await {
                                    failure = Some(ClientError::Transport(e.to_string()));
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = &mut self.shutdown => {
                        break;
                    }
                }
            }
            if let Some(e) = failure {
                let _ = self.error.send(e);
            }
        };

        tokio::spawn(fut);
    }
}
