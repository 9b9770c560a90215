//! WebSocket transport for the realtime endpoint.
//!
//! A spawned task owns the socket. The session talks to it over two channels:
//! outbound JSON text goes through a bounded queue, inbound text frames come
//! back through an unbounded one. The task answers pings and exits when the
//! remote closes, the transport fails, or the connection is closed locally.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::StatusCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult};
use crate::core::credentials::Credential;

/// Outbound queue depth between the session and the socket task.
pub const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close()` waits for the socket task before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Classify a rejected upgrade by its HTTP status.
pub(crate) fn handshake_status_error(status: StatusCode) -> RealtimeError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        RealtimeError::AuthenticationFailed(format!("Handshake rejected with {status}"))
    } else {
        RealtimeError::ProtocolError(format!("Handshake failed with {status}"))
    }
}

/// Map a handshake or transport failure onto the session error taxonomy.
pub(crate) fn map_ws_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response) => handshake_status_error(response.status()),
        tungstenite::Error::Protocol(e) => RealtimeError::ProtocolError(e.to_string()),
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

/// Opens WebSocket connections to an OpenAI-compatible realtime endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    beta_header: Option<String>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            beta_header: Some("realtime=v1".to_string()),
        }
    }

    /// Omit the `OpenAI-Beta` header (GA endpoints).
    pub fn without_beta_header(mut self) -> Self {
        self.beta_header = None;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> RealtimeResult<Box<dyn RealtimeConnection>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|_| {
                RealtimeError::AuthenticationFailed(
                    "Credential contains invalid header characters".to_string(),
                )
            })?;
        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, bearer);
        if let Some(beta) = &self.beta_header {
            let value = HeaderValue::from_str(beta)
                .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
            headers.insert("OpenAI-Beta", value);
        }

        debug!(
            "Opening realtime WebSocket with credential {}",
            credential.redacted()
        );
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_ws_error)?;

        info!("Connected to realtime endpoint");
        Ok(Box::new(WebSocketConnection::spawn(ws_stream)))
    }
}

/// A live WebSocket connection driven by a background task.
pub struct WebSocketConnection {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::UnboundedReceiver<RealtimeResult<String>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WebSocketConnection {
    /// Take ownership of an established stream and start pumping it.
    pub fn spawn<S>(ws_stream: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = task_cancel.cancelled() => {
                        if let Err(e) = ws_sink.send(Message::Close(None)).await {
                            debug!("Failed to send close frame: {}", e);
                        }
                        break;
                    }

                    Some(text) = outbound_rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            let _ = inbound_tx.send(Err(map_ws_error(e)));
                            break;
                        }
                    }

                    frame = ws_source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if inbound_tx.send(Ok(text.as_str().to_owned())).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed by server: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                let _ = inbound_tx.send(Err(map_ws_error(e)));
                                break;
                            }
                            None => {
                                info!("WebSocket stream ended");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            cancel,
            task: Some(task),
        }
    }
}

#[async_trait]
impl RealtimeConnection for WebSocketConnection {
    async fn send(&mut self, message: String) -> RealtimeResult<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    async fn recv(&mut self) -> Option<RealtimeResult<String>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("WebSocket task did not stop in time, aborting");
                task.abort();
            }
        }
        self.inbound.close();
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_401_maps_to_auth_failure() {
        let err = handshake_status_error(StatusCode::UNAUTHORIZED);
        assert!(matches!(err, RealtimeError::AuthenticationFailed(_)));

        let err = handshake_status_error(StatusCode::FORBIDDEN);
        assert!(matches!(err, RealtimeError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_other_http_status_maps_to_protocol_error() {
        let err = handshake_status_error(StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            RealtimeError::ProtocolError(msg) => assert!(msg.contains("500")),
            other => panic!("Expected ProtocolError, got {other:?}"),
        }
    }

    #[test]
    fn test_protocol_error_mapping() {
        let err = map_ws_error(tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ));
        assert!(matches!(err, RealtimeError::ProtocolError(_)));
    }

    #[test]
    fn test_io_error_maps_to_connection_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = map_ws_error(tungstenite::Error::Io(io));
        assert!(matches!(err, RealtimeError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = WebSocketConnector::new();
        let credential = Credential::new("sk-test");
        // Port 9 (discard) is not listening on loopback in test environments
        let result = connector.connect("ws://127.0.0.1:9/realtime", &credential).await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
    }
}
