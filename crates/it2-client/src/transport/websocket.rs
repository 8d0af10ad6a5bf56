//! WebSocket dialer
//!
//! Speaks the terminal's scripting protocol over tokio-tungstenite, on top of
//! either a TCP stream or a Unix domain socket.

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use it2_core::{Endpoint, Handshake};
use it2_protocol::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use super::{Dialer, Duplex, WireMessage, NO_STATUS_RECEIVED};
use crate::error::TransportError;

/// Production [`Dialer`] over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    max_message_size: usize,
}

impl WebSocketDialer {
    /// Dialer accepting messages up to the default frame limit
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_PAYLOAD_SIZE + HEADER_SIZE)
    }

    /// Dialer accepting messages up to `max_message_size` bytes
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    fn config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }

    async fn upgrade<S>(
        &self,
        stream: S,
        endpoint: &Endpoint,
        handshake: &Handshake,
    ) -> Result<Duplex, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let request = build_request(endpoint, handshake)?;
        let (ws, response) =
            tokio_tungstenite::client_async_with_config(request, stream, Some(self.config()))
                .await?;
        tracing::debug!(
            %endpoint,
            status = %response.status(),
            "WebSocket handshake complete"
        );
        Ok(into_duplex(ws))
    }
}

impl Default for WebSocketDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        handshake: &Handshake,
    ) -> Result<Duplex, TransportError> {
        match endpoint {
            Endpoint::Tcp(address) => {
                let stream = TcpStream::connect(address.as_str()).await?;
                stream.set_nodelay(true)?;
                self.upgrade(stream, endpoint, handshake).await
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                self.upgrade(stream, endpoint, handshake).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::UnsupportedEndpoint),
        }
    }
}

/// Build the upgrade request for `endpoint`, carrying the handshake headers
pub fn build_request(
    endpoint: &Endpoint,
    handshake: &Handshake,
) -> Result<Request, TransportError> {
    let mut request = endpoint.websocket_url().as_str().into_client_request()?;
    let headers = request.headers_mut();

    for (name, value) in handshake.headers() {
        let value = HeaderValue::from_str(&value).map_err(|e| TransportError::InvalidHeader {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        headers.insert(HeaderName::from_static(name), value);
    }

    Ok(request)
}

fn into_duplex<S>(ws: WebSocketStream<S>) -> Duplex
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink
        .sink_map_err(TransportError::WebSocket)
        .with(|message: WireMessage| future::ready(Ok::<_, TransportError>(to_ws_message(message))));
    let stream = stream.filter_map(|item| future::ready(from_ws_message(item)));

    Duplex {
        sink: Box::pin(sink),
        stream: Box::pin(stream),
    }
}

fn to_ws_message(message: WireMessage) -> Message {
    match message {
        WireMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
        WireMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_ws_message(
    item: Result<Message, tungstenite::Error>,
) -> Option<Result<WireMessage, TransportError>> {
    match item {
        Ok(Message::Binary(data)) => Some(Ok(WireMessage::Binary(data.into()))),
        Ok(Message::Close(frame)) => {
            let (code, reason) = match frame {
                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                None => (NO_STATUS_RECEIVED, String::new()),
            };
            Some(Ok(WireMessage::Close { code, reason }))
        }
        Ok(Message::Text(text)) => {
            tracing::warn!(len = text.len(), "Dropping text frame; only binary frames are accepted");
            None
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::WebSocket(e))),
    }
}
