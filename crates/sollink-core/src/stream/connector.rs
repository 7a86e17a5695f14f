//! Physical streaming transport.
//!
//! The client only exchanges text frames; [`StreamConnector`] hides the
//! websocket library so tests can substitute an in-memory pair.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{CoreError, TransportError};
use crate::rpc::connection::parse_ws_endpoint;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Open one connection. Each call yields a fresh, independent pair.
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// Websocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(endpoint: &str) -> Result<Self, CoreError> {
        Ok(Self {
            url: parse_ws_endpoint(endpoint)?,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        let (socket, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (write, read) = socket.split();

        let sink = write
            .with(|text: String| {
                future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text)))
            })
            .sink_map_err(|e| TransportError::WebSocket(e.to_string()));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes)
                        .map_err(|e| TransportError::WebSocket(format!("non-UTF-8 frame: {e}"))),
                ),
                Ok(Message::Close(frame)) => Some(Err(TransportError::ConnectionLost(
                    frame
                        .map(|f| format!("closed by server: {} {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by server".to_owned()),
                ))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
