//! WebSocket push channel.

use std::sync::Arc;

use futures::{SinkExt, StreamExt, future::BoxFuture};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info};

use crate::{
    error::TransportError,
    transport::{PushConnector, PushLink},
};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections to one endpoint.
#[derive(Debug, Clone)]
pub struct WsPushConnector {
    url: Arc<str>,
}

impl WsPushConnector {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint {
                url,
                reason: "push endpoint must use ws:// or wss://",
            });
        }
        Ok(Self { url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushConnector for WsPushConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn PushLink>, TransportError>> {
        let url = Arc::clone(&self.url);
        Box::pin(async move {
            debug!(url = %url, "connecting push channel");
            let (stream, response) =
                connect_async(url.as_ref())
                    .await
                    .map_err(|err| TransportError::Connect {
                        url: url.to_string(),
                        source: Box::new(err),
                    })?;
            info!(url = %url, status = response.status().as_u16(), "websocket handshake complete");
            let link: Box<dyn PushLink> = Box::new(WsLink { stream });
            Ok(link)
        })
    }
}

struct WsLink {
    stream: Stream,
}

impl PushLink for WsLink {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream
                .send(Message::Text(text.into()))
                .await
                .map_err(TransportError::link)
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>, TransportError>> {
        Box::pin(async move {
            while let Some(message) = self.stream.next().await {
                match message.map_err(TransportError::link)? {
                    Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                    Message::Close(frame) => {
                        debug!(?frame, "server sent close frame");
                        return Ok(None);
                    }
                    // Pings are answered by tungstenite itself.
                    _ => {}
                }
            }
            Ok(None)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(err) = self.stream.close(None).await {
                debug!(error = %err, "websocket close failed");
            }
        })
    }
}
