use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use crate::error::Result;

/// One established bidirectional message stream.
#[async_trait]
pub trait FeedSocket: Send {
    async fn send(&mut self, message: Message) -> Result<()>;

    /// `None` once the peer has ended the stream.
    async fn recv(&mut self) -> Option<Result<Message>>;

    async fn close(&mut self);
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedSocket>>;
}

/// WebSocket connector over plain TCP or TLS.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedSocket>> {
        let (ws_stream, response) = connect_async(endpoint).await?;
        tracing::debug!(endpoint, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsSocket { stream: ws_stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedSocket for WsSocket {
    async fn send(&mut self, message: Message) -> Result<()> {
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Message>> {
        self.stream
            .next()
            .await
            .map(|msg| msg.map_err(Into::into))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}
