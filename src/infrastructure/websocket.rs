use crate::types::{Result, SUB_PROTOCOL};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Socket type produced by [`WebSocketFactory`]
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket factory for creating Torc connections
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// Opens a socket negotiating the `torc.json-rpc` sub-protocol
    pub async fn create(url: &str) -> Result<WsStream> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUB_PROTOCOL));

        let (stream, response) = connect_async(request).await?;
        tracing::debug!("WebSocket handshake completed with status {}", response.status());
        Ok(stream)
    }
}
