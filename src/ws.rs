//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. All WebSocket consumers in the crate should use
//! this module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! [`accept`] performs the server-side upgrade on an already-accepted TCP
//! stream, capturing the request path and query string (needed to read
//! `user_id`/`ticket` off `/ws/vm`) before handing back a split
//! ([`WsWriter`], [`WsReader`]) pair.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;

/// Concrete WebSocket stream type over a plain accepted TCP socket.
type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame carrying the given close code and reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = tungstenite::protocol::CloseFrame {
            code: tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// The request-line a client sent to open the upgrade, captured during the
/// handshake so the caller can read the path and query string.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub path: String,
    pub query: String,
}

/// Parse `name=value` pairs out of a query string. Percent-decoding is not
/// performed since the only values carried here (`user_id`, `ticket`) are
/// opaque tokens the execution plane does not percent-encode.
#[must_use]
pub fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.to_string();
            let value = parts.next().unwrap_or_default().to_string();
            Some((key, value))
        })
        .collect()
}

/// Perform the server-side WebSocket upgrade on an accepted TCP stream.
///
/// Captures the request path/query before completing the handshake so the
/// caller can authenticate and route the connection before trusting any
/// frame on it.
///
/// # Errors
///
/// Returns an error if the handshake fails or the peer sends a malformed
/// HTTP upgrade request.
pub async fn accept(stream: TcpStream) -> Result<(WsWriter, WsReader, HandshakeRequest)> {
    let mut captured = HandshakeRequest::default();
    let callback = |request: &tungstenite::handshake::server::Request,
                    response: tungstenite::handshake::server::Response| {
        captured.path = request.uri().path().to_string();
        captured.query = request.uri().query().unwrap_or_default().to_string();
        Ok(response)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .context("WebSocket upgrade failed")?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }, captured))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_basic() {
        let parsed = parse_query("user_id=abc&ticket=xyz");
        assert_eq!(parsed.get("user_id"), Some(&"abc".to_string()));
        assert_eq!(parsed.get("ticket"), Some(&"xyz".to_string()));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn test_parse_query_missing_value() {
        let parsed = parse_query("user_id=abc&flag");
        assert_eq!(parsed.get("flag"), Some(&String::new()));
    }

    #[tokio::test]
    async fn test_accept_non_websocket_stream_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            use tokio::io::AsyncWriteExt;
            stream.write_all(b"not an http upgrade\r\n\r\n").await.unwrap();
        });
        let (stream, _) = listener.accept().await.unwrap();
        let result = accept(stream).await;
        assert!(result.is_err());
        client.await.unwrap();
    }
}
