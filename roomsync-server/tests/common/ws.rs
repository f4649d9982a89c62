//! WebSocket client helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connect to the server and return the split socket.
pub async fn connect(url: &str) -> (WsSink, WsStream) {
    let (ws_stream, _) = connect_async(url).await.expect("failed to connect");
    ws_stream.split()
}

/// Connect and consume the welcome message, returning the assigned user ID.
pub async fn connect_with_welcome(url: &str) -> (WsSink, WsStream, String) {
    let (write, mut read) = connect(url).await;
    let welcome = recv_json(&mut read).await.expect("no welcome message");
    assert_eq!(welcome["type"], "welcome");
    let user_id = welcome["userId"]
        .as_str()
        .expect("welcome carries userId")
        .to_string();
    (write, read, user_id)
}

/// Receive and parse a JSON message with timeout.
pub async fn recv_json(stream: &mut WsStream) -> Option<Value> {
    let msg = timeout(Duration::from_secs(5), stream.next())
        .await
        .ok()??
        .ok()?;

    match msg {
        Message::Text(text) => serde_json::from_str(&text).ok(),
        _ => None,
    }
}

/// Receive multiple messages and find one by type.
///
/// Returns the matching message (if found) and everything skipped
/// before it.
pub async fn recv_until_type(
    stream: &mut WsStream,
    msg_type: &str,
    max_messages: usize,
) -> (Option<Value>, Vec<Value>) {
    let mut buffer = Vec::new();
    for _ in 0..max_messages {
        if let Some(msg) = recv_json(stream).await {
            if msg["type"] == msg_type {
                return (Some(msg), buffer);
            }
            buffer.push(msg);
        } else {
            break;
        }
    }
    (None, buffer)
}

/// Send a JSON message.
pub async fn send_json(sink: &mut WsSink, value: &Value) -> Result<(), String> {
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|_| "send failed".to_string())
}
