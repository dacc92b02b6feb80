//! Helpers shared by the test modules: in-memory websocket pairs and packet
//! assertions.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_tungstenite::WebSocketStream;
use tungstenite::protocol::{Message as WsMessage, Role};

use crate::broker::message::{Packet, ResponsePacket};

pub(crate) const WAIT: Duration = Duration::from_secs(2);

/// A connected (server side, client side) websocket pair over an in-memory pipe.
pub(crate) async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    ws_pair_with_capacity(64 * 1024).await
}

/// Like `ws_pair`, with `capacity` bytes buffered per direction. A small
/// capacity and a client that stops reading leave server writes pending.
pub(crate) async fn ws_pair_with_capacity(
    capacity: usize,
) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (server_io, client_io) = tokio::io::duplex(capacity);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (server, client)
}

pub(crate) fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub(crate) async fn send_json<S>(client: &mut WebSocketStream<S>, value: serde_json::Value)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    client
        .send(WsMessage::text(value.to_string()))
        .await
        .expect("client send failed");
}

/// Next packet pushed by the server; panics on timeout or close.
pub(crate) async fn next_packet<S>(client: &mut WebSocketStream<S>) -> Packet
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a packet")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            WsMessage::Text(text) => return serde_json::from_str(&text).expect("packet json"),
            WsMessage::Close(frame) => panic!("connection closed: {frame:?}"),
            _ => continue,
        }
    }
}

pub(crate) async fn next_response<S>(client: &mut WebSocketStream<S>) -> ResponsePacket
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match next_packet(client).await {
        Packet::Response(resp) => resp,
        other => panic!("expected a response, got {other:?}"),
    }
}

/// Sends a subscribe request and returns the server's answer.
pub(crate) async fn subscribe<S>(client: &mut WebSocketStream<S>, id: i64, topic: &str) -> ResponsePacket
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_json(
        client,
        serde_json::json!({ "op": 0, "id": id, "topic": topic }),
    )
    .await;
    next_response(client).await
}

/// Asserts nothing but control frames arrive within a short window.
pub(crate) async fn expect_silence<S>(client: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let window = tokio::time::sleep(Duration::from_millis(150));
    tokio::pin!(window);
    loop {
        tokio::select! {
            _ = &mut window => return,
            msg = client.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => panic!("unexpected packet: {text}"),
                Some(Ok(_)) => continue,
                _ => return,
            },
        }
    }
}

/// Waits for the peer's close: a close frame, an error or the end of the stream.
pub(crate) async fn expect_closed<S>(client: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(WsMessage::Text(text))) => panic!("unexpected packet: {text}"),
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    }
}

/// Polls `check` until it holds or the wait budget runs out.
pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
