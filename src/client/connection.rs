//! Per-client connection
//!
//! A `Connection` owns one websocket. All outbound packets go through a single
//! sender task fed by an in-order queue, so the dispatcher and the request
//! handlers never write to the socket concurrently. Every `enqueue_send`
//! waits until that task has attempted the write and reports its outcome.
//!
//! Inbound frames are read by `run`, which decodes requests and updates the
//! connection's subscriptions. `run` returns when the peer goes away, the
//! transport fails, or `stop` is called.
//!
//! Lifecycle: `Open` -> `Closing` (stop called, sender signalled) -> `Closed`
//! (sender task finished, transport closed). There is no way back to `Open`.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Sink;
use futures::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::Packet;
use crate::broker::topic::{Subscriptions, Topic};
use crate::transport::message::{ClientOp, Request};
use crate::utils::{RelayError, Result};

type WsSink = Pin<Box<dyn Sink<WsMessage, Error = tungstenite::Error> + Send>>;
type WsSource = BoxStream<'static, std::result::Result<WsMessage, tungstenite::Error>>;

/// Upper bound on the closing handshake once the connection is stopped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Correlation id used when a request could not be decoded at all.
pub const MALFORMED_REQUEST_ID: i64 = -1;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closing,
    Closed,
}

/// Why `run` returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The client closed the websocket or the stream ended.
    PeerClosed,
    /// `stop` was called on this connection.
    Stopped,
}

struct Outbound {
    packet: Arc<Packet>,
    reply: oneshot::Sender<Result<()>>,
}

/// Socket halves and queue receiver, handed to `run` exactly once.
struct Io {
    sink: WsSink,
    source: WsSource,
    queue: mpsc::UnboundedReceiver<Outbound>,
}

pub struct Connection {
    remote: SocketAddr,
    subscriptions: Subscriptions,
    queue: mpsc::UnboundedSender<Outbound>,
    io: Mutex<Option<Io>>,
    state: Arc<AtomicU8>,
    stop_tx: watch::Sender<bool>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Wraps an already upgraded websocket. Nothing is read or written until
    /// `run` is called.
    pub fn new<S>(ws: WebSocketStream<S>, remote: SocketAddr) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);

        Self {
            remote,
            subscriptions: Subscriptions::new(),
            queue,
            io: Mutex::new(Some(Io {
                sink: Box::pin(sink),
                source: source.boxed(),
                queue: queue_rx,
            })),
            state: Arc::new(AtomicU8::new(OPEN)),
            stop_tx,
            connected_at: Utc::now(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.subscriptions.contains(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.subscriptions.topics()
    }

    pub fn state(&self) -> ConnState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnState::Open,
            CLOSING => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() != ConnState::Open
    }

    /// Queues a packet and waits for the sender task to write it.
    ///
    /// Packets are written in the order their `enqueue_send` calls enter the
    /// queue. Fails fast with `ConnectionClosed` once the connection is
    /// stopping. There is no timeout: a peer that stops reading keeps the
    /// caller waiting until the write fails or the connection is stopped.
    pub async fn enqueue_send(&self, packet: Arc<Packet>) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }

        let (reply, outcome) = oneshot::channel();
        self.queue
            .send(Outbound { packet, reply })
            .map_err(|_| RelayError::ConnectionClosed)?;

        // sender dropped without answering: the queue was torn down
        outcome.await.map_err(|_| RelayError::ConnectionClosed)?
    }

    /// Sends a response to a client request.
    pub async fn respond(&self, id: i64, ok: bool, message: impl Into<String>) -> Result<()> {
        self.enqueue_send(Arc::new(Packet::response(id, ok, message)))
            .await
    }

    /// Subscribes to `topic` if it is supported and answers the request either way.
    ///
    /// The only error is a failure to deliver that answer.
    pub async fn subscribe(&self, topic: &str, request_id: i64) -> Result<()> {
        match topic.parse::<Topic>() {
            Ok(topic) => {
                self.subscriptions.insert(topic);
                debug!(remote = %self.remote, %topic, "subscribed");
                self.respond(request_id, true, format!("subscribed topic: {topic}"))
                    .await
            }
            Err(_) => {
                self.respond(request_id, false, format!("unknown topic: {topic}"))
                    .await
            }
        }
    }

    /// Drops `topic` from the subscriptions and always reports success, whether
    /// or not the topic was subscribed or even exists.
    pub async fn unsubscribe(&self, topic: &str, request_id: i64) -> Result<()> {
        if let Ok(known) = topic.parse::<Topic>() {
            self.subscriptions.remove(known);
            debug!(remote = %self.remote, topic = %known, "unsubscribed");
        }
        self.respond(
            request_id,
            true,
            format!("unsubscribed topic (unchecked): {topic}"),
        )
        .await
    }

    /// Starts the sender task and runs the receive loop until the connection
    /// terminates.
    pub async fn run(&self) -> Result<Termination> {
        let io = self.io.lock().ok().and_then(|mut io| io.take());
        let Some(Io {
            sink,
            mut source,
            queue,
        }) = io
        else {
            // stop() got here first and already dropped the transport
            return if self.is_closed() {
                Ok(Termination::Stopped)
            } else {
                Err(RelayError::ConnectionClosed)
            };
        };

        tokio::spawn(send_loop(
            sink,
            queue,
            self.stop_tx.subscribe(),
            Arc::clone(&self.state),
            self.remote,
        ));

        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            let frame = tokio::select! {
                biased;
                _ = stop_rx.wait_for(|stopped| *stopped) => return Ok(Termination::Stopped),
                frame = source.next() => frame,
            };

            let handled = match frame {
                None => return Ok(Termination::PeerClosed),
                Some(Ok(WsMessage::Text(text))) => self.handle_request(text.as_bytes()).await,
                Some(Ok(WsMessage::Binary(data))) => self.handle_request(&data).await,
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(remote = %self.remote, ?frame, "close frame received");
                    return Ok(Termination::PeerClosed);
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => Ok(()),
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed)) => {
                    return Ok(Termination::PeerClosed);
                }
                Some(Err(e)) => return Err(e.into()),
            };

            if let Err(e) = handled {
                if self.is_closed() {
                    return Ok(Termination::Stopped);
                }
                return Err(e);
            }
        }
    }

    async fn handle_request(&self, raw: &[u8]) -> Result<()> {
        let request: Request = match serde_json::from_slice(raw) {
            Ok(request) => request,
            Err(e) => {
                error!(remote = %self.remote, "ws request decode: {e}");
                return self
                    .respond(MALFORMED_REQUEST_ID, false, e.to_string())
                    .await;
            }
        };

        match request.client_op() {
            Ok(ClientOp::Subscribe) => self.subscribe(&request.topic, request.id).await,
            Ok(ClientOp::Unsubscribe) => self.unsubscribe(&request.topic, request.id).await,
            Err(op) => {
                error!(remote = %self.remote, op, "unsupported request type");
                Ok(())
            }
        }
    }

    /// Closes the transport and signals the sender task, once.
    ///
    /// Returns `true` only for the call that actually performed the stop; any
    /// other call, concurrent or later, is a no-op.
    pub fn stop(&self) -> bool {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        debug!(remote = %self.remote, "closing websocket connection");
        self.stop_tx.send_replace(true);

        // never ran: no sender task will close the socket, drop it here
        let never_ran = self.io.lock().ok().and_then(|mut io| io.take());
        if never_ran.is_some() {
            drop(never_ran);
            self.state.store(CLOSED, Ordering::Release);
        }
        true
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote)
            .field("subscriptions", &self.subscriptions.topics())
            .field("state", &self.state())
            .finish()
    }
}

/// The only writer of the websocket sink.
async fn send_loop(
    mut sink: WsSink,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    mut stop_rx: watch::Receiver<bool>,
    state: Arc<AtomicU8>,
    remote: SocketAddr,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            outbound = queue.recv() => outbound,
        };
        let Some(Outbound { packet, reply }) = outbound else {
            break;
        };

        // a stop aborts a write that the peer is not draining
        let (result, stopped) = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped) => (Err(RelayError::ConnectionClosed), true),
            result = write_packet(&mut sink, &packet) => (result, false),
        };
        if let Err(e) = &result {
            debug!(%remote, "ws write failed: {e}");
        }
        let _ = reply.send(result);
        if stopped {
            break;
        }
    }

    // anything still queued is dropped, failing its caller
    queue.close();
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%remote, "ws close: {e}"),
        Err(_) => warn!(%remote, "ws close timed out"),
    }
    state.store(CLOSED, Ordering::Release);
    debug!(%remote, "send loop closed");
}

async fn write_packet(sink: &mut WsSink, packet: &Packet) -> Result<()> {
    let text = serde_json::to_string(packet)?;
    sink.send(WsMessage::text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests;
