//! Connection registry and dispatcher
//!
//! The `Registry` is the authoritative set of live connections, keyed by
//! remote address. It admits connections, runs each one on its own task,
//! evicts them when they terminate and fans upstream events out to every
//! connection subscribed to the event's topic.
//!
//! Locking:
//! - `dispatch` holds the shared (read) lock while it walks the set.
//! - admission, removal and shutdown take the exclusive (write) lock.
//! - a connection is stopped *before* the write lock is requested. When no
//!   writer is queued yet, this releases a dispatch pass blocked on that
//!   connection. tokio's `RwLock` is fair, so once a writer waits behind a
//!   stalled pass, later readers and writers wait too.
//!
//! Fairness: `Connection::enqueue_send` waits for the write to happen, so a
//! client that stops reading stalls the whole dispatch pass until its write
//! fails or it is stopped. Slow clients are not isolated from fast ones.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{RwLock, watch};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::broker::message::Packet;
use crate::broker::topic::Topic;
use crate::chain::{ChainHeadEvent, NewTxsEvent};
use crate::client::{Connection, Termination};
use crate::utils::{RelayError, Result};

#[derive(Debug, Default)]
struct Inner {
    conns: HashMap<String, Arc<Connection>>,
    shut_down: bool,
}

#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
    max_connections: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: RwLock::new(Inner::default()),
            max_connections,
            shutdown_tx,
        }
    }

    /// Admission hook for a freshly upgraded websocket: wraps it in a
    /// `Connection` and registers it.
    pub async fn admit<S>(
        self: &Arc<Self>,
        ws: WebSocketStream<S>,
        remote: SocketAddr,
    ) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = Arc::new(Connection::new(ws, remote));
        self.add_connection(Arc::clone(&conn)).await?;
        Ok(conn)
    }

    /// Registers `conn` under its remote address and starts its run loop.
    ///
    /// When the loop ends the connection is removed again. A rejected
    /// connection (shutdown in progress, connection limit reached) is stopped
    /// before the error is returned.
    pub async fn add_connection(self: &Arc<Self>, conn: Arc<Connection>) -> Result<()> {
        let key = conn.remote_addr().to_string();
        let mut inner = self.inner.write().await;

        let refusal = if inner.shut_down {
            Some("server shutting down")
        } else if inner.conns.len() >= self.max_connections {
            Some("connection limit reached")
        } else {
            None
        };
        if let Some(reason) = refusal {
            conn.stop();
            return Err(RelayError::Rejected {
                remote: key,
                reason: reason.to_string(),
            });
        }

        if let Some(previous) = inner.conns.insert(key.clone(), Arc::clone(&conn)) {
            warn!(remote = %key, "replacing connection with the same address");
            previous.stop();
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = conn.run().await;
            let elapsed_ms = (chrono::Utc::now() - conn.connected_at()).num_milliseconds();
            match outcome {
                Ok(Termination::PeerClosed) => {
                    info!(remote = %conn.remote_addr(), elapsed_ms, "ws conn closed");
                    registry.remove_connection(&conn, true).await;
                }
                Ok(Termination::Stopped) => {
                    debug!(remote = %conn.remote_addr(), elapsed_ms, "ws conn stopped");
                    registry.remove_connection(&conn, false).await;
                }
                Err(e) => {
                    error!(remote = %conn.remote_addr(), elapsed_ms, "ws conn terminated: {e}");
                    registry.remove_connection(&conn, true).await;
                }
            }
        });

        Ok(())
    }

    /// Removes `conn`, stopping it first when `should_close` is set.
    ///
    /// Only the exact registered instance is removed; a newer connection that
    /// reused the address stays.
    pub async fn remove_connection(&self, conn: &Arc<Connection>, should_close: bool) {
        if should_close {
            conn.stop();
        }

        let key = conn.remote_addr().to_string();
        let mut inner = self.inner.write().await;
        let registered = inner
            .conns
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, conn));
        if registered {
            inner.conns.remove(&key);
        }
    }

    /// Sends `packet` to every connection subscribed to `topic` and returns how
    /// many of them accepted it.
    ///
    /// A failing connection is logged and skipped; it never aborts delivery to
    /// the others. The pass is sequential, see the module notes on fairness.
    pub async fn dispatch(&self, topic: Topic, packet: Packet) -> usize {
        let packet = Arc::new(packet);
        let inner = self.inner.read().await;

        let mut delivered = 0;
        for (addr, conn) in inner.conns.iter() {
            if !conn.is_subscribed(topic) {
                continue;
            }
            match conn.enqueue_send(Arc::clone(&packet)).await {
                Ok(()) => delivered += 1,
                Err(e) => error!(%addr, %topic, "dispatch failed: {e}"),
            }
        }
        delivered
    }

    /// Relays a batch of new pending transactions to `newTx` subscribers.
    pub async fn dispatch_new_txs(&self, event: NewTxsEvent) -> usize {
        self.dispatch(Topic::NewTx, Packet::Transactions(event.txs))
            .await
    }

    /// Relays the transaction hashes of a new head, in block order, to
    /// `blockedTxHashes` subscribers.
    pub async fn dispatch_chain_head(&self, event: &ChainHeadEvent) -> usize {
        let hashes = event.block.transaction_hashes();
        self.dispatch(Topic::BlockedTxHashes, Packet::BlockedTxHashes(hashes))
            .await
    }

    /// Stops every connection and tells the listener to stop accepting.
    ///
    /// Connections admitted after this point are rejected.
    pub async fn shutdown(&self) {
        // stop first so a dispatch pass waiting on a connection returns; this
        // read lock itself queues behind any writer already waiting on the pass
        {
            let inner = self.inner.read().await;
            for conn in inner.conns.values() {
                conn.stop();
            }
        }

        let mut inner = self.inner.write().await;
        inner.shut_down = true;
        for conn in inner.conns.values() {
            conn.stop();
        }
        self.shutdown_tx.send_replace(true);
        info!(connections = inner.conns.len(), "registry shut down");
    }

    /// Resolves to `true` once `shutdown` has run.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.conns.len()
    }

    pub async fn get(&self, remote: &SocketAddr) -> Option<Arc<Connection>> {
        self.inner.read().await.conns.get(&remote.to_string()).cloned()
    }
}
