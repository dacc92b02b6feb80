//! Upstream event sources
//!
//! The relay does not produce events itself. It subscribes to a transaction
//! source and a chain-head source, each handing out a `Subscription` that
//! yields events until it is unsubscribed or the source goes away.
//!
//! `Feed` is the in-memory implementation used by the binary and by tests:
//! producers call `Feed::send`, every live subscription receives a clone.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::chain::{ChainHeadEvent, NewTxsEvent};

/// Buffered events per subscriber before a slow subscriber starts lagging.
pub const FEED_CAPACITY: usize = 256;

/// Produces batches of new pending transactions.
pub trait TxSource: Send + Sync {
    fn subscribe_transactions(&self) -> Subscription<NewTxsEvent>;
}

/// Produces new chain heads.
pub trait ChainHeadSource: Send + Sync {
    fn subscribe_chain_head(&self) -> Subscription<ChainHeadEvent>;
}

/// A live subscription to one event source.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> Subscription<T> {
    fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription is unsubscribed or the source is
    /// dropped. Events missed by a lagging subscriber are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscription lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Detaches from the source. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}

/// In-memory fan-out point for one kind of upstream event.
#[derive(Debug, Clone)]
pub struct Feed<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Feed<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription::new(self.tx.subscribe())
    }

    /// Delivers the event to every current subscription and returns how many
    /// there were.
    pub fn send(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl TxSource for Feed<NewTxsEvent> {
    fn subscribe_transactions(&self) -> Subscription<NewTxsEvent> {
        self.subscribe()
    }
}

impl ChainHeadSource for Feed<ChainHeadEvent> {
    fn subscribe_chain_head(&self) -> Subscription<ChainHeadEvent> {
        self.subscribe()
    }
}
