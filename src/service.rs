//! Announce service
//!
//! Wires the upstream event sources to the registry and owns the lifecycle of
//! the websocket listener. One pump task per source forwards events into the
//! registry's dispatcher; the listener runs on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::Registry;
use crate::broker::source::{ChainHeadSource, Subscription, TxSource};
use crate::chain::{ChainHeadEvent, NewTxsEvent};
use crate::config::Settings;
use crate::transport::Server;
use crate::utils::Result;

pub struct AnnounceServer {
    tx_source: Arc<dyn TxSource>,
    head_source: Arc<dyn ChainHeadSource>,
    settings: Settings,
    registry: Arc<Registry>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AnnounceServer {
    pub fn new(
        tx_source: Arc<dyn TxSource>,
        head_source: Arc<dyn ChainHeadSource>,
        settings: Settings,
    ) -> Self {
        let registry = Arc::new(Registry::new(settings.relay.max_connections));
        let (stop_tx, _) = watch::channel(false);
        Self {
            tx_source,
            head_source,
            settings,
            registry,
            stop_tx,
            tasks: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Binds the listener, subscribes to both sources and starts the pumps.
    ///
    /// Returns the address the listener is bound to.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let server = Server::bind(&self.settings.server.address(), Arc::clone(&self.registry)).await?;
        let addr = server.local_addr()?;

        let txs = self.tx_source.subscribe_transactions();
        let heads = self.head_source.subscribe_chain_head();

        self.tasks.push(tokio::spawn(pump_transactions(
            Arc::clone(&self.registry),
            txs,
            self.stop_tx.subscribe(),
        )));
        self.tasks.push(tokio::spawn(pump_chain_heads(
            Arc::clone(&self.registry),
            heads,
            self.stop_tx.subscribe(),
        )));
        self.tasks.push(tokio::spawn(server.serve()));

        Ok(addr)
    }

    /// Unsubscribes from the sources, stops every connection and closes the
    /// listener. Meant to be called once during teardown.
    pub async fn stop(&mut self) {
        debug!("stop AnnounceServer");
        self.stop_tx.send_replace(true);
        self.registry.shutdown().await;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("announce task ended abnormally: {e}");
            }
        }
    }
}

async fn pump_transactions(
    registry: Arc<Registry>,
    mut events: Subscription<NewTxsEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            warn!("transaction source closed");
            break;
        };
        debug!(len = event.txs.len(), "new txs received");
        registry.dispatch_new_txs(event).await;
    }
    events.unsubscribe();
}

async fn pump_chain_heads(
    registry: Arc<Registry>,
    mut events: Subscription<ChainHeadEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            warn!("chain head source closed");
            break;
        };
        debug!(
            number = event.block.number,
            tx_len = event.block.transactions().len(),
            "block received"
        );
        registry.dispatch_chain_head(&event).await;
    }
    events.unsubscribe();
}
