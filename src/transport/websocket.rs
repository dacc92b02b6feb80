//! WebSocket transport
//!
//! Binds the TCP listener and turns every accepted socket into a registered
//! connection. Responsibilities stop at the upgrade: the handshake is done by
//! `tokio_tungstenite::accept_async`, after which the upgraded stream is
//! handed to `Registry::admit`. No protocol negotiation happens here.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};

use crate::broker::Registry;
use crate::utils::Result;

pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Server {
    pub async fn bind(addr: &str, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the registry shuts down, then drops the
    /// listener.
    pub async fn serve(self) {
        let mut shutdown = self.registry.shutdown_signal();
        match self.listener.local_addr() {
            Ok(addr) => info!("WebSocket server listening on ws://{addr}"),
            Err(e) => warn!("WebSocket server listening on unknown address: {e}"),
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.wait_for(|done| *done) => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, remote)) => {
                    tokio::spawn(admit(stream, remote, Arc::clone(&self.registry)));
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }

        info!("WebSocket server stopped accepting");
    }
}

async fn admit(stream: TcpStream, remote: SocketAddr, registry: Arc<Registry>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(%remote, "WebSocket handshake error: {e}");
            return;
        }
    };

    info!(%remote, "new conn");
    if let Err(e) = registry.admit(ws, remote).await {
        warn!(%remote, "{e}");
    }
}
