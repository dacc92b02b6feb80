//! CLI for txannounce
//!
//! Subcommands:
//! - `server`: run the announce server
//! - `client`: subscribe to topics and print every packet (useful for smoke tests)

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

use txannounce::AnnounceServer;
use txannounce::broker::source::Feed;
use txannounce::chain::{ChainHeadEvent, NewTxsEvent};
use txannounce::config::{Settings, load_config};
use txannounce::transport::Request;
use txannounce::utils::logging;

#[derive(Parser)]
#[command(name = "txannounce")]
enum Command {
    /// Start the announce server
    Server,
    /// Subscribe to topics and print what the server pushes
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:7856")]
        url: String,
        /// Topics to subscribe to (repeatable)
        #[arg(long = "topic", default_values_t = vec!["newTx".to_string(), "blockedTxHashes".to_string()])]
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    match cmd {
        Command::Server => match load_config() {
            Ok(config) => {
                logging::init(&config.log.level);
                if let Err(e) = run_server(config).await {
                    error!("Server failed: {}", e);
                }
            }
            Err(e) => {
                logging::init("info");
                error!("Failed to load configuration: {}", e);
            }
        },
        Command::Client { url, topics } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &topics).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    // upstream producers publish into these feeds
    let txs: Arc<Feed<NewTxsEvent>> = Arc::new(Feed::new());
    let heads: Arc<Feed<ChainHeadEvent>> = Arc::new(Feed::new());

    let mut server = AnnounceServer::new(txs, heads, config);
    let addr = server.start().await?;
    info!("announce server started on {addr}");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    server.stop().await;

    Ok(())
}

async fn run_client(url: &str, topics: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    for (id, topic) in topics.iter().enumerate() {
        let request = Request::subscribe(id as i64, topic.as_str());
        ws_stream
            .send(WsMessage::Text(serde_json::to_string(&request)?.into()))
            .await?;
    }

    while let Some(msg) = ws_stream.next().await {
        match msg? {
            WsMessage::Text(text) => println!("{}", text.as_str()),
            WsMessage::Close(frame) => {
                info!("server closed the connection: {frame:?}");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
