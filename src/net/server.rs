//! WebSocket server: accepts connections and feeds frames to the dispatcher.
//!
//! Each socket gets a reader loop (this task) and a writer task draining the
//! peer's outbound channel. All state mutation happens inside the dispatcher
//! lock, one message at a time.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::net::dispatcher::Dispatcher;

/// WebSocket sync server.
pub struct SyncServer {
    config: ServerConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(
            config.max_lobbies,
            config.default_max_players,
        )));
        Self { config, dispatcher }
    }

    /// Accept connections forever.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket server listening on {}", addr);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let dispatcher = self.dispatcher.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_socket(dispatcher, stream, remote_addr).await {
                    debug!("Connection from {} ended: {}", remote_addr, e);
                }
            });
        }
    }
}

/// Drive a single socket: handshake, register the peer, pump frames into the
/// dispatcher until the transport closes.
async fn handle_socket(
    dispatcher: Arc<Mutex<Dispatcher>>,
    stream: TcpStream,
    remote_addr: SocketAddr,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    debug!("WebSocket handshake complete for {}", remote_addr);

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task: drains the peer's outbound channel. Exits when the
    // channel closes (peer removed) or the socket rejects a write.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let conn_id = dispatcher.lock().handle_open(tx);

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatcher.lock().handle_frame(conn_id, &text);
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                warn!(conn_id, "binary frame ignored, protocol is JSON text");
            }
            // Ping/pong handled by tungstenite internally.
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id, "socket read error: {}", e);
                break;
            }
        }
    }

    dispatcher.lock().handle_close(conn_id);
    writer.abort();
    Ok(())
}
