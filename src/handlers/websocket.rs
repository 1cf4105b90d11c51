use tokio::sync::mpsc;
use futures_util::stream::StreamExt;
use futures_util::sink::SinkExt;
use warp::ws::WebSocket;
use log::{info, error, debug};

use crate::core::connection::Connection;
use crate::core::server::SharedRelayServer;

// Handle a WebSocket connection
pub async fn handle_ws_client(ws: WebSocket, server: SharedRelayServer, client_identity: String) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<warp::ws::Message>();

    // Spawn a task to forward messages from our channel to the WebSocket
    tokio::task::spawn(async move {
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        if let Err(e) = ws_tx.close().await {
            debug!("WebSocket close failed: {}", e);
        }
    });

    let connection = Connection::new(tx);
    let connection_id = connection.id.clone();
    let shutdown = connection.shutdown_signal();

    if let Err(e) = server.register_connection(connection, client_identity).await {
        error!("Failed to register client {}: {}", connection_id, e);
        return;
    }

    // Handle incoming messages until the client leaves or is terminated
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Connection {} terminated by server", connection_id);
                break;
            }
            result = ws_rx.next() => match result {
                Some(Ok(msg)) => {
                    if msg.is_close() {
                        break;
                    }
                    server.record_activity(&connection_id).await;
                    // Only text frames carry events; pongs just refresh liveness
                    if let Ok(text) = msg.to_str() {
                        server.handle_frame(&connection_id, text).await;
                    }
                }
                Some(Err(e)) => {
                    debug!("WebSocket error on {}: {}", connection_id, e);
                    break;
                }
                None => break,
            }
        }
    }

    server.unregister_connection(&connection_id).await;
}
