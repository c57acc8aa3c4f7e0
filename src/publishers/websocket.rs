//! WebSocket publisher: broadcasts each payload to every connected client
//! over a per-connection single-slot queue, so one slow client never delays
//! the others. New connections immediately receive the most recent payload.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Publisher, WEBSOCKET_PUBLISHER_ID};

#[derive(Debug, Deserialize)]
pub struct WebSocketPublisherOptions {
    pub address: String,
}

type ClientMap = Arc<Mutex<HashMap<usize, mpsc::Sender<String>>>>;

pub struct WebSocketPublisher {
    clients: ClientMap,
    last: Arc<RwLock<String>>,
    shutdown: CancellationToken,
}

impl WebSocketPublisher {
    pub async fn new(opt: WebSocketPublisherOptions) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&opt.address)
            .await
            .with_context(|| format!("bind {}", opt.address))?;
        let clients: ClientMap = Arc::new(Mutex::new(HashMap::new()));
        let last = Arc::new(RwLock::new(String::new()));
        let shutdown = CancellationToken::new();

        let accept_clients = clients.clone();
        let accept_last = last.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut next_id = 0usize;
            loop {
                let accepted = tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let Ok((stream, _)) = accepted else {
                    continue;
                };
                let id = next_id;
                next_id += 1;
                tokio::spawn(serve_client(
                    id,
                    stream,
                    accept_clients.clone(),
                    accept_last.clone(),
                    accept_shutdown.clone(),
                ));
            }
        });

        Ok(WebSocketPublisher {
            clients,
            last,
            shutdown,
        })
    }
}

async fn serve_client(
    id: usize,
    stream: TcpStream,
    clients: ClientMap,
    last: Arc<RwLock<String>>,
    shutdown: CancellationToken,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(1);
    clients.lock().await.insert(id, send_tx);

    let initial = last.read().await.clone();
    let result: Result<(), tokio_tungstenite::tungstenite::Error> = async {
        ws_tx.send(Message::text(initial)).await?;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                payload = send_rx.recv() => {
                    let Some(txt) = payload else { break };
                    ws_tx.send(Message::text(txt)).await?;
                }
                incoming = ws_rx.next() => {
                    // Inbound frames are ignored; a close or error ends the
                    // connection.
                    match incoming {
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;
    if let Err(err) = result {
        debug!(%err, "websocket client dropped");
    }
    clients.lock().await.remove(&id);
}

#[async_trait]
impl Publisher for WebSocketPublisher {
    fn id(&self) -> &'static str {
        WEBSOCKET_PUBLISHER_ID
    }

    async fn send(&self, txt: &str) -> anyhow::Result<()> {
        *self.last.write().await = txt.to_string();
        let clients = self.clients.lock().await;
        for tx in clients.values() {
            let _ = tx.try_send(txt.to_string());
        }
        Ok(())
    }

    async fn exit(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
