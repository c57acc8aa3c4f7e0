//! Publisher entries: each sink gets a bounded, lossy inbox and a dedicated
//! worker, so a slow sink can never stall the controller loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::publishers::Publisher;

/// Clear instruction: tells sinks to display their inactive/empty state.
pub const ETX: &str = "\x03";
/// Shutdown instruction, sent once per sink on exit.
pub const EOT: &str = "\x04";

const INBOX_CAPACITY: usize = 16;

pub struct PublisherEntry {
    publisher: Arc<dyn Publisher>,
    tx: mpsc::Sender<String>,
    /// Per-sink timing shift in milliseconds; positive delays lyric lines.
    pub offset: i64,
    /// Index of the most recently dispatched line, -1 before any dispatch.
    pub sent_index: i64,
}

impl PublisherEntry {
    pub fn new(publisher: Arc<dyn Publisher>, offset: i64) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(INBOX_CAPACITY);
        let worker = publisher.clone();
        tokio::spawn(async move {
            while let Some(txt) = rx.recv().await {
                if let Err(err) = worker.send(&txt).await {
                    error!(publisher = worker.id(), %err, "failed to send");
                }
            }
        });
        PublisherEntry {
            publisher,
            tx,
            offset,
            sent_index: -1,
        }
    }

    pub fn id(&self) -> &'static str {
        self.publisher.id()
    }

    /// Non-blocking enqueue; a full inbox drops the payload. The interesting
    /// payload is always the current line, so losing a stale one is fine.
    pub fn send(&self, txt: &str) {
        let _ = self.tx.try_send(txt.to_string());
    }

    pub fn clear(&self) {
        self.send(ETX);
    }

    /// Close the inbox, hand the sink its shutdown marker directly, then
    /// tear it down.
    pub async fn exit(self) {
        let PublisherEntry { publisher, tx, .. } = self;
        drop(tx);
        let _ = publisher.send(EOT).await;
        if let Err(err) = publisher.exit().await {
            error!(publisher = publisher.id(), %err, "failed to exit");
        }
    }
}
