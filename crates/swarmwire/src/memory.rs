//! # In-memory transport
//!
//! Two connected endpoints backed by unbounded channels. Services under test
//! talk to a `MemoryTransport` peer exactly as they would to a supervisor over
//! TCP.
//!
//! ## Invariants
//! - Frames arrive at the peer in send order, unmodified.
//! - After `close`, local sends fail and the peer reads `None` once the
//!   frames already in flight are drained.

use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

type Outbox = std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>;

pub struct MemoryTransport {
    outbox: Outbox,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryTransport {
    /// Returns two endpoints wired to each other.
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (Self::wire(left_tx, right_rx), Self::wire(right_tx, left_rx))
    }

    fn wire(outbox: mpsc::UnboundedSender<Vec<u8>>, inbox: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            outbox: std::sync::Mutex::new(Some(outbox)),
            inbox: tokio::sync::Mutex::new(inbox),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: &[u8]) -> transport::Result<()> {
        let outbox = self.outbox.lock().ok().and_then(|guard| guard.clone());
        match outbox {
            Some(tx) if tx.send(frame.to_vec()).is_ok() => Ok(()),
            Some(_) => Err(transport::Error::ConnectionLost("peer endpoint dropped".into())),
            None => Err(transport::Error::ConnectionLost("endpoint closed".into())),
        }
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn close(&self) -> transport::Result<()> {
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.take();
        }
        Ok(())
    }
}
