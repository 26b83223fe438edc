//! In-process channel transport.
//!
//! Connects a controller to a worker running as a task in the same process,
//! the way a page talks to a dedicated worker: no shared state, only posted
//! messages.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// One end of a duplex message channel backed by tokio mpsc queues.
///
/// Messages sent on one end appear, in order, on the other end's `recv`.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl ChannelTransport {
    /// Creates a pair of connected ends.
    ///
    /// Conventionally the first end goes to the controller and the second to
    /// the worker.
    pub fn pair() -> (Self, Self) {
        let (to_worker, from_controller) = mpsc::unbounded_channel();
        let (to_controller, from_worker) = mpsc::unbounded_channel();

        let controller = Self {
            tx: to_worker,
            rx: Arc::new(Mutex::new(from_worker)),
        };

        let worker = Self {
            tx: to_controller,
            rx: Arc::new(Mutex::new(from_controller)),
        };

        (controller, worker)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
