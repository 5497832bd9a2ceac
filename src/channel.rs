//! Ordered duplex transport between the controlling and worker contexts.
//!
//! Each endpoint owns the sending half towards its peer and the receiving half
//! from its peer. Delivery is in order and exactly once while both ends are
//! alive; once a peer endpoint is dropped, sends fail with
//! [`ChannelError::Closed`].

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::protocol::Batch;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel closed by peer")]
    Closed,
}

/// Sending half of an endpoint; owned by the message queue.
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: UnboundedSender<Batch>,
}

impl BatchSender {
    pub fn send(&self, batch: Batch) -> Result<(), ChannelError> {
        self.tx.send(batch).map_err(|_| ChannelError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct BatchReceiver {
    rx: UnboundedReceiver<Batch>,
}

impl BatchReceiver {
    /// Returns the next delivered batch without waiting.
    ///
    /// `Ok(None)` means nothing is pending; `Err(Closed)` means the peer is gone
    /// and every batch it sent has already been drained.
    pub fn try_recv(&mut self) -> Result<Option<Batch>, ChannelError> {
        match self.rx.try_recv() {
            Ok(batch) => Ok(Some(batch)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    /// Waits for the next batch. `None` once the peer is gone and drained.
    pub async fn recv(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
pub struct ChannelEndpoint {
    pub sender: BatchSender,
    pub receiver: BatchReceiver,
}

impl ChannelEndpoint {
    pub fn split(self) -> (BatchSender, BatchReceiver) {
        (self.sender, self.receiver)
    }
}

/// Creates two connected endpoints.
pub fn pair() -> (ChannelEndpoint, ChannelEndpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        ChannelEndpoint {
            sender: BatchSender { tx: a_tx },
            receiver: BatchReceiver { rx: a_rx },
        },
        ChannelEndpoint {
            sender: BatchSender { tx: b_tx },
            receiver: BatchReceiver { rx: b_rx },
        },
    )
}
