//! Bounded per-connection outbound queues.
//!
//! Enqueueing never blocks: a full queue drops the frame for that connection
//! only, so one slow reader cannot stall fan-out to everyone else.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::identity::ConnectionId;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("Outbound queue full")]
    Full,

    #[error("Outbound queue closed")]
    Closed,
}

/// Producer side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    connection: ConnectionId,
    tx: mpsc::Sender<Bytes>,
}

/// Consumer side, drained by the connection's outbound pump.
#[derive(Debug)]
pub struct OutboundReceiver {
    connection: ConnectionId,
    rx: mpsc::Receiver<Bytes>,
}

/// Create the queue for one connection.
#[must_use]
pub fn outbound_queue(connection: ConnectionId, capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSender { connection, tx },
        OutboundReceiver { connection, rx },
    )
}

impl OutboundSender {
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the queue is at capacity and
    /// [`EnqueueError::Closed`] when the receiver is gone.
    pub fn try_enqueue(&self, frame: Bytes) -> Result<(), EnqueueError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutboundReceiver {
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Wait for the next frame; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a frame if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting frames; queued frames can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Result of fanning one frame out to a set of connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl FanoutReport {
    pub fn merge(&mut self, other: FanoutReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops() {
        let (tx, mut rx) = outbound_queue(ConnectionId::next(), 1);

        assert_eq!(tx.try_enqueue(Bytes::from("a")), Ok(()));
        assert_eq!(tx.try_enqueue(Bytes::from("b")), Err(EnqueueError::Full));
        assert_eq!(rx.try_recv(), Some(Bytes::from("a")));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_closed_queue() {
        let (tx, rx) = outbound_queue(ConnectionId::next(), 4);
        drop(rx);

        assert!(tx.is_closed());
        assert_eq!(tx.try_enqueue(Bytes::from("a")), Err(EnqueueError::Closed));
    }
}
