//! In-process transport.
//!
//! [`pair`] returns the engine-facing halves plus a [`MemoryPeer`] that plays
//! the remote client: it pushes inbound frames, injects read errors and
//! observes everything the engine writes.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, TransportError};

/// Create a connected in-memory transport with the given buffer size.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryPeer, MemoryReader, MemoryWriter) {
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let closed = Arc::new(AtomicBool::new(false));

    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        closed: closed.clone(),
    };
    (
        peer,
        MemoryReader { inbound: inbound_rx },
        MemoryWriter {
            outbound: outbound_tx,
            closed,
        },
    )
}

/// Remote side of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::Sender<Result<Bytes, TransportError>>>,
    outbound: mpsc::Receiver<Bytes>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a raw frame to the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the reader is gone.
    pub async fn send(&self, frame: impl Into<Bytes>) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        inbound
            .send(Ok(frame.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make the engine's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the reader is gone.
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        inbound
            .send(Err(error))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close the inbound direction; the engine reads a clean end of stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Receive the next frame the engine wrote.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Receive a written frame if one is buffered.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Whether the engine closed its writer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Engine-side receiving half.
pub struct MemoryReader {
    inbound: mpsc::Receiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Engine-side sending half.
pub struct MemoryWriter {
    outbound: mpsc::Sender<Bytes>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut peer, mut reader, mut writer) = pair(4);

        peer.send("ping").await.unwrap();
        assert_eq!(reader.recv().await.unwrap(), Some(Bytes::from("ping")));

        writer.send(Bytes::from("pong")).await.unwrap();
        assert_eq!(peer.recv().await, Some(Bytes::from("pong")));
    }

    #[tokio::test]
    async fn test_hang_up_is_clean_end_of_stream() {
        let (mut peer, mut reader, _writer) = pair(4);

        peer.hang_up();
        assert!(reader.recv().await.unwrap().is_none());
        assert!(peer.send("late").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_read_error() {
        let (peer, mut reader, _writer) = pair(4);

        peer.fail(TransportError::ReceiveFailed("reset".into()))
            .await
            .unwrap();
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_rejects_further_writes() {
        let (peer, _reader, mut writer) = pair(4);

        writer.close().await.unwrap();
        assert!(peer.is_closed());
        assert!(matches!(
            writer.send(Bytes::from("x")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
