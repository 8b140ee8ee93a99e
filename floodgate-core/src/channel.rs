// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bounded transfer channel between the producer pool and the consumer.
//!
//! A fixed-capacity FIFO over `tokio::sync::mpsc`. Pushing into a full
//! channel suspends the producer until the consumer frees a slot; this is
//! the pipeline's only backpressure point. End of stream is an explicit
//! [`Transfer::EndOfStream`] value pushed once by the pool, never by an
//! individual producer.
//!
//! The channel carries its own occupancy gauge so tests and logs can verify
//! that the number of queued chunks never exceeds the configured capacity.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{FloodError, FloodResult};

/// One value travelling through the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// A chunk of at most `chunk_size` bytes.
    Chunk(Bytes),
    /// No more chunks will arrive.
    EndOfStream,
}

/// Occupancy statistics shared by both ends of a channel.
#[derive(Debug, Default)]
pub struct ChannelGauge {
    capacity: usize,
    high_water: AtomicUsize,
    pushed: AtomicU64,
    popped: AtomicU64,
}

impl ChannelGauge {
    /// Configured capacity in chunks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest number of chunks observed queued at once.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Acquire)
    }

    /// Chunks pushed so far (end-of-stream excluded).
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Acquire)
    }

    /// Chunks popped so far (end-of-stream excluded).
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Acquire)
    }
}

/// Create a bounded channel holding at most `capacity` values.
pub fn bounded(capacity: usize) -> (TransferSender, TransferReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let gauge = Arc::new(ChannelGauge {
        capacity,
        ..ChannelGauge::default()
    });

    (
        TransferSender {
            tx,
            gauge: Arc::clone(&gauge),
        },
        TransferReceiver { rx, gauge },
    )
}

/// Producer end. Cheap to clone; one clone per producer.
#[derive(Debug, Clone)]
pub struct TransferSender {
    tx: mpsc::Sender<Transfer>,
    gauge: Arc<ChannelGauge>,
}

impl TransferSender {
    /// Push a chunk from async context, waiting while the channel is full.
    pub async fn push(&self, chunk: Bytes) -> FloodResult<()> {
        self.tx
            .send(Transfer::Chunk(chunk))
            .await
            .map_err(|_| FloodError::ChannelClosed)?;
        self.after_push();
        Ok(())
    }

    /// Push a chunk from a blocking thread, parking it while the channel is full.
    ///
    /// Must not be called from inside an async task.
    pub fn blocking_push(&self, chunk: Bytes) -> FloodResult<()> {
        self.tx
            .blocking_send(Transfer::Chunk(chunk))
            .map_err(|_| FloodError::ChannelClosed)?;
        self.after_push();
        Ok(())
    }

    /// Push the end-of-stream marker, consuming this sender.
    pub async fn finish(self) -> FloodResult<()> {
        self.tx
            .send(Transfer::EndOfStream)
            .await
            .map_err(|_| FloodError::ChannelClosed)
    }

    /// Shared occupancy statistics.
    pub fn gauge(&self) -> Arc<ChannelGauge> {
        Arc::clone(&self.gauge)
    }

    fn after_push(&self) {
        self.gauge.pushed.fetch_add(1, Ordering::AcqRel);
        // Slots held by queued values; tokio never lets this exceed capacity.
        let queued = self.tx.max_capacity() - self.tx.capacity();
        self.gauge.high_water.fetch_max(queued, Ordering::AcqRel);
    }
}

/// Consumer end. There is exactly one.
#[derive(Debug)]
pub struct TransferReceiver {
    rx: mpsc::Receiver<Transfer>,
    gauge: Arc<ChannelGauge>,
}

impl TransferReceiver {
    /// Wait for the next value.
    ///
    /// Returns `None` only if every sender was dropped without pushing
    /// end-of-stream, which means the producer side failed.
    pub async fn pop(&mut self) -> Option<Transfer> {
        let next = self.rx.recv().await;
        if let Some(Transfer::Chunk(_)) = next {
            self.gauge.popped.fetch_add(1, Ordering::AcqRel);
        }
        next
    }

    /// Number of values currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Shared occupancy statistics.
    pub fn gauge(&self) -> Arc<ChannelGauge> {
        Arc::clone(&self.gauge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order_and_sentinel() {
        let (tx, mut rx) = bounded(4);
        tx.push(Bytes::from_static(b"a")).await.unwrap();
        tx.push(Bytes::from_static(b"b")).await.unwrap();
        tx.finish().await.unwrap();

        assert_eq!(rx.pop().await, Some(Transfer::Chunk(Bytes::from_static(b"a"))));
        assert_eq!(rx.pop().await, Some(Transfer::Chunk(Bytes::from_static(b"b"))));
        assert_eq!(rx.pop().await, Some(Transfer::EndOfStream));
        assert_eq!(rx.pop().await, None);
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let (tx, mut rx) = bounded(2);
        tx.push(Bytes::from_static(b"1")).await.unwrap();
        tx.push(Bytes::from_static(b"2")).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            tx.push(Bytes::from_static(b"3")),
        )
        .await;
        assert!(blocked.is_err(), "push into a full channel must wait");
        assert_eq!(rx.len(), 2);

        rx.pop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), tx.push(Bytes::from_static(b"3")))
            .await
            .expect("push should proceed once a slot frees")
            .unwrap();
    }

    #[tokio::test]
    async fn test_gauge_never_exceeds_capacity() {
        let (tx, mut rx) = bounded(3);
        let gauge = tx.gauge();

        let producer = tokio::spawn(async move {
            for i in 0..20u8 {
                tx.push(Bytes::from(vec![i])).await.unwrap();
            }
            tx.finish().await.unwrap();
        });

        let mut chunks = 0;
        loop {
            tokio::time::sleep(Duration::from_millis(2)).await;
            match rx.pop().await {
                Some(Transfer::Chunk(_)) => chunks += 1,
                Some(Transfer::EndOfStream) | None => break,
            }
        }
        producer.await.unwrap();

        assert_eq!(chunks, 20);
        assert_eq!(gauge.pushed(), 20);
        assert_eq!(gauge.popped(), 20);
        assert!(gauge.high_water() <= gauge.capacity());
        assert_eq!(gauge.high_water(), 3, "slow consumer should let the queue fill");
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (tx, rx) = bounded(1);
        drop(rx);
        assert!(matches!(
            tx.push(Bytes::from_static(b"x")).await,
            Err(FloodError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_blocking_push_from_thread() {
        let (tx, mut rx) = bounded(1);
        let handle = tokio::task::spawn_blocking(move || {
            tx.blocking_push(Bytes::from_static(b"one")).unwrap();
            tx.blocking_push(Bytes::from_static(b"two")).unwrap();
        });

        assert_eq!(rx.pop().await, Some(Transfer::Chunk(Bytes::from_static(b"one"))));
        assert_eq!(rx.pop().await, Some(Transfer::Chunk(Bytes::from_static(b"two"))));
        handle.await.unwrap();
        assert_eq!(rx.pop().await, None);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let (tx, _rx) = bounded(0);
        assert_eq!(tx.gauge().capacity(), 1);
    }
}
