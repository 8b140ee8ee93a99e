// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Chunk producer pool.
//!
//! Either one synthetic producer, or one blocking reader per file with at
//! most `threads` files open at a time. Every producer checks the shared
//! cancellation token at each chunk boundary. The pool pushes end-of-stream
//! exactly once, after joining every producer; a failed pool drops its
//! senders without it so the consumer sees the channel close instead.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::channel::TransferSender;
use crate::error::{FloodError, FloodResult};
use crate::source::SourceSet;
use crate::types::{ChunkSize, WorkerCount};

/// Byte pattern used to fill synthetic chunks.
pub const SYNTHETIC_FILL: u8 = b'0';

/// What the producers emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub chunks: u64,
    pub bytes: u64,
    /// Files read through to end of file.
    pub files_completed: u64,
    /// Most files being read at the same moment.
    pub peak_readers: u64,
}

impl ProducerReport {
    fn absorb(&mut self, other: ProducerReport) {
        self.chunks += other.chunks;
        self.bytes += other.bytes;
        self.files_completed += other.files_completed;
        self.peak_readers = self.peak_readers.max(other.peak_readers);
    }
}

/// Live count of open file readers.
#[derive(Debug, Default)]
struct ReaderGauge {
    active: AtomicU64,
    peak: AtomicU64,
}

impl ReaderGauge {
    fn enter(&self) -> ReaderGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        ReaderGuard(self)
    }
}

struct ReaderGuard<'a>(&'a ReaderGauge);

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-size pool of producers feeding one transfer channel.
pub struct ProducerPool {
    workers: WorkerCount,
    cancel: CancellationToken,
    files_completed: Arc<AtomicU64>,
}

impl ProducerPool {
    /// Create a pool. `cancel` stops every producer at its next chunk boundary.
    pub fn new(workers: WorkerCount, cancel: CancellationToken) -> Self {
        Self {
            workers,
            cancel,
            files_completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Live count of fully read files, for progress reporting.
    pub fn files_completed(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.files_completed)
    }

    /// Run every producer for `source` to completion, then push end-of-stream.
    pub async fn run(self, source: SourceSet, tx: TransferSender) -> FloodResult<ProducerReport> {
        let report = match source {
            SourceSet::Synthetic {
                target_bytes,
                chunk_size,
            } => produce_synthetic(target_bytes, chunk_size, &tx, &self.cancel).await?,
            SourceSet::Files { paths, chunk_size } => {
                self.produce_files(paths, chunk_size, &tx).await?
            }
        };

        tracing::debug!(
            chunks = report.chunks,
            bytes = report.bytes,
            files = report.files_completed,
            peak_readers = report.peak_readers,
            cancelled = self.cancel.is_cancelled(),
            "Producers finished"
        );

        tx.finish().await?;
        Ok(report)
    }

    async fn produce_files(
        &self,
        paths: Vec<PathBuf>,
        chunk_size: ChunkSize,
        tx: &TransferSender,
    ) -> FloodResult<ProducerReport> {
        // A failing file aborts its siblings without cancelling the run itself.
        let abort = self.cancel.child_token();
        let permits = Arc::new(Semaphore::new(self.workers.value()));
        let mut tasks = JoinSet::new();
        let readers = Arc::new(ReaderGauge::default());
        let mut report = ProducerReport::default();
        let mut first_error: Option<FloodError> = None;

        for path in paths {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => {
                    permit.map_err(|_| FloodError::TaskFailed {
                        reason: "producer pool closed".to_string(),
                    })?
                }
            };

            while let Some(result) = tasks.try_join_next() {
                collect(result, &mut report, &mut first_error, &abort);
            }
            if abort.is_cancelled() {
                break;
            }

            let tx = tx.clone();
            let abort = abort.clone();
            let files_completed = Arc::clone(&self.files_completed);
            let readers = Arc::clone(&readers);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = {
                    let _reading = readers.enter();
                    read_file(&path, chunk_size, &tx, &abort)
                };
                if let Ok(file_report) = &result {
                    if file_report.files_completed > 0 {
                        files_completed.fetch_add(1, Ordering::AcqRel);
                    }
                }
                result
            });
        }

        while let Some(result) = tasks.join_next().await {
            collect(result, &mut report, &mut first_error, &abort);
        }
        report.peak_readers = readers.peak.load(Ordering::Acquire);

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

fn collect(
    result: Result<FloodResult<ProducerReport>, JoinError>,
    report: &mut ProducerReport,
    first_error: &mut Option<FloodError>,
    abort: &CancellationToken,
) {
    let err = match result {
        Ok(Ok(file_report)) => {
            report.absorb(file_report);
            return;
        }
        Ok(Err(err)) => err,
        Err(join_err) => FloodError::TaskFailed {
            reason: format!("file producer panicked: {}", join_err),
        },
    };

    tracing::error!(error = %err, "File producer failed");
    abort.cancel();
    if first_error.is_none() {
        *first_error = Some(err);
    }
}

/// Emit `target_bytes` of patterned data; the final chunk is truncated to fit.
async fn produce_synthetic(
    target_bytes: u64,
    chunk_size: ChunkSize,
    tx: &TransferSender,
    cancel: &CancellationToken,
) -> FloodResult<ProducerReport> {
    let pattern_len = chunk_size.bytes().min(target_bytes);
    // One allocation; every chunk is a refcounted slice of it.
    let pattern = Bytes::from(vec![SYNTHETIC_FILL; pattern_len as usize]);
    let mut report = ProducerReport::default();

    while report.bytes < target_bytes {
        if cancel.is_cancelled() {
            tracing::debug!(emitted = report.bytes, "Synthetic producer cancelled");
            break;
        }

        let len = chunk_size.bytes().min(target_bytes - report.bytes);
        let chunk = pattern.slice(..len as usize);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            pushed = tx.push(chunk) => pushed?,
        }

        report.chunks += 1;
        report.bytes += len;
    }

    Ok(report)
}

/// Read one file sequentially in `chunk_size` blocks. Runs on a blocking thread.
fn read_file(
    path: &Path,
    chunk_size: ChunkSize,
    tx: &TransferSender,
    cancel: &CancellationToken,
) -> FloodResult<ProducerReport> {
    let mut file = File::open(path).map_err(|e| FloodError::io("opening source file", path, e))?;
    let mut report = ProducerReport::default();

    loop {
        if cancel.is_cancelled() {
            tracing::debug!(path = %path.display(), read = report.bytes, "File producer cancelled");
            return Ok(report);
        }

        let mut buf = BytesMut::zeroed(chunk_size.as_usize());
        let filled =
            fill_chunk(&mut file, &mut buf).map_err(|e| FloodError::io("reading source file", path, e))?;
        if filled == 0 {
            break;
        }
        buf.truncate(filled);

        tx.blocking_push(buf.freeze())?;
        report.chunks += 1;
        report.bytes += filled as u64;
    }

    report.files_completed = 1;
    tracing::debug!(path = %path.display(), bytes = report.bytes, "File read complete");
    Ok(report)
}

/// Fill `buf` from `reader`, stopping early only at end of file.
fn fill_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{bounded, Transfer, TransferReceiver};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn drain(mut rx: TransferReceiver) -> (Vec<Bytes>, bool) {
        let mut chunks = Vec::new();
        loop {
            match rx.pop().await {
                Some(Transfer::Chunk(chunk)) => chunks.push(chunk),
                Some(Transfer::EndOfStream) => return (chunks, true),
                None => return (chunks, false),
            }
        }
    }

    fn workers(n: usize) -> WorkerCount {
        WorkerCount::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_synthetic_truncates_final_chunk() {
        let (tx, rx) = bounded(4);
        let pool = ProducerPool::new(workers(1), CancellationToken::new());
        let source = SourceSet::Synthetic {
            target_bytes: 25,
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let (report, (chunks, ended)) = tokio::join!(pool.run(source, tx), drain(rx));
        let report = report.unwrap();

        assert!(ended);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.bytes, 25);
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(chunks.iter().all(|c| c.iter().all(|&b| b == SYNTHETIC_FILL)));
    }

    #[tokio::test]
    async fn test_synthetic_target_smaller_than_chunk() {
        let (tx, rx) = bounded(4);
        let pool = ProducerPool::new(workers(1), CancellationToken::new());
        let source = SourceSet::Synthetic {
            target_bytes: 3,
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let (report, (chunks, _)) = tokio::join!(pool.run(source, tx), drain(rx));
        assert_eq!(report.unwrap().bytes, 3);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3);
    }

    #[tokio::test]
    async fn test_synthetic_zero_target_only_sentinel() {
        let (tx, rx) = bounded(1);
        let pool = ProducerPool::new(workers(1), CancellationToken::new());
        let source = SourceSet::Synthetic {
            target_bytes: 0,
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let (report, (chunks, ended)) = tokio::join!(pool.run(source, tx), drain(rx));
        assert_eq!(report.unwrap(), ProducerReport::default());
        assert!(chunks.is_empty());
        assert!(ended);
    }

    #[tokio::test]
    async fn test_cancelled_synthetic_still_sends_sentinel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, rx) = bounded(2);
        let pool = ProducerPool::new(workers(1), cancel);
        let source = SourceSet::Synthetic {
            target_bytes: 1_000,
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let (report, (chunks, ended)) = tokio::join!(pool.run(source, tx), drain(rx));
        assert_eq!(report.unwrap().chunks, 0);
        assert!(chunks.is_empty());
        assert!(ended);
    }

    #[tokio::test]
    async fn test_files_read_in_order_within_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let empty = dir.path().join("empty.bin");
        std::fs::write(&a, (0u8..25).collect::<Vec<_>>()).unwrap();
        std::fs::write(&b, vec![7u8; 10]).unwrap();
        std::fs::write(&empty, b"").unwrap();

        let (tx, rx) = bounded(2);
        let pool = ProducerPool::new(workers(1), CancellationToken::new());
        let files = pool.files_completed();
        let source = SourceSet::Files {
            paths: vec![a, b, empty],
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let (report, (chunks, ended)) = tokio::join!(pool.run(source, tx), drain(rx));
        let report = report.unwrap();

        assert!(ended);
        assert_eq!(report.bytes, 35);
        assert_eq!(report.chunks, 4);
        assert_eq!(report.files_completed, 3);
        assert_eq!(files.load(Ordering::Acquire), 3);

        // One worker: file order and in-file order are both preserved.
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let mut expected: Vec<u8> = (0u8..25).collect();
        expected.extend(vec![7u8; 10]);
        assert_eq!(joined, expected);
    }

    #[tokio::test]
    async fn test_unreadable_file_fails_pool_without_sentinel() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.bin");
        std::fs::write(&good, vec![1u8; 30]).unwrap();
        let missing = dir.path().join("vanished.bin");

        let (tx, rx) = bounded(4);
        let pool = ProducerPool::new(workers(2), CancellationToken::new());
        let source = SourceSet::Files {
            paths: vec![good, missing.clone()],
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let (report, (_, ended)) = tokio::join!(pool.run(source, tx), drain(rx));
        match report {
            Err(FloodError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected Io error, got {:?}", other),
        }
        assert!(!ended, "failed pool must not push end-of-stream");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_readers_bounded_by_workers() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..12)
            .map(|i| {
                let path = dir.path().join(format!("shard-{:02}.bin", i));
                std::fs::write(&path, vec![i as u8; 30]).unwrap();
                path
            })
            .collect();

        let (tx, mut rx) = bounded(1);
        let pool = ProducerPool::new(workers(2), CancellationToken::new());
        let source = SourceSet::Files {
            paths,
            chunk_size: ChunkSize::new(10).unwrap(),
        };

        let slow_drain = async move {
            let mut chunks = 0;
            while let Some(Transfer::Chunk(_)) = rx.pop().await {
                tokio::time::sleep(Duration::from_millis(2)).await;
                chunks += 1;
            }
            chunks
        };

        let (report, chunks) = tokio::join!(pool.run(source, tx), slow_drain);
        let report = report.unwrap();

        assert_eq!(chunks, 36);
        assert_eq!(report.files_completed, 12);
        assert!(report.peak_readers >= 1);
        assert!(report.peak_readers <= 2, "peak readers {}", report.peak_readers);
    }

    #[test]
    fn test_reader_gauge_tracks_peak() {
        let gauge = ReaderGauge::default();
        {
            let _a = gauge.enter();
            let _b = gauge.enter();
            assert_eq!(gauge.active.load(Ordering::Acquire), 2);
        }
        let _c = gauge.enter();
        assert_eq!(gauge.active.load(Ordering::Acquire), 1);
        assert_eq!(gauge.peak.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_fill_chunk_reads_across_short_reads() {
        struct Trickle(Vec<u8>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }

        let mut reader = Trickle(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 1);
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 0);
    }
}
