// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Transfer channel microbenchmarks.
//!
//! One producer, one consumer, zero-copy chunks; measures hand-off cost at
//! several capacities, where small capacities force the producer to park.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use floodgate_core::channel::{bounded, Transfer};

const CHUNKS: usize = 10_000;
const CHUNK_BYTES: usize = 64 * 1024;

/// Capacities in chunks.
const CAPACITIES: &[usize] = &[1, 2, 8, 64];

fn bench_handoff(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let chunk = Bytes::from(vec![0u8; CHUNK_BYTES]);

    let mut group = c.benchmark_group("channel_handoff");
    group.throughput(Throughput::Elements(CHUNKS as u64));

    for &capacity in CAPACITIES {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    rt.block_on(async {
                        let (tx, mut rx) = bounded(capacity);
                        let payload = chunk.clone();
                        let producer = tokio::spawn(async move {
                            for _ in 0..CHUNKS {
                                tx.push(payload.clone()).await.expect("Push failed");
                            }
                            tx.finish().await.expect("Finish failed");
                        });

                        let mut received = 0usize;
                        while let Some(Transfer::Chunk(chunk)) = rx.pop().await {
                            received += chunk.len();
                        }
                        producer.await.expect("Producer panicked");
                        black_box(received)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_handoff);
criterion_main!(benches);
