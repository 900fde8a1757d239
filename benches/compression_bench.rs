#![allow(clippy::unwrap_used, clippy::uninlined_format_args)]

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use protocol_session::utils::compression::{CompressionKind, CompressionStage};

fn sample(size: usize) -> Vec<u8> {
    // loosely repetitive, like real packet payloads
    (0..size).map(|i| (i % 251) as u8 ^ (i / 97) as u8).collect()
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression_stage");
    let sizes = [256usize, 4096, 65536, 1024 * 1024];
    let kinds = [
        (CompressionKind::Zlib, 6),
        (CompressionKind::Lz4, 0),
        (CompressionKind::Zstd, 3),
    ];

    for &size in &sizes {
        let data = sample(size);
        group.throughput(Throughput::Bytes(size as u64));

        for &(kind, level) in &kinds {
            let stage = CompressionStage::new(256, kind, level);
            group.bench_function(format!("{}_encode_{}b", kind.name(), size), |b| {
                b.iter_batched(
                    || BytesMut::from(&data[..]),
                    |body| {
                        let _ = stage.encode(body).unwrap();
                    },
                    BatchSize::SmallInput,
                )
            });

            let (wrapped, _) = stage.encode(BytesMut::from(&data[..])).unwrap();
            group.bench_function(format!("{}_decode_{}b", kind.name(), size), |b| {
                b.iter_batched(
                    || wrapped.clone(),
                    |frame| {
                        let out = stage.decode(frame).unwrap();
                        assert_eq!(out.len(), size);
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
