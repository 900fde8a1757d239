#![allow(clippy::unwrap_used, clippy::uninlined_format_args)]

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use protocol_session::core::codec::ConnectionCodec;
use protocol_session::core::pipeline::{Stage, FRAMER};
use protocol_session::core::varint::{encode_var_int, read_var_int};
use protocol_session::protocol::packets::{standard_registry, PlayDisconnect, Side};
use protocol_session::utils::compression::{CompressionKind, CompressionStage};
use protocol_session::utils::crypto::CipherStage;
use protocol_session::{Packet, ProtocolPhase};
use tokio_util::codec::{Decoder, Encoder};

const KEY: [u8; 16] = *b"bench-shared-key";

fn bench_var_int(c: &mut Criterion) {
    let mut group = c.benchmark_group("var_int");
    let values = [0i32, 300, 2_097_151, -1];

    group.bench_function("encode", |b| {
        let mut buf = Vec::with_capacity(32);
        b.iter(|| {
            buf.clear();
            for &value in &values {
                encode_var_int(value, &mut buf);
            }
        })
    });

    let mut encoded = Vec::new();
    for &value in &values {
        encode_var_int(value, &mut encoded);
    }
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut offset = 0;
            while offset < encoded.len() {
                let (_, used) = read_var_int(&encoded[offset..]).unwrap().unwrap();
                offset += used;
            }
        })
    });

    group.finish();
}

fn codec_pair(compression: bool, encryption: bool) -> (ConnectionCodec, ConnectionCodec) {
    let mut server = ConnectionCodec::new(standard_registry(Side::Server).unwrap());
    let mut client = ConnectionCodec::new(standard_registry(Side::Client).unwrap());
    for codec in [&mut server, &mut client] {
        codec.set_phase(ProtocolPhase::Play);
        if compression {
            codec
                .pipeline_mut()
                .add_after(FRAMER, Stage::Compression(CompressionStage::new(256, CompressionKind::Zlib, 6)))
                .unwrap();
        }
        if encryption {
            codec
                .pipeline_mut()
                .add_before(FRAMER, Stage::Cipher(CipherStage::new(&KEY).unwrap()))
                .unwrap();
        }
    }
    (server, client)
}

fn bench_connection_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_codec");
    let sizes = [16usize, 1024, 16 * 1024];
    let stacks = [
        ("plain", false, false),
        ("compressed", true, false),
        ("encrypted", false, true),
        ("full", true, true),
    ];

    for &size in &sizes {
        let reason = "r".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));

        for &(label, compression, encryption) in &stacks {
            group.bench_function(format!("{}_roundtrip_{}b", label, size), |b| {
                b.iter_batched(
                    || codec_pair(compression, encryption),
                    |(mut server, mut client)| {
                        let mut wire = BytesMut::with_capacity(size + 16);
                        let packet: Box<dyn Packet> = Box::new(PlayDisconnect {
                            reason: reason.clone(),
                        });
                        server.encode(packet, &mut wire).unwrap();
                        let decoded = client.decode(&mut wire).unwrap().unwrap();
                        assert!(decoded.is::<PlayDisconnect>());
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_var_int, bench_connection_codec);
criterion_main!(benches);
