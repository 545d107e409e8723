//! Codec benchmarks for courier-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use courier_protocol::{codec, ChannelInfo, ChannelType, Frame};

fn bench_publish(c: &mut Criterion) {
    let frame = Frame::publish(1, "jobs", vec![0u8; 64]);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("publish_64B");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("decode", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_channel_list(c: &mut Criterion) {
    let channels = (0..100)
        .map(|i| ChannelInfo {
            name: format!("channel:{}", i),
            channel_type: if i % 2 == 0 {
                ChannelType::Simple
            } else {
                ChannelType::Multiple
            },
            pending_count: i,
            subscriber_count: 1,
        })
        .collect();
    let frame = Frame::ChannelList { id: 1, channels };

    c.bench_function("channel_list_100_encode", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
}

criterion_group!(benches, bench_publish, bench_channel_list);
criterion_main!(benches);
