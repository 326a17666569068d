use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use opwire::{Frame, FrameCodec, Payload};
use tokio_util::codec::Decoder;

#[allow(clippy::unwrap_used)]
fn bench_frame_serialize_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_serialize_decode");
    let body_sizes = [0usize, 64, 512, 4096, 65534];

    for &size in &body_sizes {
        let payload = Payload::new(1, vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64 + 3));

        group.bench_function(format!("serialize_{size}b"), |b| {
            b.iter(|| FrameCodec::serialize(std::slice::from_ref(&payload)).unwrap())
        });

        let wire = FrameCodec::serialize(std::slice::from_ref(&payload)).unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&wire[..]),
                |mut buf| {
                    let mut codec = FrameCodec::new();
                    let frame = codec.decode(&mut buf).unwrap();
                    assert!(matches!(frame, Some(Frame::Message(_))));
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_batch_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_coalescing");

    for &count in &[1usize, 16, 256] {
        let batch: Vec<Payload> = (0..count)
            .map(|i| Payload::new(i as u8, vec![0u8; 128]))
            .collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("serialize_{count}_units"), |b| {
            b.iter(|| FrameCodec::serialize(&batch).unwrap())
        });

        let wire = FrameCodec::serialize(&batch).unwrap();
        group.bench_function(format!("decode_{count}_units_in_16b_reads"), |b| {
            b.iter(|| {
                let mut codec = FrameCodec::new();
                let mut buf = BytesMut::new();
                let mut seen = 0;
                for chunk in wire.chunks(16) {
                    buf.extend_from_slice(chunk);
                    while codec.decode(&mut buf).unwrap().is_some() {
                        seen += 1;
                    }
                }
                assert_eq!(seen, count);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_serialize_decode, bench_batch_coalescing);
criterion_main!(benches);
