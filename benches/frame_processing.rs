//! Benchmarks for frame and transaction hot paths
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daqlink::memory::{Emulate, Hub, Master};
use daqlink::protocols::batcher::{CoreV1, SuperFrameBuilder};
use daqlink::stream::Pool;
use std::sync::Arc;

fn bench_pool_alloc_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_alloc_write");

    for size in [64usize, 2048, 65536].iter() {
        let pool = Pool::unbounded(2048);
        let data = vec![0xA5u8; *size];

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("alloc_write", size), &data, |b, data| {
            b.iter(|| {
                let mut frame = pool.alloc(data.len(), 0).unwrap();
                frame.write(0, black_box(data)).unwrap();
                black_box(frame.payload())
            });
        });
    }

    group.finish();
}

fn bench_frame_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_iteration");

    for region in [64usize, 2048].iter() {
        let pool = Pool::unbounded(*region);
        let mut frame = pool.alloc(65536, 0).unwrap();
        frame.write(0, &vec![1u8; 65536]).unwrap();

        group.throughput(Throughput::Bytes(65536));
        group.bench_with_input(BenchmarkId::new("bytes", region), &frame, |b, frame| {
            b.iter(|| black_box(frame.begin_payload().map(u64::from).sum::<u64>()));
        });
        group.bench_with_input(BenchmarkId::new("chunks", region), &frame, |b, frame| {
            b.iter(|| {
                let mut it = frame.begin_payload();
                let mut total = 0usize;
                while let Some(chunk) = it.next_chunk(usize::MAX) {
                    total += chunk.len();
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

fn bench_batcher_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("batcher_decode");

    for records in [4usize, 64, 512].iter() {
        let mut builder = SuperFrameBuilder::new(8).unwrap();
        for n in 0..*records {
            builder.push((n % 16) as u8, 0, 0, &[n as u8; 100]);
        }
        let pool = Pool::unbounded(2048);
        let frame = Arc::new(builder.build(&pool).unwrap());

        group.throughput(Throughput::Elements(*records as u64));
        group.bench_with_input(BenchmarkId::new("records", records), &frame, |b, frame| {
            let mut core = CoreV1::new();
            b.iter(|| {
                core.try_process(frame.clone()).unwrap();
                black_box(core.count())
            });
        });
    }

    group.finish();
}

fn bench_transaction_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction");

    let hub = Arc::new(Hub::new(0x1000));
    hub.set_slave(Arc::new(Emulate::new(4, 0x1000)));
    let master = Master::new("bench");
    master.set_slave(hub);

    group.bench_function("write_4", |b| {
        b.iter(|| master.write(black_box(0x40), &[1, 2, 3, 4]).unwrap());
    });
    group.bench_function("read_256", |b| {
        b.iter(|| black_box(master.read(black_box(0x40), 256).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pool_alloc_write,
    bench_frame_iteration,
    bench_batcher_decode,
    bench_transaction_round_trip,
);
criterion_main!(benches);
