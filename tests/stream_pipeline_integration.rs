//! Integration tests for the frame-streaming pipeline
//!
//! These tests validate:
//! - Frame accounting and iteration across buffers
//! - Pool allocation counters under concurrent producers
//! - Fifo depth limits and ordering
//! - Batcher decode and splitting of super-frames

mod common;

use common::builders::frame_over;
use common::mock_helpers::MockSink;
use daqlink::config::PoolConfig;
use daqlink::protocols::batcher::{CoreV1, SplitterV1, SuperFrameBuilder};
use daqlink::stream::{
    ChannelSink, ExhaustPolicy, Fifo, FifoConfig, Frame, Pool, StreamMaster, StreamSlave,
};
use daqlink::ErrorCode;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_iterator_spans_two_buffers() {
    let payload: Vec<u8> = (0..15).collect();
    let frame = frame_over(&[10, 10], &payload);
    assert_eq!(frame.buffers()[0].payload(), 10);
    assert_eq!(frame.buffers()[1].payload(), 5);

    let mut positions = 0;
    let mut it = frame.begin_payload();
    while it != frame.end_payload() {
        assert_eq!(it.get(), Some(positions as u8));
        it.advance(1).unwrap();
        positions += 1;
    }
    assert_eq!(positions, 15);

    let jumped = frame.begin_payload() + 10;
    assert_eq!((jumped.buffer_index(), jumped.buffer_offset()), (1, 0));
    let mut walked = frame.begin_payload();
    walked.advance(10).unwrap();
    assert_eq!(jumped, walked);
    assert_eq!(jumped.get(), Some(10));
}

#[test]
fn test_set_payload_past_capacity_is_boundary() {
    let mut frame = frame_over(&[8, 8], &[1, 2, 3]);
    let err = frame.set_payload(17).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Boundary);
    assert_eq!(frame.payload(), 3);
    assert_eq!(frame.to_vec(), vec![1, 2, 3]);
}

#[test]
fn test_fifo_drops_past_depth_in_order() {
    let fifo = Fifo::new(FifoConfig::new(3, 0, true), None).unwrap();
    let (sink, rx) = ChannelSink::new(0);
    fifo.add_slave(Arc::new(sink));

    fifo.pause();
    for n in 0..5u8 {
        let mut frame = frame_over(&[4], &[n]);
        frame.set_channel(n);
        fifo.accept_frame(Arc::new(frame));
    }
    assert_eq!(fifo.depth(), 3);
    assert_eq!(fifo.dropped(), 2);
    fifo.resume();

    let delivered: Vec<u8> = (0..3)
        .map(|_| rx.recv_timeout(common::test_timeout()).unwrap().channel())
        .collect();
    assert_eq!(delivered, vec![0, 1, 2]);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert!(common::wait_until(common::test_timeout(), || fifo.delivered() == 3));
    assert_eq!(fifo.dropped(), 2);
}

#[test]
fn test_fifo_copy_returns_buffers_to_pool() {
    let pool = Pool::unbounded(16);
    let fifo = Fifo::new(FifoConfig::new(0, 0, false), Some(pool.clone())).unwrap();
    let (sink, rx) = ChannelSink::new(0);
    fifo.add_slave(Arc::new(sink));

    let source = frame_over(&[32], &[7; 20]);
    fifo.accept_frame(Arc::new(source));
    let copy = rx.recv_timeout(common::test_timeout()).unwrap();
    assert_eq!(copy.to_vec(), vec![7; 20]);
    assert_eq!(copy.buffer_count(), 2);
    assert_eq!(pool.in_flight(), 2);

    drop(copy);
    assert!(common::wait_until(common::test_timeout(), || pool.in_flight() == 0));
    assert_eq!(pool.allocated(), pool.freed());
}

#[test]
fn test_blocking_pool_hands_buffers_across_threads() {
    let config = PoolConfig {
        max_buffers: 2,
        policy: ExhaustPolicy::Block,
        ..PoolConfig::default()
    };
    let pool = Pool::new(64, &config);
    let (sink, rx) = ChannelSink::new(0);
    let master = Arc::new(StreamMaster::new());
    master.add_slave(Arc::new(sink));

    let producer = {
        let pool = pool.clone();
        let master = master.clone();
        thread::spawn(move || {
            for n in 0..10u8 {
                let mut frame = pool.alloc(8, 0).unwrap();
                frame.write(0, &[n; 8]).unwrap();
                master.send_frame(Arc::new(frame));
            }
        })
    };

    for n in 0..10u8 {
        let frame = rx.recv_timeout(common::test_timeout()).unwrap();
        assert_eq!(frame.to_vec(), vec![n; 8]);
        assert!(pool.in_flight() <= 2);
    }
    producer.join().unwrap();
    assert_eq!(pool.allocated(), 10);
}

#[test]
fn test_stream_master_fans_out_to_every_slave() {
    let mut first = MockSink::new();
    first.expect_accept_frame().times(2).return_const(());
    let mut second = MockSink::new();
    second
        .expect_accept_frame()
        .withf(|f: &Arc<Frame>| f.payload() == 1)
        .times(2)
        .return_const(());

    let master = StreamMaster::new();
    master.add_slave(Arc::new(first));
    master.add_slave(Arc::new(second));
    master.send_frame(Arc::new(frame_over(&[4], &[1])));
    master.send_frame(Arc::new(frame_over(&[4], &[2])));
}

fn two_record_super_frame(pool: &Arc<Pool>) -> Frame {
    let mut builder = SuperFrameBuilder::new(8).unwrap().sequence(0x42);
    builder.push(1, 2, 3, b"AAAAAAAAAAAA");
    builder.push(7, 0, 0, b"BBBBB");
    builder.build(pool).unwrap()
}

#[test]
fn test_batcher_decodes_two_records() {
    // Small regions so the super-frame spans several buffers
    let pool = Pool::unbounded(10);
    let frame = two_record_super_frame(&pool);
    assert_eq!(frame.payload(), 48);
    assert!(frame.buffer_count() > 1);

    let mut core = CoreV1::new();
    assert!(core.process_frame(Arc::new(frame)));
    assert_eq!(core.sequence(), 0x42);
    assert_eq!(core.header_size(), 8);
    assert_eq!(core.tail_size(), 8);
    assert_eq!(core.count(), 2);

    let a = core.record(0).unwrap();
    assert_eq!(a.to_vec(), b"AAAAAAAAAAAA".to_vec());
    assert_eq!((a.dest(), a.first_user(), a.last_user()), (1, 2, 3));
    let b = core.record(1).unwrap();
    assert_eq!(b.to_vec(), b"BBBBB".to_vec());
    assert_eq!((b.dest(), b.first_user(), b.last_user()), (7, 0, 0));

    let mut tail = [0u8; 8];
    core.tail(0).unwrap().read_into(&mut tail).unwrap();
    assert_eq!(tail, [12, 0, 0, 0, 1, 2, 3, 4]);
    assert!(core.record(2).is_err());
}

#[test]
fn test_splitter_feeds_fifo() {
    let pool = Pool::unbounded(64);
    let splitter = Arc::new(SplitterV1::new(pool.clone()));
    let fifo = Arc::new(Fifo::new(FifoConfig::new(0, 0, true), None).unwrap());
    let (sink, rx) = ChannelSink::new(0);
    splitter.add_slave(fifo.clone());
    fifo.add_slave(Arc::new(sink));

    let upstream = StreamMaster::new();
    upstream.add_slave(splitter.clone());
    upstream.send_frame(Arc::new(two_record_super_frame(&pool)));

    let a = rx.recv_timeout(common::test_timeout()).unwrap();
    let b = rx.recv_timeout(common::test_timeout()).unwrap();
    assert_eq!((a.channel(), a.payload()), (1, 12));
    assert_eq!((b.channel(), b.payload()), (7, 5));
    assert_eq!(splitter.emitted(), 2);
    assert_eq!(splitter.rejected(), 0);
}

proptest! {
    #[test]
    fn prop_frame_accounting_holds(
        sizes in prop::collection::vec(1usize..32, 1..6),
        fill in 0usize..200,
        target in 0usize..200,
    ) {
        let mut frame = Frame::from_buffers(
            sizes.iter().map(|&s| daqlink::stream::Buffer::detached(s)).collect(),
        );
        let total: usize = sizes.iter().sum();
        let fill = fill.min(total);
        frame.set_payload(fill).unwrap();

        let before = frame.payload();
        let result = frame.set_payload(target);
        if target <= frame.capacity() {
            prop_assert!(result.is_ok());
            prop_assert_eq!(frame.payload(), target);
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(frame.payload(), before);
        }
        prop_assert_eq!(
            frame.payload() + frame.available() + frame.head_reserved() + frame.tail_reserved(),
            frame.size()
        );
        prop_assert_eq!(frame.begin_payload().count(), frame.payload());
    }

    #[test]
    fn prop_pool_counters_balance(
        allocs in prop::collection::vec((0usize..100, 0usize..8), 1..20),
        keep in prop::collection::vec(any::<bool>(), 20),
    ) {
        let pool = Pool::unbounded(16);
        let mut held = Vec::new();
        for (i, &(payload, head)) in allocs.iter().enumerate() {
            let frame = pool.alloc(payload, head).unwrap();
            prop_assert!(frame.capacity() >= payload);
            prop_assert_eq!(frame.payload(), 0);
            if keep[i] {
                held.push(frame);
            }
            let c = pool.counters();
            prop_assert_eq!(c.allocated - c.freed, c.in_flight as u64);
        }
        drop(held);
        prop_assert_eq!(pool.in_flight(), 0);
        prop_assert_eq!(pool.allocated(), pool.freed());
    }

    #[test]
    fn prop_batcher_round_trip(
        width_log in 1u32..5,
        records in prop::collection::vec(
            (any::<u8>(), any::<u8>(), any::<u8>(), prop::collection::vec(any::<u8>(), 0..40)),
            1..6,
        ),
        sequence in any::<u8>(),
        region in 4usize..64,
    ) {
        let width = 1usize << width_log;
        let mut builder = SuperFrameBuilder::new(width).unwrap().sequence(sequence);
        for (dest, first, last, data) in &records {
            builder.push(*dest, *first, *last, data);
        }
        let pool = Pool::unbounded(region);
        let frame = builder.build(&pool).unwrap();
        prop_assert_eq!(frame.payload(), builder.encoded_len());

        let mut core = CoreV1::new();
        core.try_process(Arc::new(frame)).unwrap();
        prop_assert_eq!(core.sequence(), sequence);
        prop_assert_eq!(core.count(), records.len());
        for (record, (dest, first, last, data)) in core.records().iter().zip(&records) {
            prop_assert_eq!(record.dest(), *dest);
            prop_assert_eq!(record.first_user(), *first);
            prop_assert_eq!(record.last_user(), *last);
            prop_assert_eq!(&record.to_vec(), data);
        }
    }
}
