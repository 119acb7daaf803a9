use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use peerlink::core::frame::{FrameReader, FrameWriter, ReadProgress, WriteProgress};
use peerlink::core::message::{MessagePool, MessageQueue};
use std::io::Cursor;

const BATCH: usize = 64;

fn bench_frame_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_write");

    for size in [16usize, 512, 4096, 65536] {
        let payload = vec![0xA5u8; size];
        let mut pool = MessagePool::new(BATCH, size);
        let mut queue = MessageQueue::new();
        let mut writer = FrameWriter::new();
        let mut wire = Vec::with_capacity(BATCH * (size + 4));

        group.throughput(Throughput::Bytes((BATCH * size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for _ in 0..BATCH {
                    let id = pool.alloc().unwrap();
                    pool.write(id, &payload).unwrap();
                    queue.push_back(&mut pool, id);
                }
                wire.clear();
                while let WriteProgress::Sent(id) =
                    writer.write(&mut wire, &mut pool, &mut queue).unwrap()
                {
                    pool.free(id);
                }
            })
        });
    }

    group.finish();
}

fn bench_frame_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_read");

    for size in [16usize, 512, 4096, 65536] {
        let mut wire = Vec::with_capacity(BATCH * (size + 4));
        for _ in 0..BATCH {
            wire.extend_from_slice(&(size as u32).to_be_bytes());
            wire.extend(std::iter::repeat(0x5Au8).take(size));
        }
        let mut pool = MessagePool::new(4, size);
        let mut reader = FrameReader::new();

        group.throughput(Throughput::Bytes((BATCH * size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut stream = Cursor::new(wire.as_slice());
                let mut frames = 0;
                while frames < BATCH {
                    match reader.read(&mut stream, &mut pool).unwrap() {
                        ReadProgress::Received(id) => {
                            pool.free(id);
                            frames += 1;
                        }
                        _ => break,
                    }
                }
                frames
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_write, bench_frame_read);
criterion_main!(benches);
