use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vindkanal_core::packet::{Direction, Packet};
use vindkanal_core::queue::DelayQueue;

fn bench_enqueue_dequeue(c: &mut Criterion) {
    c.bench_function("delay_queue_1k_cycle", |b| {
        b.iter(|| {
            let mut queue = DelayQueue::new(true);
            for i in 0..1_000u64 {
                let packet = Packet::new(vec![0u8; 64], Direction::LeftToRight, 0);
                queue.enqueue(packet, black_box(1_000_000 - i));
            }
            while queue.dequeue().is_some() {}
        })
    });
}

criterion_group!(benches, bench_enqueue_dequeue);
criterion_main!(benches);
