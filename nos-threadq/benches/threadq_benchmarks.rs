//! Throughput benchmarks for the thread queue core.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nos_threadq::{Discipline, EnqueueContext, ThreadQueue, ThreadTable};

fn bench_enqueue_surrender(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_surrender");
    for &waiters in &[4usize, 16, 64] {
        for discipline in [Discipline::Fifo, Discipline::Priority, Discipline::PrioritySmp] {
            let label = format!("{:?}", discipline);
            group.bench_with_input(
                BenchmarkId::new(label, waiters),
                &waiters,
                |bencher, &waiters| {
                    let table = Arc::new(ThreadTable::new(2));
                    let queue = ThreadQueue::new(discipline, table.clone());
                    let tids: Vec<_> = (0..waiters)
                        .map(|i| table.create_thread_on((i as u64 % 50) + 1, i % 2))
                        .collect();
                    bencher.iter(|| {
                        let guard = table.dispatch().disable();
                        let ctx = EnqueueContext::for_guard(&guard);
                        for &tid in &tids {
                            queue.enqueue(&ctx, tid).unwrap();
                        }
                        drop(guard);
                        while queue.surrender().is_some() {}
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    c.bench_function("flush_64_waiters", |bencher| {
        let table = Arc::new(ThreadTable::new(1));
        let queue = ThreadQueue::new(Discipline::Priority, table.clone());
        let tids: Vec<_> = (0..64u64).map(|i| table.create_thread((i % 50) + 1)).collect();
        bencher.iter(|| {
            let guard = table.dispatch().disable();
            let ctx = EnqueueContext::for_guard(&guard);
            for &tid in &tids {
                queue.enqueue(&ctx, tid).unwrap();
            }
            drop(guard);
            queue.flush()
        });
    });
}

fn bench_deadlock_walk(c: &mut Criterion) {
    c.bench_function("ownership_chain_walk_depth_8", |bencher| {
        let table = Arc::new(ThreadTable::new(1));
        let queues: Vec<_> = (0..9)
            .map(|_| ThreadQueue::new(Discipline::Priority, table.clone()))
            .collect();
        let tids: Vec<_> = (0..9).map(|i| table.create_thread(10 + i as u64)).collect();
        // Chain: owner of queue i waits on queue i + 1.
        for i in 0..9 {
            queues[i].set_owner(Some(tids[i]));
        }
        {
            let guard = table.dispatch().disable();
            let ctx = EnqueueContext::for_guard(&guard);
            for i in 0..8 {
                queues[i + 1].enqueue(&ctx, tids[i]).unwrap();
            }
        }
        let walker = table.create_thread(5);
        bencher.iter(|| {
            let guard = table.dispatch().disable();
            let ctx = EnqueueContext::for_guard(&guard);
            queues[0].enqueue(&ctx, walker).unwrap();
            drop(guard);
            assert!(queues[0].extract(walker));
        });
    });
}

criterion_group!(
    benches,
    bench_enqueue_surrender,
    bench_flush,
    bench_deadlock_walk
);
criterion_main!(benches);
