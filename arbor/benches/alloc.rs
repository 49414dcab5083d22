use arbor::Heap;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

const CHILDREN: usize = 256;

pub fn benchmark(c: &mut Criterion) {
    c.bench_function("system_children", |b| {
        b.iter_batched(
            Heap::new,
            |mut heap| {
                let root = heap.allocate(None, 0, "root").unwrap();
                for i in 0..CHILDREN {
                    black_box(heap.allocate(Some(root), i % 64 + 1, "child").unwrap());
                }
                heap.free(root).unwrap();
                heap
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("pool_children", |b| {
        b.iter_batched(
            Heap::new,
            |mut heap| {
                let root = heap.allocate_pool(None, CHILDREN * 64).unwrap();
                for i in 0..CHILDREN {
                    black_box(heap.allocate(Some(root), i % 64 + 1, "child").unwrap());
                }
                heap.free(root).unwrap();
                heap
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("resize_grow", |b| {
        b.iter_batched(
            Heap::new,
            |mut heap| {
                let mut x = heap.allocate(None, 16, "buffer").unwrap();
                for size in (32..4096).step_by(32) {
                    x = heap.resize(None, Some(x), size).unwrap().unwrap();
                }
                heap.free(x).unwrap();
                heap
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
