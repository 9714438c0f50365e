use concord_core::{IdGenerator, ServerNumber};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn bench_next_id(c: &mut Criterion) {
    let ids = IdGenerator::new(ServerNumber::new(1).expect("valid server number"));

    c.bench_function("id/next_id_num", |b| {
        b.iter(|| black_box(ids.next_id_num()));
    });

    c.bench_function("id/next_id_text", |b| {
        b.iter(|| black_box(ids.next_id()));
    });
}

fn bench_contended(c: &mut Criterion) {
    let ids = Arc::new(IdGenerator::new(
        ServerNumber::new(2).expect("valid server number"),
    ));

    c.bench_function("id/next_id_num_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let ids = Arc::clone(&ids);
                    thread::spawn(move || {
                        for _ in 0..256 {
                            black_box(ids.next_id_num());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("bench thread panicked");
            }
        });
    });
}

criterion_group!(benches, bench_next_id, bench_contended);
criterion_main!(benches);
