// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use criterion::{Criterion, criterion_group, criterion_main};
use hoard_ring::Map;
use std::hint::black_box;

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_get");

    for members in [3usize, 16, 64] {
        let mut ring = Map::new(50);
        ring.add((0..members).map(|i| format!("10.0.0.{i}:8000")));

        let keys: Vec<String> = (0..1024).map(|i| format!("object/{i}")).collect();

        group.bench_function(format!("{members}_members"), |b| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i & 1023];
                i += 1;
                black_box(ring.get(black_box(key)))
            });
        });
    }

    group.finish();
}

fn bench_add(c: &mut Criterion) {
    c.bench_function("ring_add_16_members", |b| {
        b.iter(|| {
            let mut ring = Map::new(50);
            ring.add((0..16).map(|i| format!("10.0.0.{i}:8000")));
            black_box(ring.is_empty())
        });
    });
}

criterion_group!(benches, bench_get, bench_add);
criterion_main!(benches);
