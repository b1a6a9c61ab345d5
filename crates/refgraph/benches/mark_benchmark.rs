//! Benchmark: mark pass and `is_referenced` over chains, fan-outs and
//! owned subobject trees.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use refgraph::{MarkRequest, ObjectRef, ObjectRegistry, ReferenceQuery, Reflect, SpawnParams};
use std::hint::black_box;
use std::time::Duration;

#[derive(Reflect, Default)]
struct Node {
    value: u64,
    next: Vec<ObjectRef>,
}

fn chain(len: usize) -> (ObjectRegistry, Vec<ObjectRef>) {
    let mut registry = ObjectRegistry::new();
    let ids: Vec<_> = (0..len)
        .map(|_| registry.spawn(Node::default()).unwrap())
        .collect();
    for pair in ids.windows(2) {
        registry.get_mut::<Node>(pair[0]).unwrap().next.push(pair[1]);
    }
    registry.add_to_root(ids[0]).unwrap();
    (registry, ids)
}

fn fan_out(width: usize) -> (ObjectRegistry, ObjectRef) {
    let mut registry = ObjectRegistry::new();
    let hub = registry.spawn(Node::default()).unwrap();
    let leaves: Vec<_> = (0..width)
        .map(|i| {
            registry
                .spawn(Node {
                    value: i as u64,
                    next: Vec::new(),
                })
                .unwrap()
        })
        .collect();
    registry.get_mut::<Node>(hub).unwrap().next = leaves;
    registry.add_to_root(hub).unwrap();
    (registry, hub)
}

fn bench_mark_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_chain");
    for len in [1_000, 10_000, 100_000] {
        let (mut registry, _) = chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                let report = registry.mark(&MarkRequest::new()).unwrap();
                black_box(report.objects_marked);
            });
        });
    }
    group.finish();
}

fn bench_mark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_fan_out");
    for width in [1_000, 10_000, 100_000] {
        let (mut registry, _) = fan_out(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                let report = registry.mark(&MarkRequest::new()).unwrap();
                black_box(report.worklist_high_water);
            });
        });
    }
    group.finish();
}

fn bench_is_referenced(c: &mut Criterion) {
    let (mut registry, ids) = chain(10_000);
    let middle = ids[ids.len() / 2];
    let query = ReferenceQuery::default();

    c.bench_function("is_referenced_chain_10k", |b| {
        b.iter(|| black_box(registry.is_referenced(middle, &query).unwrap()));
    });
}

fn bench_is_referenced_subobjects(c: &mut Criterion) {
    let mut registry = ObjectRegistry::new();
    let package = registry.spawn(Node::default()).unwrap();
    let mut parent = package;
    for _ in 0..1_000 {
        parent = registry
            .spawn_with(Node::default(), SpawnParams::new().with_outer(parent))
            .unwrap();
    }
    let user = registry.spawn(Node::default()).unwrap();
    registry.get_mut::<Node>(user).unwrap().next.push(parent);
    registry.add_to_root(user).unwrap();

    let query = ReferenceQuery::default().with_subobjects(true);
    c.bench_function("is_referenced_subobjects_1k", |b| {
        b.iter(|| black_box(registry.is_referenced(package, &query).unwrap()));
    });
}

criterion_group!(
    name = reachability;
    config = Criterion::default()
        .sample_size(20)
        .warm_up_time(Duration::from_millis(200))
        .measurement_time(Duration::from_secs(2));
    targets =
        bench_mark_chain,
        bench_mark_fan_out,
        bench_is_referenced,
        bench_is_referenced_subobjects,
);

criterion_main!(reachability);
