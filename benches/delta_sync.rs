use assoc_graph::delta::{apply_subscription, generate_dump, sort_dump};
use assoc_graph::{Graph, StorageMarker};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

/// Graph with one stored type and `size` instances chained through `value`
fn source(size: usize) -> (Graph, assoc_graph::AssocId) {
    let mut graph = Graph::with_root("bench");
    let root = graph.root().clone();
    let storage_type = graph.system().storage.clone();
    let storage = graph.new_typed(&storage_type).unwrap();
    graph.default_marking(&storage).unwrap();

    let kind = graph.new_typed(&root).unwrap();
    graph.set_marker(&kind, &storage, StorageMarker::TypedTrue).unwrap();
    let mut previous: Option<assoc_graph::AssocId> = None;
    for _ in 0..size {
        let id = graph.new_typed(&kind).unwrap();
        graph.set_value(&id, previous.as_ref()).unwrap();
        previous = Some(id);
    }
    (graph, storage)
}

fn criterion_benchmark(c: &mut Criterion) {
    let (graph, storage) = source(1_000);
    let dump = generate_dump(&graph, &storage).unwrap();

    c.bench_function("generate_dump_1k", |b| b.iter(|| black_box(generate_dump(&graph, &storage).unwrap())));

    c.bench_function("sort_dump_1k", |b| {
        b.iter_batched(|| dump.links.clone(), |links| black_box(sort_dump(links, true).unwrap()), BatchSize::SmallInput)
    });

    c.bench_function("apply_subscription_1k", |b| {
        b.iter_batched(
            || {
                let mut replica = Graph::with_root("bench");
                let storage_type = replica.system().storage.clone();
                let storage = replica.new_typed(&storage_type).unwrap();
                replica.default_marking(&storage).unwrap();
                (replica, storage)
            },
            |(mut replica, storage)| black_box(apply_subscription(&mut replica, &dump, &storage).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
