use criterion::{criterion_group, criterion_main, Criterion};
use vexdb::reader::{Callbacks, PbfReader};

criterion_group!(benches, bench_count);
criterion_main!(benches);

fn bench_count(c: &mut Criterion) {
    let file = env!(
        "VEXDB_BENCH_FILE",
        "Must specify VEXDB_BENCH_FILE env var when compiling this benchmark"
    );

    c.bench_function(format!("counting elements in {file}").as_str(), |b| {
        b.iter(|| {
            let path = std::path::Path::new(file);
            let reader = PbfReader::open(path).unwrap();
            let mut nodes = 0u64;
            let mut ways = 0u64;
            let mut relations = 0u64;
            let callbacks = Callbacks::new()
                .with_node(|_| nodes += 1)
                .with_way(|_| ways += 1)
                .with_relation(|_| relations += 1);
            reader.read(callbacks).unwrap();
            (nodes, ways, relations)
        })
    });
}
