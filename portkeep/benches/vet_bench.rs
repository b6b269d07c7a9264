use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use portkeep::{Engine, EngineConfig, MockInspector, Port, StaticProbes};

fn make_engine(dir: &tempfile::TempDir) -> Engine {
    let lock_path = dir.path().join("portLockFile");
    std::fs::File::create(&lock_path)
        .unwrap()
        .set_len(65536)
        .unwrap();

    let config = EngineConfig::builder()
        .lock_file_relative_path(lock_path)
        .probes(Arc::new(StaticProbes::new((60000, 65535), vec![])))
        .inspector(Arc::new(MockInspector::empty()))
        .build();
    Engine::new(config)
}

fn bench_reserve_specific_port(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = make_engine(&dir);
    let port = Port::try_from(20_000).unwrap();

    c.bench_function("reserve_release_fixed_port", |b| {
        b.iter(|| {
            let handle = engine.reserve(black_box(port));
            if let Ok(Some(handle)) = handle {
                handle.close();
            }
        });
    });
}

fn bench_reserve_any(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = make_engine(&dir);

    c.bench_function("reserve_any", |b| {
        b.iter(|| {
            if let Ok(handle) = engine.reserve_any() {
                handle.close();
            }
        });
    });
}

fn bench_is_reservable(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = make_engine(&dir);
    let port = Port::try_from(21_000).unwrap();

    c.bench_function("is_reservable", |b| {
        b.iter(|| black_box(engine.is_reservable(black_box(port))));
    });
}

criterion_group!(benches, bench_reserve_specific_port, bench_reserve_any, bench_is_reservable);
criterion_main!(benches);
