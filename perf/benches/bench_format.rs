use basalt_format::{Format, VillasBinary, VillasHuman};
use basalt_perf::{float_signals, make_test_sample, test_pool};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_sprint(c: &mut Criterion) {
    let pool = test_pool(64, 16);
    let signals = float_signals(8);
    let smps = vec![make_test_sample(&pool, &signals, 8)];
    let mut buf = vec![0u8; 4096];

    let mut group = c.benchmark_group("format");
    group.throughput(Throughput::Elements(1));

    let human = VillasHuman::new(signals.clone());
    group.bench_function("villas.human sprint", |b| {
        b.iter(|| black_box(human.sprint(&mut buf, &smps).unwrap()));
    });

    let binary = VillasBinary::new(signals.clone());
    group.bench_function("villas.binary sprint", |b| {
        b.iter(|| black_box(binary.sprint(&mut buf, &smps).unwrap()));
    });

    group.finish();
}

fn bench_sscan(c: &mut Criterion) {
    let pool = test_pool(64, 16);
    let signals = float_signals(8);
    let smps = vec![make_test_sample(&pool, &signals, 8)];
    let mut buf = vec![0u8; 4096];

    let mut group = c.benchmark_group("format");
    group.throughput(Throughput::Elements(1));

    let human = VillasHuman::new(signals.clone());
    let (_, human_bytes) = human.sprint(&mut buf, &smps).unwrap();
    let human_wire = buf[..human_bytes].to_vec();

    group.bench_function("villas.human sscan", |b| {
        let mut out = Vec::new();
        pool.acquire_many(&mut out, 1);
        b.iter(|| black_box(human.sscan(&human_wire, &mut out).unwrap()));
    });

    let binary = VillasBinary::new(signals.clone());
    let (_, binary_bytes) = binary.sprint(&mut buf, &smps).unwrap();
    let binary_wire = buf[..binary_bytes].to_vec();

    group.bench_function("villas.binary sscan", |b| {
        let mut out = Vec::new();
        pool.acquire_many(&mut out, 1);
        b.iter(|| black_box(binary.sscan(&binary_wire, &mut out).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_sprint, bench_sscan);
criterion_main!(benches);
