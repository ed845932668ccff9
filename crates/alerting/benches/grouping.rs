use alerting::group_sets;
use alert_model::AlertKey;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn flood(n: usize) -> Vec<AlertKey> {
    (0..n)
        .map(|i| {
            format!("alert{}{{host=h{},dc=dc{},svc=s{}}}", i % 7, i, i % 3, i % 11)
                .parse()
                .expect("valid key")
        })
        .collect()
}

fn bench_group_sets(c: &mut Criterion) {
    let keys = flood(2000);
    c.bench_function("group_sets_2000", |b| {
        b.iter(|| group_sets(black_box(&keys), 2))
    });
}

criterion_group!(benches, bench_group_sets);
criterion_main!(benches);
