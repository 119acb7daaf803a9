use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use peerlink::{AddressRegistry, Endpoint, NetIp, SockId};

fn identities(count: usize) -> Vec<SockId> {
    (0..count).map(|_| SockId::random()).collect()
}

fn bench_registry_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_add");
    let endpoint = Endpoint::from(NetIp::v4([10, 0, 0, 1], 3823));

    for count in [1_000usize, 10_000, 100_000] {
        let ids = identities(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter_batched(
                AddressRegistry::new,
                |mut registry| {
                    for id in &ids {
                        registry.add(id, &endpoint);
                    }
                    registry
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_registry_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_lookup");
    let endpoint = Endpoint::from(NetIp::v4([10, 0, 0, 1], 3823));

    for count in [1_000usize, 10_000, 100_000] {
        let ids = identities(count);
        let mut registry = AddressRegistry::new();
        for id in &ids {
            registry.add(id, &endpoint);
        }
        let misses = identities(1_000);

        group.bench_with_input(BenchmarkId::new("hit", count), &count, |b, _| {
            b.iter(|| ids.iter().filter(|id| registry.get(id).is_some()).count())
        });
        group.bench_with_input(BenchmarkId::new("miss", count), &count, |b, _| {
            b.iter(|| misses.iter().filter(|id| registry.contains(id)).count())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry_add, bench_registry_lookup);
criterion_main!(benches);
