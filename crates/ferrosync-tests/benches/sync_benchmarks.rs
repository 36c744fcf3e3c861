//! Enumeration and application benchmarks
//!
//! Measures paging over in-memory stores of increasing size and the cost of
//! applying a batch of changes, including the per-object fallback path.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use ferrosync_core::SyncClient;
use ferrosync_tests::test_utils::*;
use ferrosync_types::{CancellationContext, SyncObject, SyncOptions, SyncStatus};

fn populated(parents: usize) -> ferrosync_core::MemoryProvider {
    let provider = store();
    for index in 0..parents {
        let owner = provider.insert(parent(&format!("parent {}", index))).unwrap();
        provider
            .insert(child(&format!("child {}", index), Some(&owner)))
            .unwrap();
    }
    provider
}

fn bench_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumeration");

    for size in [100usize, 1_000, 5_000] {
        let provider = populated(size / 2);
        let client = node("bench", &provider, &CancellationContext::new()).unwrap();
        let options = SyncOptions::default();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("all_pages", size), &size, |b, _| {
            b.iter(|| {
                let mut request = everything().with_page(0, 100);
                let mut seen = 0;
                loop {
                    let page = client.enumerate(&options, &request).unwrap();
                    seen += page.collection.len();
                    if !page.has_more {
                        break;
                    }
                    request = request.next_page();
                }
                black_box(seen)
            });
        });
    }

    group.finish();
}

fn changes(count: usize, duplicate: bool) -> Vec<SyncObject> {
    let mut objects = Vec::with_capacity(count * 2);
    for index in 0..count {
        let name = if duplicate && index == count - 1 {
            "parent 0".to_string()
        } else {
            format!("parent {}", index)
        };
        let owner = parent(&name);
        objects.push(wire(&child(&format!("child {}", index), Some(&owner)), SyncStatus::Added));
        objects.push(wire(&owner, SyncStatus::Added));
    }
    objects
}

fn bench_application(c: &mut Criterion) {
    let mut group = c.benchmark_group("application");

    for (label, duplicate) in [("batch", false), ("fallback", true)] {
        let objects = changes(200, duplicate);
        group.throughput(Throughput::Elements(objects.len() as u64));

        group.bench_function(BenchmarkId::new(label, objects.len()), |b| {
            b.iter_batched(
                || {
                    let provider = store();
                    let client = node("bench", &provider, &CancellationContext::new()).unwrap();
                    let session = open_session(&client).unwrap();
                    (client, session)
                },
                |(client, session)| black_box(client.apply_changes(session, &objects).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enumeration, bench_application);
criterion_main!(benches);
