/*!
 * Counter strategy benchmarks
 *
 * Same fan-out, same N, every discipline
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fanout_counters::{runner::run_counter, HarnessConfig, Strategy, COUNTER_UNITS};
use std::thread;
use strum::IntoEnumIterator;

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let config = HarnessConfig::default();

    for units in [COUNTER_UNITS, 100_000] {
        for strategy in Strategy::iter() {
            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), units),
                &units,
                |b, &units| {
                    b.iter(|| {
                        let outcome = run_counter(strategy, units, config).unwrap();
                        black_box(outcome.value)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_contended_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_increment");
    let threads = thread::available_parallelism().map_or(4, |n| n.get());

    for strategy in Strategy::iter().filter(|s| s.is_exact()) {
        group.bench_function(BenchmarkId::from_parameter(strategy), |b| {
            b.iter(|| {
                let counter = strategy.counter();
                thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for _ in 0..1_000 {
                                counter.increment();
                            }
                        });
                    }
                });
                black_box(counter.value())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_contended_increment);
criterion_main!(benches);
