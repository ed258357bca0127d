use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use recall_core::{derive_content, CorruptionState, FragmentId, KarmaState, Outbox, RecallConfig};

const SAMPLE_TEXT: &str = "the lighthouse keeper counted the waves until the light forgot him";

fn tracked_state(fragments: usize, void: f64) -> CorruptionState {
    let config = RecallConfig::builtin();
    let mut state = CorruptionState::new(config.corruption().clone());
    let mut out = Outbox::new();
    for index in 0..fragments {
        state.track(
            FragmentId::new(format!("fragment-{index}")),
            SAMPLE_TEXT,
            0,
            &mut out,
        );
    }
    state.observe_karma(KarmaState::new(0.0, 0.0, 0.0, void), 0, &mut out);
    state
}

fn bench_corruption_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("corruption_tick");

    for fragments in [8usize, 64, 512] {
        group.bench_with_input(
            BenchmarkId::new("calm", fragments),
            &fragments,
            |b, &fragments| {
                b.iter_batched(
                    || tracked_state(fragments, 0.0),
                    |mut state| {
                        let mut out = Outbox::new();
                        for second in 1..=10u64 {
                            state.tick(second * 1000, &mut out);
                        }
                        out
                    },
                    BatchSize::SmallInput,
                );
            },
        );

        group.bench_with_input(
            BenchmarkId::new("void_heavy", fragments),
            &fragments,
            |b, &fragments| {
                b.iter_batched(
                    || tracked_state(fragments, 100.0),
                    |mut state| {
                        let mut out = Outbox::new();
                        for second in 1..=10u64 {
                            state.tick(second * 1000, &mut out);
                        }
                        out
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_content_derivation(c: &mut Criterion) {
    let config = RecallConfig::builtin();
    let mut group = c.benchmark_group("content_derivation");
    for level in [0.1f64, 0.4, 0.7, 0.95] {
        group.bench_with_input(BenchmarkId::from_parameter(level), &level, |b, &level| {
            b.iter(|| derive_content(SAMPLE_TEXT, level, config.corruption()));
        });
    }
    group.finish();
}

criterion_group!(tick_benches, bench_corruption_tick, bench_content_derivation);
criterion_main!(tick_benches);
