use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use monitor_core::{MonitorConfig, MonitorSession, VisibilityFilter};
use monitor_proto::{AiActivity, ClientId, EntityUpdate, FeedMessage};

fn updates(count: u64, offset: f32) -> Vec<EntityUpdate> {
    (0..count)
        .map(|id| EntityUpdate {
            id,
            delete: false,
            location: [id as f32 + offset, 0.0, (id % 97) as f32],
            object_type_tag: (id % 8) as u32,
            template_crc: 0,
            interest_radius: 0.0,
            authoritative_server: (id % 4) as u32,
            level: (id % 100) as i32,
            hibernating_counter: 0,
            ai_activity: AiActivity::Wander,
            creation_type: 0,
        })
        .collect()
}

fn fresh_session() -> MonitorSession {
    MonitorSession::new(ClientId::new("bench"), &MonitorConfig::default())
        .expect("default config has a valid filter")
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for size in [1_000u64, 10_000, 50_000] {
        let create = FeedMessage::Entities(updates(size, 0.0));
        let moved = FeedMessage::Entities(updates(size, 5.0));

        group.bench_with_input(BenchmarkId::new("create", size), &size, |b, _| {
            b.iter_batched(
                fresh_session,
                |mut session| {
                    session.ingest(&create, Duration::ZERO);
                    session
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("move", size), &size, |b, _| {
            b.iter_batched(
                || {
                    let mut session = fresh_session();
                    session.ingest(&create, Duration::ZERO);
                    session
                },
                |mut session| {
                    session.ingest(&moved, Duration::ZERO);
                    session
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_filter_flip(c: &mut Criterion) {
    let create = FeedMessage::Entities(updates(20_000, 0.0));
    c.bench_function("filter_flip_20k", |b| {
        b.iter_batched(
            || {
                let mut session = fresh_session();
                session.ingest(&create, Duration::ZERO);
                session
            },
            |mut session| {
                session.set_filter(VisibilityFilter::default().with_level_range(0, 49));
                session
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_ingest, bench_filter_flip);
criterion_main!(benches);
