//! Performance benchmarks for dispatch_core using Criterion.rs.

use bevy_ecs::prelude::Entity;
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dispatch_core::matching::{Candidate, FirstAvailable, MatchingPolicy, NearestDriver};
use dispatch_core::pricing::{calculate_fare, PricingConfig};
use dispatch_core::spatial::{haversine_distance_m, Coordinate, DriverIndex};

fn bench_fare_calculation(c: &mut Criterion) {
    let config = PricingConfig::default();
    let peak = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).single().expect("time");

    c.bench_function("fare_peak_surge", |b| {
        b.iter(|| {
            black_box(calculate_fare(
                black_box(&config),
                black_box(12_345.0),
                black_box(1_500),
                black_box(9),
                black_box(10),
                peak,
            ))
        });
    });
}

fn bench_matching_policies(c: &mut Criterion) {
    let pickup = Coordinate::new(52.52, 13.405);
    let sizes = [10usize, 100, 1_000];

    let mut group = c.benchmark_group("policy_rank");
    for size in sizes {
        let candidates: Vec<Candidate> = (0..size)
            .map(|i| {
                let coordinate =
                    Coordinate::new(52.52 + (i as f64) * 0.0001, 13.405 - (i as f64) * 0.0001);
                Candidate {
                    entity: Entity::from_raw(i as u32),
                    driver_id: format!("driver-{i}").into(),
                    distance_m: haversine_distance_m(&pickup, &coordinate),
                    idle_since_ms: (i as u64) * 1_000,
                }
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("nearest", size), &candidates, |b, base| {
            b.iter(|| {
                let mut candidates = base.clone();
                NearestDriver.rank(&pickup, &mut candidates);
                black_box(candidates.first().map(|c| c.entity))
            });
        });
        group.bench_with_input(BenchmarkId::new("first_available", size), &candidates, |b, base| {
            b.iter(|| {
                let mut candidates = base.clone();
                FirstAvailable.rank(&pickup, &mut candidates);
                black_box(candidates.first().map(|c| c.entity))
            });
        });
    }
    group.finish();
}

fn bench_spatial_prefilter(c: &mut Criterion) {
    let mut index = DriverIndex::default();
    let origin = Coordinate::new(52.52, 13.405);
    for i in 0..1_000u32 {
        let coordinate = Coordinate::new(
            52.52 + f64::from(i % 100) * 0.001,
            13.405 + f64::from(i / 100) * 0.001,
        );
        let cell = index.cell_for(&coordinate).expect("cell");
        index.upsert(Entity::from_raw(i), cell);
    }
    let origin_cell = index.cell_for(&origin).expect("origin cell");

    c.bench_function("drivers_near_5km", |b| {
        b.iter(|| black_box(index.drivers_near(black_box(origin_cell), 5_000.0).len()));
    });
}

criterion_group!(
    benches,
    bench_fare_calculation,
    bench_matching_policies,
    bench_spatial_prefilter
);
criterion_main!(benches);
