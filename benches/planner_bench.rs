//! Benchmarks for admission planning.
//!
//! Benchmarks cover:
//! - Capacity computation over many seats and projects
//! - Admission of a waiting batch against that capacity
//! - A full planning tick over the in-memory backends

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use seat_dispatch::core::model::{Order, OrderStatus, Project, ProjectId, SeatState};
use seat_dispatch::core::planner::{admit, project_capacity, CapacityPlanner, PlannerLimits};
use seat_dispatch::core::SeatStateStore;
use seat_dispatch::infra::{InMemoryKvStore, InMemoryRepository, InMemorySwitchQueue};

use tokio::runtime::Runtime;

const PROJECTS: u64 = 20;

// ============================================================================
// Helper Functions
// ============================================================================

fn build_projects() -> HashMap<ProjectId, Project> {
    (1..=PROJECTS)
        .map(|id| {
            let project = Project {
                id,
                spare_coefficient: 2,
                busy_coefficient: 1,
                running: true,
                robot_id: Some(id),
                seat_ids: Vec::new(),
            };
            (id, project)
        })
        .collect()
}

fn build_seats(count: u64) -> Vec<SeatState> {
    let mut rng = rand::rng();
    (0..count)
        .map(|seat_id| {
            let locked = rng.random_bool(0.3);
            let first = rng.random_range(1..=PROJECTS);
            SeatState {
                seat_id,
                checked_in: rng.random_bool(0.9),
                ready: !locked,
                pre_ready: locked && rng.random_bool(0.5),
                locked,
                projects: vec![first, first % PROJECTS + 1],
                ..SeatState::default()
            }
        })
        .collect()
}

fn build_orders(count: u64) -> Vec<Order> {
    let mut rng = rand::rng();
    (0..count)
        .map(|id| Order {
            id,
            project_id: rng.random_range(1..=PROJECTS),
            phone: format!("1380000{id:04}"),
            status: OrderStatus::Waiting,
            updated_at_ms: 0,
        })
        .collect()
}

// ============================================================================
// Pure Planning Benchmarks
// ============================================================================

fn bench_project_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("project_capacity");
    let projects = build_projects();
    let active: HashMap<ProjectId, usize> = (1..=PROJECTS).map(|id| (id, 3)).collect();

    for size in [100, 1_000, 10_000] {
        let seats = build_seats(size);
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &seats, |b, seats| {
            b.iter(|| black_box(project_capacity(seats, &projects, &active)));
        });
    }
    group.finish();
}

fn bench_admit(c: &mut Criterion) {
    let mut group = c.benchmark_group("admit");
    let projects = build_projects();
    let capacity = project_capacity(&build_seats(500), &projects, &HashMap::new());

    for size in [100, 1_000, 10_000] {
        let orders = build_orders(size);
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &orders, |b, orders| {
            b.iter(|| {
                let mut capacitor = capacity.clone();
                black_box(admit(orders.clone(), &mut capacitor))
            });
        });
    }
    group.finish();
}

// ============================================================================
// Tick Benchmarks
// ============================================================================

fn bench_plan_tick(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("plan_tick");

    for seats in [50_u64, 500] {
        let repo = Arc::new(InMemoryRepository::new());
        for project in build_projects().into_values() {
            repo.insert_project(project);
        }
        for order in build_orders(2_000) {
            repo.insert_order(order);
        }
        let store = Arc::new(SeatStateStore::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(86_400),
        ));
        rt.block_on(async {
            for seat in build_seats(seats) {
                store.update(seat.seat_id, |_| Some(seat.clone())).await.unwrap();
            }
        });
        let planner = CapacityPlanner::new(
            Arc::new(InMemorySwitchQueue::new(Duration::from_secs(60))),
            repo,
            store,
            PlannerLimits {
                max_queue_len: 1_000,
                max_robot_concurrency: 1_000,
            },
        );

        group.bench_with_input(BenchmarkId::from_parameter(seats), &planner, |b, planner| {
            b.to_async(&rt).iter(|| async { black_box(planner.plan().await.unwrap()) });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(planning_benches, bench_project_capacity, bench_admit);
criterion_group!(tick_benches, bench_plan_tick);

criterion_main!(planning_benches, tick_benches);
