//! Kinematics planner micro-benchmark
//!
//! - triangular move from rest
//! - trapezoidal move from rest
//! - reversal with a stop phase
//! - profile sampling at simulation tick resolution

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motionkit_control::{plan_move, MotionRequest};

fn request(start_velocity: f64, target: f64) -> MotionRequest {
    MotionRequest {
        start: 0.0,
        start_velocity,
        target_speed: 200.0,
        acceleration: 1000.0,
        deceleration: 1000.0,
        target,
    }
}

fn bench_plan(c: &mut Criterion) {
    let triangular = request(0.0, 50.0);
    let trapezoidal = request(0.0, 500.0);
    let reversal = request(-80.0, 500.0);

    c.bench_function("plan_triangular", |b| {
        b.iter(|| plan_move(black_box(&triangular)))
    });
    c.bench_function("plan_trapezoidal", |b| {
        b.iter(|| plan_move(black_box(&trapezoidal)))
    });
    c.bench_function("plan_reversal", |b| {
        b.iter(|| plan_move(black_box(&reversal)))
    });
}

fn bench_sampling(c: &mut Criterion) {
    let Ok(profile) = plan_move(&request(0.0, 500.0)) else {
        return;
    };
    let total = profile.total_time();

    c.bench_function("sample_profile_10ms", |b| {
        b.iter(|| {
            let mut t = 0.0;
            let mut acc = 0.0;
            while t <= total {
                acc += profile.position_at(black_box(t));
                t += 0.01;
            }
            acc
        })
    });
}

criterion_group!(benches, bench_plan, bench_sampling);
criterion_main!(benches);
