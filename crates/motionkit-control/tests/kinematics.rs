use motionkit_control::{plan_move, MotionRequest, PhaseKind, ProfileShape};
use proptest::prelude::*;

fn request() -> impl Strategy<Value = MotionRequest> {
    (
        -1000.0f64..1000.0,
        -200.0f64..200.0,
        0.1f64..500.0,
        1.0f64..5000.0,
        1.0f64..5000.0,
        -1000.0f64..1000.0,
    )
        .prop_map(|(start, start_velocity, target_speed, acceleration, deceleration, target)| {
            MotionRequest {
                start,
                start_velocity,
                target_speed,
                acceleration,
                deceleration,
                target,
            }
        })
}

fn tolerance(r: &MotionRequest) -> f64 {
    1e-6 * (1.0 + r.start.abs() + r.target.abs() + r.start_velocity.powi(2) / r.deceleration)
}

proptest! {
    #[test]
    fn integrated_phases_reach_target(r in request()) {
        let profile = plan_move(&r).expect("request is in domain");
        prop_assert!((profile.final_position() - r.target).abs() <= tolerance(&r));
        prop_assert!((profile.position_at(profile.total_time() + 1.0) - r.target).abs() <= tolerance(&r));
    }

    #[test]
    fn phase_durations_are_never_negative(r in request()) {
        let profile = plan_move(&r).expect("request is in domain");
        for phase in profile.phases() {
            prop_assert!(phase.duration >= 0.0, "{:?} has negative duration", phase.kind);
            prop_assert!(phase.distance >= 0.0);
        }
        prop_assert!(profile.cruise.duration >= 0.0);
    }

    #[test]
    fn triangular_peak_stays_below_cruise_speed(r in request()) {
        let profile = plan_move(&r).expect("request is in domain");
        if profile.shape == ProfileShape::Triangular {
            prop_assert!(profile.peak_speed <= r.target_speed + 1e-9);
            prop_assert_eq!(profile.cruise.duration, 0.0);
        }
    }

    #[test]
    fn stop_phase_only_when_needed(r in request()) {
        let profile = plan_move(&r).expect("request is in domain");
        if let Some(stop) = profile.stop {
            prop_assert_eq!(stop.kind, PhaseKind::Stop);
            prop_assert!(r.start_velocity != 0.0);
            prop_assert_eq!(stop.end_speed, 0.0);
        }
        let heading = (r.target - r.start).signum() == r.start_velocity.signum();
        let can_stop = r.start_velocity.powi(2) / r.deceleration <= (r.target - r.start).abs();
        if r.start_velocity != 0.0 && r.target != r.start && heading && can_stop {
            prop_assert!(profile.stop.is_none());
        }
    }
}

#[test]
fn reference_scenario_is_triangular() {
    let profile = plan_move(&MotionRequest {
        start: 0.0,
        start_velocity: 0.0,
        target_speed: 200.0,
        acceleration: 1000.0,
        deceleration: 1000.0,
        target: 50.0,
    })
    .unwrap();

    assert_eq!(profile.shape, ProfileShape::Triangular);
    assert!((profile.peak_speed - 158.11).abs() < 0.01);
    // Ramp and brake are symmetric, 2 * 158.11 / 1000 each.
    assert!((profile.total_time() - 0.632_455).abs() < 1e-5);
}
