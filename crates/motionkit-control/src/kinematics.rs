//! Single-axis motion planning
//!
//! Computes the velocity profile of one point-to-point move:
//! - an optional stop phase, when the axis is moving away from the target or
//!   is too fast to stop before it
//! - a ramp phase from the start speed to the cruise (or reduced peak) speed
//! - a cruise phase at constant speed, empty for triangular profiles
//! - a brake phase down to standstill at the target
//!
//! Ramp rates are peak values: a ramp from speed `u` to `v` under rate `r`
//! covers `|v² - u²| / r` and lasts `2 |v - u| / r`.
//!
//! The planner is a pure function. Inputs are validated first so that a zero
//! ramp rate is reported as a [`KinematicsError`] instead of reaching a
//! division.

use motionkit_core::KinematicsError;
use serde::{Deserialize, Serialize};

/// Inputs of a single-axis move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionRequest {
    /// Start position
    pub start: f64,
    /// Signed start velocity
    pub start_velocity: f64,
    /// Unsigned cruise speed
    pub target_speed: f64,
    /// Unsigned acceleration
    pub acceleration: f64,
    /// Unsigned deceleration
    pub deceleration: f64,
    /// Target position
    pub target: f64,
}

impl MotionRequest {
    /// Check the request against the planner's domain
    pub fn validate(&self) -> Result<(), KinematicsError> {
        let fields = [
            ("start", self.start),
            ("start_velocity", self.start_velocity),
            ("target_speed", self.target_speed),
            ("acceleration", self.acceleration),
            ("deceleration", self.deceleration),
            ("target", self.target),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(KinematicsError::NonFinite(name));
        }
        if self.acceleration <= 0.0 {
            return Err(KinematicsError::NonPositiveAcceleration(self.acceleration));
        }
        if self.deceleration <= 0.0 {
            return Err(KinematicsError::NonPositiveDeceleration(self.deceleration));
        }
        let moving = self.start != self.target || self.start_velocity != 0.0;
        if moving && self.target_speed <= 0.0 {
            return Err(KinematicsError::NonPositiveSpeed(self.target_speed));
        }
        Ok(())
    }
}

/// Role of a phase in the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseKind {
    /// Bring the axis to rest before heading for the target
    Stop,
    /// Ramp to cruise (or peak) speed
    Ramp,
    /// Constant speed
    Cruise,
    /// Decelerate to rest at the target
    Brake,
}

/// One constant-acceleration segment of a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Role of the segment
    pub kind: PhaseKind,
    /// Unsigned speed at segment start
    pub start_speed: f64,
    /// Unsigned speed at segment end
    pub end_speed: f64,
    /// Duration in seconds
    pub duration: f64,
    /// Unsigned distance covered
    pub distance: f64,
    /// Direction of travel, `1.0` or `-1.0`
    pub direction: f64,
}

impl Phase {
    fn new(kind: PhaseKind, start_speed: f64, end_speed: f64, duration: f64, direction: f64) -> Self {
        Self {
            kind,
            start_speed,
            end_speed,
            duration,
            distance: 0.5 * (start_speed + end_speed) * duration,
            direction,
        }
    }

    fn ramp(kind: PhaseKind, from: f64, to: f64, rate: f64, direction: f64) -> Self {
        Self::new(kind, from, to, 2.0 * (to - from).abs() / rate, direction)
    }

    fn empty(kind: PhaseKind, speed: f64, direction: f64) -> Self {
        Self::new(kind, speed, speed, 0.0, direction)
    }

    /// Signed displacement after `tau` seconds into the phase
    fn displacement_at(&self, tau: f64) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        let tau = tau.clamp(0.0, self.duration);
        let dv = self.end_speed - self.start_speed;
        self.direction * (self.start_speed * tau + dv * tau * tau / (2.0 * self.duration))
    }

    /// Signed velocity after `tau` seconds into the phase
    fn velocity_at(&self, tau: f64) -> f64 {
        if self.duration <= 0.0 {
            return self.direction * self.end_speed;
        }
        let tau = tau.clamp(0.0, self.duration);
        let dv = self.end_speed - self.start_speed;
        self.direction * (self.start_speed + dv * tau / self.duration)
    }
}

/// Shape of the velocity-vs-time curve towards the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileShape {
    /// No travel towards the target was needed
    Stationary,
    /// Ramp, cruise, brake
    Trapezoidal,
    /// Ramp and brake only; the cruise speed is never reached
    Triangular,
}

/// Planned velocity profile of one move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionProfile {
    /// Start position
    pub start: f64,
    /// Target position
    pub target: f64,
    /// Stop phase for reversal or overrun
    pub stop: Option<Phase>,
    /// Ramp phase
    pub ramp: Phase,
    /// Cruise phase
    pub cruise: Phase,
    /// Brake phase
    pub brake: Phase,
    /// Highest speed reached after the stop phase
    pub peak_speed: f64,
    /// Profile shape
    pub shape: ProfileShape,
}

impl MotionProfile {
    /// Phases in execution order
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.stop
            .iter()
            .chain([&self.ramp, &self.cruise, &self.brake])
    }

    /// Total move duration in seconds
    pub fn total_time(&self) -> f64 {
        self.phases().map(|p| p.duration).sum()
    }

    /// Position reached by integrating every phase
    pub fn final_position(&self) -> f64 {
        self.start
            + self
                .phases()
                .map(|p| p.direction * p.distance)
                .sum::<f64>()
    }

    /// Position `t` seconds after the move started
    pub fn position_at(&self, t: f64) -> f64 {
        let mut position = self.start;
        let mut elapsed = 0.0;
        for phase in self.phases() {
            if t < elapsed + phase.duration {
                return position + phase.displacement_at(t - elapsed);
            }
            position += phase.direction * phase.distance;
            elapsed += phase.duration;
        }
        position
    }

    /// Signed velocity `t` seconds after the move started
    pub fn velocity_at(&self, t: f64) -> f64 {
        let mut elapsed = 0.0;
        for phase in self.phases() {
            if t < elapsed + phase.duration {
                return phase.velocity_at(t - elapsed);
            }
            elapsed += phase.duration;
        }
        0.0
    }
}

/// Plan a single-axis move
///
/// # Errors
/// Returns a [`KinematicsError`] when the request is outside the planner's
/// domain (non-finite input, non-positive ramp rates, or a non-positive cruise
/// speed for a move that has to travel).
pub fn plan_move(request: &MotionRequest) -> Result<MotionProfile, KinematicsError> {
    request.validate()?;

    let MotionRequest {
        start,
        start_velocity: v0,
        target_speed: vt,
        acceleration: a,
        deceleration: d,
        target,
    } = *request;

    let offset = target - start;
    let stopping_distance = v0 * v0 / d;
    let heading_for_target = offset != 0.0 && v0.signum() == offset.signum();

    // Reversal when moving away, overrun when too fast to stop in time.
    let stop = if v0 != 0.0 && (!heading_for_target || stopping_distance > offset.abs()) {
        Some(Phase::ramp(PhaseKind::Stop, v0.abs(), 0.0, d, v0.signum()))
    } else {
        None
    };

    let (from, vs) = match &stop {
        Some(phase) => (start + phase.direction * phase.distance, 0.0),
        None => (start, v0.abs()),
    };
    let remaining = (target - from).abs();
    let direction = if target >= from { 1.0 } else { -1.0 };

    if remaining == 0.0 {
        return Ok(MotionProfile {
            start,
            target,
            stop,
            ramp: Phase::empty(PhaseKind::Ramp, 0.0, direction),
            cruise: Phase::empty(PhaseKind::Cruise, 0.0, direction),
            brake: Phase::empty(PhaseKind::Brake, 0.0, direction),
            peak_speed: 0.0,
            shape: ProfileShape::Stationary,
        });
    }

    let ramp_rate = if vs < vt { a } else { d };
    let s1 = (vt * vt - vs * vs).abs() / ramp_rate;
    let s3 = vt * vt / d;

    let profile = if s1 + s3 > remaining {
        // Only reachable while accelerating: decelerating to vt and braking
        // covers vs²/d, which the overrun check keeps within `remaining`.
        let candidate = d * (remaining * a + vs * vs) / (a + d);
        let v_max = candidate.max(0.0).sqrt().max(vs);
        let ramp = Phase::ramp(PhaseKind::Ramp, vs, v_max, a, direction);
        let brake = Phase::ramp(PhaseKind::Brake, v_max, 0.0, d, direction);
        MotionProfile {
            start,
            target,
            stop,
            ramp,
            cruise: Phase::empty(PhaseKind::Cruise, v_max, direction),
            brake,
            peak_speed: v_max,
            shape: ProfileShape::Triangular,
        }
    } else {
        let ramp = Phase::ramp(PhaseKind::Ramp, vs, vt, ramp_rate, direction);
        let brake = Phase::ramp(PhaseKind::Brake, vt, 0.0, d, direction);
        let cruise_distance = (remaining - ramp.distance - brake.distance).max(0.0);
        let cruise = Phase::new(PhaseKind::Cruise, vt, vt, cruise_distance / vt, direction);
        MotionProfile {
            start,
            target,
            stop,
            ramp,
            cruise,
            brake,
            peak_speed: vs.max(vt),
            shape: ProfileShape::Trapezoidal,
        }
    };

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: f64, v0: f64, vt: f64, a: f64, d: f64, target: f64) -> MotionRequest {
        MotionRequest {
            start,
            start_velocity: v0,
            target_speed: vt,
            acceleration: a,
            deceleration: d,
            target,
        }
    }

    #[test]
    fn test_triangular_reference_scenario() {
        let profile = plan_move(&request(0.0, 0.0, 200.0, 1000.0, 1000.0, 50.0)).unwrap();

        assert_eq!(profile.shape, ProfileShape::Triangular);
        assert!((profile.peak_speed - 158.113_883).abs() < 1e-3);
        assert_eq!(profile.cruise.duration, 0.0);
        assert!((profile.final_position() - 50.0).abs() < 1e-9);
        assert!((profile.ramp.distance - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_trapezoidal_profile() {
        let profile = plan_move(&request(0.0, 0.0, 100.0, 1000.0, 500.0, 100.0)).unwrap();

        assert_eq!(profile.shape, ProfileShape::Trapezoidal);
        // ramp: 100²/1000 = 10, brake: 100²/500 = 20
        assert!((profile.ramp.distance - 10.0).abs() < 1e-9);
        assert!((profile.brake.distance - 20.0).abs() < 1e-9);
        assert!((profile.cruise.distance - 70.0).abs() < 1e-9);
        assert!((profile.cruise.duration - 0.7).abs() < 1e-9);
        assert!((profile.total_time() - (0.2 + 0.7 + 0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_negative_direction() {
        let profile = plan_move(&request(10.0, 0.0, 50.0, 200.0, 200.0, -20.0)).unwrap();
        assert_eq!(profile.ramp.direction, -1.0);
        assert!((profile.final_position() + 20.0).abs() < 1e-9);
        assert!(profile.velocity_at(profile.ramp.duration) < 0.0);
    }

    #[test]
    fn test_reversal_adds_stop_phase() {
        // Moving at -20 while the target is ahead.
        let profile = plan_move(&request(0.0, -20.0, 50.0, 100.0, 100.0, 30.0)).unwrap();

        let stop = profile.stop.expect("reversal needs a stop phase");
        assert_eq!(stop.direction, -1.0);
        assert!((stop.distance - 4.0).abs() < 1e-9);
        assert!((stop.duration - 0.4).abs() < 1e-9);
        assert!((profile.final_position() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_overrun_when_too_fast_to_stop() {
        // Stopping from 100 under 100 needs 100 units, only 10 available.
        let profile = plan_move(&request(0.0, 100.0, 100.0, 100.0, 100.0, 10.0)).unwrap();

        let stop = profile.stop.expect("overrun needs a stop phase");
        assert_eq!(stop.direction, 1.0);
        assert_eq!(profile.ramp.direction, -1.0);
        assert!((profile.final_position() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_decelerate_to_cruise_speed() {
        let profile = plan_move(&request(0.0, 80.0, 40.0, 100.0, 100.0, 500.0)).unwrap();

        assert!(profile.stop.is_none());
        assert_eq!(profile.shape, ProfileShape::Trapezoidal);
        assert_eq!(profile.ramp.start_speed, 80.0);
        assert_eq!(profile.ramp.end_speed, 40.0);
        assert_eq!(profile.peak_speed, 80.0);
        assert!((profile.final_position() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_already_at_target() {
        let profile = plan_move(&request(5.0, 0.0, 10.0, 1.0, 1.0, 5.0)).unwrap();
        assert_eq!(profile.shape, ProfileShape::Stationary);
        assert_eq!(profile.total_time(), 0.0);
        assert_eq!(profile.position_at(1.0), 5.0);
    }

    #[test]
    fn test_moving_through_target_returns_to_it() {
        let profile = plan_move(&request(5.0, 3.0, 10.0, 10.0, 10.0, 5.0)).unwrap();
        assert!(profile.stop.is_some());
        assert!((profile.final_position() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_rates_rejected() {
        assert_eq!(
            plan_move(&request(0.0, 0.0, 10.0, 0.0, 1.0, 5.0)),
            Err(KinematicsError::NonPositiveAcceleration(0.0))
        );
        assert_eq!(
            plan_move(&request(0.0, 0.0, 10.0, 1.0, 0.0, 5.0)),
            Err(KinematicsError::NonPositiveDeceleration(0.0))
        );
        assert_eq!(
            plan_move(&request(0.0, 0.0, 0.0, 1.0, 1.0, 5.0)),
            Err(KinematicsError::NonPositiveSpeed(0.0))
        );
        assert_eq!(
            plan_move(&request(f64::NAN, 0.0, 1.0, 1.0, 1.0, 5.0)),
            Err(KinematicsError::NonFinite("start"))
        );
    }

    #[test]
    fn test_sampling_is_continuous() {
        let profile = plan_move(&request(0.0, 0.0, 200.0, 1000.0, 1000.0, 50.0)).unwrap();
        let total = profile.total_time();
        let mut last = profile.position_at(0.0);
        let steps = 200;
        for i in 1..=steps {
            let x = profile.position_at(total * i as f64 / steps as f64);
            assert!(x >= last - 1e-12, "position must be monotonic");
            assert!(x - last < 1.0);
            last = x;
        }
        assert!((last - 50.0).abs() < 1e-9);
        assert_eq!(profile.velocity_at(total + 1.0), 0.0);
    }
}
