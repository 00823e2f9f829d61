//! Release velocity estimation from a short history of held poses.

use nalgebra::Vector3;
use std::collections::VecDeque;

use super::math::{interpolate_pose, pose_position, remap_clamped, Pose};
use crate::config::ThrowingConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PoseSample {
    time: f32,
    pose: Pose,
}

/// Velocity to apply to a released object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrowVelocity {
    pub linear: Vector3<f32>,
    pub angular: Vector3<f32>,
}

/// Rolling window of object poses recorded while grasped.
#[derive(Debug, Clone, Default)]
pub struct ThrowTracker {
    samples: VecDeque<PoseSample>,
}

impl ThrowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Records the held pose at `time`, dropping samples older than the
    /// window plus its delay.
    pub fn record(&mut self, time: f32, pose: Pose, config: &ThrowingConfig) {
        self.samples.push_back(PoseSample { time, pose });
        let horizon = config.window + config.window_delay;
        // Keep one sample older than the horizon so interpolation has a bracket.
        while self.samples.len() > 2 && time - self.samples[1].time > horizon {
            self.samples.pop_front();
        }
    }

    fn pose_at(&self, time: f32) -> Option<Pose> {
        let first = self.samples.front()?;
        if time <= first.time {
            return Some(first.pose);
        }
        for pair in self.samples.iter().zip(self.samples.iter().skip(1)) {
            let (a, b) = pair;
            if time <= b.time {
                let span = b.time - a.time;
                let t = if span > 0.0 { (time - a.time) / span } else { 1.0 };
                return Some(interpolate_pose(&a.pose, &b.pose, t));
            }
        }
        self.samples.back().map(|s| s.pose)
    }

    /// Estimated release velocity at `now`, or `None` when the motion is too
    /// slow to count as a throw.
    pub fn release_velocity(&self, now: f32, config: &ThrowingConfig) -> Option<ThrowVelocity> {
        if self.samples.len() < 2 || config.window <= 0.0 {
            return None;
        }
        let end_time = now - config.window_delay;
        let start_time = end_time - config.window;
        let start = self.pose_at(start_time)?;
        let end = self.pose_at(end_time)?;

        let linear = (pose_position(&end) - pose_position(&start)) / config.window;
        let speed = linear.norm();
        if speed <= config.min_throw_speed {
            return None;
        }
        let multiplier = remap_clamped(
            speed,
            0.0,
            config.curve_max_speed,
            1.0,
            config.curve_max_multiplier,
        );
        let delta = end.rotation * start.rotation.inverse();
        Some(ThrowVelocity {
            linear: linear * multiplier,
            angular: delta.scaled_axis() / config.window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;

    const DT: f32 = 1.0 / 60.0;

    fn track(speed: f32, steps: usize) -> (ThrowTracker, f32) {
        let config = ThrowingConfig::default();
        let mut tracker = ThrowTracker::new();
        let mut time = 0.0;
        for _ in 0..steps {
            tracker.record(time, Isometry3::translation(speed * time, 0.0, 0.0), &config);
            time += DT;
        }
        (tracker, time - DT)
    }

    #[test]
    fn test_slow_motion_is_not_a_throw() {
        let (tracker, now) = track(0.5, 20);
        assert!(tracker
            .release_velocity(now, &ThrowingConfig::default())
            .is_none());
    }

    #[test]
    fn test_fast_motion_gets_curve_multiplier() {
        let config = ThrowingConfig::default();
        let (tracker, now) = track(2.0, 20);
        let v = tracker.release_velocity(now, &config).unwrap();
        let expected = 2.0 * remap_clamped(2.0, 0.0, 3.0, 1.0, 1.5);
        assert_relative_eq!(v.linear.x, expected, epsilon = 1e-3);
        assert_relative_eq!(v.angular.norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_history_is_bounded() {
        let (tracker, _) = track(1.0, 200);
        assert!(tracker.len() <= 6);
    }

    #[test]
    fn test_single_sample_has_no_velocity() {
        let (tracker, now) = track(5.0, 1);
        assert!(tracker
            .release_velocity(now, &ThrowingConfig::default())
            .is_none());
    }
}
