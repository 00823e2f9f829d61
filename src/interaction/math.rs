use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

/// World-space rigid transform used for palms, bones and held objects.
pub type Pose = Isometry3<f32>;

/// Builds a pose from a position and rotation.
pub fn pose_from_parts(position: Point3<f32>, rotation: UnitQuaternion<f32>) -> Pose {
    Isometry3::from_parts(Translation3::from(position.coords), rotation)
}

/// Position component of a pose.
pub fn pose_position(pose: &Pose) -> Point3<f32> {
    Point3::from(pose.translation.vector)
}

/// Clamps a vector's magnitude, leaving shorter vectors untouched.
pub fn clamp_magnitude(v: Vector3<f32>, max: f32) -> Vector3<f32> {
    let norm = v.norm();
    if norm > max && norm > 0.0 {
        v * (max / norm)
    } else {
        v
    }
}

/// Linear velocity that moves `current` onto `target` within one step.
/// Returns zero inside the deadzone.
pub fn velocity_towards(
    current: &Point3<f32>,
    target: &Point3<f32>,
    dt: f32,
    deadzone: f32,
    max_speed: f32,
) -> Vector3<f32> {
    let delta = target - current;
    if delta.norm() <= deadzone || dt <= 0.0 {
        return Vector3::zeros();
    }
    clamp_magnitude(delta / dt, max_speed)
}

/// Angular velocity that rotates `current` onto `target` within one step.
pub fn angular_velocity_towards(
    current: &UnitQuaternion<f32>,
    target: &UnitQuaternion<f32>,
    dt: f32,
    max_speed: f32,
) -> Vector3<f32> {
    if dt <= 0.0 {
        return Vector3::zeros();
    }
    let delta = target * current.inverse();
    clamp_magnitude(delta.scaled_axis() / dt, max_speed)
}

/// Interpolates two poses; rotation uses normalized lerp so antipodal inputs
/// never fail.
pub fn interpolate_pose(a: &Pose, b: &Pose, t: f32) -> Pose {
    let position = pose_position(a).coords.lerp(&pose_position(b).coords, t);
    let rotation = a.rotation.nlerp(&b.rotation, t);
    pose_from_parts(Point3::from(position), rotation)
}

/// Maps `value` from `[from_min, from_max]` onto `[to_min, to_max]`, clamped.
pub fn remap_clamped(value: f32, from_min: f32, from_max: f32, to_min: f32, to_max: f32) -> f32 {
    if (from_max - from_min).abs() <= f32::EPSILON {
        return to_max;
    }
    let t = ((value - from_min) / (from_max - from_min)).clamp(0.0, 1.0);
    to_min + (to_max - to_min) * t
}

/// Rotation taking local +Z onto `direction`; identity for degenerate input.
pub fn rotation_along(direction: &Vector3<f32>) -> UnitQuaternion<f32> {
    if direction.norm() <= f32::EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::rotation_between(&Vector3::z(), direction)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_velocity_towards_deadzone() {
        let v = velocity_towards(
            &Point3::origin(),
            &Point3::new(0.0001, 0.0, 0.0),
            1.0 / 60.0,
            0.001,
            10.0,
        );
        assert_eq!(v, Vector3::zeros());
    }

    #[test]
    fn test_velocity_towards_clamps() {
        let v = velocity_towards(
            &Point3::origin(),
            &Point3::new(1.0, 0.0, 0.0),
            1.0 / 60.0,
            0.0,
            15.0,
        );
        assert_relative_eq!(v.norm(), 15.0, epsilon = 1e-4);

        let slow = velocity_towards(
            &Point3::origin(),
            &Point3::new(0.01, 0.0, 0.0),
            0.1,
            0.0,
            15.0,
        );
        assert_relative_eq!(slow.x, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_angular_velocity_takes_short_way() {
        let current = UnitQuaternion::identity();
        let target = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.1);
        let w = angular_velocity_towards(&current, &target, 0.1, 100.0);
        assert_relative_eq!(w.y, 1.0, epsilon = 1e-4);
        assert_relative_eq!(w.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_remap_clamped() {
        assert_relative_eq!(remap_clamped(1.5, 0.0, 3.0, 1.0, 1.5), 1.25);
        assert_relative_eq!(remap_clamped(9.0, 0.0, 3.0, 1.0, 1.5), 1.5);
        assert_relative_eq!(remap_clamped(-1.0, 0.0, 3.0, 1.0, 1.5), 1.0);
    }

    #[test]
    fn test_rotation_along_maps_z() {
        let dir = Vector3::new(1.0, 0.0, 0.0);
        let rot = rotation_along(&dir);
        let mapped = rot * Vector3::z();
        assert_relative_eq!(mapped, dir, epsilon = 1e-5);
    }
}
