//! One rigid segment of a proxy hand and the objects it is near.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use rapier3d::prelude::*;
use std::collections::BTreeSet;

use super::classifier::PALM;
use super::constants::proxy as proxy_consts;
use super::interactable::InteractableId;
use super::math::{angular_velocity_towards, clamp_magnitude, pose_position, velocity_towards, Pose};
use super::physics::{PhysicsWorld, QueryShape};
use super::tracking::{BoneKind, BoneSample, Finger};
use crate::config::ProxyConfig;

/// Weight of the previous error in the smoothed targeting error.
const ERROR_DECAY: f32 = 0.5;

/// Which part of the hand a proxy body stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxySegment {
    Palm,
    Phalanx { finger: Finger, kind: BoneKind },
}

impl ProxySegment {
    /// Index into per-digit arrays; the palm uses `PALM`.
    pub fn digit_slot(&self) -> usize {
        match self {
            ProxySegment::Palm => PALM,
            ProxySegment::Phalanx { finger, .. } => finger.index(),
        }
    }
}

/// Drive target for one bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneDrive {
    /// Target rotation relative to the parent segment.
    pub target_rotation: UnitQuaternion<f32>,
    pub stiffness: f32,
    pub force_limit: f32,
}

/// What the drive observed this step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoneStep {
    /// Distance between the body and its target.
    pub error: f32,
    /// Error beyond the dislocation width.
    pub dislocated: bool,
    /// Rotated past the joint envelope relative to its parent.
    pub over_rotated: bool,
}

#[derive(Debug, Clone)]
pub struct BoneProxy {
    pub segment: ProxySegment,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
    /// Collider radius (phalanx) or half thickness (palm).
    pub radius: f32,
    pub width: f32,
    pub drive: BoneDrive,
    recent_error: f32,
    pub(crate) hovering: BTreeSet<InteractableId>,
    pub(crate) contacting: BTreeSet<InteractableId>,
    pub(crate) grasp_candidates: BTreeSet<InteractableId>,
}

impl BoneProxy {
    fn new(segment: ProxySegment, body: RigidBodyHandle, collider: ColliderHandle, radius: f32, width: f32, config: &ProxyConfig) -> Self {
        Self {
            segment,
            body,
            collider,
            radius,
            width,
            drive: BoneDrive {
                target_rotation: UnitQuaternion::identity(),
                stiffness: config.drive_stiffness,
                force_limit: config.drive_force_limit,
            },
            recent_error: 0.0,
            hovering: BTreeSet::new(),
            contacting: BTreeSet::new(),
            grasp_candidates: BTreeSet::new(),
        }
    }

    /// Spawns a capsule body on the tracked bone.
    pub fn spawn_phalanx(
        world: &mut PhysicsWorld,
        finger: Finger,
        kind: BoneKind,
        sample: &BoneSample,
        groups: InteractionGroups,
        config: &ProxyConfig,
    ) -> Self {
        let radius = sample.width * 0.5;
        let half_height = (sample.length() * 0.5 - radius).max(0.001);
        let collider = ColliderBuilder::capsule_z(half_height, radius)
            .mass(proxy_consts::BONE_MASS)
            .collision_groups(groups)
            .friction(1.0)
            .build();
        let (body, collider) = world.add_proxy_body(sample.pose(), collider);
        Self::new(ProxySegment::Phalanx { finger, kind }, body, collider, radius, sample.width, config)
    }

    /// Spawns the palm box at `pose`.
    pub fn spawn_palm(
        world: &mut PhysicsWorld,
        pose: Pose,
        palm_width: f32,
        groups: InteractionGroups,
        config: &ProxyConfig,
    ) -> Self {
        let half_thickness = config.palm_thickness * 0.5;
        let collider = ColliderBuilder::cuboid(palm_width * 0.5, half_thickness, proxy_consts::PALM_HALF_LENGTH)
            .mass(proxy_consts::PALM_MASS)
            .collision_groups(groups)
            .friction(1.0)
            .build();
        let (body, collider) = world.add_proxy_body(pose, collider);
        Self::new(ProxySegment::Palm, body, collider, half_thickness, palm_width, config)
    }

    pub fn pose(&self, world: &PhysicsWorld) -> Option<Pose> {
        world.get_pose(self.body)
    }

    /// Probe volume around the current body, grown by `margin`.
    pub fn probe_shape(&self, world: &PhysicsWorld, margin: f32) -> Option<QueryShape> {
        let pose = self.pose(world)?;
        let shape = match self.segment {
            ProxySegment::Palm => QueryShape::Box {
                pose,
                half_extents: Vector3::new(self.width * 0.5, self.radius, proxy_consts::PALM_HALF_LENGTH),
            },
            ProxySegment::Phalanx { .. } => {
                let half_height = world
                    .collider_set
                    .get(self.collider)
                    .and_then(|c| c.shape().as_capsule().map(|cap| cap.half_height()))
                    .unwrap_or(0.001);
                let axis = pose.rotation * Vector3::z() * half_height;
                let center = pose_position(&pose);
                QueryShape::Capsule {
                    a: center - axis,
                    b: center + axis,
                    radius: self.radius,
                }
            }
        };
        Some(shape.inflated(margin))
    }

    /// Grasping side of the segment in world space.
    pub fn palmar_normal(&self, world: &PhysicsWorld) -> Option<Vector3<f32>> {
        self.pose(world).map(|pose| pose.rotation * -Vector3::y())
    }

    /// Commands velocities moving the body onto `target`.
    ///
    /// Phalanges hold their rotation relative to the parent body as it is
    /// now, so a blocked knuckle carries the rest of the finger with it. The
    /// palm is driven to its absolute rotation.
    ///
    /// The drive stiffness and force limit fall off with the smoothed
    /// targeting error, so a bone blocked by an object pushes softly.
    pub fn drive_towards(
        &mut self,
        world: &mut PhysicsWorld,
        target: &Pose,
        parent_target: &UnitQuaternion<f32>,
        parent_current: &UnitQuaternion<f32>,
        config: &ProxyConfig,
        dt: f32,
    ) -> BoneStep {
        let Some(current) = world.get_pose(self.body) else {
            return BoneStep::default();
        };
        let current_position = pose_position(&current);
        let target_position = pose_position(target);
        let error = (target_position - current_position).norm();

        self.recent_error = self.recent_error * ERROR_DECAY + error * (1.0 - ERROR_DECAY);
        let scale = (1.0 / (1.0 + self.recent_error / config.drive_falloff)).max(config.min_drive_scale);
        self.drive = BoneDrive {
            target_rotation: parent_target.inverse() * target.rotation,
            stiffness: (config.drive_stiffness * scale).clamp(0.0, 1.0),
            force_limit: config.drive_force_limit * scale,
        };

        let desired = velocity_towards(
            &current_position,
            &target_position,
            dt,
            config.deadzone,
            config.max_bone_speed,
        );
        let rotation_target = match self.segment {
            ProxySegment::Palm => target.rotation,
            ProxySegment::Phalanx { .. } => parent_current * self.drive.target_rotation,
        };
        let desired_angular = angular_velocity_towards(
            &current.rotation,
            &rotation_target,
            dt,
            config.max_bone_angular_speed,
        );

        let velocity = world.get_velocity(self.body).unwrap_or_else(Vector3::zeros);
        let angular = world.get_angular_velocity(self.body).unwrap_or_else(Vector3::zeros);
        let max_change = self.drive.force_limit * dt;
        let linear = velocity + clamp_magnitude(velocity.lerp(&desired, self.drive.stiffness) - velocity, max_change);
        let angular = angular.lerp(&desired_angular, self.drive.stiffness);
        world.set_velocity(self.body, linear, angular);

        let joint_angle = (parent_current.inverse() * current.rotation).angle();
        BoneStep {
            error,
            dislocated: error > config.dislocation_width_factor * self.width,
            over_rotated: matches!(self.segment, ProxySegment::Phalanx { .. })
                && joint_angle > config.max_joint_angle,
        }
    }

    /// Puts the body on `target` with zero velocity.
    pub fn teleport(&mut self, world: &mut PhysicsWorld, target: &Pose) {
        world.teleport_body(self.body, *target);
        self.recent_error = 0.0;
    }

    pub fn center(&self, world: &PhysicsWorld) -> Option<Point3<f32>> {
        self.pose(world).map(|p| pose_position(&p))
    }

    pub fn is_grasp_candidate(&self, object: InteractableId) -> bool {
        self.grasp_candidates.contains(&object)
    }

    /// Objects within the hover margin of this segment.
    pub fn hovering(&self) -> &BTreeSet<InteractableId> {
        &self.hovering
    }

    pub fn contacting(&self) -> &BTreeSet<InteractableId> {
        &self.contacting
    }

    pub(crate) fn clear_contacts(&mut self) {
        self.hovering.clear();
        self.contacting.clear();
        self.grasp_candidates.clear();
    }

    pub(crate) fn forget(&mut self, object: InteractableId) {
        self.hovering.remove(&object);
        self.contacting.remove(&object);
        self.grasp_candidates.remove(&object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::tracking::{Chirality, TrackedHandSample};
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;

    const DT: f32 = 1.0 / 60.0;

    fn spawn_index(world: &mut PhysicsWorld) -> (BoneProxy, TrackedHandSample) {
        let sample = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let bone = sample.finger(Finger::Index).bone(BoneKind::Proximal);
        let proxy = BoneProxy::spawn_phalanx(
            world,
            Finger::Index,
            BoneKind::Proximal,
            bone,
            InteractionGroups::all(),
            &ProxyConfig::default(),
        );
        (proxy, sample)
    }

    #[test]
    fn test_spawn_places_body_on_bone() {
        let mut world = PhysicsWorld::new();
        let (proxy, sample) = spawn_index(&mut world);
        let center = proxy.center(&world).unwrap();
        let expected = sample.finger(Finger::Index).bone(BoneKind::Proximal).center();
        assert_relative_eq!(center, expected, epsilon = 1e-5);
        assert_eq!(proxy.segment.digit_slot(), Finger::Index.index());
    }

    #[test]
    fn test_drive_reaches_nearby_target() {
        let mut world = PhysicsWorld::new();
        world.set_gravity(Vector3::zeros());
        let (mut proxy, _) = spawn_index(&mut world);
        let start = proxy.pose(&world).unwrap();
        let target = Isometry3::translation(0.002, 0.0, 0.0) * start;
        let config = ProxyConfig::default();

        for _ in 0..10 {
            proxy.drive_towards(&mut world, &target, &UnitQuaternion::identity(), &UnitQuaternion::identity(), &config, DT);
            world.step(DT);
        }
        let center = proxy.center(&world).unwrap();
        assert!((center - pose_position(&target)).norm() < 0.001);
    }

    #[test]
    fn test_large_error_softens_drive_and_reports_dislocation() {
        let mut world = PhysicsWorld::new();
        let (mut proxy, _) = spawn_index(&mut world);
        let start = proxy.pose(&world).unwrap();
        let target = Isometry3::translation(0.2, 0.0, 0.0) * start;
        let config = ProxyConfig::default();

        let step = proxy.drive_towards(&mut world, &target, &UnitQuaternion::identity(), &UnitQuaternion::identity(), &config, DT);
        assert!(step.dislocated);
        assert!(proxy.drive.stiffness < config.drive_stiffness);
        assert!(proxy.drive.force_limit < config.drive_force_limit);
        let speed = world.get_velocity(proxy.body).unwrap().norm();
        assert!(speed <= proxy.drive.force_limit * DT + 1e-4);
    }

    #[test]
    fn test_phalanx_rotation_follows_current_parent() {
        let mut world = PhysicsWorld::new();
        world.set_gravity(Vector3::zeros());
        let (mut proxy, _) = spawn_index(&mut world);
        let start = proxy.pose(&world).unwrap();
        let parent_current = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3);

        proxy.drive_towards(&mut world, &start, &UnitQuaternion::identity(), &parent_current, &ProxyConfig::default(), DT);

        assert_relative_eq!(proxy.drive.target_rotation, start.rotation, epsilon = 1e-5);
        let angular = world.get_angular_velocity(proxy.body).unwrap();
        assert_relative_eq!(angular, Vector3::new(0.3 / DT, 0.0, 0.0), epsilon = 1e-2);
    }

    #[test]
    fn test_palm_rotation_ignores_parent() {
        let mut world = PhysicsWorld::new();
        world.set_gravity(Vector3::zeros());
        let sample = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let mut palm = BoneProxy::spawn_palm(&mut world, sample.palm, sample.palm_width, InteractionGroups::all(), &ProxyConfig::default());
        let tilted = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3);

        palm.drive_towards(&mut world, &sample.palm, &tilted, &tilted, &ProxyConfig::default(), DT);

        let angular = world.get_angular_velocity(palm.body).unwrap();
        assert!(angular.norm() < 1e-4);
    }

    #[test]
    fn test_probe_shape_is_inflated_capsule() {
        let mut world = PhysicsWorld::new();
        let (proxy, _) = spawn_index(&mut world);
        match proxy.probe_shape(&world, 0.01).unwrap() {
            QueryShape::Capsule { radius, .. } => assert_relative_eq!(radius, proxy.radius + 0.01),
            other => panic!("unexpected probe {:?}", other),
        }
    }
}
