use nalgebra::{Point3, Vector3};
use rapier3d::parry::query::PointQuery;
use rapier3d::parry::shape::{Ball, Capsule, Cuboid, Shape};
use rapier3d::prelude::*;

use super::math::Pose;

/// Broad-phase query volume in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryShape {
    Sphere {
        center: Point3<f32>,
        radius: f32,
    },
    Capsule {
        a: Point3<f32>,
        b: Point3<f32>,
        radius: f32,
    },
    Box {
        pose: Pose,
        half_extents: Vector3<f32>,
    },
}

impl QueryShape {
    /// Same volume grown by `margin` in every direction.
    pub fn inflated(&self, margin: f32) -> QueryShape {
        match *self {
            QueryShape::Sphere { center, radius } => QueryShape::Sphere {
                center,
                radius: radius + margin,
            },
            QueryShape::Capsule { a, b, radius } => QueryShape::Capsule {
                a,
                b,
                radius: radius + margin,
            },
            QueryShape::Box { pose, half_extents } => QueryShape::Box {
                pose,
                half_extents: half_extents.add_scalar(margin),
            },
        }
    }

    /// Representative center of the volume.
    pub fn center(&self) -> Point3<f32> {
        match self {
            QueryShape::Sphere { center, .. } => *center,
            QueryShape::Capsule { a, b, .. } => Point3::from((a.coords + b.coords) * 0.5),
            QueryShape::Box { pose, .. } => Point3::from(pose.translation.vector),
        }
    }
}

/// Read-only view of the collision state, shareable across rayon workers.
#[derive(Clone, Copy)]
pub struct QueryView<'a> {
    bodies: &'a RigidBodySet,
    colliders: &'a ColliderSet,
    pipeline: &'a QueryPipeline,
}

impl<'a> QueryView<'a> {
    /// Rigid bodies with at least one collider overlapping `shape` whose
    /// memberships intersect `mask`. Colliders without a parent are skipped.
    pub fn overlapping_bodies(&self, shape: &QueryShape, mask: Group) -> Vec<RigidBodyHandle> {
        let filter = QueryFilter::default().groups(InteractionGroups::new(Group::ALL, mask));
        let mut hits = Vec::new();
        let mut collect = |handle: ColliderHandle| {
            if let Some(parent) = self.colliders.get(handle).and_then(|c| c.parent()) {
                if !hits.contains(&parent) {
                    hits.push(parent);
                }
            }
            true // continue searching
        };

        match *shape {
            QueryShape::Sphere { center, radius } => {
                let ball = Ball::new(radius);
                let pos = Isometry::translation(center.x, center.y, center.z);
                self.intersections(&pos, &ball, filter, &mut collect);
            }
            QueryShape::Capsule { a, b, radius } => {
                let capsule = Capsule::new(a, b, radius);
                self.intersections(&Isometry::identity(), &capsule, filter, &mut collect);
            }
            QueryShape::Box { pose, half_extents } => {
                let cuboid = Cuboid::new(half_extents);
                self.intersections(&pose, &cuboid, filter, &mut collect);
            }
        }
        hits
    }

    fn intersections(
        &self,
        pos: &Isometry<Real>,
        shape: &dyn Shape,
        filter: QueryFilter,
        callback: &mut dyn FnMut(ColliderHandle) -> bool,
    ) {
        self.pipeline.intersections_with_shape(
            self.bodies,
            self.colliders,
            pos,
            shape,
            filter,
            |handle| callback(handle),
        );
    }
}

/// Wrapper around Rapier3D. The interaction system reads and commands bodies
/// through it but never steps it on its own.
pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    /// Creates a new physics world with earth gravity
    pub fn new() -> Self {
        Self {
            gravity: vector![0.0, -9.81, 0.0],
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    /// Sets the gravity vector
    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.gravity = gravity;
    }

    /// Steps the physics simulation forward by dt seconds
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    /// Refreshes the query acceleration structure after bodies moved.
    pub fn update_queries(&mut self) {
        self.query_pipeline.update(&self.collider_set);
    }

    pub fn query_view(&self) -> QueryView<'_> {
        QueryView {
            bodies: &self.rigid_body_set,
            colliders: &self.collider_set,
            pipeline: &self.query_pipeline,
        }
    }

    /// Adds a dynamic body with one collider
    pub fn add_dynamic_body(&mut self, pose: Pose, collider: Collider) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic().position(pose).build();
        let handle = self.rigid_body_set.insert(body);
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    /// Adds a fixed body with one collider (floors, tables)
    pub fn add_fixed_body(&mut self, pose: Pose, collider: Collider) -> RigidBodyHandle {
        let body = RigidBodyBuilder::fixed().position(pose).build();
        let handle = self.rigid_body_set.insert(body);
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    /// Adds a gravity-free dynamic body used as a velocity-driven proxy.
    pub fn add_proxy_body(&mut self, pose: Pose, collider: Collider) -> (RigidBodyHandle, ColliderHandle) {
        let body = RigidBodyBuilder::dynamic()
            .position(pose)
            .gravity_scale(0.0)
            .ccd_enabled(true)
            .angular_damping(1.0)
            .build();
        let handle = self.rigid_body_set.insert(body);
        let collider_handle = self
            .collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        (handle, collider_handle)
    }

    /// Removes a body and its colliders
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some()
    }

    pub fn has_body(&self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set.contains(handle)
    }

    /// Gets the pose of a rigid body
    pub fn get_pose(&self, handle: RigidBodyHandle) -> Option<Pose> {
        self.rigid_body_set.get(handle).map(|body| *body.position())
    }

    /// Gets the linear velocity of a rigid body
    pub fn get_velocity(&self, handle: RigidBodyHandle) -> Option<Vector3<f32>> {
        self.rigid_body_set.get(handle).map(|body| *body.linvel())
    }

    /// Gets the angular velocity of a rigid body
    pub fn get_angular_velocity(&self, handle: RigidBodyHandle) -> Option<Vector3<f32>> {
        self.rigid_body_set.get(handle).map(|body| *body.angvel())
    }

    /// Sets linear and angular velocity of a dynamic body
    pub fn set_velocity(
        &mut self,
        handle: RigidBodyHandle,
        linear: Vector3<f32>,
        angular: Vector3<f32>,
    ) -> bool {
        match self.rigid_body_set.get_mut(handle) {
            Some(body) if body.is_dynamic() => {
                body.set_linvel(linear, true);
                body.set_angvel(angular, true);
                true
            }
            _ => false,
        }
    }

    /// Moves a body instantly and clears its velocity
    pub fn teleport_body(&mut self, handle: RigidBodyHandle, pose: Pose) -> bool {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.set_position(pose, true);
            body.set_linvel(Vector3::zeros(), true);
            body.set_angvel(Vector3::zeros(), true);
            true
        } else {
            false
        }
    }

    /// Toggles sensor mode on every collider of a body (sensor -> non-solid)
    pub fn set_body_sensor(&mut self, handle: RigidBodyHandle, sensor: bool) {
        for collider_handle in self.body_colliders(handle) {
            if let Some(collider) = self.collider_set.get_mut(collider_handle) {
                collider.set_sensor(sensor);
            }
        }
    }

    /// True when every collider of the body is a sensor
    pub fn is_body_sensor(&self, handle: RigidBodyHandle) -> bool {
        let colliders = self.body_colliders(handle);
        !colliders.is_empty()
            && colliders
                .iter()
                .filter_map(|&ch| self.collider_set.get(ch))
                .all(|c| c.is_sensor())
    }

    /// Collision groups of each collider of a body
    pub fn body_groups(&self, handle: RigidBodyHandle) -> Vec<(ColliderHandle, InteractionGroups)> {
        self.body_colliders(handle)
            .into_iter()
            .filter_map(|ch| self.collider_set.get(ch).map(|c| (ch, c.collision_groups())))
            .collect()
    }

    /// Sets collision groups on one collider
    pub fn set_collider_groups(&mut self, handle: ColliderHandle, groups: InteractionGroups) {
        if let Some(collider) = self.collider_set.get_mut(handle) {
            collider.set_collision_groups(groups);
        }
    }

    pub fn body_colliders(&self, handle: RigidBodyHandle) -> Vec<ColliderHandle> {
        self.rigid_body_set
            .get(handle)
            .map(|body| body.colliders().to_vec())
            .unwrap_or_default()
    }

    /// Closest point on the body's colliders to `point`, and whether `point`
    /// lies inside one of them.
    pub fn closest_point(&self, handle: RigidBodyHandle, point: &Point3<f32>) -> Option<(Point3<f32>, bool)> {
        let mut best: Option<(Point3<f32>, bool, f32)> = None;
        for ch in self.body_colliders(handle) {
            let Some(collider) = self.collider_set.get(ch) else {
                continue;
            };
            let projection = collider
                .shape()
                .project_point(collider.position(), point, true);
            let dist = if projection.is_inside {
                0.0
            } else {
                (projection.point - point).norm()
            };
            if best.map(|(_, _, d)| dist < d).unwrap_or(true) {
                best = Some((projection.point, projection.is_inside, dist));
            }
        }
        best.map(|(p, inside, _)| (p, inside))
    }

    /// Distance from `point` to the body's surface (zero inside)
    pub fn distance_to_body(&self, handle: RigidBodyHandle, point: &Point3<f32>) -> Option<f32> {
        self.closest_point(handle, point)
            .map(|(p, inside)| if inside { 0.0 } else { (p - point).norm() })
    }

    /// Whether `point` lies inside any collider of the body
    pub fn body_contains_point(&self, handle: RigidBodyHandle, point: &Point3<f32>) -> bool {
        self.body_colliders(handle).iter().any(|&ch| {
            self.collider_set
                .get(ch)
                .map(|c| c.shape().contains_point(c.position(), point))
                .unwrap_or(false)
        })
    }

    /// Velocity of the body at a world point
    pub fn velocity_at_point(&self, handle: RigidBodyHandle, point: &Point3<f32>) -> Option<Vector3<f32>> {
        self.rigid_body_set
            .get(handle)
            .map(|body| body.velocity_at_point(point))
    }

    /// Applies an impulse at a world point on a dynamic body
    pub fn apply_impulse_at_point(&mut self, handle: RigidBodyHandle, impulse: Vector3<f32>, point: Point3<f32>) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            if body.is_dynamic() {
                body.apply_impulse_at_point(impulse, point, true);
            }
        }
    }

    pub fn is_dynamic(&self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .get(handle)
            .map(|b| b.is_dynamic())
            .unwrap_or(false)
    }

    pub fn mass(&self, handle: RigidBodyHandle) -> Option<f32> {
        self.rigid_body_set.get(handle).map(|b| b.mass())
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}
