use nalgebra::{Point3, Vector3};
use rapier3d::prelude::{ColliderBuilder, RigidBodyHandle};
use std::collections::BTreeSet;
use tracing::debug;

use super::{ContactProbe, InteractionSource, ProbeContacts, SourceEnv};
use crate::config::{ContactConfig, ControllerConfig, ProxyConfig};
use crate::interaction::constants::proxy as proxy_consts;
use crate::interaction::grasp_helper::CandidateInput;
use crate::interaction::interactable::InteractableId;
use crate::interaction::math::{angular_velocity_towards, pose_position, velocity_towards, Pose};
use crate::interaction::physics::{PhysicsWorld, QueryShape};
use crate::interaction::tracking::{Chirality, RigidControllerSample, TrackingFrame};

/// Controller backed by a tracked XR controller. Carries a single contact
/// sphere and grasps with the grip axis.
pub struct RigidController {
    chirality: Chirality,
    sample: Option<RigidControllerSample>,
    grip_held: bool,
    body: Option<RigidBodyHandle>,
    contact_radius: f32,
    pointer_offset: f32,
    was_tracked: bool,
    contacts: ProbeContacts,
}

impl RigidController {
    pub fn new(chirality: Chirality) -> Self {
        Self {
            chirality,
            sample: None,
            grip_held: false,
            body: None,
            contact_radius: 0.0,
            pointer_offset: 0.0,
            was_tracked: false,
            contacts: ProbeContacts::default(),
        }
    }

    pub fn sample(&self) -> Option<&RigidControllerSample> {
        self.sample.as_ref()
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        self.body
    }

    /// Grip state after hysteresis.
    pub fn is_gripping(&self) -> bool {
        self.grip_held
    }

    fn update_grip(&mut self, config: &ControllerConfig) {
        let grip = self.sample.map(|s| s.grip).unwrap_or(0.0);
        if self.grip_held {
            if grip < config.grip_release {
                self.grip_held = false;
            }
        } else if grip >= config.grip_press {
            self.grip_held = true;
        }
    }

    fn drive_body(&mut self, world: &mut PhysicsWorld, env: &SourceEnv<'_>) {
        let Some(body) = self.body else {
            return;
        };
        let Some(sample) = self.sample else {
            if self.was_tracked {
                debug!(chirality = self.chirality.as_str(), "controller lost, parking proxy");
                world.set_velocity(body, Vector3::zeros(), Vector3::zeros());
                self.contacts = ProbeContacts::default();
            }
            world.set_body_sensor(body, true);
            return;
        };

        let current = world.get_pose(body);
        let drift = current
            .map(|pose| (pose_position(&pose) - sample.position()).norm())
            .unwrap_or(f32::INFINITY);
        if !self.was_tracked || drift > env.proxy.teleport_distance {
            debug!(chirality = self.chirality.as_str(), drift, "teleporting controller proxy");
            world.teleport_body(body, sample.pose);
        } else if let Some(pose) = current {
            let linear = velocity_towards(
                &pose_position(&pose),
                &sample.position(),
                env.dt,
                env.proxy.deadzone,
                env.proxy.max_bone_speed,
            );
            let angular = angular_velocity_towards(
                &pose.rotation,
                &sample.pose.rotation,
                env.dt,
                env.proxy.max_bone_angular_speed,
            );
            world.set_velocity(body, linear, angular);
        }
        world.set_body_sensor(body, false);
    }

    fn position(&self, world: &PhysicsWorld) -> Option<Point3<f32>> {
        self.body
            .and_then(|body| world.get_pose(body))
            .map(|pose| pose_position(&pose))
    }
}

impl InteractionSource for RigidController {
    fn chirality(&self) -> Chirality {
        self.chirality
    }

    fn is_tracked(&self) -> bool {
        self.sample.is_some()
    }

    fn update_tracking(&mut self, world: &mut PhysicsWorld, frame: &TrackingFrame, env: &SourceEnv<'_>) {
        self.sample = frame.controller(self.chirality).copied();
        self.contact_radius = env.contact.controller_contact_radius;
        self.pointer_offset = env.controller.pointer_offset;
        self.update_grip(env.controller);

        if self.body.is_none() {
            if let Some(sample) = &self.sample {
                let collider = ColliderBuilder::ball(self.contact_radius)
                    .mass(proxy_consts::CONTROLLER_MASS)
                    .collision_groups(env.groups)
                    .friction(1.0)
                    .build();
                let (body, _) = world.add_proxy_body(sample.pose, collider);
                debug!(chirality = self.chirality.as_str(), "controller proxy created");
                self.body = Some(body);
                self.was_tracked = true;
                return;
            }
        }

        self.drive_body(world, env);
        self.was_tracked = self.sample.is_some();
    }

    fn hover_center(&self) -> Option<Point3<f32>> {
        self.sample.as_ref().map(|s| s.position())
    }

    fn primary_hover_points(&self) -> Vec<Point3<f32>> {
        self.sample
            .as_ref()
            .map(|s| vec![s.pose * Point3::new(0.0, 0.0, self.pointer_offset)])
            .unwrap_or_default()
    }

    fn contact_probes(&self, world: &PhysicsWorld, config: &ContactConfig) -> Vec<ContactProbe> {
        if self.sample.is_none() {
            return Vec::new();
        }
        let Some(center) = self.position(world) else {
            return Vec::new();
        };
        let sphere = QueryShape::Sphere {
            center,
            radius: config.controller_contact_radius,
        };
        vec![ContactProbe {
            segment: 0,
            body: self.body,
            center,
            hover: sphere.inflated(config.bone_hover_margin),
            contact: sphere.inflated(config.bone_contact_margin),
            normal: None,
        }]
    }

    fn record_probe(&mut self, _segment: usize, contacts: ProbeContacts) {
        self.contacts = contacts;
    }

    fn contacting(&self) -> BTreeSet<InteractableId> {
        self.contacts.contacting.clone()
    }

    fn grasp_anchor(&self) -> Option<Pose> {
        self.sample.map(|s| s.pose)
    }

    fn candidate_input(&self, _world: &PhysicsWorld, object: InteractableId) -> Option<CandidateInput<'_>> {
        if self.sample.is_none() {
            return None;
        }
        Some(CandidateInput::Rigid {
            grip: self.grip_held,
            contacting: self.contacts.grasp_candidates.contains(&object),
        })
    }

    fn soft_contact_active(&self) -> bool {
        false
    }

    fn note_soft_contacts(&mut self, _count: usize, _config: &ProxyConfig) {}

    fn forget(&mut self, object: InteractableId) {
        self.contacts.hovering.remove(&object);
        self.contacts.contacting.remove(&object);
        self.contacts.grasp_candidates.remove(&object);
    }

    fn destroy_proxy(&mut self, world: &mut PhysicsWorld) {
        if let Some(body) = self.body.take() {
            world.remove_body(body);
        }
    }
}
