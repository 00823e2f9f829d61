//! Physical proxy hand: palm plus fifteen phalanx bodies chased toward the
//! tracked pose every fixed step.

use nalgebra::{UnitQuaternion, Vector3};
use rapier3d::prelude::{InteractionGroups, RigidBodyHandle};
use tracing::debug;

use super::bone::{BoneProxy, ProxySegment};
use super::math::pose_position;
use super::physics::PhysicsWorld;
use super::tracking::{BoneKind, Chirality, Finger, TrackedHandSample};
use crate::config::ProxyConfig;

/// Simulated phalanges per finger (metacarpals are not simulated).
const SIMULATED_KINDS: [BoneKind; 3] = [BoneKind::Proximal, BoneKind::Intermediate, BoneKind::Distal];

/// What happened to the proxy during one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyUpdate {
    pub teleported: bool,
    pub soft_contact: bool,
    pub ghosted: bool,
    pub parked: bool,
}

pub struct HandProxy {
    chirality: Chirality,
    palm: BoneProxy,
    bones: Vec<BoneProxy>,
    bone_width: f32,
    soft_contact: bool,
    soft_contact_countdown: f32,
    ghost_countdown: f32,
    dislocated_frames: u32,
    sensors: bool,
    tracked: bool,
    simulated: TrackedHandSample,
}

impl HandProxy {
    /// Creates bodies on the tracked pose. A fresh hand starts ghosted.
    pub fn spawn(
        world: &mut PhysicsWorld,
        sample: &TrackedHandSample,
        groups: InteractionGroups,
        config: &ProxyConfig,
    ) -> Self {
        let palm = BoneProxy::spawn_palm(world, sample.palm, sample.palm_width, groups, config);
        let bones = Finger::ALL
            .iter()
            .flat_map(|&finger| SIMULATED_KINDS.iter().map(move |&kind| (finger, kind)))
            .map(|(finger, kind)| {
                BoneProxy::spawn_phalanx(world, finger, kind, sample.finger(finger).bone(kind), groups, config)
            })
            .collect();

        debug!(chirality = sample.chirality.as_str(), "hand proxy created");
        let mut proxy = Self {
            chirality: sample.chirality,
            palm,
            bones,
            bone_width: sample.mean_bone_width(),
            soft_contact: false,
            soft_contact_countdown: 0.0,
            ghost_countdown: config.ghost_cooldown,
            dislocated_frames: 0,
            sensors: false,
            tracked: true,
            simulated: sample.clone(),
        };
        proxy.apply_sensors(world);
        proxy
    }

    /// True when bone widths drifted far enough that bodies must be rebuilt.
    pub fn needs_reinit(&self, sample: &TrackedHandSample, config: &ProxyConfig) -> bool {
        if self.bone_width <= 0.0 {
            return true;
        }
        (sample.mean_bone_width() - self.bone_width).abs() / self.bone_width > config.reinit_width_tolerance
    }

    /// Removes every body of the hand.
    pub fn destroy(self, world: &mut PhysicsWorld) {
        world.remove_body(self.palm.body);
        for bone in self.bones {
            world.remove_body(bone.body);
        }
        debug!(chirality = self.chirality.as_str(), "hand proxy destroyed");
    }

    pub fn chirality(&self) -> Chirality {
        self.chirality
    }

    pub fn palm(&self) -> &BoneProxy {
        &self.palm
    }

    pub fn palm_body(&self) -> RigidBodyHandle {
        self.palm.body
    }

    pub fn bones(&self) -> &[BoneProxy] {
        &self.bones
    }

    /// Palm first, then phalanges finger by finger.
    pub fn segments(&self) -> impl Iterator<Item = &BoneProxy> {
        std::iter::once(&self.palm).chain(self.bones.iter())
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut BoneProxy> {
        std::iter::once(&mut self.palm).chain(self.bones.iter_mut())
    }

    pub fn is_ghosted(&self) -> bool {
        self.ghost_countdown > 0.0
    }

    pub fn is_soft_contact(&self) -> bool {
        self.soft_contact
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// The hand as currently simulated, in tracking-sample form.
    pub fn simulated_sample(&self) -> &TrackedHandSample {
        &self.simulated
    }

    /// Soft contacts found this step keep soft contact engaged.
    pub fn note_soft_contacts(&mut self, count: usize, config: &ProxyConfig) {
        if self.soft_contact && count > 0 {
            self.soft_contact_countdown = config.soft_contact_debounce;
        }
    }

    /// Advances the proxy toward `sample`, or parks it when untracked.
    pub fn update(
        &mut self,
        world: &mut PhysicsWorld,
        sample: Option<&TrackedHandSample>,
        config: &ProxyConfig,
        dt: f32,
    ) -> ProxyUpdate {
        let Some(sample) = sample else {
            if self.tracked {
                debug!(chirality = self.chirality.as_str(), "hand lost, parking proxy");
                self.tracked = false;
                for segment in self.segments() {
                    world.set_velocity(segment.body, Vector3::zeros(), Vector3::zeros());
                }
                for segment in self.segments_mut() {
                    segment.clear_contacts();
                }
            }
            self.apply_sensors(world);
            return ProxyUpdate {
                parked: true,
                ghosted: self.is_ghosted(),
                ..Default::default()
            };
        };

        let regained = !self.tracked;
        self.tracked = true;
        self.refresh_simulated(world, sample);

        let drift = self
            .palm
            .center(world)
            .map(|p| (p - sample.palm_position()).norm())
            .unwrap_or(f32::INFINITY);
        if regained || drift > config.teleport_distance || self.dislocated_frames >= config.max_dislocated_frames {
            debug!(
                chirality = self.chirality.as_str(),
                drift,
                regained,
                dislocated_frames = self.dislocated_frames,
                "teleporting hand proxy"
            );
            self.teleport_to(world, sample, config);
            return ProxyUpdate {
                teleported: true,
                ghosted: true,
                ..Default::default()
            };
        }

        let palm_current = self.palm.pose(world).map(|p| p.rotation).unwrap_or_else(UnitQuaternion::identity);
        let palm_step = self.palm.drive_towards(world, &sample.palm, &sample.palm.rotation, &palm_current, config, dt);

        let mut dislocated = palm_step.dislocated;
        let mut over_rotated = false;
        for (i, bone) in self.bones.iter_mut().enumerate() {
            let ProxySegment::Phalanx { finger, kind } = bone.segment else {
                continue;
            };
            let tracked = sample.finger(finger);
            let (parent_target, parent_current) = if i % SIMULATED_KINDS.len() == 0 {
                (sample.palm.rotation, palm_current)
            } else {
                let parent_kind = SIMULATED_KINDS[i % SIMULATED_KINDS.len() - 1];
                (tracked.bone(parent_kind).rotation, self.simulated.finger(finger).bone(parent_kind).rotation)
            };
            let step = bone.drive_towards(world, &tracked.bone(kind).pose(), &parent_target, &parent_current, config, dt);
            dislocated |= step.dislocated;
            over_rotated |= step.over_rotated;
        }

        self.dislocated_frames = if over_rotated { self.dislocated_frames + 1 } else { 0 };

        let palm_speed = sample.palm_velocity.norm();
        if dislocated && palm_speed < config.soft_contact_max_palm_speed {
            if !self.soft_contact {
                debug!(chirality = self.chirality.as_str(), "soft contact engaged");
            }
            self.soft_contact = true;
            self.soft_contact_countdown = config.soft_contact_debounce;
        } else if self.soft_contact {
            self.soft_contact_countdown -= dt;
            if self.soft_contact_countdown <= 0.0 {
                debug!(chirality = self.chirality.as_str(), "soft contact released");
                self.soft_contact = false;
            }
        }

        if self.ghost_countdown > 0.0 {
            self.ghost_countdown = (self.ghost_countdown - dt).max(0.0);
        }
        self.apply_sensors(world);

        ProxyUpdate {
            teleported: false,
            soft_contact: self.soft_contact,
            ghosted: self.is_ghosted(),
            parked: false,
        }
    }

    /// Moves every body onto the tracked pose, zeroes velocities and ghosts
    /// the hand for the cooldown.
    pub fn teleport_to(&mut self, world: &mut PhysicsWorld, sample: &TrackedHandSample, config: &ProxyConfig) {
        self.palm.teleport(world, &sample.palm);
        for bone in &mut self.bones {
            if let ProxySegment::Phalanx { finger, kind } = bone.segment {
                bone.teleport(world, &sample.finger(finger).bone(kind).pose());
            }
        }
        self.dislocated_frames = 0;
        self.soft_contact = false;
        self.soft_contact_countdown = 0.0;
        self.ghost_countdown = config.ghost_cooldown;
        self.simulated = sample.clone();
        self.apply_sensors(world);
    }

    fn apply_sensors(&mut self, world: &mut PhysicsWorld) {
        let wanted = !self.tracked || self.soft_contact || self.is_ghosted();
        if wanted == self.sensors {
            return;
        }
        self.sensors = wanted;
        for segment in self.segments() {
            world.set_body_sensor(segment.body, wanted);
        }
    }

    /// Rebuilds the simulated hand from the current body poses.
    fn refresh_simulated(&mut self, world: &PhysicsWorld, sample: &TrackedHandSample) {
        let mut simulated = sample.clone();
        if let Some(palm) = self.palm.pose(world) {
            let offset = pose_position(&palm) - sample.palm_position();
            simulated.palm = palm;
            simulated.palm_velocity = world.get_velocity(self.palm.body).unwrap_or_else(Vector3::zeros);
            simulated.wrist += offset;
            simulated.elbow += offset;
        }
        for bone in &self.bones {
            let ProxySegment::Phalanx { finger, kind } = bone.segment else {
                continue;
            };
            let Some(pose) = bone.pose(world) else {
                continue;
            };
            let target = &mut simulated.fingers[finger.index()].bones[kind as usize];
            let half = pose.rotation * Vector3::z() * (target.length() * 0.5);
            let center = pose_position(&pose);
            target.prev_joint = center - half;
            target.next_joint = center + half;
            target.rotation = pose.rotation;
        }
        self.simulated = simulated;
    }
}
