use nalgebra::Point3;
use std::collections::BTreeSet;
use tracing::debug;

use super::{ContactProbe, InteractionSource, ProbeContacts, SourceEnv};
use crate::config::{ContactConfig, ProxyConfig};
use crate::interaction::grasp_helper::{CandidateInput, GraspBone};
use crate::interaction::hand_proxy::HandProxy;
use crate::interaction::interactable::InteractableId;
use crate::interaction::math::Pose;
use crate::interaction::physics::PhysicsWorld;
use crate::interaction::tracking::{Chirality, Finger, TrackedHandSample, TrackingFrame};

/// Controller backed by a tracked hand and its physical proxy.
pub struct HandController {
    chirality: Chirality,
    sample: Option<TrackedHandSample>,
    proxy: Option<HandProxy>,
}

impl HandController {
    pub fn new(chirality: Chirality) -> Self {
        Self {
            chirality,
            sample: None,
            proxy: None,
        }
    }

    /// Latest tracked sample, if tracked this step.
    pub fn sample(&self) -> Option<&TrackedHandSample> {
        self.sample.as_ref()
    }

    pub fn proxy(&self) -> Option<&HandProxy> {
        self.proxy.as_ref()
    }
}

impl InteractionSource for HandController {
    fn chirality(&self) -> Chirality {
        self.chirality
    }

    fn is_tracked(&self) -> bool {
        self.sample.is_some()
    }

    fn update_tracking(&mut self, world: &mut PhysicsWorld, frame: &TrackingFrame, env: &SourceEnv<'_>) {
        self.sample = frame.hand(self.chirality).cloned();

        if let Some(sample) = &self.sample {
            let stale = self
                .proxy
                .as_ref()
                .map(|proxy| proxy.needs_reinit(sample, env.proxy))
                .unwrap_or(false);
            if stale {
                debug!(chirality = self.chirality.as_str(), "hand dimensions changed, rebuilding proxy");
                if let Some(proxy) = self.proxy.take() {
                    proxy.destroy(world);
                }
            }
            if self.proxy.is_none() {
                self.proxy = Some(HandProxy::spawn(world, sample, env.groups, env.proxy));
            }
        }

        if let Some(proxy) = &mut self.proxy {
            proxy.update(world, self.sample.as_ref(), env.proxy, env.dt);
        }
    }

    fn hover_center(&self) -> Option<Point3<f32>> {
        self.sample.as_ref().map(|s| s.palm_position())
    }

    fn primary_hover_points(&self) -> Vec<Point3<f32>> {
        self.sample
            .as_ref()
            .map(|s| vec![s.finger(Finger::Index).tip(), s.pinch_position()])
            .unwrap_or_default()
    }

    fn contact_probes(&self, world: &PhysicsWorld, config: &ContactConfig) -> Vec<ContactProbe> {
        let Some(proxy) = self.proxy.as_ref().filter(|p| p.is_tracked()) else {
            return Vec::new();
        };
        proxy
            .segments()
            .enumerate()
            .filter_map(|(segment, bone)| {
                Some(ContactProbe {
                    segment,
                    body: Some(bone.body),
                    center: bone.center(world)?,
                    hover: bone.probe_shape(world, config.bone_hover_margin)?,
                    contact: bone.probe_shape(world, config.bone_contact_margin)?,
                    normal: bone.palmar_normal(world),
                })
            })
            .collect()
    }

    fn record_probe(&mut self, segment: usize, contacts: ProbeContacts) {
        let Some(bone) = self.proxy.as_mut().and_then(|p| p.segments_mut().nth(segment)) else {
            return;
        };
        bone.hovering = contacts.hovering;
        bone.contacting = contacts.contacting;
        bone.grasp_candidates = contacts.grasp_candidates;
    }

    fn contacting(&self) -> BTreeSet<InteractableId> {
        self.proxy
            .iter()
            .flat_map(|p| p.segments())
            .flat_map(|bone| bone.contacting().iter().copied())
            .collect()
    }

    fn grasp_anchor(&self) -> Option<Pose> {
        self.sample.as_ref().map(|s| s.palm)
    }

    fn candidate_input(&self, world: &PhysicsWorld, object: InteractableId) -> Option<CandidateInput<'_>> {
        let sample = self.sample.as_ref()?;
        let proxy = self.proxy.as_ref()?;
        let bones = proxy
            .segments()
            .enumerate()
            .filter(|(_, bone)| bone.is_grasp_candidate(object))
            .filter_map(|(segment, bone)| {
                Some(GraspBone {
                    digit: bone.segment.digit_slot(),
                    segment,
                    normal: bone.palmar_normal(world)?,
                })
            })
            .collect();
        Some(CandidateInput::Hand { sample, bones })
    }

    fn soft_contact_active(&self) -> bool {
        self.proxy.as_ref().map(|p| p.is_soft_contact()).unwrap_or(false)
    }

    fn note_soft_contacts(&mut self, count: usize, config: &ProxyConfig) {
        if let Some(proxy) = &mut self.proxy {
            proxy.note_soft_contacts(count, config);
        }
    }

    fn forget(&mut self, object: InteractableId) {
        if let Some(proxy) = &mut self.proxy {
            for bone in proxy.segments_mut() {
                bone.forget(object);
            }
        }
    }

    fn destroy_proxy(&mut self, world: &mut PhysicsWorld) {
        if let Some(proxy) = self.proxy.take() {
            proxy.destroy(world);
        }
    }
}
