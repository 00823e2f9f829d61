//! Interaction controllers: one per tracked hand or XR controller.
//!
//! A controller owns its physical proxy and its per-step interaction sets.
//! The manager drives it through a fixed sequence each step and then reads
//! the buffered `check_*` results, which stay valid until the next step.

mod hand;
mod rigid;

pub use hand::HandController;
pub use rigid::RigidController;

use nalgebra::{Point3, Vector3};
use rapier3d::prelude::{InteractionGroups, RigidBodyHandle};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use super::activity::{ActivityQuery, QueryBatch, QuerySlot};
use super::grasp_helper::CandidateInput;
use super::hand_proxy::HandProxy;
use super::interactable::InteractableId;
use super::math::Pose;
use super::physics::{PhysicsWorld, QueryShape};
use super::primary_hover::PrimaryHover;
use super::tracking::{Chirality, TrackingFrame};
use super::transitions::{compute_transitions, Transitions};
use crate::config::{ContactConfig, ControllerConfig, InteractionConfig, ProxyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ControllerId(pub u64);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

/// Environment shared by every source during tracking updates.
#[derive(Debug, Clone, Copy)]
pub struct SourceEnv<'a> {
    /// Collision groups for proxy bodies.
    pub groups: InteractionGroups,
    pub proxy: &'a ProxyConfig,
    pub contact: &'a ContactConfig,
    pub controller: &'a ControllerConfig,
    pub dt: f32,
}

/// One contact probe (a proxy bone, palm or controller sphere).
#[derive(Debug, Clone, Copy)]
pub struct ContactProbe {
    pub segment: usize,
    pub body: Option<RigidBodyHandle>,
    pub center: Point3<f32>,
    pub hover: QueryShape,
    pub contact: QueryShape,
    /// Inward normal; probes without one grasp anything they touch.
    pub normal: Option<Vector3<f32>>,
}

/// Objects a probe found this step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeContacts {
    pub hovering: BTreeSet<InteractableId>,
    pub contacting: BTreeSet<InteractableId>,
    pub grasp_candidates: BTreeSet<InteractableId>,
}

/// Capabilities the manager needs from a tracked input device.
pub trait InteractionSource {
    fn chirality(&self) -> Chirality;

    fn is_tracked(&self) -> bool;

    /// Pulls this step's sample from `frame` and moves the physical proxy.
    fn update_tracking(&mut self, world: &mut PhysicsWorld, frame: &TrackingFrame, env: &SourceEnv<'_>);

    /// Center of the hover activity sphere; `None` while untracked.
    fn hover_center(&self) -> Option<Point3<f32>>;

    /// Points ranking primary hover candidates.
    fn primary_hover_points(&self) -> Vec<Point3<f32>>;

    fn contact_probes(&self, world: &PhysicsWorld, config: &ContactConfig) -> Vec<ContactProbe>;

    fn record_probe(&mut self, segment: usize, contacts: ProbeContacts);

    /// Union of every probe's contacting set.
    fn contacting(&self) -> BTreeSet<InteractableId>;

    /// Pose the held object follows.
    fn grasp_anchor(&self) -> Option<Pose>;

    /// Grasp classifier input against `object`; `None` while untracked.
    fn candidate_input(&self, world: &PhysicsWorld, object: InteractableId) -> Option<CandidateInput<'_>>;

    fn soft_contact_active(&self) -> bool;

    fn note_soft_contacts(&mut self, count: usize, config: &ProxyConfig);

    /// Drops every reference to `object`.
    fn forget(&mut self, object: InteractableId);

    fn destroy_proxy(&mut self, world: &mut PhysicsWorld);
}

/// The closed set of controller kinds.
pub enum ControllerKind {
    Hand(HandController),
    Rigid(RigidController),
}

impl ControllerKind {
    fn source(&self) -> &dyn InteractionSource {
        match self {
            ControllerKind::Hand(hand) => hand,
            ControllerKind::Rigid(rigid) => rigid,
        }
    }

    fn source_mut(&mut self) -> &mut dyn InteractionSource {
        match self {
            ControllerKind::Hand(hand) => hand,
            ControllerKind::Rigid(rigid) => rigid,
        }
    }
}

impl InteractionSource for ControllerKind {
    fn chirality(&self) -> Chirality {
        self.source().chirality()
    }

    fn is_tracked(&self) -> bool {
        self.source().is_tracked()
    }

    fn update_tracking(&mut self, world: &mut PhysicsWorld, frame: &TrackingFrame, env: &SourceEnv<'_>) {
        self.source_mut().update_tracking(world, frame, env)
    }

    fn hover_center(&self) -> Option<Point3<f32>> {
        self.source().hover_center()
    }

    fn primary_hover_points(&self) -> Vec<Point3<f32>> {
        self.source().primary_hover_points()
    }

    fn contact_probes(&self, world: &PhysicsWorld, config: &ContactConfig) -> Vec<ContactProbe> {
        self.source().contact_probes(world, config)
    }

    fn record_probe(&mut self, segment: usize, contacts: ProbeContacts) {
        self.source_mut().record_probe(segment, contacts)
    }

    fn contacting(&self) -> BTreeSet<InteractableId> {
        self.source().contacting()
    }

    fn grasp_anchor(&self) -> Option<Pose> {
        self.source().grasp_anchor()
    }

    fn candidate_input(&self, world: &PhysicsWorld, object: InteractableId) -> Option<CandidateInput<'_>> {
        self.source().candidate_input(world, object)
    }

    fn soft_contact_active(&self) -> bool {
        self.source().soft_contact_active()
    }

    fn note_soft_contacts(&mut self, count: usize, config: &ProxyConfig) {
        self.source_mut().note_soft_contacts(count, config)
    }

    fn forget(&mut self, object: InteractableId) {
        self.source_mut().forget(object)
    }

    fn destroy_proxy(&mut self, world: &mut PhysicsWorld) {
        self.source_mut().destroy_proxy(world)
    }
}

/// Results of one step, read through the `check_*` accessors.
#[derive(Debug, Clone, Default)]
pub struct ControllerChecks {
    pub hover: Transitions<InteractableId>,
    pub primary_hover: Transitions<InteractableId>,
    pub contact: Transitions<InteractableId>,
    pub grasp_begin: Option<InteractableId>,
    pub grasp_end: Option<InteractableId>,
    pub grasp_hold: Option<InteractableId>,
    pub suspension_begin: Option<InteractableId>,
    pub suspension_end: Option<InteractableId>,
}

impl ControllerChecks {
    fn clear(&mut self) {
        self.hover.clear();
        self.primary_hover.clear();
        self.contact.clear();
        self.grasp_begin = None;
        self.grasp_end = None;
        self.grasp_hold = None;
        self.suspension_begin = None;
        self.suspension_end = None;
    }
}

/// Query slots of one probe for the current step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeSlots {
    pub probe: ContactProbe,
    pub hover: QuerySlot,
    pub contact: QuerySlot,
}

pub struct InteractionController {
    pub id: ControllerId,
    kind: ControllerKind,
    hover_query: ActivityQuery,
    hovered: HashSet<InteractableId>,
    primary: PrimaryHover,
    contacting: HashSet<InteractableId>,
    grasped: Option<InteractableId>,
    suspended: bool,
    checks: ControllerChecks,
    pub(crate) probes: Vec<ProbeSlots>,
}

impl InteractionController {
    pub fn new(id: ControllerId, kind: ControllerKind, config: &InteractionConfig) -> Self {
        Self {
            id,
            kind,
            hover_query: ActivityQuery::new(config.hover.activation_radius, rapier3d::prelude::Group::ALL),
            hovered: HashSet::new(),
            primary: PrimaryHover::new(),
            contacting: HashSet::new(),
            grasped: None,
            suspended: false,
            checks: ControllerChecks::default(),
            probes: Vec::new(),
        }
    }

    pub fn kind(&self) -> &ControllerKind {
        &self.kind
    }

    pub fn source(&self) -> &dyn InteractionSource {
        self.kind.source()
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn InteractionSource {
        self.kind.source_mut()
    }

    pub fn chirality(&self) -> Chirality {
        self.kind.chirality()
    }

    pub fn is_tracked(&self) -> bool {
        self.kind.is_tracked()
    }

    pub fn is_hand(&self) -> bool {
        matches!(self.kind, ControllerKind::Hand(_))
    }

    /// Proxy hand of a hand controller.
    pub fn hand_proxy(&self) -> Option<&HandProxy> {
        match &self.kind {
            ControllerKind::Hand(hand) => hand.proxy(),
            ControllerKind::Rigid(_) => None,
        }
    }

    pub fn grasped_object(&self) -> Option<InteractableId> {
        self.grasped
    }

    pub fn is_grasping(&self) -> bool {
        self.grasped.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn hovered(&self) -> &HashSet<InteractableId> {
        &self.hovered
    }

    pub fn contacting(&self) -> &HashSet<InteractableId> {
        &self.contacting
    }

    pub fn primary_hovered(&self) -> Option<InteractableId> {
        self.primary.current()
    }

    // ── Buffered checks ────────────────────────────────────

    pub fn check_hover_begin(&self) -> &[InteractableId] {
        &self.checks.hover.began
    }

    pub fn check_hover_end(&self) -> &[InteractableId] {
        &self.checks.hover.ended
    }

    pub fn check_hover_stay(&self) -> &[InteractableId] {
        &self.checks.hover.stayed
    }

    pub fn check_primary_hover_begin(&self) -> Option<InteractableId> {
        self.checks.primary_hover.began.first().copied()
    }

    pub fn check_primary_hover_end(&self) -> Option<InteractableId> {
        self.checks.primary_hover.ended.first().copied()
    }

    pub fn check_primary_hover_stay(&self) -> Option<InteractableId> {
        self.checks.primary_hover.stayed.first().copied()
    }

    pub fn check_contact_begin(&self) -> &[InteractableId] {
        &self.checks.contact.began
    }

    pub fn check_contact_end(&self) -> &[InteractableId] {
        &self.checks.contact.ended
    }

    pub fn check_contact_stay(&self) -> &[InteractableId] {
        &self.checks.contact.stayed
    }

    pub fn check_grasp_begin(&self) -> Option<InteractableId> {
        self.checks.grasp_begin
    }

    pub fn check_grasp_end(&self) -> Option<InteractableId> {
        self.checks.grasp_end
    }

    pub fn check_grasp_hold(&self) -> Option<InteractableId> {
        self.checks.grasp_hold
    }

    pub fn check_suspension_begin(&self) -> Option<InteractableId> {
        self.checks.suspension_begin
    }

    pub fn check_suspension_end(&self) -> Option<InteractableId> {
        self.checks.suspension_end
    }

    pub fn checks(&self) -> &ControllerChecks {
        &self.checks
    }

    // ── Step phases (driven by the manager) ────────────────

    pub(crate) fn begin_step(&mut self) {
        self.checks.clear();
        self.probes.clear();
    }

    pub(crate) fn update_tracking(&mut self, world: &mut PhysicsWorld, frame: &TrackingFrame, env: &SourceEnv<'_>) {
        self.kind.update_tracking(world, frame, env);
    }

    /// Schedules hover and probe queries for this step.
    pub(crate) fn schedule_queries(
        &mut self,
        world: &PhysicsWorld,
        batch: &mut QueryBatch,
        config: &InteractionConfig,
        mask: rapier3d::prelude::Group,
    ) {
        self.hover_query.radius = config.hover.activation_radius;
        self.hover_query.mask = mask;
        let center = self.kind.hover_center();
        self.hover_query.schedule(center, batch);
        if center.is_none() {
            return;
        }
        for probe in self.kind.contact_probes(world, &config.contact) {
            let hover = batch.push(probe.hover, mask);
            let contact = batch.push(probe.contact, mask);
            self.probes.push(ProbeSlots { probe, hover, contact });
        }
    }

    /// Hover candidates from the joined batch, with the grasped object kept.
    pub(crate) fn resolve_hover(
        &mut self,
        batch: &QueryBatch,
        lookup: impl Fn(RigidBodyHandle) -> Option<InteractableId>,
        predicate: impl Fn(InteractableId) -> bool,
    ) -> BTreeSet<InteractableId> {
        let mut candidates = self.hover_query.resolve(batch, lookup, predicate).clone();
        if let Some(grasped) = self.grasped {
            candidates.insert(grasped);
        }
        candidates
    }

    /// Applies gated hover transitions and stores the new hover set.
    pub(crate) fn set_hover(&mut self, hovered: HashSet<InteractableId>, gated: Transitions<InteractableId>) {
        self.hovered = hovered;
        self.checks.hover = gated;
    }

    /// Raw hover transitions against the previous step.
    pub(crate) fn hover_transitions(&self, current: &HashSet<InteractableId>) -> Transitions<InteractableId> {
        let mut out = Transitions::default();
        compute_transitions(current, &self.hovered, &mut out);
        out
    }

    pub(crate) fn set_contacting(&mut self, contacting: HashSet<InteractableId>) {
        compute_transitions(&contacting, &self.contacting, &mut self.checks.contact);
        self.contacting = contacting;
    }

    pub(crate) fn set_primary(&mut self, candidates: &[(InteractableId, f32)], config: &InteractionConfig) {
        let previous: HashSet<InteractableId> = self.primary.current().into_iter().collect();
        let current: HashSet<InteractableId> = self
            .primary
            .select(candidates, &config.primary_hover)
            .into_iter()
            .collect();
        compute_transitions(&current, &previous, &mut self.checks.primary_hover);
    }

    pub(crate) fn grasp_began(&mut self, object: InteractableId) {
        self.grasped = Some(object);
        self.suspended = false;
        self.checks.grasp_begin = Some(object);
    }

    pub(crate) fn grasp_ended(&mut self, object: InteractableId) {
        if self.grasped == Some(object) {
            self.grasped = None;
            self.suspended = false;
            self.checks.grasp_end = Some(object);
            self.checks.grasp_hold = None;
        }
    }

    /// Derives suspension and hold checks from the tracking state.
    pub(crate) fn update_suspension(&mut self) {
        let Some(object) = self.grasped else {
            return;
        };
        let tracked = self.kind.is_tracked();
        if !tracked && !self.suspended {
            self.suspended = true;
            self.checks.suspension_begin = Some(object);
        } else if tracked && self.suspended {
            self.suspended = false;
            self.checks.suspension_end = Some(object);
        }
        if self.checks.grasp_begin != Some(object) && !self.suspended {
            self.checks.grasp_hold = Some(object);
        }
    }

    /// Removes `object` from every set without reporting anything.
    pub(crate) fn forget(&mut self, object: InteractableId) {
        self.hovered.remove(&object);
        self.contacting.remove(&object);
        if self.primary.current() == Some(object) {
            self.primary.clear();
        }
        if self.grasped == Some(object) {
            self.grasped = None;
            self.suspended = false;
        }
        self.kind.forget(object);
    }

    /// Whether any set still holds `object`.
    pub(crate) fn references(&self, object: InteractableId) -> bool {
        self.hovered.contains(&object)
            || self.contacting.contains(&object)
            || self.primary.current() == Some(object)
            || self.grasped == Some(object)
    }
}
