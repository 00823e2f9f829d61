//! Interaction manager: owns controllers, registered objects and grasp
//! helpers, and turns each fixed step into per-object events.

mod dispatch;
mod registry;
mod tick_pipeline;

pub use dispatch::{DispatchScratch, DISPATCH_ORDER};
pub use registry::InteractableRegistry;
pub use tick_pipeline::run_fixed_step;

use nalgebra::Point3;
use rapier3d::prelude::RigidBodyHandle;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

use super::activity::QueryBatch;
use super::controller::{
    ControllerId, ControllerKind, HandController, InteractionController, RigidController,
};
use super::grasp_helper::GraspHelper;
use super::interactable::{
    Interactable, InteractableId, InteractableSettings, InteractionEvent, InteractionKind,
    InteractionObserver, InteractionPhase, ObserverId,
};
use super::layers::InteractionLayers;
use super::math::pose_position;
use super::physics::PhysicsWorld;
use super::soft_contact::SoftContactBuffer;
use super::tracking::{Chirality, TrackingFrame};
use crate::config::InteractionConfig;

pub struct InteractionManager {
    config: InteractionConfig,
    layers: Option<InteractionLayers>,
    registry: InteractableRegistry,
    controllers: BTreeMap<ControllerId, InteractionController>,
    helpers: BTreeMap<InteractableId, GraspHelper>,
    soft_contacts: SoftContactBuffer,
    scratch: DispatchScratch,
    batch: QueryBatch,
    /// Events of the last step.
    events: Vec<InteractionEvent>,
    /// Events raised between steps, reported with the next step.
    pending: Vec<InteractionEvent>,
    time: f32,
    next_controller: u64,
}

impl InteractionManager {
    /// Creates a manager. If the collision layers cannot be allocated the
    /// manager is disabled and every step is a no-op.
    pub fn new(config: InteractionConfig) -> Self {
        let layers = match InteractionLayers::allocate(config.layers.reserved_groups) {
            Ok(layers) => Some(layers),
            Err(e) => {
                error!(error = %e, "interaction manager disabled");
                None
            }
        };
        Self {
            config,
            layers,
            registry: InteractableRegistry::new(),
            controllers: BTreeMap::new(),
            helpers: BTreeMap::new(),
            soft_contacts: SoftContactBuffer::new(),
            scratch: DispatchScratch::new(),
            batch: QueryBatch::new(),
            events: Vec::new(),
            pending: Vec::new(),
            time: 0.0,
            next_controller: 0,
        }
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn is_disabled(&self) -> bool {
        self.layers.is_none()
    }

    pub fn layers(&self) -> Option<&InteractionLayers> {
        self.layers.as_ref()
    }

    /// Seconds of simulated interaction time.
    pub fn time(&self) -> f32 {
        self.time
    }

    // ── Objects ────────────────────────────────────────────

    /// Registers `body` and moves its colliders into the interaction layer.
    /// Registering the same body twice returns the existing id.
    pub fn register_interactable(
        &mut self,
        world: &mut PhysicsWorld,
        body: RigidBodyHandle,
        settings: InteractableSettings,
    ) -> InteractableId {
        if let Some(id) = self.registry.lookup(body) {
            warn!(object = %id, "body already registered");
            return id;
        }
        let original = world.body_groups(body);
        if let Some(layers) = &self.layers {
            for (collider, groups) in &original {
                world.set_collider_groups(*collider, layers.interaction_groups(*groups));
            }
        }
        let id = self.registry.insert(body, settings, original);
        debug!(object = %id, "interactable registered");
        id
    }

    /// Ends every interaction with `object`, restores its collision groups
    /// and forgets it. False if it was not registered.
    pub fn unregister_interactable(&mut self, world: &mut PhysicsWorld, object: InteractableId) -> bool {
        match self.drop_interactable(world, object, true) {
            Some(events) => {
                self.pending.extend(events);
                true
            }
            None => false,
        }
    }

    pub fn interactable(&self, object: InteractableId) -> Option<&Interactable> {
        self.registry.get(object)
    }

    pub fn interactable_mut(&mut self, object: InteractableId) -> Option<&mut Interactable> {
        self.registry.get_mut(object)
    }

    pub fn interactables(&self) -> impl Iterator<Item = &Interactable> {
        self.registry.iter()
    }

    pub fn lookup(&self, body: RigidBodyHandle) -> Option<InteractableId> {
        self.registry.lookup(body)
    }

    pub fn add_observer(&mut self, object: InteractableId, observer: InteractionObserver) -> Option<ObserverId> {
        self.registry
            .get_mut(object)
            .map(|interactable| interactable.observers.add(observer))
    }

    pub fn remove_observer(&mut self, object: InteractableId, observer: ObserverId) -> bool {
        self.registry
            .get_mut(object)
            .map(|interactable| interactable.observers.remove(observer))
            .unwrap_or(false)
    }

    // ── Controllers ────────────────────────────────────────

    pub fn add_hand_controller(&mut self, chirality: Chirality) -> ControllerId {
        self.add_controller(ControllerKind::Hand(HandController::new(chirality)))
    }

    pub fn add_rigid_controller(&mut self, chirality: Chirality) -> ControllerId {
        self.add_controller(ControllerKind::Rigid(RigidController::new(chirality)))
    }

    fn add_controller(&mut self, kind: ControllerKind) -> ControllerId {
        self.next_controller += 1;
        let id = ControllerId(self.next_controller);
        let controller = InteractionController::new(id, kind, &self.config);
        debug!(controller = %id, chirality = controller.chirality().as_str(), "controller added");
        self.controllers.insert(id, controller);
        id
    }

    /// Removes a controller, ending everything it was doing and destroying
    /// its proxy bodies. False if unknown.
    pub fn remove_controller(&mut self, world: &mut PhysicsWorld, id: ControllerId) -> bool {
        let Some(mut controller) = self.controllers.remove(&id) else {
            return false;
        };

        for object in self.registry.ids() {
            let last_holder = match self.helpers.get_mut(&object) {
                Some(helper) => {
                    let was_grasping = helper.is_grasping(id);
                    helper.remove_hand(id);
                    was_grasping && !helper.is_grasped()
                }
                None => false,
            };
            if last_holder {
                self.finish_release(world, object);
            }
            if let Some(interactable) = self.registry.get_mut(object) {
                for event in dispatch::implicit_ends(interactable, Some(id)) {
                    dispatch::notify(interactable, &event);
                    self.pending.push(event);
                }
            }
        }

        controller.source_mut().destroy_proxy(world);
        debug!(controller = %id, "controller removed");
        true
    }

    pub fn controller(&self, id: ControllerId) -> Option<&InteractionController> {
        self.controllers.get(&id)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &InteractionController> {
        self.controllers.values()
    }

    // ── Grasp control ──────────────────────────────────────

    /// Releases whatever `controller` holds. False if it holds nothing.
    pub fn release_grasp(&mut self, world: &mut PhysicsWorld, controller: ControllerId) -> bool {
        let Some(object) = self.controllers.get(&controller).and_then(|c| c.grasped_object()) else {
            warn!(controller = %controller, "release requested while not grasping");
            return false;
        };
        self.end_grasp(world, object, &[controller]);
        true
    }

    /// Releases `object` from every holder. False if it is unknown or not held.
    pub fn release_object(&mut self, world: &mut PhysicsWorld, object: InteractableId) -> bool {
        if self.registry.get(object).is_none() {
            warn!(object = %object, "release requested for unregistered object");
            return false;
        }
        let holders: Vec<ControllerId> = self
            .helpers
            .get(&object)
            .map(|helper| helper.grasping().to_vec())
            .unwrap_or_default();
        if holders.is_empty() {
            return false;
        }
        self.end_grasp(world, object, &holders);
        true
    }

    /// Where `controller` holds its object, in world space. Origin when it
    /// holds nothing.
    pub fn grasp_point(&self, world: &PhysicsWorld, controller: ControllerId) -> Point3<f32> {
        let point = self.controllers.get(&controller).and_then(|c| {
            let helper = self.helpers.get(&c.grasped_object()?)?;
            match c.source().grasp_anchor() {
                Some(anchor) => Some(pose_position(&helper.target_pose(&anchor))),
                None => world.get_pose(helper.body).map(|pose| pose_position(&pose)),
            }
        });
        point.unwrap_or_else(|| {
            warn!(controller = %controller, "grasp point requested while not grasping");
            Point3::origin()
        })
    }

    // ── Introspection ──────────────────────────────────────

    pub fn helper(&self, object: InteractableId) -> Option<&GraspHelper> {
        self.helpers.get(&object)
    }

    pub fn helper_count(&self) -> usize {
        self.helpers.len()
    }

    /// Events delivered by the last step.
    pub fn events(&self) -> &[InteractionEvent] {
        &self.events
    }

    // ── Step ───────────────────────────────────────────────

    /// Runs one interaction step against `world` without stepping physics.
    /// Returns the events delivered, in dispatch order.
    pub fn fixed_update(&mut self, world: &mut PhysicsWorld, frame: &TrackingFrame) -> &[InteractionEvent] {
        self.events.clear();
        let Some(layers) = self.layers else {
            self.pending.clear();
            return &self.events;
        };
        self.events.append(&mut self.pending);
        tick_pipeline::run_interaction_phases(self, world, frame, &layers);
        &self.events
    }

    // ── Internals shared with the pipeline ─────────────────

    /// Removes `object` and emits its implicit ends. Groups are restored only
    /// when asked and the body still exists.
    fn drop_interactable(
        &mut self,
        world: &mut PhysicsWorld,
        object: InteractableId,
        restore_groups: bool,
    ) -> Option<Vec<InteractionEvent>> {
        let mut interactable = self.registry.remove(object)?;
        let events = dispatch::implicit_ends(&interactable, None);
        for event in &events {
            dispatch::notify(&mut interactable, event);
        }
        for controller in self.controllers.values_mut() {
            controller.forget(object);
        }
        self.helpers.remove(&object);
        if restore_groups && world.has_body(interactable.body) {
            for (collider, groups) in &interactable.original_groups {
                world.set_collider_groups(*collider, *groups);
            }
        }
        debug!(object = %object, ended = events.len(), "interactable removed");
        Some(events)
    }

    /// Ends `controllers`' grasp of `object` outside the step.
    fn end_grasp(&mut self, world: &mut PhysicsWorld, object: InteractableId, controllers: &[ControllerId]) {
        let mut released = Vec::new();
        if let Some(helper) = self.helpers.get_mut(&object) {
            for id in controllers {
                if helper.release(*id) {
                    released.push(*id);
                }
            }
        }
        for id in controllers {
            if let Some(controller) = self.controllers.get_mut(id) {
                if controller.grasped_object() == Some(object) {
                    controller.grasp_ended(object);
                    if !released.contains(id) {
                        released.push(*id);
                    }
                }
            }
        }
        if released.is_empty() {
            return;
        }
        if !self.helpers.get(&object).map(|h| h.is_grasped()).unwrap_or(false) {
            self.finish_release(world, object);
        }

        released.sort();
        let event = InteractionEvent {
            object,
            kind: InteractionKind::Grasp,
            phase: InteractionPhase::End,
            controllers: released,
        };
        if let Some(interactable) = self.registry.get_mut(object) {
            dispatch::notify(interactable, &event);
        }
        self.pending.push(event);
    }

    /// Moves `object` into the grasped layer.
    fn enter_grasped_layer(&self, world: &mut PhysicsWorld, object: InteractableId) {
        let (Some(layers), Some(interactable)) = (&self.layers, self.registry.get(object)) else {
            return;
        };
        for (collider, groups) in &interactable.original_groups {
            world.set_collider_groups(*collider, layers.grasped_groups(*groups));
        }
    }

    /// Last holder let go: back to the interaction layer, then throw.
    fn finish_release(&self, world: &mut PhysicsWorld, object: InteractableId) {
        let (Some(layers), Some(interactable)) = (&self.layers, self.registry.get(object)) else {
            return;
        };
        for (collider, groups) in &interactable.original_groups {
            world.set_collider_groups(*collider, layers.interaction_groups(*groups));
        }
        let Some(helper) = self.helpers.get(&object) else {
            return;
        };
        if let Some(throw) = helper.throw_velocity(self.time, &self.config.throwing) {
            debug!(object = %object, speed = throw.linear.norm(), "thrown");
            world.set_velocity(interactable.body, throw.linear, throw.angular);
        }
    }
}
