use nalgebra::{Point3, Vector3};
use rapier3d::prelude::RigidBodyHandle;
use std::collections::HashSet;
use tracing::{debug, trace};

use super::dispatch;
use super::registry::InteractableRegistry;
use super::InteractionManager;
use crate::interaction::activity::{QueryBatch, QuerySlot};
use crate::interaction::controller::{ContactProbe, ProbeContacts, SourceEnv};
use crate::interaction::grasp_helper::{Candidate, GraspHelper, HelperUpdate};
use crate::interaction::interactable::{HoverDistance, Interactable, InteractableId, InteractionEvent};
use crate::interaction::layers::InteractionLayers;
use crate::interaction::math::pose_position;
use crate::interaction::physics::PhysicsWorld;
use crate::interaction::soft_contact::SoftContact;
use crate::interaction::tracking::{TrackedHandSample, TrackingFrame};
use crate::interaction::transitions::Transitions;

/// Runs one interaction step, then steps physics with the configured
/// timestep. Returns the events of the step.
pub fn run_fixed_step(
    manager: &mut InteractionManager,
    world: &mut PhysicsWorld,
    frame: &TrackingFrame,
) -> Vec<InteractionEvent> {
    let events = manager.fixed_update(world, frame).to_vec();
    world.step(manager.config.simulation.timestep);
    events
}

/// Executes interaction phases for one step.
/// tracking -> queries -> hover -> contact -> primary hover -> grasp ->
/// follow -> soft contact -> dispatch.
pub(super) fn run_interaction_phases(
    manager: &mut InteractionManager,
    world: &mut PhysicsWorld,
    frame: &TrackingFrame,
    layers: &InteractionLayers,
) {
    let dt = manager.config.simulation.timestep;
    manager.time += dt;

    // Objects whose body vanished end everything once, before anything reads them.
    manager.purge_stale(world);

    // Pull samples and move proxies toward them.
    manager.update_sources(world, frame, layers, dt);

    // Every overlap query of the step runs as one parallel batch.
    world.update_queries();
    manager.schedule_queries(world, layers);
    manager.batch.run(world.query_view());

    manager.update_hover();
    manager.update_contacts(world);
    manager.update_primary_hover(world);
    manager.accumulate_soft_contacts(world);

    let changes = manager.update_helpers(world);
    manager.apply_grasp_changes(world, changes);
    for controller in manager.controllers.values_mut() {
        controller.update_suspension();
    }
    manager.follow_grasped(world, dt);

    let transfer = manager.config.proxy.soft_contact_transfer;
    manager.soft_contacts.solve(world, transfer);

    let before = manager.helpers.len();
    manager.helpers.retain(|_, helper| !helper.is_disposable());
    if manager.helpers.len() != before {
        trace!(disposed = before - manager.helpers.len(), "grasp helpers disposed");
    }

    manager.dispatch();
}

impl InteractionManager {
    fn purge_stale(&mut self, world: &mut PhysicsWorld) {
        for object in self.registry.stale(world) {
            debug!(object = %object, "body destroyed, ending interactions");
            if let Some(events) = self.drop_interactable(world, object, false) {
                self.events.extend(events);
            }
        }
    }

    fn update_sources(
        &mut self,
        world: &mut PhysicsWorld,
        frame: &TrackingFrame,
        layers: &InteractionLayers,
        dt: f32,
    ) {
        let env = SourceEnv {
            groups: layers.bone_groups(),
            proxy: &self.config.proxy,
            contact: &self.config.contact,
            controller: &self.config.controller,
            dt,
        };
        for controller in self.controllers.values_mut() {
            controller.begin_step();
            controller.update_tracking(world, frame, &env);
        }
    }

    fn schedule_queries(&mut self, world: &PhysicsWorld, layers: &InteractionLayers) {
        self.batch.clear();
        let mask = layers.object_mask();
        for controller in self.controllers.values_mut() {
            controller.schedule_queries(world, &mut self.batch, &self.config, mask);
        }
    }

    /// Hover sets from the activity spheres. The grasp helper's candidate
    /// list follows hover, and its add/remove results gate begin and end.
    fn update_hover(&mut self) {
        let registry = &self.registry;
        for (&id, controller) in self.controllers.iter_mut() {
            let chirality = controller.chirality();
            let current: HashSet<InteractableId> = controller
                .resolve_hover(
                    &self.batch,
                    |body| registry.lookup(body),
                    |object| {
                        registry
                            .get(object)
                            .map(|i| !i.settings.should_ignore_hover(chirality))
                            .unwrap_or(false)
                    },
                )
                .into_iter()
                .collect();

            let raw = controller.hover_transitions(&current);
            let mut gated = Transitions {
                stayed: raw.stayed,
                ..Default::default()
            };
            for object in raw.began {
                let Some(interactable) = registry.get(object) else {
                    continue;
                };
                let helper = self
                    .helpers
                    .entry(object)
                    .or_insert_with(|| GraspHelper::new(object, interactable.body));
                if helper.add_hand(id) {
                    gated.began.push(object);
                }
            }
            for object in raw.ended {
                if self
                    .helpers
                    .get_mut(&object)
                    .map(|helper| helper.remove_hand(id))
                    .unwrap_or(false)
                {
                    gated.ended.push(object);
                }
            }
            controller.set_hover(current, gated);
        }
    }

    /// Resolves every probe into hover, contact and grasp-candidate sets.
    fn update_contacts(&mut self, world: &PhysicsWorld) {
        let registry = &self.registry;
        let batch = &self.batch;
        let facing_dot = self.config.contact.grasp_facing_dot;
        for controller in self.controllers.values_mut() {
            let probes = std::mem::take(&mut controller.probes);
            for slots in &probes {
                let hovered = controller.hovered();
                let near = probe_hits(batch, slots.hover, registry, hovered);
                let touching = probe_hits(batch, slots.contact, registry, hovered);

                let mut contacts = ProbeContacts {
                    hovering: near.into_iter().collect(),
                    ..Default::default()
                };
                for object in touching {
                    let Some(interactable) = registry.get(object) else {
                        continue;
                    };
                    if !interactable.settings.ignore_contact {
                        contacts.contacting.insert(object);
                    }
                    if faces_object(world, interactable.body, &slots.probe, facing_dot) {
                        contacts.grasp_candidates.insert(object);
                    }
                }
                controller.source_mut().record_probe(slots.probe.segment, contacts);
            }
            controller.probes = probes;

            let contacting = controller.source().contacting().into_iter().collect();
            controller.set_contacting(contacting);
        }
    }

    fn update_primary_hover(&mut self, world: &PhysicsWorld) {
        let registry = &self.registry;
        for controller in self.controllers.values_mut() {
            let points = controller.source().primary_hover_points();
            let candidates: Vec<(InteractableId, f32)> = if points.is_empty() {
                Vec::new()
            } else {
                controller
                    .hovered()
                    .iter()
                    .filter_map(|&object| {
                        let interactable = registry.get(object)?;
                        if interactable.settings.ignore_primary_hover {
                            return None;
                        }
                        hover_distance(world, interactable, &points).map(|d| (object, d))
                    })
                    .collect()
            };
            controller.set_primary(&candidates, &self.config);
        }
    }

    /// Bones of soft-contact hands push their velocity into touched bodies.
    fn accumulate_soft_contacts(&mut self, world: &PhysicsWorld) {
        for controller in self.controllers.values_mut() {
            if !controller.source().soft_contact_active() {
                continue;
            }
            let mut count = 0;
            for slots in &controller.probes {
                let Some(bone) = slots.probe.body else {
                    continue;
                };
                let Some(velocity) = world.velocity_at_point(bone, &slots.probe.center) else {
                    continue;
                };
                for &body in self.batch.hits(slots.contact) {
                    let Some(interactable) = self.registry.lookup(body).and_then(|id| self.registry.get(id)) else {
                        continue;
                    };
                    let held = self
                        .helpers
                        .get(&interactable.id)
                        .map(|h| h.is_grasped())
                        .unwrap_or(false);
                    if interactable.settings.ignore_contact || held || !world.is_dynamic(body) {
                        continue;
                    }
                    self.soft_contacts.push(SoftContact {
                        body,
                        point: slots.probe.center,
                        velocity,
                    });
                    count += 1;
                }
            }
            controller
                .source_mut()
                .note_soft_contacts(count, &self.config.proxy);
        }
    }

    /// Runs every grasp helper against its tracked candidates.
    fn update_helpers(&mut self, world: &PhysicsWorld) -> Vec<(InteractableId, HelperUpdate)> {
        let now = self.time;
        let mut changes = Vec::new();
        for (&object, helper) in self.helpers.iter_mut() {
            let Some(interactable) = self.registry.get(object) else {
                continue;
            };
            let body = interactable.body;
            let candidates: Vec<Candidate<'_>> = helper
                .candidates()
                .iter()
                .filter_map(|&id| {
                    let controller = self.controllers.get(&id)?;
                    let input = controller.source().candidate_input(world, object)?;
                    Some(Candidate {
                        controller: id,
                        busy: controller
                            .grasped_object()
                            .map_or(false, |held| held != object),
                        input,
                    })
                })
                .collect();

            let inside = |sample: &TrackedHandSample| {
                sample
                    .bone_points()
                    .any(|point| world.body_contains_point(body, &point))
            };
            let update = helper.update_helper(
                now,
                &candidates,
                interactable.settings.ignore_grasping,
                &self.config.grasp,
                &inside,
            );
            if !update.began.is_empty() || !update.released.is_empty() || update.dominant_changed {
                changes.push((object, update));
            }
        }
        changes
    }

    /// Mirrors helper decisions onto controllers, layers and offsets.
    fn apply_grasp_changes(&mut self, world: &mut PhysicsWorld, changes: Vec<(InteractableId, HelperUpdate)>) {
        for (object, update) in changes {
            for id in &update.released {
                if let Some(controller) = self.controllers.get_mut(id) {
                    controller.grasp_ended(object);
                }
            }

            let mut began = 0;
            for id in &update.began {
                let Some(controller) = self.controllers.get_mut(id) else {
                    continue;
                };
                if controller.grasped_object().is_some() {
                    // One object per controller; the earlier grasp wins.
                    if let Some(helper) = self.helpers.get_mut(&object) {
                        helper.release(*id);
                    }
                    continue;
                }
                controller.grasp_began(object);
                began += 1;
            }

            let Some(helper) = self.helpers.get(&object) else {
                continue;
            };
            if !helper.is_grasped() {
                if !update.released.is_empty() {
                    self.finish_release(world, object);
                }
                continue;
            }
            if began > 0 {
                self.enter_grasped_layer(world, object);
            }
            if began > 0 || update.dominant_changed {
                self.capture_offset(world, object);
            }
        }
    }

    /// Stores the object pose relative to the dominant controller's anchor.
    fn capture_offset(&mut self, world: &PhysicsWorld, object: InteractableId) {
        let Some(helper) = self.helpers.get_mut(&object) else {
            return;
        };
        let anchor = helper
            .dominant()
            .and_then(|id| self.controllers.get(&id))
            .and_then(|controller| controller.source().grasp_anchor());
        if let (Some(anchor), Some(pose)) = (anchor, world.get_pose(helper.body)) {
            helper.set_offset(&anchor, &pose);
        }
    }

    /// Drives held objects after their dominant controller.
    fn follow_grasped(&mut self, world: &mut PhysicsWorld, dt: f32) {
        for (object, helper) in self.helpers.iter_mut() {
            if !helper.is_grasped() {
                continue;
            }
            let Some(interactable) = self.registry.get(*object) else {
                continue;
            };
            let Some(current) = world.get_pose(helper.body) else {
                continue;
            };
            helper.record_held_pose(self.time, current, &self.config.throwing);
            if !interactable.settings.move_when_grasped {
                continue;
            }

            let anchor = helper
                .dominant()
                .and_then(|id| self.controllers.get(&id))
                .filter(|controller| !controller.is_suspended())
                .and_then(|controller| controller.source().grasp_anchor());
            let (linear, angular) = match anchor {
                Some(anchor) => helper.follow_command(&anchor, &current, dt, &self.config.grasp),
                None => (Vector3::zeros(), Vector3::zeros()),
            };
            world.set_velocity(helper.body, linear, angular);
        }
    }

    /// Regroups controller checks per object and delivers them in order.
    fn dispatch(&mut self) {
        self.scratch.clear();
        for controller in self.controllers.values() {
            self.scratch.collect(controller);
        }
        for event in self.scratch.take_events() {
            dispatch::deliver(&mut self.registry, event, &mut self.events);
        }
    }
}

/// Registered, hovered objects hit by the query in `slot`.
fn probe_hits(
    batch: &QueryBatch,
    slot: QuerySlot,
    registry: &InteractableRegistry,
    hovered: &HashSet<InteractableId>,
) -> Vec<InteractableId> {
    let mut hits: Vec<InteractableId> = batch
        .hits(slot)
        .iter()
        .filter_map(|&body| registry.lookup(body))
        .filter(|object| hovered.contains(object))
        .collect();
    hits.sort();
    hits.dedup();
    hits
}

/// Whether the probe's inward normal points at the object. Probes without a
/// normal, and probes already inside the object, always qualify.
fn faces_object(world: &PhysicsWorld, body: RigidBodyHandle, probe: &ContactProbe, min_dot: f32) -> bool {
    let Some(normal) = probe.normal else {
        return true;
    };
    match world.closest_point(body, &probe.center) {
        Some((_, true)) => true,
        Some((point, false)) => {
            let direction = point - probe.center;
            let distance = direction.norm();
            distance <= f32::EPSILON || normal.dot(&(direction / distance)) > min_dot
        }
        None => false,
    }
}

/// Closest distance from any primary point to the object.
fn hover_distance(world: &PhysicsWorld, interactable: &Interactable, points: &[Point3<f32>]) -> Option<f32> {
    points
        .iter()
        .filter_map(|point| match interactable.settings.hover_distance {
            HoverDistance::Surface => world.distance_to_body(interactable.body, point),
            HoverDistance::Center => world
                .get_pose(interactable.body)
                .map(|pose| (pose_position(&pose) - point).norm()),
        })
        .min_by(|a, b| a.total_cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::math::pose_from_parts;
    use crate::interaction::physics::QueryShape;
    use nalgebra::UnitQuaternion;
    use rapier3d::prelude::{ColliderBuilder, Isometry};

    fn probe(center: Point3<f32>, normal: Option<Vector3<f32>>) -> ContactProbe {
        let sphere = QueryShape::Sphere { center, radius: 0.01 };
        ContactProbe {
            segment: 0,
            body: None,
            center,
            hover: sphere,
            contact: sphere,
            normal,
        }
    }

    #[test]
    fn test_faces_object_uses_normal() {
        let mut world = PhysicsWorld::new();
        let body = world.add_dynamic_body(Isometry::identity(), ColliderBuilder::ball(0.05).build());
        let center = Point3::new(0.0, 0.06, 0.0);

        assert!(faces_object(&world, body, &probe(center, Some(-Vector3::y())), -0.2));
        assert!(!faces_object(&world, body, &probe(center, Some(Vector3::y())), -0.2));
        assert!(faces_object(&world, body, &probe(center, None), -0.2));
    }

    #[test]
    fn test_hover_distance_modes() {
        let mut world = PhysicsWorld::new();
        let pose = pose_from_parts(Point3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
        let body = world.add_dynamic_body(pose, ColliderBuilder::ball(0.1).build());
        let mut interactable = Interactable::new(InteractableId(1), body, Default::default(), Vec::new());
        let points = [Point3::origin(), Point3::new(0.5, 0.0, 0.0)];

        let surface = hover_distance(&world, &interactable, &points).unwrap();
        assert!((surface - 0.4).abs() < 1e-4);

        interactable.settings.hover_distance = HoverDistance::Center;
        let center = hover_distance(&world, &interactable, &points).unwrap();
        assert!((center - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_probe_hits_only_hovered() {
        let mut world = PhysicsWorld::new();
        let a = world.add_dynamic_body(Isometry::identity(), ColliderBuilder::ball(0.05).build());
        let b = world.add_dynamic_body(Isometry::translation(0.05, 0.0, 0.0), ColliderBuilder::ball(0.05).build());
        world.update_queries();

        let mut registry = InteractableRegistry::new();
        let id_a = registry.insert(a, Default::default(), Vec::new());
        let _id_b = registry.insert(b, Default::default(), Vec::new());

        let mut batch = QueryBatch::new();
        let slot = batch.push(
            QueryShape::Sphere {
                center: Point3::origin(),
                radius: 0.1,
            },
            rapier3d::prelude::Group::ALL,
        );
        batch.run(world.query_view());

        let hovered: HashSet<InteractableId> = [id_a].into_iter().collect();
        assert_eq!(probe_hits(&batch, slot, &registry, &hovered), vec![id_a]);
    }
}
