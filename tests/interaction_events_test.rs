//! End-to-end event tests for the interaction manager driven by rigid XR
//! controllers against a real PhysicsWorld.
//!
//! The world is never stepped here: bodies stay where they are placed, so
//! every event comes from tracking and overlap queries alone.
//!
//! Run with: cargo test --test interaction_events_test

use nalgebra::{Point3, UnitQuaternion, Vector3};
use rapier3d::prelude::*;
use std::sync::{Arc, Mutex};

use handgrasp::config::InteractionConfig;
use handgrasp::interaction::math::pose_from_parts;
use handgrasp::interaction::{
    Chirality, ControllerId, InteractableId, InteractableSettings, InteractionEvent,
    InteractionKind::{self, Contact, Grasp, Hover, PrimaryHover, Suspension},
    InteractionManager,
    InteractionPhase::{self, Begin, End, Stay},
    PhysicsWorld, RigidControllerSample, TrackingFrame,
};

// ---------------------------------------------------------------------------
// Scene helpers
// ---------------------------------------------------------------------------

/// Controller offset from a ball center: the contact query overlaps the ball
/// but the contact sphere itself does not.
const TOUCH_OFFSET: f32 = 0.084;

fn world() -> PhysicsWorld {
    let mut world = PhysicsWorld::new();
    world.set_gravity(Vector3::zeros());
    world
}

fn ball(world: &mut PhysicsWorld, center: Point3<f32>) -> RigidBodyHandle {
    world.add_dynamic_body(
        Isometry::translation(center.x, center.y, center.z),
        ColliderBuilder::ball(0.05).build(),
    )
}

fn sample(chirality: Chirality, position: Point3<f32>, grip: f32) -> RigidControllerSample {
    RigidControllerSample::new(
        chirality,
        pose_from_parts(position, UnitQuaternion::identity()),
        grip,
    )
}

fn frame(samples: Vec<RigidControllerSample>) -> TrackingFrame {
    TrackingFrame {
        hands: Vec::new(),
        controllers: samples,
    }
}

fn touching(x: f32, grip: f32) -> TrackingFrame {
    frame(vec![sample(Chirality::Right, Point3::new(x + TOUCH_OFFSET, 0.0, 0.0), grip)])
}

fn step(manager: &mut InteractionManager, world: &mut PhysicsWorld, frame: &TrackingFrame) -> Vec<InteractionEvent> {
    manager.fixed_update(world, frame).to_vec()
}

fn kinds(events: &[InteractionEvent]) -> Vec<(InteractionKind, InteractionPhase)> {
    events.iter().map(|e| (e.kind, e.phase)).collect()
}

struct Scene {
    world: PhysicsWorld,
    manager: InteractionManager,
    body: RigidBodyHandle,
    object: InteractableId,
    controller: ControllerId,
}

fn scene() -> Scene {
    let mut world = world();
    let body = ball(&mut world, Point3::origin());
    let mut manager = InteractionManager::new(InteractionConfig::default());
    let object = manager.register_interactable(&mut world, body, InteractableSettings::default());
    let controller = manager.add_rigid_controller(Chirality::Right);
    Scene {
        world,
        manager,
        body,
        object,
        controller,
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_grasp_begin_hold_end() {
    let mut s = scene();

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    assert_eq!(
        kinds(&events),
        vec![(Hover, Begin), (PrimaryHover, Begin), (Contact, Begin)]
    );
    assert!(events.iter().all(|e| e.object == s.object && e.controllers == vec![s.controller]));

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));
    assert_eq!(
        kinds(&events),
        vec![(Grasp, Begin), (Hover, Stay), (PrimaryHover, Stay), (Contact, Stay)]
    );
    assert!(s.manager.interactable(s.object).unwrap().is_grasped());
    assert_eq!(
        s.manager.controller(s.controller).unwrap().grasped_object(),
        Some(s.object)
    );

    let layers = *s.manager.layers().unwrap();
    let groups = s.world.body_groups(s.body)[0].1;
    assert_eq!(groups.memberships, layers.no_contact);

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));
    assert_eq!(
        kinds(&events),
        vec![(Hover, Stay), (PrimaryHover, Stay), (Contact, Stay), (Grasp, Stay)]
    );

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    assert_eq!(events[0].kind, Grasp);
    assert_eq!(events[0].phase, End);
    assert!(!s.manager.interactable(s.object).unwrap().is_grasped());
    assert!(!s.manager.controller(s.controller).unwrap().is_grasping());

    let groups = s.world.body_groups(s.body)[0].1;
    assert_eq!(groups.memberships, layers.interaction);
}

#[test]
fn test_grip_without_contact_does_not_grasp() {
    let mut s = scene();
    let far = frame(vec![sample(Chirality::Right, Point3::new(0.15, 0.0, 0.0), 1.0)]);

    step(&mut s.manager, &mut s.world, &far);
    let events = step(&mut s.manager, &mut s.world, &far);

    assert!(events.iter().any(|e| e.is(Hover, Stay)));
    assert!(!events.iter().any(|e| e.kind == Contact || e.kind == Grasp));
    assert!(!s.manager.controller(s.controller).unwrap().is_grasping());
}

#[test]
fn test_suspension_when_tracking_lost_while_grasping() {
    let mut s = scene();
    step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));

    let events = step(&mut s.manager, &mut s.world, &TrackingFrame::default());
    assert_eq!(
        kinds(&events),
        vec![(Suspension, Begin), (Contact, End), (PrimaryHover, End), (Hover, Stay)]
    );
    let interactable = s.manager.interactable(s.object).unwrap();
    assert!(interactable.is_grasped());
    assert!(interactable.is_suspended());
    assert!(s.manager.controller(s.controller).unwrap().is_suspended());

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));
    assert_eq!(
        kinds(&events),
        vec![
            (Suspension, End),
            (PrimaryHover, Begin),
            (Contact, Begin),
            (Hover, Stay),
            (Grasp, Stay)
        ]
    );
    assert!(!s.manager.interactable(s.object).unwrap().is_suspended());
}

// ---------------------------------------------------------------------------
// Ordering and fan-in
// ---------------------------------------------------------------------------

#[test]
fn test_all_ends_before_begins() {
    let mut world = world();
    let a = ball(&mut world, Point3::origin());
    let b = ball(&mut world, Point3::new(1.0, 0.0, 0.0));
    let mut manager = InteractionManager::new(InteractionConfig::default());
    let id_a = manager.register_interactable(&mut world, a, InteractableSettings::default());
    let id_b = manager.register_interactable(&mut world, b, InteractableSettings::default());
    manager.add_rigid_controller(Chirality::Right);

    step(&mut manager, &mut world, &touching(0.0, 0.0));
    let events = step(&mut manager, &mut world, &touching(1.0, 0.0));

    let last_end = events.iter().rposition(|e| e.phase == End).unwrap();
    let first_begin = events.iter().position(|e| e.phase == Begin).unwrap();
    assert!(last_end < first_begin, "events: {:?}", kinds(&events));

    assert!(events.iter().any(|e| e.is(Hover, End) && e.object == id_a));
    assert!(events.iter().any(|e| e.is(Contact, End) && e.object == id_a));
    assert!(events.iter().any(|e| e.is(Hover, Begin) && e.object == id_b));
    assert!(events.iter().any(|e| e.is(Contact, Begin) && e.object == id_b));
    assert!(manager.helper(id_a).is_none());
}

#[test]
fn test_fan_in_single_hover_begin_for_two_controllers() {
    let mut world = world();
    let body = ball(&mut world, Point3::origin());
    let mut manager = InteractionManager::new(InteractionConfig::default());
    let object = manager.register_interactable(&mut world, body, InteractableSettings::default());
    let left = manager.add_rigid_controller(Chirality::Left);
    let right = manager.add_rigid_controller(Chirality::Right);

    let both = frame(vec![
        sample(Chirality::Left, Point3::new(-TOUCH_OFFSET, 0.0, 0.0), 0.0),
        sample(Chirality::Right, Point3::new(TOUCH_OFFSET, 0.0, 0.0), 0.0),
    ]);
    let events = step(&mut manager, &mut world, &both);

    let hover_begins: Vec<&InteractionEvent> = events.iter().filter(|e| e.is(Hover, Begin)).collect();
    assert_eq!(hover_begins.len(), 1);
    assert_eq!(hover_begins[0].object, object);
    assert_eq!(hover_begins[0].controllers, vec![left, right]);
    assert_eq!(manager.helper(object).unwrap().candidates().len(), 2);
}

// ---------------------------------------------------------------------------
// Registration and teardown
// ---------------------------------------------------------------------------

#[test]
fn test_unregister_is_idempotent_and_ends_everything() {
    let mut s = scene();
    let seen: Arc<Mutex<Vec<InteractionEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    s.manager
        .add_observer(s.object, Box::new(move |e| sink.lock().unwrap().push(e.clone())))
        .unwrap();

    step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    seen.lock().unwrap().clear();

    assert!(s.manager.unregister_interactable(&mut s.world, s.object));
    assert!(!s.manager.unregister_interactable(&mut s.world, s.object));

    let ended = kinds(&seen.lock().unwrap());
    assert_eq!(ended, vec![(Contact, End), (PrimaryHover, End), (Hover, End)]);

    let controller = s.manager.controller(s.controller).unwrap();
    assert!(controller.hovered().is_empty());
    assert!(controller.contacting().is_empty());
    assert_eq!(controller.primary_hovered(), None);
    assert_eq!(s.manager.helper_count(), 0);
    assert_eq!(s.world.body_groups(s.body)[0].1, InteractionGroups::all());

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    assert_eq!(kinds(&events), vec![(Contact, End), (PrimaryHover, End), (Hover, End)]);
}

#[test]
fn test_object_destroyed_while_grasped() {
    let mut s = scene();
    step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));
    assert!(s.manager.controller(s.controller).unwrap().is_grasping());

    s.world.remove_body(s.body);
    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));

    assert_eq!(
        kinds(&events),
        vec![(Grasp, End), (Contact, End), (PrimaryHover, End), (Hover, End)]
    );
    assert!(!s.manager.controller(s.controller).unwrap().is_grasping());
    assert!(s.manager.helper(s.object).is_none());
    assert!(s.manager.interactable(s.object).is_none());

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));
    assert!(events.is_empty());
}

#[test]
fn test_remove_controller_ends_its_interactions() {
    let mut s = scene();
    step(&mut s.manager, &mut s.world, &touching(0.0, 0.0));
    step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));

    assert!(s.manager.remove_controller(&mut s.world, s.controller));
    assert!(!s.manager.remove_controller(&mut s.world, s.controller));

    let interactable = s.manager.interactable(s.object).unwrap();
    assert!(!interactable.is_grasped());
    assert!(!interactable.is_hovered());

    let events = step(&mut s.manager, &mut s.world, &touching(0.0, 1.0));
    assert_eq!(
        kinds(&events),
        vec![(Grasp, End), (Contact, End), (PrimaryHover, End), (Hover, End)]
    );
}

#[test]
fn test_layer_exhaustion_disables_manager() {
    let mut world = world();
    let body = ball(&mut world, Point3::origin());
    let mut config = InteractionConfig::default();
    config.layers.reserved_groups = u32::MAX;

    let mut manager = InteractionManager::new(config);
    assert!(manager.is_disabled());
    manager.register_interactable(&mut world, body, InteractableSettings::default());
    manager.add_rigid_controller(Chirality::Right);

    assert!(step(&mut manager, &mut world, &touching(0.0, 1.0)).is_empty());
    assert_eq!(world.body_groups(body)[0].1, InteractionGroups::all());
}

// ---------------------------------------------------------------------------
// Manual release
// ---------------------------------------------------------------------------

#[test]
fn test_release_apis() {
    let mut world = world();
    let body = ball(&mut world, Point3::new(0.0, 0.3, 0.0));
    let mut manager = InteractionManager::new(InteractionConfig::default());
    let object = manager.register_interactable(&mut world, body, InteractableSettings::default());
    let controller = manager.add_rigid_controller(Chirality::Right);
    let at = |grip| frame(vec![sample(Chirality::Right, Point3::new(TOUCH_OFFSET, 0.3, 0.0), grip)]);

    assert_eq!(manager.grasp_point(&world, controller), Point3::origin());
    assert!(!manager.release_grasp(&mut world, controller));

    step(&mut manager, &mut world, &at(0.0));
    step(&mut manager, &mut world, &at(1.0));
    let point = manager.grasp_point(&world, controller);
    assert!((point - Point3::new(0.0, 0.3, 0.0)).norm() < 1e-4);

    assert!(manager.release_grasp(&mut world, controller));
    assert!(!manager.interactable(object).unwrap().is_grasped());
    assert!(!manager.release_object(&mut world, object));
    assert!(!manager.release_object(&mut world, InteractableId(999)));

    let events = step(&mut manager, &mut world, &at(1.0));
    assert!(events[0].is(Grasp, End));
    assert!(events.iter().any(|e| e.is(Grasp, Begin)));

    assert!(manager.release_object(&mut world, object));
    assert!(!manager.controller(controller).unwrap().is_grasping());
}

#[test]
fn test_ignore_flags() {
    let mut world = world();
    let body = ball(&mut world, Point3::origin());
    let mut manager = InteractionManager::new(InteractionConfig::default());
    let settings = InteractableSettings {
        ignore_contact: true,
        ignore_primary_hover: true,
        ignore_grasping: true,
        ..Default::default()
    };
    manager.register_interactable(&mut world, body, settings);
    let controller = manager.add_rigid_controller(Chirality::Right);

    let events = step(&mut manager, &mut world, &touching(0.0, 0.0));
    assert_eq!(kinds(&events), vec![(Hover, Begin)]);

    let events = step(&mut manager, &mut world, &touching(0.0, 1.0));
    assert_eq!(kinds(&events), vec![(Hover, Stay)]);
    assert!(!manager.controller(controller).unwrap().is_grasping());
}
