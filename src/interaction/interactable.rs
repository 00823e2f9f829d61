//! Interactable objects: settings the engine reads, events it emits, and the
//! observers that receive them.

use rapier3d::prelude::{ColliderHandle, InteractionGroups, RigidBodyHandle};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::controller::ControllerId;
use super::tracking::Chirality;

/// Stable id handed out on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InteractableId(pub u64);

impl fmt::Display for InteractableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Which hands an object refuses hover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoreHover {
    #[default]
    None,
    Left,
    Right,
    Both,
}

/// How hover distance to an object is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoverDistance {
    /// Distance to the closest point on the object's colliders.
    #[default]
    Surface,
    /// Distance to the body's origin.
    Center,
}

/// Per-object switches read by the engine every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractableSettings {
    pub ignore_hover: IgnoreHover,
    pub ignore_primary_hover: bool,
    pub ignore_contact: bool,
    pub ignore_grasping: bool,
    /// When false, a grasp is reported but the object is not moved.
    pub move_when_grasped: bool,
    pub hover_distance: HoverDistance,
}

impl Default for InteractableSettings {
    fn default() -> Self {
        Self {
            ignore_hover: IgnoreHover::None,
            ignore_primary_hover: false,
            ignore_contact: false,
            ignore_grasping: false,
            move_when_grasped: true,
            hover_distance: HoverDistance::Surface,
        }
    }
}

impl InteractableSettings {
    pub fn should_ignore_hover(&self, chirality: Chirality) -> bool {
        match self.ignore_hover {
            IgnoreHover::None => false,
            IgnoreHover::Both => true,
            IgnoreHover::Left => chirality == Chirality::Left,
            IgnoreHover::Right => chirality == Chirality::Right,
        }
    }
}

// ── Events ─────────────────────────────────────────────────

/// Interaction family of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Hover,
    PrimaryHover,
    Contact,
    Grasp,
    Suspension,
}

/// Lifecycle phase of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionPhase {
    Begin,
    Stay,
    End,
}

/// One callback delivered to an object, carrying every controller that
/// contributed to it this step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionEvent {
    pub object: InteractableId,
    pub kind: InteractionKind,
    pub phase: InteractionPhase,
    pub controllers: Vec<ControllerId>,
}

impl InteractionEvent {
    pub fn is(&self, kind: InteractionKind, phase: InteractionPhase) -> bool {
        self.kind == kind && self.phase == phase
    }
}

impl fmt::Display for InteractionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{:?} {} by {:?}", self.phase, self.kind, self.object, self.controllers)
    }
}

/// Callback invoked for every event delivered to an object.
pub type InteractionObserver = Box<dyn FnMut(&InteractionEvent) + Send>;

/// Handle returned by `ObserverList::add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of observers; notified in insertion order.
#[derive(Default)]
pub struct ObserverList {
    next_id: u64,
    observers: Vec<(ObserverId, InteractionObserver)>,
}

impl ObserverList {
    pub fn add(&mut self, observer: InteractionObserver) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn notify(&mut self, event: &InteractionEvent) {
        for (_, observer) in &mut self.observers {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}

// ── Registered object ──────────────────────────────────────

/// A registered object and the controllers currently interacting with it.
#[derive(Debug)]
pub struct Interactable {
    pub id: InteractableId,
    pub body: RigidBodyHandle,
    pub settings: InteractableSettings,
    pub observers: ObserverList,
    /// Collision groups before registration, restored on unregister.
    pub(crate) original_groups: Vec<(ColliderHandle, InteractionGroups)>,
    pub(crate) hovering: BTreeSet<ControllerId>,
    pub(crate) primary_hovering: BTreeSet<ControllerId>,
    pub(crate) contacting: BTreeSet<ControllerId>,
    pub(crate) grasping: BTreeSet<ControllerId>,
    pub(crate) suspended: BTreeSet<ControllerId>,
}

impl Interactable {
    pub(crate) fn new(
        id: InteractableId,
        body: RigidBodyHandle,
        settings: InteractableSettings,
        original_groups: Vec<(ColliderHandle, InteractionGroups)>,
    ) -> Self {
        Self {
            id,
            body,
            settings,
            observers: ObserverList::default(),
            original_groups,
            hovering: BTreeSet::new(),
            primary_hovering: BTreeSet::new(),
            contacting: BTreeSet::new(),
            grasping: BTreeSet::new(),
            suspended: BTreeSet::new(),
        }
    }

    pub fn is_hovered(&self) -> bool {
        !self.hovering.is_empty()
    }

    pub fn is_primary_hovered(&self) -> bool {
        !self.primary_hovering.is_empty()
    }

    pub fn is_contacted(&self) -> bool {
        !self.contacting.is_empty()
    }

    pub fn is_grasped(&self) -> bool {
        !self.grasping.is_empty()
    }

    /// Grasped, with every holding controller untracked.
    pub fn is_suspended(&self) -> bool {
        self.is_grasped() && self.grasping.iter().all(|c| self.suspended.contains(c))
    }

    pub fn grasping_controllers(&self) -> impl Iterator<Item = ControllerId> + '_ {
        self.grasping.iter().copied()
    }

    pub fn hovering_controllers(&self) -> impl Iterator<Item = ControllerId> + '_ {
        self.hovering.iter().copied()
    }

    /// Applies an event's membership change to the bookkeeping sets.
    pub(crate) fn apply(&mut self, event: &InteractionEvent) {
        let set = match event.kind {
            InteractionKind::Hover => &mut self.hovering,
            InteractionKind::PrimaryHover => &mut self.primary_hovering,
            InteractionKind::Contact => &mut self.contacting,
            InteractionKind::Grasp => &mut self.grasping,
            InteractionKind::Suspension => &mut self.suspended,
        };
        match event.phase {
            InteractionPhase::Begin => set.extend(event.controllers.iter().copied()),
            InteractionPhase::End => {
                for c in &event.controllers {
                    set.remove(c);
                }
            }
            InteractionPhase::Stay => {}
        }
        if event.kind == InteractionKind::Grasp && event.phase == InteractionPhase::End {
            for c in &event.controllers {
                self.suspended.remove(c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn event(kind: InteractionKind, phase: InteractionPhase, ids: &[u64]) -> InteractionEvent {
        InteractionEvent {
            object: InteractableId(1),
            kind,
            phase,
            controllers: ids.iter().map(|&i| ControllerId(i)).collect(),
        }
    }

    #[test]
    fn test_ignore_hover_by_chirality() {
        let settings = InteractableSettings {
            ignore_hover: IgnoreHover::Left,
            ..Default::default()
        };
        assert!(settings.should_ignore_hover(Chirality::Left));
        assert!(!settings.should_ignore_hover(Chirality::Right));
    }

    #[test]
    fn test_observers_notified_in_order_and_removable() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::default();
        let first = {
            let log = Arc::clone(&log);
            list.add(Box::new(move |_| log.lock().unwrap().push("first")))
        };
        {
            let log = Arc::clone(&log);
            list.add(Box::new(move |_| log.lock().unwrap().push("second")));
        }
        list.notify(&event(InteractionKind::Hover, InteractionPhase::Begin, &[1]));
        assert!(list.remove(first));
        assert!(!list.remove(first));
        list.notify(&event(InteractionKind::Hover, InteractionPhase::End, &[1]));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "second"]);
    }

    #[test]
    fn test_suspension_requires_all_holders() {
        let mut object = Interactable::new(
            InteractableId(1),
            RigidBodyHandle::invalid(),
            InteractableSettings::default(),
            Vec::new(),
        );
        object.apply(&event(InteractionKind::Grasp, InteractionPhase::Begin, &[1, 2]));
        object.apply(&event(InteractionKind::Suspension, InteractionPhase::Begin, &[1]));
        assert!(object.is_grasped());
        assert!(!object.is_suspended());
        object.apply(&event(InteractionKind::Suspension, InteractionPhase::Begin, &[2]));
        assert!(object.is_suspended());
        object.apply(&event(InteractionKind::Grasp, InteractionPhase::End, &[1, 2]));
        assert!(!object.is_grasped());
        assert!(!object.is_suspended());
        assert!(object.suspended.is_empty());
    }
}
