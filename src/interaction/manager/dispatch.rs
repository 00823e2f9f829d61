//! Per-object callback fan-in.
//!
//! Controllers report transitions from their own point of view; dispatch
//! regroups them so each object receives one event per (kind, phase) holding
//! every controller involved.

use std::collections::BTreeMap;
use tracing::trace;

use super::registry::InteractableRegistry;
use crate::interaction::controller::{ControllerId, InteractionController};
use crate::interaction::interactable::{
    Interactable, InteractableId, InteractionEvent, InteractionKind, InteractionPhase,
};

use InteractionKind::{Contact, Grasp, Hover, PrimaryHover, Suspension};
use InteractionPhase::{Begin, End, Stay};

/// Fixed delivery order within a step.
pub const DISPATCH_ORDER: [(InteractionKind, InteractionPhase); 14] = [
    (Suspension, Begin),
    (Suspension, End),
    (Grasp, End),
    (Contact, End),
    (PrimaryHover, End),
    (Hover, End),
    (Hover, Begin),
    (PrimaryHover, Begin),
    (Contact, Begin),
    (Grasp, Begin),
    (Hover, Stay),
    (PrimaryHover, Stay),
    (Contact, Stay),
    (Grasp, Stay),
];

/// Order of the end events emitted when an object or controller vanishes.
const IMPLICIT_ENDS: [InteractionKind; 4] = [Grasp, Contact, PrimaryHover, Hover];

/// Reusable grouping buffers, one map per `DISPATCH_ORDER` slot.
#[derive(Debug)]
pub struct DispatchScratch {
    slots: Vec<BTreeMap<InteractableId, Vec<ControllerId>>>,
}

impl Default for DispatchScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchScratch {
    pub fn new() -> Self {
        Self {
            slots: DISPATCH_ORDER.iter().map(|_| BTreeMap::new()).collect(),
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(BTreeMap::is_empty)
    }

    fn slot(kind: InteractionKind, phase: InteractionPhase) -> Option<usize> {
        DISPATCH_ORDER
            .iter()
            .position(|&(k, p)| k == kind && p == phase)
    }

    pub fn push(
        &mut self,
        kind: InteractionKind,
        phase: InteractionPhase,
        object: InteractableId,
        controller: ControllerId,
    ) {
        let Some(slot) = Self::slot(kind, phase) else {
            return;
        };
        let controllers = self.slots[slot].entry(object).or_default();
        if !controllers.contains(&controller) {
            controllers.push(controller);
        }
    }

    fn push_all(
        &mut self,
        kind: InteractionKind,
        phase: InteractionPhase,
        objects: impl IntoIterator<Item = InteractableId>,
        controller: ControllerId,
    ) {
        for object in objects {
            self.push(kind, phase, object, controller);
        }
    }

    /// Adds every buffered check of `controller`.
    pub fn collect(&mut self, controller: &InteractionController) {
        let id = controller.id;
        let checks = controller.checks();

        self.push_all(Suspension, Begin, checks.suspension_begin, id);
        self.push_all(Suspension, End, checks.suspension_end, id);

        self.push_all(Grasp, End, checks.grasp_end, id);
        self.push_all(Contact, End, checks.contact.ended.iter().copied(), id);
        self.push_all(PrimaryHover, End, checks.primary_hover.ended.iter().copied(), id);
        self.push_all(Hover, End, checks.hover.ended.iter().copied(), id);

        self.push_all(Hover, Begin, checks.hover.began.iter().copied(), id);
        self.push_all(PrimaryHover, Begin, checks.primary_hover.began.iter().copied(), id);
        self.push_all(Contact, Begin, checks.contact.began.iter().copied(), id);
        self.push_all(Grasp, Begin, checks.grasp_begin, id);

        self.push_all(Hover, Stay, checks.hover.stayed.iter().copied(), id);
        self.push_all(PrimaryHover, Stay, checks.primary_hover.stayed.iter().copied(), id);
        self.push_all(Contact, Stay, checks.contact.stayed.iter().copied(), id);
        self.push_all(Grasp, Stay, checks.grasp_hold, id);
    }

    /// Drains the buffers into events in delivery order.
    pub fn take_events(&mut self) -> Vec<InteractionEvent> {
        let mut events = Vec::new();
        for (slot, &(kind, phase)) in self.slots.iter_mut().zip(DISPATCH_ORDER.iter()) {
            for (object, mut controllers) in std::mem::take(slot) {
                controllers.sort();
                events.push(InteractionEvent {
                    object,
                    kind,
                    phase,
                    controllers,
                });
            }
        }
        events
    }
}

/// Applies `event` to its object and notifies observers.
///
/// Returns false when the object is gone or the event is a hold on a
/// suspended object; such events are dropped.
pub fn deliver(
    registry: &mut InteractableRegistry,
    event: InteractionEvent,
    out: &mut Vec<InteractionEvent>,
) -> bool {
    let Some(interactable) = registry.get_mut(event.object) else {
        return false;
    };
    if event.is(Grasp, Stay) && interactable.is_suspended() {
        return false;
    }
    notify(interactable, &event);
    out.push(event);
    true
}

/// Applies and notifies without going through the registry.
pub fn notify(interactable: &mut Interactable, event: &InteractionEvent) {
    trace!(event = %event, "dispatch");
    interactable.apply(event);
    interactable.observers.notify(event);
}

/// End events for everything `interactable` is still engaged in, limited to
/// `only` when given.
pub fn implicit_ends(interactable: &Interactable, only: Option<ControllerId>) -> Vec<InteractionEvent> {
    IMPLICIT_ENDS
        .iter()
        .filter_map(|&kind| {
            let members = match kind {
                Grasp => &interactable.grasping,
                Contact => &interactable.contacting,
                PrimaryHover => &interactable.primary_hovering,
                _ => &interactable.hovering,
            };
            let controllers: Vec<ControllerId> = members
                .iter()
                .copied()
                .filter(|c| only.map_or(true, |o| o == *c))
                .collect();
            (!controllers.is_empty()).then(|| InteractionEvent {
                object: interactable.id,
                kind,
                phase: End,
                controllers,
            })
        })
        .collect()
}
