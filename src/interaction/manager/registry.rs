//! Registered interactables and the body → id lookup.

use rapier3d::prelude::{ColliderHandle, InteractionGroups, RigidBodyHandle};
use std::collections::{BTreeMap, HashMap};

use crate::interaction::interactable::{Interactable, InteractableId, InteractableSettings};
use crate::interaction::physics::PhysicsWorld;

#[derive(Debug, Default)]
pub struct InteractableRegistry {
    objects: BTreeMap<InteractableId, Interactable>,
    by_body: HashMap<RigidBodyHandle, InteractableId>,
    next_id: u64,
}

impl InteractableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        body: RigidBodyHandle,
        settings: InteractableSettings,
        original_groups: Vec<(ColliderHandle, InteractionGroups)>,
    ) -> InteractableId {
        self.next_id += 1;
        let id = InteractableId(self.next_id);
        self.objects
            .insert(id, Interactable::new(id, body, settings, original_groups));
        self.by_body.insert(body, id);
        id
    }

    pub fn remove(&mut self, id: InteractableId) -> Option<Interactable> {
        let interactable = self.objects.remove(&id)?;
        self.by_body.remove(&interactable.body);
        Some(interactable)
    }

    pub fn get(&self, id: InteractableId) -> Option<&Interactable> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: InteractableId) -> Option<&mut Interactable> {
        self.objects.get_mut(&id)
    }

    /// Id registered for `body`.
    pub fn lookup(&self, body: RigidBodyHandle) -> Option<InteractableId> {
        self.by_body.get(&body).copied()
    }

    pub fn ids(&self) -> Vec<InteractableId> {
        self.objects.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interactable> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects whose body no longer exists in `world`.
    pub fn stale(&self, world: &PhysicsWorld) -> Vec<InteractableId> {
        self.objects
            .values()
            .filter(|i| !world.has_body(i.body))
            .map(|i| i.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::{ColliderBuilder, Isometry};

    #[test]
    fn test_insert_lookup_remove() {
        let mut world = PhysicsWorld::new();
        let body = world.add_dynamic_body(Isometry::identity(), ColliderBuilder::ball(0.05).build());
        let mut registry = InteractableRegistry::new();

        let id = registry.insert(body, InteractableSettings::default(), Vec::new());
        assert_eq!(registry.lookup(body), Some(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert_eq!(registry.lookup(body), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_reports_removed_bodies() {
        let mut world = PhysicsWorld::new();
        let body = world.add_dynamic_body(Isometry::identity(), ColliderBuilder::ball(0.05).build());
        let mut registry = InteractableRegistry::new();
        let id = registry.insert(body, InteractableSettings::default(), Vec::new());

        assert!(registry.stale(&world).is_empty());
        world.remove_body(body);
        assert_eq!(registry.stale(&world), vec![id]);
    }
}
