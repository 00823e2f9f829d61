//! Proximity queries: which registered objects are near a point.
//!
//! All overlap queries of a step are collected into one `QueryBatch` and run
//! as a rayon scatter/gather before the step continues.

use nalgebra::Point3;
use rapier3d::prelude::{Group, RigidBodyHandle};
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::trace;

use super::interactable::InteractableId;
use super::physics::{QueryShape, QueryView};

/// One scheduled overlap query.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest {
    pub shape: QueryShape,
    pub mask: Group,
}

/// Slot of a scheduled query inside a `QueryBatch`.
pub type QuerySlot = usize;

/// Overlap queries for one step, joined before results are read.
#[derive(Debug, Default)]
pub struct QueryBatch {
    requests: Vec<QueryRequest>,
    results: Vec<Vec<RigidBodyHandle>>,
}

impl QueryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, shape: QueryShape, mask: Group) -> QuerySlot {
        self.requests.push(QueryRequest { shape, mask });
        self.requests.len() - 1
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Runs every scheduled query in parallel and stores the results.
    pub fn run(&mut self, view: QueryView<'_>) {
        self.results = self
            .requests
            .par_iter()
            .map(|request| view.overlapping_bodies(&request.shape, request.mask))
            .collect();
        trace!(queries = self.requests.len(), "overlap batch joined");
    }

    /// Bodies hit by the query in `slot`; empty before `run`.
    pub fn hits(&self, slot: QuerySlot) -> &[RigidBodyHandle] {
        self.results.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.requests.clear();
        self.results.clear();
    }
}

/// Sphere query around a controller resolving to registered objects.
#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub radius: f32,
    pub mask: Group,
    slot: Option<QuerySlot>,
    candidates: BTreeSet<InteractableId>,
}

impl ActivityQuery {
    pub fn new(radius: f32, mask: Group) -> Self {
        Self {
            radius,
            mask,
            slot: None,
            candidates: BTreeSet::new(),
        }
    }

    /// Schedules the query for this step. `None` means untracked: the
    /// candidate set is cleared and nothing is scheduled.
    pub fn schedule(&mut self, position: Option<Point3<f32>>, batch: &mut QueryBatch) {
        self.slot = position.map(|center| {
            batch.push(
                QueryShape::Sphere {
                    center,
                    radius: self.radius,
                },
                self.mask,
            )
        });
        if self.slot.is_none() {
            self.candidates.clear();
        }
    }

    /// Maps the scheduled hits onto registered objects passing `predicate`.
    pub fn resolve(
        &mut self,
        batch: &QueryBatch,
        lookup: impl Fn(RigidBodyHandle) -> Option<InteractableId>,
        predicate: impl Fn(InteractableId) -> bool,
    ) -> &BTreeSet<InteractableId> {
        self.candidates.clear();
        if let Some(slot) = self.slot.take() {
            self.candidates.extend(
                batch
                    .hits(slot)
                    .iter()
                    .filter_map(|&body| lookup(body))
                    .filter(|&id| predicate(id)),
            );
        }
        &self.candidates
    }

    /// Schedules, runs and resolves a single query immediately.
    pub fn update_query(
        &mut self,
        view: QueryView<'_>,
        position: Option<Point3<f32>>,
        lookup: impl Fn(RigidBodyHandle) -> Option<InteractableId>,
        predicate: impl Fn(InteractableId) -> bool,
    ) -> &BTreeSet<InteractableId> {
        let mut batch = QueryBatch::new();
        self.schedule(position, &mut batch);
        batch.run(view);
        self.resolve(&batch, lookup, predicate)
    }

    pub fn candidates(&self) -> &BTreeSet<InteractableId> {
        &self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::physics::PhysicsWorld;
    use rapier3d::prelude::{ColliderBuilder, Isometry};
    use std::collections::HashMap;

    fn world_with_balls(xs: &[f32]) -> (PhysicsWorld, HashMap<RigidBodyHandle, InteractableId>) {
        let mut world = PhysicsWorld::new();
        let mut lookup = HashMap::new();
        for (i, &x) in xs.iter().enumerate() {
            let body = world.add_dynamic_body(
                Isometry::translation(x, 0.0, 0.0),
                ColliderBuilder::ball(0.05).build(),
            );
            lookup.insert(body, InteractableId(i as u64));
        }
        world.update_queries();
        (world, lookup)
    }

    #[test]
    fn test_untracked_clears_candidates() {
        let (world, lookup) = world_with_balls(&[0.0]);
        let mut query = ActivityQuery::new(0.2, Group::ALL);
        let hits = query.update_query(
            world.query_view(),
            Some(Point3::origin()),
            |b| lookup.get(&b).copied(),
            |_| true,
        );
        assert_eq!(hits.len(), 1);

        let hits = query.update_query(world.query_view(), None, |b| lookup.get(&b).copied(), |_| true);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_predicate_and_registry_filtering() {
        let (mut world, mut lookup) = world_with_balls(&[0.0, 0.1]);
        let unregistered = world.add_dynamic_body(
            Isometry::translation(-0.1, 0.0, 0.0),
            ColliderBuilder::ball(0.05).build(),
        );
        world.update_queries();
        lookup.remove(&unregistered);

        let mut query = ActivityQuery::new(0.3, Group::ALL);
        let hits = query.update_query(
            world.query_view(),
            Some(Point3::origin()),
            |b| lookup.get(&b).copied(),
            |id| id != InteractableId(1),
        );
        assert_eq!(hits.iter().copied().collect::<Vec<_>>(), vec![InteractableId(0)]);
    }

    #[test]
    fn test_batch_keeps_slots_in_order() {
        let (world, lookup) = world_with_balls(&[0.0, 1.0]);
        let mut batch = QueryBatch::new();
        let mut near = ActivityQuery::new(0.1, Group::ALL);
        let mut far = ActivityQuery::new(0.1, Group::ALL);
        near.schedule(Some(Point3::origin()), &mut batch);
        far.schedule(Some(Point3::new(1.0, 0.0, 0.0)), &mut batch);
        assert_eq!(batch.len(), 2);
        batch.run(world.query_view());

        let near_hits = near.resolve(&batch, |b| lookup.get(&b).copied(), |_| true).clone();
        let far_hits = far.resolve(&batch, |b| lookup.get(&b).copied(), |_| true).clone();
        assert!(near_hits.contains(&InteractableId(0)));
        assert!(far_hits.contains(&InteractableId(1)));
        assert!(!far_hits.contains(&InteractableId(0)));
    }
}
