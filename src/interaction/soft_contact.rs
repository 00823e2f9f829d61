//! Soft contact: velocity transfer from sensor-mode bones to nearby bodies.
//!
//! Hands push contacts into a buffer owned by the manager; the buffer is
//! solved and cleared once per step after every hand has contributed.

use nalgebra::{Point3, Vector3};
use rapier3d::prelude::RigidBodyHandle;
use tracing::trace;

use super::physics::PhysicsWorld;

/// One bone touching one body this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftContact {
    pub body: RigidBodyHandle,
    pub point: Point3<f32>,
    /// Velocity of the bone at `point`.
    pub velocity: Vector3<f32>,
}

#[derive(Debug, Default)]
pub struct SoftContactBuffer {
    contacts: Vec<SoftContact>,
}

impl SoftContactBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, contact: SoftContact) {
        self.contacts.push(contact);
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Applies accumulated contacts and clears the buffer. Each body gets the
    /// average of its contacts' velocity transfer, scaled by `transfer`.
    /// Returns the number of bodies touched.
    pub fn solve(&mut self, world: &mut PhysicsWorld, transfer: f32) -> usize {
        let mut bodies: Vec<RigidBodyHandle> = Vec::new();
        for contact in &self.contacts {
            if !bodies.contains(&contact.body) {
                bodies.push(contact.body);
            }
        }

        let mut touched = 0;
        for body in bodies {
            if !world.is_dynamic(body) {
                continue;
            }
            let Some(mass) = world.mass(body) else {
                continue;
            };
            let contacts: Vec<SoftContact> = self
                .contacts
                .iter()
                .filter(|c| c.body == body)
                .copied()
                .collect();
            let share = transfer / contacts.len() as f32;
            for contact in contacts {
                let Some(body_velocity) = world.velocity_at_point(body, &contact.point) else {
                    continue;
                };
                let impulse = (contact.velocity - body_velocity) * mass * share;
                world.apply_impulse_at_point(body, impulse, contact.point);
            }
            touched += 1;
        }

        if touched > 0 {
            trace!(contacts = self.contacts.len(), bodies = touched, "soft contacts solved");
        }
        self.contacts.clear();
        touched
    }
}
