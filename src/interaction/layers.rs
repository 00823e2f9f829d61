use rapier3d::prelude::{Group, InteractionGroups};
use tracing::debug;

use super::constants::layers as layer_consts;
use crate::error::SetupError;

/// Rapier groups carved out for the interaction system.
///
/// - `interaction`: registered objects that hands may touch
/// - `no_contact`: grasped objects, which ignore contact bones
/// - `contact_bones`: proxy hand bones and controller contact spheres
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionLayers {
    pub interaction: Group,
    pub no_contact: Group,
    pub contact_bones: Group,
}

impl InteractionLayers {
    /// Picks the lowest free groups not present in `reserved`.
    pub fn allocate(reserved: u32) -> Result<Self, SetupError> {
        let free: Vec<Group> = (0..32)
            .map(|bit| 1u32 << bit)
            .filter(|bit| reserved & bit == 0)
            .map(Group::from_bits_truncate)
            .collect();

        if free.len() < layer_consts::REQUIRED_GROUPS {
            return Err(SetupError::NoFreeLayers {
                needed: layer_consts::REQUIRED_GROUPS,
                available: free.len(),
            });
        }

        let layers = Self {
            interaction: free[0],
            no_contact: free[1],
            contact_bones: free[2],
        };
        debug!(
            interaction = layers.interaction.bits(),
            no_contact = layers.no_contact.bits(),
            contact_bones = layers.contact_bones.bits(),
            "allocated interaction layers"
        );
        Ok(layers)
    }

    /// Groups for a registered, ungrasped object.
    pub fn interaction_groups(&self, original: InteractionGroups) -> InteractionGroups {
        InteractionGroups::new(self.interaction, original.filter | self.contact_bones)
    }

    /// Groups for a grasped object: everything except contact bones.
    pub fn grasped_groups(&self, original: InteractionGroups) -> InteractionGroups {
        InteractionGroups::new(self.no_contact, original.filter & !self.contact_bones)
    }

    /// Groups for proxy bones: collide with interaction objects and the world,
    /// never with grasped objects or other bones.
    pub fn bone_groups(&self) -> InteractionGroups {
        InteractionGroups::new(
            self.contact_bones,
            Group::ALL & !self.no_contact & !self.contact_bones,
        )
    }

    /// Mask matching every registered object, grasped or not.
    pub fn object_mask(&self) -> Group {
        self.interaction | self.no_contact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free_groups() {
        let layers = InteractionLayers::allocate(0b101).unwrap();
        assert_eq!(layers.interaction, Group::GROUP_2);
        assert_eq!(layers.no_contact, Group::GROUP_4);
        assert_eq!(layers.contact_bones, Group::GROUP_5);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let reserved = u32::MAX & !(0b11);
        let err = InteractionLayers::allocate(reserved).unwrap_err();
        assert_eq!(
            err,
            SetupError::NoFreeLayers {
                needed: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_grasped_objects_ignore_bones() {
        let layers = InteractionLayers::allocate(0).unwrap();
        let original = InteractionGroups::all();
        let grasped = layers.grasped_groups(original);
        let bones = layers.bone_groups();
        assert!(!grasped.test(bones));
        assert!(layers.interaction_groups(original).test(bones));
    }
}
