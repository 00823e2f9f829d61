use super::interactable::InteractableId;
use crate::config::PrimaryHoverConfig;

/// Closest-object selection with hysteresis.
///
/// A newcomer only displaces the current primary when its distance beats
/// `old * ratio(old)`. The ratio tends to `min_ratio` as the old distance
/// tends to zero and to 1 far away, so a very close primary is hard to steal.
#[derive(Debug, Clone, Default)]
pub struct PrimaryHover {
    current: Option<InteractableId>,
}

impl PrimaryHover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<InteractableId> {
        self.current
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Ratio a newcomer distance must beat, relative to `old`.
    pub fn ratio(old: f32, config: &PrimaryHoverConfig) -> f32 {
        let old = old.max(0.0);
        let knee = config.knee_distance.max(f32::EPSILON);
        config.min_ratio + (1.0 - config.min_ratio) * old / (old + knee)
    }

    /// Picks the primary hover among `(object, distance)` candidates.
    pub fn select(
        &mut self,
        candidates: &[(InteractableId, f32)],
        config: &PrimaryHoverConfig,
    ) -> Option<InteractableId> {
        let closest = candidates
            .iter()
            .copied()
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let current = self
            .current
            .and_then(|id| candidates.iter().find(|(c, _)| *c == id).copied());

        self.current = match (current, closest) {
            (_, None) => None,
            (None, Some((id, _))) => Some(id),
            (Some((old_id, old_dist)), Some((new_id, new_dist))) => {
                if new_id != old_id && new_dist < old_dist * Self::ratio(old_dist, config) {
                    Some(new_id)
                } else {
                    Some(old_id)
                }
            }
        };
        self.current
    }
}
