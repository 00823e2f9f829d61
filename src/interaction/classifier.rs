//! Heuristic grasp classifier for one hand against one object.
//!
//! The only state is the finger-strength snapshots kept in `GraspValues`;
//! entry and exit use separate thresholds so noisy curl signals do not
//! flicker the decision.

use tracing::trace;

use super::math::Pose;
use super::tracking::{Finger, FINGER_COUNT};
use crate::config::GraspConfig;

/// Digit slot used for the palm in per-digit arrays.
pub const PALM: usize = FINGER_COUNT;

/// Fingers plus the palm.
pub const DIGIT_SLOTS: usize = FINGER_COUNT + 1;

/// Per (object, hand) classifier state.
#[derive(Debug, Clone, PartialEq)]
pub struct GraspValues {
    /// Strength each digit had when it first touched; `None` while not touching.
    pub first_contact_strength: [Option<f32>; FINGER_COUNT],
    pub current_strength: [f32; FINGER_COUNT],
    /// Strengths captured on the step the grasp began.
    pub grasp_strength: [f32; FINGER_COUNT],
    /// Object pose relative to the palm at acquisition.
    pub offset: Pose,
    pub hand_grabbing: bool,
    pub facing_opposite_hand: bool,
}

impl Default for GraspValues {
    fn default() -> Self {
        Self {
            first_contact_strength: [None; FINGER_COUNT],
            current_strength: [0.0; FINGER_COUNT],
            grasp_strength: [0.0; FINGER_COUNT],
            offset: Pose::identity(),
            hand_grabbing: false,
            facing_opposite_hand: false,
        }
    }
}

/// Inputs for one classification step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitInput {
    pub strengths: [f32; FINGER_COUNT],
    /// Whether each digit (and the palm, at `PALM`) has eligible bones on
    /// the object this step.
    pub eligible: [bool; DIGIT_SLOTS],
    pub pinch_distance: f32,
    /// Opposing bone normals were found on this object.
    pub opposing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraspDecision {
    Begin,
    Hold,
    Release,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct GraspClassifier {
    config: GraspConfig,
}

impl GraspClassifier {
    pub fn new(config: GraspConfig) -> Self {
        Self { config }
    }

    fn entry_threshold(&self, finger: Finger) -> f32 {
        if finger.is_thumb() {
            self.config.thumb_entry_strength
        } else {
            self.config.entry_strength
        }
    }

    fn exit_threshold(&self, finger: Finger, pinching: bool) -> f32 {
        let base = if finger.is_thumb() {
            self.config.thumb_exit_strength
        } else {
            self.config.exit_strength
        };
        if pinching && matches!(finger, Finger::Thumb | Finger::Index) {
            base * self.config.pinch_exit_scale
        } else {
            base
        }
    }

    /// Lowest strength at which a curl rise can qualify: halfway between
    /// exit and entry, so a rise never begins a grasp the exit would end.
    fn rise_floor(&self, finger: Finger) -> f32 {
        let exit = self.exit_threshold(finger, false);
        exit + (self.entry_threshold(finger) - exit) * 0.5
    }

    fn qualifies(&self, values: &GraspValues, input: &DigitInput, finger: Finger) -> bool {
        let i = finger.index();
        if !input.eligible[i] {
            return false;
        }
        let strength = input.strengths[i];
        let risen = values
            .first_contact_strength[i]
            .map(|first| strength - first >= self.config.entry_curl_delta)
            .unwrap_or(false);
        strength >= self.entry_threshold(finger) || (risen && strength >= self.rise_floor(finger))
    }

    /// Advances `values` by one step and returns the decision.
    ///
    /// `inside_object` is only evaluated for marginal releases; it reports
    /// whether any unwarped tracked bone lies inside the object.
    pub fn classify(
        &self,
        values: &mut GraspValues,
        input: &DigitInput,
        inside_object: impl FnOnce() -> bool,
    ) -> GraspDecision {
        for finger in Finger::ALL {
            let i = finger.index();
            if input.eligible[i] {
                values.first_contact_strength[i].get_or_insert(input.strengths[i]);
            } else {
                values.first_contact_strength[i] = None;
            }
        }
        values.current_strength = input.strengths;
        values.facing_opposite_hand = input.opposing;

        if !values.hand_grabbing {
            let thumb_or_palm =
                self.qualifies(values, input, Finger::Thumb) || input.eligible[PALM];
            let finger = Finger::ALL[1..]
                .iter()
                .any(|&f| self.qualifies(values, input, f));
            if (thumb_or_palm && finger) || input.opposing {
                values.hand_grabbing = true;
                values.grasp_strength = input.strengths;
                return GraspDecision::Begin;
            }
            return GraspDecision::None;
        }

        let pinching = input.pinch_distance < self.config.pinch_distance;
        let margin = |finger: Finger| {
            input.strengths[finger.index()] - self.exit_threshold(finger, pinching)
        };

        let thumb_margin = margin(Finger::Thumb);
        let best_finger_margin = Finger::ALL[1..]
            .iter()
            .map(|&f| margin(f))
            .fold(f32::NEG_INFINITY, f32::max);

        let thumb_or_palm_holds = thumb_margin >= 0.0 || input.eligible[PALM];
        let finger_holds = best_finger_margin >= 0.0;
        if (thumb_or_palm_holds && finger_holds) || input.opposing {
            return GraspDecision::Hold;
        }

        let fallback = self.config.fallback_margin;
        let thumb_marginal = thumb_or_palm_holds || thumb_margin >= -fallback;
        let finger_marginal = finger_holds || best_finger_margin >= -fallback;
        if thumb_marginal && finger_marginal && inside_object() {
            trace!("strength release overridden by geometric fallback");
            return GraspDecision::Hold;
        }

        values.hand_grabbing = false;
        GraspDecision::Release
    }
}
