//! Per-object grasp aggregation across every candidate controller.

use nalgebra::Vector3;
use rapier3d::prelude::RigidBodyHandle;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::classifier::{DigitInput, GraspClassifier, GraspDecision, GraspValues, DIGIT_SLOTS};
use super::controller::ControllerId;
use super::interactable::InteractableId;
use super::math::{angular_velocity_towards, pose_position, velocity_towards, Pose};
use super::throwing::{ThrowTracker, ThrowVelocity};
use super::tracking::{Finger, TrackedHandSample, FINGER_COUNT};
use crate::config::{GraspConfig, ThrowingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    Idle,
    Hover,
    Contact,
    Grasp,
}

/// A bone reporting that it grasps the helper's object this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraspBone {
    /// Digit slot; the palm uses `classifier::PALM`.
    pub digit: usize,
    /// Segment index, unique within its controller.
    pub segment: usize,
    /// Inward (palmar) surface normal.
    pub normal: Vector3<f32>,
}

/// Per-controller input for one helper update.
#[derive(Debug, Clone)]
pub enum CandidateInput<'a> {
    Hand {
        /// Unwarped tracked hand.
        sample: &'a TrackedHandSample,
        bones: Vec<GraspBone>,
    },
    Rigid {
        grip: bool,
        contacting: bool,
    },
}

/// A tracked controller near the object. Grasping controllers absent from
/// the candidate list (tracking lost) keep their grasp.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub controller: ControllerId,
    /// Already grasping another object.
    pub busy: bool,
    pub input: CandidateInput<'a>,
}

/// Grasp changes produced by one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperUpdate {
    pub began: Vec<ControllerId>,
    pub released: Vec<ControllerId>,
    pub dominant_changed: bool,
}

type EligibleBones = [Vec<(usize, f32)>; DIGIT_SLOTS];

#[derive(Debug)]
pub struct GraspHelper {
    pub object: InteractableId,
    pub body: RigidBodyHandle,
    state: HelperState,
    candidates: Vec<ControllerId>,
    eligible: BTreeMap<ControllerId, EligibleBones>,
    values: BTreeMap<ControllerId, GraspValues>,
    /// Most recent last.
    grasping: Vec<ControllerId>,
    dominant: Option<ControllerId>,
    offset: Pose,
    throw: ThrowTracker,
}

impl GraspHelper {
    pub fn new(object: InteractableId, body: RigidBodyHandle) -> Self {
        Self {
            object,
            body,
            state: HelperState::Idle,
            candidates: Vec::new(),
            eligible: BTreeMap::new(),
            values: BTreeMap::new(),
            grasping: Vec::new(),
            dominant: None,
            offset: Pose::identity(),
            throw: ThrowTracker::new(),
        }
    }

    pub fn state(&self) -> HelperState {
        self.state
    }

    pub fn candidates(&self) -> &[ControllerId] {
        &self.candidates
    }

    pub fn grasping(&self) -> &[ControllerId] {
        &self.grasping
    }

    pub fn is_grasped(&self) -> bool {
        !self.grasping.is_empty()
    }

    pub fn is_grasping(&self, controller: ControllerId) -> bool {
        self.grasping.contains(&controller)
    }

    /// Most recently registered grasping controller.
    pub fn dominant(&self) -> Option<ControllerId> {
        self.dominant
    }

    pub fn values(&self, controller: ControllerId) -> Option<&GraspValues> {
        self.values.get(&controller)
    }

    /// No candidate left and not held.
    pub fn is_disposable(&self) -> bool {
        self.candidates.is_empty() && self.grasping.is_empty()
    }

    /// Registers a hovering controller. True only on the first call.
    pub fn add_hand(&mut self, controller: ControllerId) -> bool {
        if self.candidates.contains(&controller) {
            return false;
        }
        self.candidates.push(controller);
        if self.state == HelperState::Idle {
            self.state = HelperState::Hover;
        }
        true
    }

    /// Drops a controller. True only if it was registered.
    pub fn remove_hand(&mut self, controller: ControllerId) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|c| *c != controller);
        self.eligible.remove(&controller);
        self.values.remove(&controller);
        if self.grasping.contains(&controller) {
            self.release(controller);
        }
        self.candidates.len() != before
    }

    /// Ends `controller`'s grasp. True if it was grasping.
    pub fn release(&mut self, controller: ControllerId) -> bool {
        let before = self.grasping.len();
        self.grasping.retain(|c| *c != controller);
        if let Some(values) = self.values.get_mut(&controller) {
            values.hand_grabbing = false;
        }
        let released = self.grasping.len() != before;
        if released {
            self.dominant = self.grasping.last().copied();
            if self.grasping.is_empty() {
                self.state = HelperState::Hover;
            }
        }
        released
    }

    /// Adds a grasp that did not come from classification.
    pub fn force_grasp(&mut self, controller: ControllerId) {
        if !self.grasping.contains(&controller) {
            self.grasping.push(controller);
        }
        self.dominant = self.grasping.last().copied();
        self.state = HelperState::Grasp;
    }

    fn eligible_digits(&self, controller: ControllerId) -> [bool; DIGIT_SLOTS] {
        let mut digits = [false; DIGIT_SLOTS];
        if let Some(bones) = self.eligible.get(&controller) {
            for (slot, list) in bones.iter().enumerate() {
                digits[slot] = !list.is_empty();
            }
        }
        digits
    }

    /// Refreshes eligible bones, dropping those unseen for longer than the
    /// cooldown.
    fn refresh_eligible(&mut self, now: f32, candidates: &[Candidate<'_>], cooldown: f32) {
        for candidate in candidates {
            let CandidateInput::Hand { bones, .. } = &candidate.input else {
                continue;
            };
            let entry = self
                .eligible
                .entry(candidate.controller)
                .or_insert_with(|| std::array::from_fn(|_| Vec::new()));
            for bone in bones {
                let list = &mut entry[bone.digit.min(DIGIT_SLOTS - 1)];
                match list.iter_mut().find(|(segment, _)| *segment == bone.segment) {
                    Some(seen) => seen.1 = now,
                    None => list.push((bone.segment, now)),
                }
            }
        }
        for bones in self.eligible.values_mut() {
            for list in bones.iter_mut() {
                list.retain(|(_, seen)| now - *seen <= cooldown);
            }
        }
        self.eligible
            .retain(|_, bones| bones.iter().any(|list| !list.is_empty()));
    }

    /// Controllers with a pair of grasp bones facing each other.
    fn opposing_controllers(candidates: &[Candidate<'_>], threshold: f32) -> Vec<ControllerId> {
        let bones: Vec<(ControllerId, Vector3<f32>)> = candidates
            .iter()
            .filter_map(|c| match &c.input {
                CandidateInput::Hand { bones, .. } => Some(bones.iter().map(move |b| (c.controller, b.normal))),
                CandidateInput::Rigid { .. } => None,
            })
            .flatten()
            .collect();

        let mut opposing = Vec::new();
        for (i, (a, na)) in bones.iter().enumerate() {
            for (b, nb) in &bones[i + 1..] {
                if na.dot(nb) < threshold {
                    for c in [*a, *b] {
                        if !opposing.contains(&c) {
                            opposing.push(c);
                        }
                    }
                }
            }
        }
        opposing
    }

    /// Runs one fixed step of grasp evaluation for every candidate.
    ///
    /// `inside_object` tests whether any tracked bone of a hand lies inside
    /// the object; it backs up marginal releases.
    pub fn update_helper(
        &mut self,
        now: f32,
        candidates: &[Candidate<'_>],
        ignore_grasping: bool,
        config: &GraspConfig,
        inside_object: &dyn Fn(&TrackedHandSample) -> bool,
    ) -> HelperUpdate {
        self.refresh_eligible(now, candidates, config.bone_cooldown);
        let opposing = Self::opposing_controllers(candidates, config.opposing_normal_dot);
        let classifier = GraspClassifier::new(*config);

        let mut update = HelperUpdate::default();
        let mut any_contact = false;
        for candidate in candidates {
            let controller = candidate.controller;
            let grasping = self.grasping.contains(&controller);
            let may_begin = !candidate.busy && !ignore_grasping;

            match &candidate.input {
                CandidateInput::Hand { sample, .. } => {
                    let eligible = self.eligible_digits(controller);
                    let touching = eligible.iter().any(|e| *e);
                    any_contact |= touching;
                    if !touching && !grasping {
                        self.values.remove(&controller);
                        continue;
                    }
                    if !grasping && !may_begin {
                        continue;
                    }

                    let mut strengths = [0.0; FINGER_COUNT];
                    for finger in Finger::ALL {
                        strengths[finger.index()] = sample.finger(finger).strength;
                    }
                    let input = DigitInput {
                        strengths,
                        eligible,
                        pinch_distance: sample.pinch_distance(),
                        opposing: opposing.contains(&controller),
                    };
                    let values = self.values.entry(controller).or_default();
                    match classifier.classify(values, &input, || inside_object(sample)) {
                        GraspDecision::Begin if !grasping => update.began.push(controller),
                        GraspDecision::Release if grasping => update.released.push(controller),
                        _ => {}
                    }
                }
                CandidateInput::Rigid { grip, contacting } => {
                    any_contact |= *contacting;
                    if grasping && !grip {
                        update.released.push(controller);
                    } else if !grasping && *grip && *contacting && may_begin {
                        update.began.push(controller);
                    }
                }
            }
        }

        if self.grasping.is_empty() && !update.began.is_empty() {
            self.throw.clear();
        }
        self.grasping.retain(|c| !update.released.contains(c));
        for controller in &update.released {
            if let Some(values) = self.values.get_mut(controller) {
                values.hand_grabbing = false;
            }
        }
        for controller in &update.began {
            self.grasping.push(*controller);
            if let Some(values) = self.values.get_mut(controller) {
                values.hand_grabbing = true;
            }
        }

        let dominant = self.grasping.last().copied();
        update.dominant_changed = dominant != self.dominant && dominant.is_some();
        self.dominant = dominant;

        self.state = if !self.grasping.is_empty() {
            HelperState::Grasp
        } else if any_contact {
            HelperState::Contact
        } else {
            HelperState::Hover
        };

        if !update.began.is_empty() || !update.released.is_empty() {
            debug!(
                object = %self.object,
                began = ?update.began,
                released = ?update.released,
                dominant = ?self.dominant,
                "grasp changed"
            );
        } else {
            trace!(object = %self.object, state = ?self.state, "helper updated");
        }
        update
    }

    /// Captures the object pose relative to the dominant palm.
    pub fn set_offset(&mut self, palm: &Pose, object: &Pose) {
        self.offset = palm.inverse() * object;
        if let Some(dominant) = self.dominant {
            if let Some(values) = self.values.get_mut(&dominant) {
                values.offset = self.offset;
            }
        }
    }

    pub fn offset(&self) -> Pose {
        self.offset
    }

    /// Where the object should be for the given dominant palm pose.
    pub fn target_pose(&self, palm: &Pose) -> Pose {
        palm * self.offset
    }

    /// Velocity command moving the object onto its held pose, clamped.
    pub fn follow_command(&self, palm: &Pose, current: &Pose, dt: f32, config: &GraspConfig) -> (Vector3<f32>, Vector3<f32>) {
        let target = self.target_pose(palm);
        let linear = velocity_towards(
            &pose_position(current),
            &pose_position(&target),
            dt,
            0.0,
            config.max_object_speed,
        );
        let angular = angular_velocity_towards(&current.rotation, &target.rotation, dt, config.max_object_angular_speed);
        (linear, angular)
    }

    pub fn record_held_pose(&mut self, now: f32, pose: Pose, config: &ThrowingConfig) {
        self.throw.record(now, pose, config);
    }

    pub fn throw_velocity(&self, now: f32, config: &ThrowingConfig) -> Option<ThrowVelocity> {
        self.throw.release_velocity(now, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::classifier::PALM;
    use crate::interaction::tracking::Chirality;
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;

    const A: ControllerId = ControllerId(1);
    const B: ControllerId = ControllerId(2);

    fn helper() -> GraspHelper {
        GraspHelper::new(InteractableId(7), RigidBodyHandle::invalid())
    }

    fn rigid(controller: ControllerId, grip: bool, contacting: bool) -> Candidate<'static> {
        Candidate {
            controller,
            busy: false,
            input: CandidateInput::Rigid { grip, contacting },
        }
    }

    fn bone(digit: usize, segment: usize, normal: Vector3<f32>) -> GraspBone {
        GraspBone { digit, segment, normal }
    }

    fn never_inside(_: &TrackedHandSample) -> bool {
        false
    }

    #[test]
    fn test_add_and_remove_report_once() {
        let mut helper = helper();
        assert_eq!(helper.state(), HelperState::Idle);
        assert!(helper.add_hand(A));
        assert!(!helper.add_hand(A));
        assert_eq!(helper.state(), HelperState::Hover);
        assert!(helper.remove_hand(A));
        assert!(!helper.remove_hand(A));
        assert!(helper.is_disposable());
    }

    #[test]
    fn test_rigid_grip_begins_and_releases() {
        let mut helper = helper();
        let config = GraspConfig::default();
        helper.add_hand(A);

        let update = helper.update_helper(0.0, &[rigid(A, true, false)], false, &config, &never_inside);
        assert!(update.began.is_empty());

        let update = helper.update_helper(0.1, &[rigid(A, true, true)], false, &config, &never_inside);
        assert_eq!(update.began, vec![A]);
        assert!(update.dominant_changed);
        assert_eq!(helper.state(), HelperState::Grasp);

        let update = helper.update_helper(0.2, &[rigid(A, true, false)], false, &config, &never_inside);
        assert!(update.began.is_empty() && update.released.is_empty());

        let update = helper.update_helper(0.3, &[rigid(A, false, true)], false, &config, &never_inside);
        assert_eq!(update.released, vec![A]);
        assert_eq!(helper.state(), HelperState::Contact);
        assert_eq!(helper.dominant(), None);
    }

    #[test]
    fn test_busy_or_ignored_controllers_cannot_begin() {
        let mut helper = helper();
        let config = GraspConfig::default();
        let mut busy = rigid(A, true, true);
        busy.busy = true;
        assert!(helper
            .update_helper(0.0, &[busy], false, &config, &never_inside)
            .began
            .is_empty());
        assert!(helper
            .update_helper(0.0, &[rigid(A, true, true)], true, &config, &never_inside)
            .began
            .is_empty());
    }

    #[test]
    fn test_most_recent_grasp_is_dominant() {
        let mut helper = helper();
        let config = GraspConfig::default();
        helper.update_helper(0.0, &[rigid(A, true, true)], false, &config, &never_inside);
        let update = helper.update_helper(0.1, &[rigid(A, true, true), rigid(B, true, true)], false, &config, &never_inside);
        assert_eq!(update.began, vec![B]);
        assert_eq!(helper.grasping(), &[A, B]);
        assert_eq!(helper.dominant(), Some(B));

        let update = helper.update_helper(0.2, &[rigid(A, true, true), rigid(B, false, true)], false, &config, &never_inside);
        assert_eq!(update.released, vec![B]);
        assert!(update.dominant_changed);
        assert_eq!(helper.dominant(), Some(A));
    }

    #[test]
    fn test_hand_grasp_from_thumb_and_index() {
        let mut helper = helper();
        let config = GraspConfig::default();
        let sample = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.5; 5]);
        let candidate = Candidate {
            controller: A,
            busy: false,
            input: CandidateInput::Hand {
                sample: &sample,
                bones: vec![bone(0, 1, Vector3::x()), bone(1, 4, -Vector3::y())],
            },
        };
        let update = helper.update_helper(0.0, &[candidate], false, &config, &never_inside);
        assert_eq!(update.began, vec![A]);
        assert!(helper.values(A).unwrap().hand_grabbing);
    }

    #[test]
    fn test_eligible_bones_survive_cooldown_only() {
        let mut helper = helper();
        let config = GraspConfig::default();
        let sample = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let touching = Candidate {
            controller: A,
            busy: false,
            input: CandidateInput::Hand {
                sample: &sample,
                bones: vec![bone(PALM, 0, -Vector3::y())],
            },
        };
        let mut lifted = touching.clone();
        lifted.input = CandidateInput::Hand {
            sample: &sample,
            bones: Vec::new(),
        };

        helper.update_helper(0.0, &[touching], false, &config, &never_inside);
        assert!(helper.eligible_digits(A)[PALM]);
        helper.update_helper(0.02, std::slice::from_ref(&lifted), false, &config, &never_inside);
        assert!(helper.eligible_digits(A)[PALM]);
        assert_eq!(helper.state(), HelperState::Contact);
        helper.update_helper(0.03, std::slice::from_ref(&lifted), false, &config, &never_inside);
        assert!(!helper.eligible_digits(A)[PALM]);
        assert_eq!(helper.state(), HelperState::Hover);
    }

    #[test]
    fn test_opposing_palms_grab_without_curl() {
        let mut helper = helper();
        let config = GraspConfig::default();
        let left = TrackedHandSample::from_curls(Chirality::Left, Pose::identity(), [0.0; 5]);
        let right = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let candidates = [
            Candidate {
                controller: A,
                busy: false,
                input: CandidateInput::Hand {
                    sample: &left,
                    bones: vec![bone(PALM, 0, Vector3::x())],
                },
            },
            Candidate {
                controller: B,
                busy: false,
                input: CandidateInput::Hand {
                    sample: &right,
                    bones: vec![bone(PALM, 0, -Vector3::x())],
                },
            },
        ];
        let update = helper.update_helper(0.0, &candidates, false, &config, &never_inside);
        assert_eq!(update.began, vec![A, B]);
        assert_eq!(helper.dominant(), Some(B));
    }

    #[test]
    fn test_follow_command_is_clamped() {
        let mut helper = helper();
        let config = GraspConfig::default();
        helper.force_grasp(A);
        helper.set_offset(&Pose::identity(), &Isometry3::translation(0.0, 0.0, 0.1));

        let palm = Isometry3::translation(5.0, 0.0, 0.0);
        let (linear, angular) = helper.follow_command(&palm, &Pose::identity(), 1.0 / 60.0, &config);
        assert_relative_eq!(linear.norm(), config.max_object_speed, epsilon = 1e-3);
        assert_relative_eq!(angular.norm(), 0.0);
        assert_relative_eq!(
            pose_position(&helper.target_pose(&palm)),
            nalgebra::Point3::new(5.0, 0.0, 0.1)
        );
    }
}
