//! Tracking input: per-step hand and controller snapshots.
//!
//! Samples are immutable once produced. The provider is pulled exactly once
//! per fixed step and the resulting frame is read by every component.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::Serialize;
use tracing::debug;

use super::math::{pose_from_parts, pose_position, Pose};

// ── Chirality / digits ─────────────────────────────────────

/// Which hand a sample or controller belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Chirality {
    Left,
    Right,
}

impl Chirality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Sign of the palm-local X axis on which the thumb sits.
    pub fn thumb_side(&self) -> f32 {
        match self {
            Self::Left => 1.0,
            Self::Right => -1.0,
        }
    }
}

/// The five digits, thumb first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

/// Total number of digits per hand.
pub const FINGER_COUNT: usize = 5;

impl Finger {
    pub const ALL: [Finger; FINGER_COUNT] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_thumb(&self) -> bool {
        matches!(self, Finger::Thumb)
    }
}

/// Bones of one digit, from the wrist outwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoneKind {
    Metacarpal,
    Proximal,
    Intermediate,
    Distal,
}

/// Bones per digit in a tracking sample.
pub const BONES_PER_FINGER: usize = 4;

// ── Samples ────────────────────────────────────────────────

/// One tracked bone: a segment between two joints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSample {
    pub prev_joint: Point3<f32>,
    pub next_joint: Point3<f32>,
    /// Maps local +Z onto the bone direction and local +Y onto the back of
    /// the hand.
    pub rotation: UnitQuaternion<f32>,
    pub width: f32,
}

impl BoneSample {
    pub fn center(&self) -> Point3<f32> {
        Point3::from((self.prev_joint.coords + self.next_joint.coords) * 0.5)
    }

    pub fn length(&self) -> f32 {
        (self.next_joint - self.prev_joint).norm()
    }

    pub fn pose(&self) -> Pose {
        pose_from_parts(self.center(), self.rotation)
    }

    /// Direction the grasping side of the bone faces.
    pub fn palmar_normal(&self) -> Vector3<f32> {
        self.rotation * -Vector3::y()
    }
}

/// One tracked digit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerSample {
    pub finger: Finger,
    pub bones: [BoneSample; BONES_PER_FINGER],
    /// Curl strength in `[0, 1]`.
    pub strength: f32,
}

impl FingerSample {
    pub fn bone(&self, kind: BoneKind) -> &BoneSample {
        &self.bones[kind as usize]
    }

    pub fn tip(&self) -> Point3<f32> {
        self.bones[BONES_PER_FINGER - 1].next_joint
    }
}

/// Snapshot of one tracked hand for a single fixed step.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedHandSample {
    pub chirality: Chirality,
    pub is_tracked: bool,
    pub palm: Pose,
    pub palm_velocity: Vector3<f32>,
    pub palm_width: f32,
    pub wrist: Point3<f32>,
    pub elbow: Point3<f32>,
    pub fingers: [FingerSample; FINGER_COUNT],
}

/// Phalanx lengths (proximal, intermediate, distal) per digit.
const PHALANX_LENGTHS: [[f32; 3]; FINGER_COUNT] = [
    [0.032, 0.028, 0.022],
    [0.045, 0.027, 0.020],
    [0.048, 0.030, 0.021],
    [0.044, 0.028, 0.020],
    [0.036, 0.022, 0.018],
];

/// Knuckle offsets along palm-local X, scaled by the thumb side.
const KNUCKLE_X: [f32; FINGER_COUNT - 1] = [0.025, 0.008, -0.009, -0.026];

const FINGER_WIDTH: f32 = 0.018;
const THUMB_WIDTH: f32 = 0.02;
const MAX_PHALANX_BEND: f32 = 1.4;
const MAX_THUMB_BEND: f32 = 0.7;

impl TrackedHandSample {
    /// Builds a plausible skeleton from a palm pose and per-digit curl.
    ///
    /// Palm-local axes: +Z toward the fingers, +Y the back of the hand. Each
    /// phalanx bends `curl * MAX_PHALANX_BEND` further toward the palm.
    pub fn from_curls(chirality: Chirality, palm: Pose, curls: [f32; FINGER_COUNT]) -> Self {
        let side = chirality.thumb_side();
        let to_world = |p: Point3<f32>| palm * p;
        let fingers = std::array::from_fn(|i| {
            let finger = Finger::ALL[i];
            let curl = curls[i].clamp(0.0, 1.0);
            let lengths = PHALANX_LENGTHS[i];
            let width = if finger.is_thumb() { THUMB_WIDTH } else { FINGER_WIDTH };

            let (base, knuckle, base_dir, bend_target) = if finger.is_thumb() {
                let base = Point3::new(side * 0.02, -0.005, -0.03);
                let dir = Vector3::new(side * 0.7, -0.3, 0.65).normalize();
                let knuckle = base + dir * 0.035;
                let bend_target = Vector3::new(-side * 0.8, -0.6, 0.0).normalize();
                (base, knuckle, dir, bend_target)
            } else {
                let x = side * KNUCKLE_X[i - 1];
                let base = Point3::new(x * 0.5, 0.0, -0.04);
                let knuckle = Point3::new(x, 0.0, 0.04);
                (base, knuckle, Vector3::z(), -Vector3::y())
            };

            let max_bend = if finger.is_thumb() { MAX_THUMB_BEND } else { MAX_PHALANX_BEND };
            let axis = base_dir.cross(&bend_target);
            let axis = nalgebra::Unit::try_new(axis, 1.0e-6).unwrap_or(Vector3::x_axis());

            let mut bones = [bone_between(to_world(base), to_world(knuckle), &palm, &base_dir, &axis, 0.0, width); BONES_PER_FINGER];
            let mut joint = knuckle;
            for (j, length) in lengths.iter().enumerate() {
                let angle = curl * max_bend * (j as f32 + 1.0);
                let bend = UnitQuaternion::from_axis_angle(&axis, angle);
                let dir = bend * base_dir;
                let next = joint + dir * *length;
                bones[j + 1] = bone_between(to_world(joint), to_world(next), &palm, &base_dir, &axis, angle, width);
                joint = next;
            }

            FingerSample {
                finger,
                bones,
                strength: curl,
            }
        });

        Self {
            chirality,
            is_tracked: true,
            palm,
            palm_velocity: Vector3::zeros(),
            palm_width: 0.085,
            wrist: to_world(Point3::new(0.0, 0.0, -0.06)),
            elbow: to_world(Point3::new(0.0, 0.0, -0.3)),
            fingers,
        }
    }

    /// An untracked placeholder for `chirality`.
    pub fn untracked(chirality: Chirality) -> Self {
        let mut sample = Self::from_curls(chirality, Pose::identity(), [0.0; FINGER_COUNT]);
        sample.is_tracked = false;
        sample
    }

    pub fn finger(&self, finger: Finger) -> &FingerSample {
        &self.fingers[finger.index()]
    }

    pub fn palm_position(&self) -> Point3<f32> {
        pose_position(&self.palm)
    }

    /// Distance between the thumb tip and the index tip.
    pub fn pinch_distance(&self) -> f32 {
        (self.finger(Finger::Thumb).tip() - self.finger(Finger::Index).tip()).norm()
    }

    /// Midpoint of the thumb and index tips.
    pub fn pinch_position(&self) -> Point3<f32> {
        let thumb = self.finger(Finger::Thumb).tip();
        let index = self.finger(Finger::Index).tip();
        Point3::from((thumb.coords + index.coords) * 0.5)
    }

    /// Mean bone width, used to detect a re-scaled hand.
    pub fn mean_bone_width(&self) -> f32 {
        let total: f32 = self
            .fingers
            .iter()
            .flat_map(|f| f.bones.iter())
            .map(|b| b.width)
            .sum();
        total / (FINGER_COUNT * BONES_PER_FINGER) as f32
    }

    /// Every tracked bone position, palm first, used by geometric backstops.
    pub fn bone_points(&self) -> impl Iterator<Item = Point3<f32>> + '_ {
        std::iter::once(self.palm_position()).chain(
            self.fingers
                .iter()
                .flat_map(|f| f.bones.iter().skip(1))
                .map(|b| b.center()),
        )
    }

    /// Same hand moved rigidly by `offset`.
    pub fn translated(&self, offset: Vector3<f32>) -> Self {
        let mut sample = self.clone();
        sample.palm.translation.vector += offset;
        sample.wrist += offset;
        sample.elbow += offset;
        for finger in &mut sample.fingers {
            for bone in &mut finger.bones {
                bone.prev_joint += offset;
                bone.next_joint += offset;
            }
        }
        sample
    }
}

fn bone_between(
    prev: Point3<f32>,
    next: Point3<f32>,
    palm: &Pose,
    base_dir: &Vector3<f32>,
    axis: &nalgebra::Unit<Vector3<f32>>,
    angle: f32,
    width: f32,
) -> BoneSample {
    let bend = UnitQuaternion::from_axis_angle(axis, angle);
    let local_dir = bend * base_dir;
    let local_up = bend * base_dir.cross(axis).normalize();
    let local = UnitQuaternion::face_towards(&local_dir, &local_up);
    BoneSample {
        prev_joint: prev,
        next_joint: next,
        rotation: palm.rotation * local,
        width,
    }
}

/// Snapshot of a rigid XR controller for a single fixed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidControllerSample {
    pub chirality: Chirality,
    pub is_tracked: bool,
    pub pose: Pose,
    pub velocity: Vector3<f32>,
    /// Grip axis in `[0, 1]`.
    pub grip: f32,
}

impl RigidControllerSample {
    pub fn new(chirality: Chirality, pose: Pose, grip: f32) -> Self {
        Self {
            chirality,
            is_tracked: true,
            pose,
            velocity: Vector3::zeros(),
            grip,
        }
    }

    pub fn position(&self) -> Point3<f32> {
        pose_position(&self.pose)
    }
}

/// Everything the tracking provider reports for one fixed step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingFrame {
    pub hands: Vec<TrackedHandSample>,
    pub controllers: Vec<RigidControllerSample>,
}

impl TrackingFrame {
    pub fn with_hands(hands: Vec<TrackedHandSample>) -> Self {
        Self {
            hands,
            controllers: Vec::new(),
        }
    }

    /// Tracked hand of the given chirality, if present.
    pub fn hand(&self, chirality: Chirality) -> Option<&TrackedHandSample> {
        self.hands
            .iter()
            .find(|h| h.chirality == chirality && h.is_tracked)
    }

    /// Tracked controller of the given chirality, if present.
    pub fn controller(&self, chirality: Chirality) -> Option<&RigidControllerSample> {
        self.controllers
            .iter()
            .find(|c| c.chirality == chirality && c.is_tracked)
    }
}

// ── Providers ──────────────────────────────────────────────

/// Pull-based source of tracking frames.
pub trait TrackingProvider {
    /// Returns the frame to use for the current fixed step.
    fn current_frame(&mut self) -> TrackingFrame;
}

/// Provider fed from another thread. Keeps only the newest frame; if the
/// producer stalls the last frame is repeated.
pub struct ChannelTrackingProvider {
    receiver: Receiver<TrackingFrame>,
    latest: TrackingFrame,
    disconnected: bool,
}

impl ChannelTrackingProvider {
    pub fn new() -> (Self, Sender<TrackingFrame>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Self {
                receiver,
                latest: TrackingFrame::default(),
                disconnected: false,
            },
            sender,
        )
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

impl TrackingProvider for ChannelTrackingProvider {
    fn current_frame(&mut self) -> TrackingFrame {
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => self.latest = frame,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        debug!("tracking producer disconnected, dropping hands");
                        self.disconnected = true;
                        self.latest = TrackingFrame::default();
                    }
                    break;
                }
            }
        }
        self.latest.clone()
    }
}

/// Provider replaying a fixed list of frames, then repeating the last one.
pub struct ScriptedTrackingProvider {
    frames: Vec<TrackingFrame>,
    cursor: usize,
}

impl ScriptedTrackingProvider {
    pub fn new(frames: Vec<TrackingFrame>) -> Self {
        Self { frames, cursor: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.frames.len()
    }
}

impl TrackingProvider for ScriptedTrackingProvider {
    fn current_frame(&mut self) -> TrackingFrame {
        let frame = self
            .frames
            .get(self.cursor)
            .or_else(|| self.frames.last())
            .cloned()
            .unwrap_or_default();
        self.cursor += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_open_hand_fingers_point_forward() {
        let sample = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let index = sample.finger(Finger::Index);
        let dir = (index.tip() - index.bone(BoneKind::Proximal).prev_joint).normalize();
        assert_relative_eq!(dir.z, 1.0, epsilon = 1e-4);
        assert_relative_eq!(index.strength, 0.0);
    }

    #[test]
    fn test_curl_moves_tip_toward_palm() {
        let open = TrackedHandSample::from_curls(Chirality::Left, Pose::identity(), [0.0; 5]);
        let fist = TrackedHandSample::from_curls(Chirality::Left, Pose::identity(), [1.0; 5]);
        let open_tip = open.finger(Finger::Middle).tip();
        let fist_tip = fist.finger(Finger::Middle).tip();
        assert!(fist_tip.y < open_tip.y);
        assert!(fist_tip.z < open_tip.z);
    }

    #[test]
    fn test_bone_rotation_matches_direction() {
        let sample = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.5; 5]);
        for finger in &sample.fingers {
            for bone in finger.bones.iter().skip(1) {
                let dir = (bone.next_joint - bone.prev_joint).normalize();
                let mapped = bone.rotation * Vector3::z();
                assert_relative_eq!(mapped, dir, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_thumb_sits_on_chirality_side() {
        let right = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let left = TrackedHandSample::from_curls(Chirality::Left, Pose::identity(), [0.0; 5]);
        assert!(right.finger(Finger::Thumb).tip().x < 0.0);
        assert!(left.finger(Finger::Thumb).tip().x > 0.0);
    }

    #[test]
    fn test_frame_skips_untracked_hands() {
        let frame = TrackingFrame::with_hands(vec![TrackedHandSample::untracked(Chirality::Left)]);
        assert!(frame.hand(Chirality::Left).is_none());
    }

    #[test]
    fn test_channel_provider_keeps_latest() {
        let (mut provider, sender) = ChannelTrackingProvider::new();
        assert!(provider.current_frame().hands.is_empty());

        let hand = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        sender.send(TrackingFrame::default()).unwrap();
        sender.send(TrackingFrame::with_hands(vec![hand])).unwrap();
        assert_eq!(provider.current_frame().hands.len(), 1);
        // Stalled producer repeats the last frame.
        assert_eq!(provider.current_frame().hands.len(), 1);

        drop(sender);
        assert!(provider.current_frame().hands.is_empty());
        assert!(provider.is_disconnected());
    }

    #[test]
    fn test_scripted_provider_repeats_last() {
        let hand = TrackedHandSample::from_curls(Chirality::Right, Pose::identity(), [0.0; 5]);
        let mut provider = ScriptedTrackingProvider::new(vec![
            TrackingFrame::default(),
            TrackingFrame::with_hands(vec![hand]),
        ]);
        assert!(provider.current_frame().hands.is_empty());
        assert_eq!(provider.current_frame().hands.len(), 1);
        assert!(provider.is_finished());
        assert_eq!(provider.current_frame().hands.len(), 1);
    }
}
