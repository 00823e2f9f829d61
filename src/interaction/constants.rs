//! Tuned interaction defaults.
//! These encode "feel" rather than a derivation; every value is overridable
//! through `InteractionConfig`.

/// Simulation step constants
pub mod simulation {
    /// Fixed timestep for interaction updates (60 Hz)
    pub const TIMESTEP: f32 = 1.0 / 60.0;

    /// Small epsilon for float comparisons
    pub const EPSILON: f32 = 0.0001;
}

/// Broad-phase hover detection
pub mod hover {
    /// Radius around the palm (or controller) that activates hover, in meters
    pub const ACTIVATION_RADIUS: f32 = 0.2;
}

/// Primary hover hysteresis
pub mod primary_hover {
    /// Ratio applied to the old distance when the old distance tends to zero
    pub const MIN_RATIO: f32 = 0.5;

    /// Distance at which the ratio is halfway between `MIN_RATIO` and 1
    pub const KNEE_DISTANCE: f32 = 0.05;
}

/// Bone-level contact margins
pub mod contact {
    /// Inflation of a bone collider when testing hover
    pub const BONE_HOVER_MARGIN: f32 = 0.02;

    /// Inflation of a bone collider when testing contact
    pub const BONE_CONTACT_MARGIN: f32 = 0.005;

    /// Minimum dot between the bone's palmar normal and the direction to the
    /// object for the bone to report grasping it
    pub const GRASP_FACING_DOT: f32 = -0.2;

    /// Radius of the contact sphere carried by a rigid XR controller
    pub const CONTROLLER_CONTACT_RADIUS: f32 = 0.03;
}

/// Grasp classifier and helper
pub mod grasp {
    /// Finger curl strength required to qualify for grasp entry
    pub const ENTRY_STRENGTH: f32 = 0.25;

    /// Thumb curl strength required to qualify for grasp entry
    pub const THUMB_ENTRY_STRENGTH: f32 = 0.2;

    /// Curl increase since first contact that also qualifies a digit
    pub const ENTRY_CURL_DELTA: f32 = 0.15;

    /// Finger strength below which a finger stops holding
    pub const EXIT_STRENGTH: f32 = 0.15;

    /// Thumb strength below which the thumb stops holding
    pub const THUMB_EXIT_STRENGTH: f32 = 0.08;

    /// Thumb-index pinch distance that makes the pair sticky, in meters
    pub const PINCH_DISTANCE: f32 = 0.012;

    /// Exit threshold multiplier while pinching
    pub const PINCH_EXIT_SCALE: f32 = 0.85;

    /// Band below an exit threshold in which release is considered marginal
    pub const FALLBACK_MARGIN: f32 = 0.1;

    /// Seconds a bone stays eligible after it stops reporting a grasp
    pub const BONE_COOLDOWN: f32 = 0.025;

    /// Dot product under which two bone normals count as opposing
    pub const OPPOSING_NORMAL_DOT: f32 = -0.4;

    /// Maximum linear speed of a held object, in meters per second
    pub const MAX_OBJECT_SPEED: f32 = 15.0;

    /// Maximum angular speed of a held object, in radians per second
    pub const MAX_OBJECT_ANGULAR_SPEED: f32 = 40.0;
}

/// Throw estimation on release
pub mod throwing {
    /// Length of the sampled window, in seconds
    pub const WINDOW: f32 = 0.045;

    /// Delay between "now" and the end of the window
    pub const WINDOW_DELAY: f32 = 0.015;

    /// Speed under which the physics velocity is trusted instead
    pub const MIN_THROW_SPEED: f32 = 1.0;

    /// Speed at which the multiplier curve reaches its maximum
    pub const CURVE_MAX_SPEED: f32 = 3.0;

    /// Multiplier applied at and above `CURVE_MAX_SPEED`
    pub const CURVE_MAX_MULTIPLIER: f32 = 1.5;
}

/// Hand proxy actuation
pub mod proxy {
    /// Radius around the target inside which no velocity is commanded
    pub const DEADZONE: f32 = 0.0005;

    /// Maximum linear speed of a proxy bone
    pub const MAX_BONE_SPEED: f32 = 10.0;

    /// Maximum angular speed of a proxy bone
    pub const MAX_BONE_ANGULAR_SPEED: f32 = 60.0;

    /// Targeting error scale at which the drive is halved
    pub const DRIVE_FALLOFF: f32 = 0.02;

    /// Lowest drive scale for far-off bones
    pub const MIN_DRIVE_SCALE: f32 = 0.1;

    /// Drive stiffness applied when targeting error is zero
    pub const DRIVE_STIFFNESS: f32 = 1.0;

    /// Velocity change per second the drive may apply at zero error
    pub const DRIVE_FORCE_LIMIT: f32 = 60.0;

    /// Multiple of bone width beyond which a bone counts as dislocated
    pub const DISLOCATION_WIDTH_FACTOR: f32 = 3.0;

    /// Palm speed under which dislocation enters soft contact
    pub const SOFT_CONTACT_MAX_PALM_SPEED: f32 = 1.0;

    /// Seconds without soft contacts before solid contact resumes
    pub const SOFT_CONTACT_DEBOUNCE: f32 = 0.3;

    /// Fraction of relative velocity transferred per soft contact
    pub const SOFT_CONTACT_TRANSFER: f32 = 0.5;

    /// Drift between proxy palm and tracked palm that forces a teleport
    pub const TELEPORT_DISTANCE: f32 = 0.15;

    /// Angle between a bone and its parent beyond which it is over-rotated
    pub const MAX_JOINT_ANGLE: f32 = 2.2;

    /// Consecutive over-rotated steps before a teleport
    pub const MAX_DISLOCATED_FRAMES: u32 = 8;

    /// Seconds a hand stays ghosted after a teleport
    pub const GHOST_COOLDOWN: f32 = 0.25;

    /// Relative bone width change that re-initializes the proxy
    pub const REINIT_WIDTH_TOLERANCE: f32 = 0.2;

    /// Thickness of the palm box
    pub const PALM_THICKNESS: f32 = 0.025;

    /// Half length of the palm box along the fingers
    pub const PALM_HALF_LENGTH: f32 = 0.045;

    /// Mass of one phalanx body, in kilograms
    pub const BONE_MASS: f32 = 0.05;

    /// Mass of the palm body, in kilograms
    pub const PALM_MASS: f32 = 0.3;

    /// Mass of a rigid controller's contact sphere
    pub const CONTROLLER_MASS: f32 = 0.2;
}

/// Rigid XR controller grasp button
pub mod controller {
    /// Grip axis value that begins a grasp
    pub const GRIP_PRESS: f32 = 0.7;

    /// Grip axis value under which the grasp ends
    pub const GRIP_RELEASE: f32 = 0.4;

    /// Distance along the controller forward axis of the primary hover tip
    pub const POINTER_OFFSET: f32 = 0.08;
}

/// Collision group layout
pub mod layers {
    /// Number of rapier groups the interaction system needs
    pub const REQUIRED_GROUPS: usize = 3;
}
