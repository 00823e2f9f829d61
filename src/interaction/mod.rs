pub mod activity;
pub mod bone;
pub mod classifier;
pub mod constants;
pub mod controller;
pub mod grasp_helper;
pub mod hand_proxy;
pub mod interactable;
pub mod layers;
pub mod manager;
pub mod math;
pub mod physics;
pub mod primary_hover;
pub mod soft_contact;
pub mod throwing;
pub mod tracking;
pub mod transitions;

pub use controller::{ControllerId, ControllerKind, InteractionController, InteractionSource};
pub use interactable::{
    HoverDistance, IgnoreHover, Interactable, InteractableId, InteractableSettings,
    InteractionEvent, InteractionKind, InteractionPhase,
};
pub use manager::{run_fixed_step, InteractionManager};
pub use physics::PhysicsWorld;
pub use tracking::{
    Chirality, ChannelTrackingProvider, RigidControllerSample, ScriptedTrackingProvider,
    TrackedHandSample, TrackingFrame, TrackingProvider,
};
