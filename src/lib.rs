//! Handgrasp interaction engine library
//!
//! Classifies hover, contact and grasp between tracked hands (or XR
//! controllers) and rigid bodies, and drives the physical hand proxies.

pub mod config;
pub mod error;
pub mod interaction;
