//! Interaction configuration parsing from TOML files

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;
use crate::interaction::constants::{
    contact as contact_consts, controller as controller_consts, grasp as grasp_consts,
    hover as hover_consts, primary_hover as primary_consts, proxy as proxy_consts,
    simulation as sim_consts, throwing as throw_consts,
};

/// Fixed-step settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seconds per fixed step
    pub timestep: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: sim_consts::TIMESTEP,
        }
    }
}

/// Broad-phase hover settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HoverConfig {
    pub activation_radius: f32,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            activation_radius: hover_consts::ACTIVATION_RADIUS,
        }
    }
}

/// Primary hover hysteresis settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PrimaryHoverConfig {
    pub min_ratio: f32,
    pub knee_distance: f32,
}

impl Default for PrimaryHoverConfig {
    fn default() -> Self {
        Self {
            min_ratio: primary_consts::MIN_RATIO,
            knee_distance: primary_consts::KNEE_DISTANCE,
        }
    }
}

/// Bone contact settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub bone_hover_margin: f32,
    pub bone_contact_margin: f32,
    pub grasp_facing_dot: f32,
    pub controller_contact_radius: f32,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            bone_hover_margin: contact_consts::BONE_HOVER_MARGIN,
            bone_contact_margin: contact_consts::BONE_CONTACT_MARGIN,
            grasp_facing_dot: contact_consts::GRASP_FACING_DOT,
            controller_contact_radius: contact_consts::CONTROLLER_CONTACT_RADIUS,
        }
    }
}

/// Grasp classifier and helper settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GraspConfig {
    pub entry_strength: f32,
    pub thumb_entry_strength: f32,
    pub entry_curl_delta: f32,
    pub exit_strength: f32,
    pub thumb_exit_strength: f32,
    pub pinch_distance: f32,
    pub pinch_exit_scale: f32,
    pub fallback_margin: f32,
    pub bone_cooldown: f32,
    pub opposing_normal_dot: f32,
    pub max_object_speed: f32,
    pub max_object_angular_speed: f32,
}

impl Default for GraspConfig {
    fn default() -> Self {
        Self {
            entry_strength: grasp_consts::ENTRY_STRENGTH,
            thumb_entry_strength: grasp_consts::THUMB_ENTRY_STRENGTH,
            entry_curl_delta: grasp_consts::ENTRY_CURL_DELTA,
            exit_strength: grasp_consts::EXIT_STRENGTH,
            thumb_exit_strength: grasp_consts::THUMB_EXIT_STRENGTH,
            pinch_distance: grasp_consts::PINCH_DISTANCE,
            pinch_exit_scale: grasp_consts::PINCH_EXIT_SCALE,
            fallback_margin: grasp_consts::FALLBACK_MARGIN,
            bone_cooldown: grasp_consts::BONE_COOLDOWN,
            opposing_normal_dot: grasp_consts::OPPOSING_NORMAL_DOT,
            max_object_speed: grasp_consts::MAX_OBJECT_SPEED,
            max_object_angular_speed: grasp_consts::MAX_OBJECT_ANGULAR_SPEED,
        }
    }
}

/// Throw estimation settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ThrowingConfig {
    pub window: f32,
    pub window_delay: f32,
    pub min_throw_speed: f32,
    pub curve_max_speed: f32,
    pub curve_max_multiplier: f32,
}

impl Default for ThrowingConfig {
    fn default() -> Self {
        Self {
            window: throw_consts::WINDOW,
            window_delay: throw_consts::WINDOW_DELAY,
            min_throw_speed: throw_consts::MIN_THROW_SPEED,
            curve_max_speed: throw_consts::CURVE_MAX_SPEED,
            curve_max_multiplier: throw_consts::CURVE_MAX_MULTIPLIER,
        }
    }
}

/// Hand proxy actuation settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub deadzone: f32,
    pub max_bone_speed: f32,
    pub max_bone_angular_speed: f32,
    pub drive_falloff: f32,
    pub min_drive_scale: f32,
    pub drive_stiffness: f32,
    pub drive_force_limit: f32,
    pub dislocation_width_factor: f32,
    pub soft_contact_max_palm_speed: f32,
    pub soft_contact_debounce: f32,
    pub soft_contact_transfer: f32,
    pub teleport_distance: f32,
    pub max_joint_angle: f32,
    pub max_dislocated_frames: u32,
    pub ghost_cooldown: f32,
    pub reinit_width_tolerance: f32,
    pub palm_thickness: f32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            deadzone: proxy_consts::DEADZONE,
            max_bone_speed: proxy_consts::MAX_BONE_SPEED,
            max_bone_angular_speed: proxy_consts::MAX_BONE_ANGULAR_SPEED,
            drive_falloff: proxy_consts::DRIVE_FALLOFF,
            min_drive_scale: proxy_consts::MIN_DRIVE_SCALE,
            drive_stiffness: proxy_consts::DRIVE_STIFFNESS,
            drive_force_limit: proxy_consts::DRIVE_FORCE_LIMIT,
            dislocation_width_factor: proxy_consts::DISLOCATION_WIDTH_FACTOR,
            soft_contact_max_palm_speed: proxy_consts::SOFT_CONTACT_MAX_PALM_SPEED,
            soft_contact_debounce: proxy_consts::SOFT_CONTACT_DEBOUNCE,
            soft_contact_transfer: proxy_consts::SOFT_CONTACT_TRANSFER,
            teleport_distance: proxy_consts::TELEPORT_DISTANCE,
            max_joint_angle: proxy_consts::MAX_JOINT_ANGLE,
            max_dislocated_frames: proxy_consts::MAX_DISLOCATED_FRAMES,
            ghost_cooldown: proxy_consts::GHOST_COOLDOWN,
            reinit_width_tolerance: proxy_consts::REINIT_WIDTH_TOLERANCE,
            palm_thickness: proxy_consts::PALM_THICKNESS,
        }
    }
}

/// Rigid XR controller settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub grip_press: f32,
    pub grip_release: f32,
    pub pointer_offset: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grip_press: controller_consts::GRIP_PRESS,
            grip_release: controller_consts::GRIP_RELEASE,
            pointer_offset: controller_consts::POINTER_OFFSET,
        }
    }
}

/// Collision group reservations
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Bitmask of rapier groups already used by the application
    pub reserved_groups: u32,
}

/// Interaction configuration from interaction.toml
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub simulation: SimulationConfig,
    pub hover: HoverConfig,
    pub primary_hover: PrimaryHoverConfig,
    pub contact: ContactConfig,
    pub grasp: GraspConfig,
    pub throwing: ThrowingConfig,
    pub proxy: ProxyConfig,
    pub controller: ControllerConfig,
    pub layers: LayerConfig,
}

impl InteractionConfig {
    /// Load interaction configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the step loop cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be positive, got {}", value),
                })
            }
        }

        positive("simulation.timestep", self.simulation.timestep)?;
        positive("hover.activation_radius", self.hover.activation_radius)?;
        positive("grasp.max_object_speed", self.grasp.max_object_speed)?;
        positive("throwing.window", self.throwing.window)?;
        positive("proxy.teleport_distance", self.proxy.teleport_distance)?;

        let grasp = &self.grasp;
        if grasp.exit_strength > grasp.entry_strength {
            return Err(ConfigError::Invalid {
                field: "grasp.exit_strength",
                reason: format!(
                    "exit {} must not exceed entry {}",
                    grasp.exit_strength, grasp.entry_strength
                ),
            });
        }
        if grasp.thumb_exit_strength > grasp.thumb_entry_strength {
            return Err(ConfigError::Invalid {
                field: "grasp.thumb_exit_strength",
                reason: format!(
                    "exit {} must not exceed entry {}",
                    grasp.thumb_exit_strength, grasp.thumb_entry_strength
                ),
            });
        }

        let controller = &self.controller;
        if controller.grip_release > controller.grip_press {
            return Err(ConfigError::Invalid {
                field: "controller.grip_release",
                reason: format!(
                    "release {} must not exceed press {}",
                    controller.grip_release, controller.grip_press
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = InteractionConfig::from_toml_str("").unwrap();
        assert_eq!(config.simulation.timestep, sim_consts::TIMESTEP);
        assert_eq!(config.grasp.entry_strength, grasp_consts::ENTRY_STRENGTH);
        assert_eq!(config.layers.reserved_groups, 0);
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = r#"
            [hover]
            activation_radius = 0.5

            [grasp]
            exit_strength = 0.1
            bone_cooldown = 0.05

            [layers]
            reserved_groups = 7
        "#;
        let config = InteractionConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.hover.activation_radius, 0.5);
        assert_eq!(config.grasp.exit_strength, 0.1);
        assert_eq!(config.grasp.bone_cooldown, 0.05);
        assert_eq!(config.grasp.entry_strength, grasp_consts::ENTRY_STRENGTH);
        assert_eq!(config.layers.reserved_groups, 7);
    }

    #[test]
    fn test_rejects_inverted_hysteresis() {
        let toml = r#"
            [grasp]
            entry_strength = 0.2
            exit_strength = 0.3
        "#;
        let err = InteractionConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "grasp.exit_strength",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_zero_timestep() {
        let toml = r#"
            [simulation]
            timestep = 0.0
        "#;
        assert!(InteractionConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_rejects_unknown_types() {
        let toml = r#"
            [proxy]
            max_dislocated_frames = "many"
        "#;
        assert!(matches!(
            InteractionConfig::from_toml_str(toml),
            Err(ConfigError::Parse { .. })
        ));
    }
}
