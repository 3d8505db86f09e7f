//! Persistent shadow settings

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::render::DebugView;
use crate::scene::{CameraRig, LightRig};
use crate::shadow::PenumbraParameters;
use crate::util::{Error, Result};

/// Largest scan work-group accepted before device limits are consulted.
pub const MAX_WORKGROUP_SIZE: u32 = 1024;

/// Every tunable of the shadow pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    // Shadows
    pub enable_shadows: bool,
    pub shadow_map_size: u32,
    pub workgroup_size: u32,
    pub shadow_saturation: f32,
    pub penumbra_scale: f32,
    pub light_source_radius: u32,
    pub blocker_search_radius: u32,
    pub contact_hardening: bool,

    // Light
    pub light_position: [f32; 3],
    pub light_extent: f32,
    pub z_near: f32,
    pub z_far: f32,

    // Camera
    pub camera_position: [f32; 3],
    pub camera_target: [f32; 3],
    pub camera_fov: f32, // degrees
    pub screen_width: u32,
    pub screen_height: u32,

    // Debug
    pub debug_view: DebugView,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enable_shadows: true,
            shadow_map_size: 1024,
            workgroup_size: 256,
            shadow_saturation: 0.5,
            penumbra_scale: 1.0,
            light_source_radius: 16,
            blocker_search_radius: 2,
            contact_hardening: false,
            light_position: [-2.5, 5.0, -1.25],
            light_extent: 10.0,
            z_near: 1.0,
            z_far: 15.0,
            camera_position: [0.0, 1.5, 5.0],
            camera_target: [0.0, 0.0, 0.0],
            camera_fov: 45.0,
            screen_width: 1024,
            screen_height: 768,
            debug_view: DebugView::Final,
        }
    }
}

impl ShadowSettings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("satvsm");
            p.push("settings.json");
            p
        })
    }

    /// Load and validate settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the default location, falling back to defaults on any problem
    pub fn load_or_default() -> Self {
        Self::default_path()
            .and_then(|p| Self::load(&p).ok())
            .unwrap_or_default()
    }

    /// Save settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations the pipeline cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.shadow_map_size == 0 {
            return Err(Error::InvalidResolution {
                size: 0,
                max: u32::MAX,
            });
        }
        if !self.workgroup_size.is_power_of_two() || self.workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(Error::InvalidWorkgroupSize {
                size: self.workgroup_size,
                max: MAX_WORKGROUP_SIZE,
            });
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(Error::invalid(format!(
                "screen size {}x{} must be non-zero",
                self.screen_width, self.screen_height
            )));
        }
        if !(self.light_extent.is_finite() && self.light_extent > 0.0) {
            return Err(Error::invalid("light_extent must be positive"));
        }
        if !(self.camera_fov > 0.0 && self.camera_fov < 180.0) {
            return Err(Error::invalid("camera_fov must be in (0, 180) degrees"));
        }
        if Vec3::from(self.light_position).length_squared() == 0.0 {
            return Err(Error::invalid("light_position must not be the origin"));
        }
        self.penumbra_parameters().validate()
    }

    pub fn penumbra_parameters(&self) -> PenumbraParameters {
        PenumbraParameters {
            light_source_radius: self.light_source_radius,
            z_near: self.z_near,
            z_far: self.z_far,
            contact_hardening: self.contact_hardening,
            shadow_saturation: self.shadow_saturation,
            penumbra_scale: self.penumbra_scale,
            blocker_search_radius: self.blocker_search_radius,
        }
    }

    pub fn light_rig(&self) -> LightRig {
        LightRig {
            position: Vec3::from(self.light_position),
            target: Vec3::ZERO,
            extent: self.light_extent,
            z_near: self.z_near,
            z_far: self.z_far,
        }
    }

    pub fn camera_rig(&self) -> CameraRig {
        CameraRig {
            position: Vec3::from(self.camera_position),
            target: Vec3::from(self.camera_target),
            fov_y: self.camera_fov.to_radians(),
            aspect: self.screen_width as f32 / self.screen_height as f32,
            near: 0.1,
            far: 200.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let s = ShadowSettings::default();
        s.validate().unwrap();
        assert_eq!(s.penumbra_parameters(), PenumbraParameters::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let s: ShadowSettings =
            serde_json::from_str(r#"{ "shadow_map_size": 512, "debug_view": "sat" }"#).unwrap();
        assert_eq!(s.shadow_map_size, 512);
        assert_eq!(s.debug_view, DebugView::Sat);
        assert_eq!(s.light_source_radius, 16);
    }

    #[test]
    fn test_validate_rejects_bad_workgroup() {
        let s = ShadowSettings {
            workgroup_size: 100,
            ..Default::default()
        };
        assert!(matches!(
            s.validate(),
            Err(Error::InvalidWorkgroupSize { size: 100, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_resolution() {
        let s = ShadowSettings {
            shadow_map_size: 0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(Error::InvalidResolution { .. })));
    }
}
