//! Penumbra size estimation (contact hardening).

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};

/// Per-frame shadow filtering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenumbraParameters {
    /// Light source radius in texels at the reference depth
    pub light_source_radius: u32,
    /// Light frustum near plane
    pub z_near: f32,
    /// Light frustum far plane
    pub z_far: f32,
    /// Scale the penumbra with blocker/receiver distance
    pub contact_hardening: bool,
    /// Chebyshev light-bleed clamp in [0, 1]
    pub shadow_saturation: f32,
    /// Multiplier applied to the computed radius
    pub penumbra_scale: f32,
    /// Half-width of the first (blocker search) query
    pub blocker_search_radius: u32,
}

impl Default for PenumbraParameters {
    fn default() -> Self {
        Self {
            light_source_radius: 16,
            z_near: 1.0,
            z_far: 15.0,
            contact_hardening: false,
            shadow_saturation: 0.5,
            penumbra_scale: 1.0,
            blocker_search_radius: 2,
        }
    }
}

impl PenumbraParameters {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.shadow_saturation) {
            return Err(Error::invalid(format!(
                "shadow_saturation {} outside [0, 1]",
                self.shadow_saturation
            )));
        }
        if !self.penumbra_scale.is_finite() || self.penumbra_scale <= 0.0 {
            return Err(Error::invalid(format!(
                "penumbra_scale {} must be positive",
                self.penumbra_scale
            )));
        }
        if !(self.z_near.is_finite() && self.z_far.is_finite())
            || self.z_near < 0.0
            || self.z_far <= self.z_near
        {
            return Err(Error::invalid(format!(
                "light planes z_near={} z_far={} must satisfy 0 <= near < far",
                self.z_near, self.z_far
            )));
        }
        if self.light_source_radius == 0 {
            return Err(Error::invalid("light_source_radius must be at least 1"));
        }
        Ok(())
    }

    /// Light-space NDC depth in [0, 1] to distance from the light.
    ///
    /// The light uses an orthographic projection, so the mapping is linear.
    #[inline]
    pub fn linear_depth(&self, ndc_depth: f32) -> f32 {
        self.z_near + ndc_depth * (self.z_far - self.z_near)
    }
}

/// Chooses the box radius for each shadow lookup.
#[derive(Debug, Clone, Copy)]
pub struct PenumbraEstimator {
    params: PenumbraParameters,
    max_radius: u32,
}

impl PenumbraEstimator {
    pub fn new(params: PenumbraParameters, map_size: u32) -> Self {
        Self {
            params,
            max_radius: max_radius_for(map_size),
        }
    }

    pub fn params(&self) -> &PenumbraParameters {
        &self.params
    }

    pub fn max_radius(&self) -> u32 {
        self.max_radius
    }

    /// Radius of the blocker search query.
    pub fn search_radius(&self) -> u32 {
        self.params.blocker_search_radius.clamp(1, self.max_radius)
    }

    /// Box half-width for a receiver at `receiver_depth` whose neighbourhood
    /// averages to `blocker_depth` (both light-space NDC depths).
    pub fn radius(&self, receiver_depth: f32, blocker_depth: f32) -> u32 {
        let p = &self.params;
        let width = if p.contact_hardening {
            let receiver = p.linear_depth(receiver_depth);
            let blocker = p.linear_depth(blocker_depth).max(f32::EPSILON);
            (receiver - blocker).max(0.0) * p.light_source_radius as f32 / blocker
        } else {
            p.light_source_radius as f32
        };
        // floor(x + 0.5) rather than round(): WGSL round() is half-to-even
        let scaled = (width * p.penumbra_scale + 0.5).floor();
        if scaled.is_nan() {
            return 1;
        }
        (scaled.min(self.max_radius as f32) as u32).clamp(1, self.max_radius)
    }
}

/// Largest radius whose `2r+1` box still fits in the table.
#[inline]
pub fn max_radius_for(map_size: u32) -> u32 {
    (map_size.saturating_sub(1) / 2).max(1)
}
