//! Soft shadow lookup: SAT box statistics + one-sided Chebyshev bound.

use glam::{Mat4, Vec2, Vec3};

use super::penumbra::{PenumbraEstimator, PenumbraParameters};
use super::sat::{BoxStatistics, ShadowQuery, SummedAreaTable};

/// Variance floor; keeps the bound finite when every sample agrees.
pub const MIN_VARIANCE: f32 = 1e-5;

/// A shaded point expressed in the light's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSpacePoint {
    /// Shadow-map coordinate, [0, 1]² inside the frustum
    pub uv: Vec2,
    /// Light-space NDC depth, [0, 1] inside the frustum
    pub depth: f32,
}

impl LightSpacePoint {
    pub const fn new(uv: Vec2, depth: f32) -> Self {
        Self { uv, depth }
    }

    /// Project a world-space position with the light view-projection.
    ///
    /// Uses wgpu conventions: NDC y up, texture v down, depth in [0, 1].
    /// Points with `clip.w <= 0` (behind the light or a degenerate transform)
    /// come back outside the frustum.
    pub fn from_world(world: Vec3, light_view_proj: &Mat4) -> Self {
        let clip = *light_view_proj * world.extend(1.0);
        if !(clip.w > 0.0) {
            return Self::new(Vec2::splat(f32::NAN), f32::NAN);
        }
        let ndc = clip.truncate() / clip.w;
        Self {
            uv: Vec2::new(ndc.x * 0.5 + 0.5, ndc.y * -0.5 + 0.5),
            depth: ndc.z,
        }
    }

    /// False outside the light frustum (including NaN from a degenerate transform).
    pub fn in_frustum(&self) -> bool {
        (0.0..=1.0).contains(&self.uv.x)
            && (0.0..=1.0).contains(&self.uv.y)
            && (0.0..=1.0).contains(&self.depth)
    }

    /// Texel containing this point, clamped to the map.
    pub fn texel(&self, map_size: u32) -> (u32, u32) {
        let max = map_size.saturating_sub(1) as f32;
        let s = map_size as f32;
        (
            (self.uv.x * s).floor().clamp(0.0, max) as u32,
            (self.uv.y * s).floor().clamp(0.0, max) as u32,
        )
    }
}

/// Upper bound on the probability that a receiver at `depth` is lit.
#[inline]
pub fn chebyshev_upper_bound(mean: f32, variance: f32, depth: f32) -> f32 {
    let d = depth - mean;
    variance / (variance + d * d)
}

/// Remap `[saturation, 1] → [0, 1]` to cut the light-bleeding tail.
#[inline]
pub fn reduce_light_bleeding(p_max: f32, saturation: f32) -> f32 {
    let range = 1.0 - saturation;
    if range <= 0.0 {
        return if p_max >= 1.0 { 1.0 } else { 0.0 };
    }
    ((p_max - saturation) / range).clamp(0.0, 1.0)
}

/// Attenuation for a receiver against box statistics, in [0, 1].
pub fn attenuation(stats: &BoxStatistics, depth: f32, saturation: f32) -> f32 {
    if depth <= stats.mean {
        return 1.0;
    }
    let variance = stats.variance(MIN_VARIANCE);
    let p_max = chebyshev_upper_bound(stats.mean, variance, depth);
    let lit = reduce_light_bleeding(p_max, saturation);
    if lit.is_nan() {
        0.0
    } else {
        lit
    }
}

/// CPU evaluator of the full lookup against a built table.
pub struct SoftShadowSampler<'a> {
    sat: &'a SummedAreaTable,
    estimator: PenumbraEstimator,
}

impl<'a> SoftShadowSampler<'a> {
    pub fn new(sat: &'a SummedAreaTable, params: PenumbraParameters) -> Self {
        Self {
            sat,
            estimator: PenumbraEstimator::new(params, sat.size()),
        }
    }

    pub fn estimator(&self) -> &PenumbraEstimator {
        &self.estimator
    }

    /// Final query for a point, or `None` outside the light frustum.
    ///
    /// Runs the blocker search query first, then sizes the box from it.
    pub fn query_for(&self, point: &LightSpacePoint) -> Option<ShadowQuery> {
        if !point.in_frustum() {
            return None;
        }
        let (x, y) = point.texel(self.sat.size());
        let search = self
            .sat
            .box_statistics(ShadowQuery::new(x, y, self.estimator.search_radius()));
        let radius = self.estimator.radius(point.depth, search.mean);
        Some(ShadowQuery::new(x, y, radius))
    }

    /// Attenuation for a point (1 = fully lit).
    pub fn sample(&self, point: &LightSpacePoint) -> f32 {
        match self.query_for(point) {
            Some(query) => self.sample_query(query, point.depth),
            None => 1.0,
        }
    }

    /// Attenuation for an explicit box query.
    pub fn sample_query(&self, query: ShadowQuery, depth: f32) -> f32 {
        let stats = self.sat.box_statistics(query);
        attenuation(&stats, depth, self.estimator.params().shadow_saturation)
    }
}
