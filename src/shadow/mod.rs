//! CPU reference implementation of the soft-shadow math.
//!
//! Everything here has a WGSL twin in [`crate::render::shaders`]; the CPU side
//! is the oracle the GPU tests compare against.
//!
//! - [`VarianceBuffer`] / [`Moments`] - per-texel (d, d²) from the light
//! - [`SatBuilder`] / [`SummedAreaTable`] - chunked two-pass prefix sum, box queries
//! - [`PenumbraEstimator`] - contact-hardening box radius
//! - [`SoftShadowSampler`] - Chebyshev attenuation with light-bleed reduction

mod penumbra;
mod sampler;
mod sat;
mod variance;

pub use penumbra::*;
pub use sampler::*;
pub use sat::*;
pub use variance::*;
