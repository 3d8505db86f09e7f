//! # satvsm
//!
//! Soft, contact-hardening shadows from summed-area variance shadow maps on wgpu.
//!
//! ## Modules
//!
//! - [`shadow`] - CPU reference: moments, SAT builder, penumbra estimator, sampler
//! - [`render`] - GPU pipeline: variance capture, two-pass SAT scan, WGSL sampler
//! - [`settings`] - Persistent tunables (JSON)
//! - [`scene`] - Light/camera rigs and the demo casters
//! - [`export`] - Debug image readback to OpenEXR
//! - [`util`] - Error type
//!
//! ## Example
//!
//! ```ignore
//! use satvsm::prelude::*;
//!
//! let settings = ShadowSettings::default();
//! let mut pipeline = ShadowPipeline::new(GpuContext::new_headless()?, &settings)?;
//! for mesh in demo_casters() {
//!     pipeline.add_caster(&mesh)?;
//! }
//! pipeline.render_frame()?;
//! let mask = pipeline.read_debug_view(DebugView::Final)?;
//! ```

pub mod export;
pub mod render;
pub mod scene;
pub mod settings;
pub mod shadow;
pub mod util;

pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::export::{export_exr, DebugImage};
    pub use crate::render::{DebugView, GpuContext, ShadowPipeline};
    pub use crate::scene::{demo_casters, CameraRig, LightRig, MeshData};
    pub use crate::settings::ShadowSettings;
    pub use crate::shadow::*;
    pub use crate::util::{Error, Result};
}
