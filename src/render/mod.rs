//! GPU implementation on wgpu.
//!
//! [`ShadowPipeline`] owns the variance image, SAT images A and B and every
//! pipeline that touches them. Stage boundaries are pass boundaries, which is
//! what orders capture → row scan → column scan → sampling on the device.

mod capture;
mod context;
mod debug_view;
mod pipeline;
mod readback;
mod resources;
mod sampling;
mod sat;
pub mod shaders;

pub use capture::{create_model_bind_group_layout, ShadowCaster, VarianceCapture};
pub use context::GpuContext;
pub use debug_view::DebugView;
pub use pipeline::{check_capabilities, validate_against_limits, ShadowPipeline};
pub use readback::{depad_rows, padded_bytes_per_row, read_buffer, read_texture};
pub use resources::{
    MaskTargets, ModelUniform, ScanParams, ShadowTargets, ShadowUniform, Target, CAPTURE_DEPTH_FORMAT,
    MASK_FORMAT, MOMENTS_FORMAT,
};
pub use sampling::{create_shadow_bind_group, create_shadow_bind_group_layout, MaskPass, QueryPass};
pub use sat::SatCompute;
