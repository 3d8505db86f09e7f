//! GPU-side resources owned by the shadow pipeline.

use glam::Mat4;

use crate::shadow::{max_radius_for, PenumbraParameters};

/// Variance capture and both SAT images.
pub const MOMENTS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;
pub const CAPTURE_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const MASK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Mirrors `ShadowUniform` in [`super::shaders::SHADOW_BINDINGS_WGSL`].
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniform {
    pub light_view_proj: [[f32; 4]; 4],
    pub camera_view_proj: [[f32; 4]; 4],
    pub shadow_saturation: f32,
    pub penumbra_scale: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub light_source_radius: u32,
    pub blocker_search_radius: u32,
    pub contact_hardening: u32,
    /// 0 disables sampling (every lookup returns 1)
    pub enabled: u32,
    pub map_size: u32,
    pub max_radius: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl ShadowUniform {
    pub fn new(
        params: &PenumbraParameters,
        map_size: u32,
        enabled: bool,
        light_view_proj: Mat4,
        camera_view_proj: Mat4,
    ) -> Self {
        Self {
            light_view_proj: light_view_proj.to_cols_array_2d(),
            camera_view_proj: camera_view_proj.to_cols_array_2d(),
            shadow_saturation: params.shadow_saturation,
            penumbra_scale: params.penumbra_scale,
            z_near: params.z_near,
            z_far: params.z_far,
            light_source_radius: params.light_source_radius,
            blocker_search_radius: params.blocker_search_radius,
            contact_hardening: params.contact_hardening as u32,
            enabled: enabled as u32,
            map_size,
            max_radius: max_radius_for(map_size),
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// Scan direction and line length for one SAT stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScanParams {
    pub size: u32,
    pub axis: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniform {
    pub model: [[f32; 4]; 4],
}

/// One 2D texture with its default view.
#[derive(Debug)]
pub struct Target {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Target {
    fn new(
        device: &wgpu::Device,
        label: &str,
        (width, height): (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// Light-space images: variance capture, its depth buffer, SAT A and SAT B.
#[derive(Debug)]
pub struct ShadowTargets {
    pub variance: Target,
    /// Depth test only, never sampled
    pub capture_depth: Target,
    /// Image A: row prefix sums
    pub sat_rows: Target,
    /// Image B: the finished table
    pub sat: Target,
    pub size: u32,
}

impl ShadowTargets {
    pub const VARIANCE_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
        .union(wgpu::TextureUsages::TEXTURE_BINDING)
        .union(wgpu::TextureUsages::COPY_SRC)
        .union(wgpu::TextureUsages::COPY_DST);
    /// Both SAT images: written by the scan, read by the next stage and readback
    pub const SAT_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::STORAGE_BINDING
        .union(wgpu::TextureUsages::TEXTURE_BINDING)
        .union(wgpu::TextureUsages::COPY_SRC);

    pub fn new(device: &wgpu::Device, size: u32) -> Self {
        use wgpu::TextureUsages as U;
        let dims = (size, size);
        Self {
            variance: Target::new(
                device,
                "shadow_variance",
                dims,
                MOMENTS_FORMAT,
                Self::VARIANCE_USAGES,
            ),
            capture_depth: Target::new(
                device,
                "shadow_capture_depth",
                dims,
                CAPTURE_DEPTH_FORMAT,
                U::RENDER_ATTACHMENT,
            ),
            sat_rows: Target::new(
                device,
                "shadow_sat_rows",
                dims,
                MOMENTS_FORMAT,
                Self::SAT_USAGES,
            ),
            sat: Target::new(
                device,
                "shadow_sat",
                dims,
                MOMENTS_FORMAT,
                Self::SAT_USAGES,
            ),
            size,
        }
    }
}

/// Camera-space attenuation mask and its depth buffer.
#[derive(Debug)]
pub struct MaskTargets {
    pub mask: Target,
    pub depth: Target,
    pub size: (u32, u32),
}

impl MaskTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        use wgpu::TextureUsages as U;
        Self {
            mask: Target::new(
                device,
                "shadow_mask",
                (width, height),
                MASK_FORMAT,
                U::RENDER_ATTACHMENT | U::TEXTURE_BINDING | U::COPY_SRC,
            ),
            depth: Target::new(
                device,
                "shadow_mask_depth",
                (width, height),
                CAPTURE_DEPTH_FORMAT,
                U::RENDER_ATTACHMENT,
            ),
            size: (width, height),
        }
    }
}
