//! Frame orchestration: capture, SAT build and sampling on one device.

use glam::{Mat4, Vec3};
use log::{debug, info};

use super::capture::{create_model_bind_group_layout, ShadowCaster, VarianceCapture};
use super::context::GpuContext;
use super::debug_view::DebugView;
use super::readback;
use super::resources::{
    MaskTargets, ShadowTargets, ShadowUniform, CAPTURE_DEPTH_FORMAT, MASK_FORMAT, MOMENTS_FORMAT,
};
use super::sampling::{create_shadow_bind_group, create_shadow_bind_group_layout, MaskPass, QueryPass};
use super::sat::SatCompute;
use crate::export::DebugImage;
use crate::scene::{CameraRig, LightRig, MeshData};
use crate::settings::ShadowSettings;
use crate::shadow::{LightSpacePoint, Moments, PenumbraParameters, SummedAreaTable, VarianceBuffer};
use crate::util::{Error, Result};

const MOMENTS_TEXEL_BYTES: u32 = std::mem::size_of::<Moments>() as u32;

/// Check a map size and scan work-group size against device limits.
pub fn validate_against_limits(limits: &wgpu::Limits, map_size: u32, workgroup_size: u32) -> Result<()> {
    let max_size = limits
        .max_texture_dimension_2d
        .min(limits.max_compute_workgroups_per_dimension);
    if map_size == 0 || map_size > max_size {
        return Err(Error::InvalidResolution {
            size: map_size,
            max: max_size,
        });
    }

    // scratch array plus the carry, one vec2<f32> each
    let storage_lanes = limits.max_compute_workgroup_storage_size.saturating_sub(8) / 8;
    let max_workgroup = limits
        .max_compute_workgroup_size_x
        .min(limits.max_compute_invocations_per_workgroup)
        .min(storage_lanes);
    if !workgroup_size.is_power_of_two() || workgroup_size > max_workgroup {
        return Err(Error::InvalidWorkgroupSize {
            size: workgroup_size,
            max: max_workgroup,
        });
    }
    Ok(())
}

/// Device objects rebuilt together when the map size changes.
struct GpuResources {
    uniform_buffer: wgpu::Buffer,
    shadow_layout: wgpu::BindGroupLayout,
    model_layout: wgpu::BindGroupLayout,
    shadow_bind_group: wgpu::BindGroup,
    targets: ShadowTargets,
    mask_targets: MaskTargets,
    capture: VarianceCapture,
    sat: SatCompute,
    query: QueryPass,
    mask: MaskPass,
}

impl GpuResources {
    fn new(device: &wgpu::Device, map_size: u32, workgroup_size: u32, screen: (u32, u32)) -> Self {
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow_uniform_buffer"),
            size: std::mem::size_of::<ShadowUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let shadow_layout = create_shadow_bind_group_layout(device);
        let model_layout = create_model_bind_group_layout(device);

        let targets = ShadowTargets::new(device, map_size);
        let shadow_bind_group =
            create_shadow_bind_group(device, &shadow_layout, &uniform_buffer, &targets.sat.view);

        Self {
            capture: VarianceCapture::new(device, &shadow_layout, &model_layout),
            sat: SatCompute::new(device, &targets, workgroup_size),
            query: QueryPass::new(device, &shadow_layout),
            mask: MaskPass::new(device, &shadow_layout, &model_layout),
            mask_targets: MaskTargets::new(device, screen.0, screen.1),
            uniform_buffer,
            shadow_layout,
            model_layout,
            shadow_bind_group,
            targets,
        }
    }

    fn resize_map(&mut self, device: &wgpu::Device, map_size: u32, workgroup_size: u32) {
        self.targets = ShadowTargets::new(device, map_size);
        self.sat = SatCompute::new(device, &self.targets, workgroup_size);
        self.shadow_bind_group = create_shadow_bind_group(
            device,
            &self.shadow_layout,
            &self.uniform_buffer,
            &self.targets.sat.view,
        );
    }
}

/// Owns every GPU handle of the soft-shadow technique.
///
/// Per frame: [`capture`](Self::capture) → [`build_sat`](Self::build_sat) →
/// sampling (mask pass or [`sample`](Self::sample)). [`render_frame`](Self::render_frame)
/// encodes all three into a single submission. Parameter changes take effect at
/// the next submission.
pub struct ShadowPipeline {
    ctx: GpuContext,
    gpu: GpuResources,
    casters: Vec<ShadowCaster>,

    params: PenumbraParameters,
    enabled: bool,
    map_size: u32,
    workgroup_size: u32,
    screen: (u32, u32),
    light_view_proj: Mat4,
    camera_view_proj: Mat4,
    debug_view: DebugView,
    frame: u64,
}

impl ShadowPipeline {
    pub fn new(ctx: GpuContext, settings: &ShadowSettings) -> Result<Self> {
        settings.validate()?;
        let limits = ctx.limits();
        validate_against_limits(&limits, settings.shadow_map_size, settings.workgroup_size)?;
        let screen = (settings.screen_width, settings.screen_height);
        check_screen(&limits, screen)?;

        check_capabilities(&ctx)?;

        let gpu = ctx.scoped("create shadow pipeline", |device, _| {
            GpuResources::new(device, settings.shadow_map_size, settings.workgroup_size, screen)
        })?;

        info!(
            "Shadow pipeline: {0}x{0} map, work-group {1}, screen {2}x{3}",
            settings.shadow_map_size, settings.workgroup_size, screen.0, screen.1
        );

        let pipeline = Self {
            ctx,
            gpu,
            casters: Vec::new(),
            params: settings.penumbra_parameters(),
            enabled: settings.enable_shadows,
            map_size: settings.shadow_map_size,
            workgroup_size: settings.workgroup_size,
            screen,
            light_view_proj: settings.light_rig().view_proj(),
            camera_view_proj: settings.camera_rig().view_proj(),
            debug_view: settings.debug_view,
            frame: 0,
        };
        pipeline.write_uniform();
        Ok(pipeline)
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    pub fn parameters(&self) -> &PenumbraParameters {
        &self.params
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn debug_view(&self) -> DebugView {
        self.debug_view
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn light_view_proj(&self) -> Mat4 {
        self.light_view_proj
    }

    // ---- Per-frame inputs ----

    pub fn set_parameters(&mut self, params: PenumbraParameters) -> Result<()> {
        params.validate()?;
        self.params = params;
        self.write_uniform();
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.write_uniform();
    }

    pub fn set_light(&mut self, view_proj: Mat4) {
        self.light_view_proj = view_proj;
        self.write_uniform();
    }

    pub fn set_camera(&mut self, view_proj: Mat4) {
        self.camera_view_proj = view_proj;
        self.write_uniform();
    }

    pub fn update_frame(&mut self, light: &LightRig, camera: &CameraRig) {
        self.light_view_proj = light.view_proj();
        self.camera_view_proj = camera.view_proj();
        self.write_uniform();
    }

    pub fn set_debug_view(&mut self, view: DebugView) {
        self.debug_view = view;
    }

    /// Apply a whole settings block, rebuilding targets only when sizes change.
    ///
    /// Every size is checked against the device before anything changes, so a
    /// rejected block leaves the pipeline as it was.
    pub fn apply_settings(&mut self, settings: &ShadowSettings) -> Result<()> {
        settings.validate()?;
        let limits = self.ctx.limits();
        validate_against_limits(&limits, settings.shadow_map_size, settings.workgroup_size)?;
        check_screen(&limits, (settings.screen_width, settings.screen_height))?;

        if settings.shadow_map_size != self.map_size || settings.workgroup_size != self.workgroup_size {
            self.resize(settings.shadow_map_size, settings.workgroup_size)?;
        }
        let screen = (settings.screen_width, settings.screen_height);
        if screen != self.screen {
            self.resize_screen(screen.0, screen.1)?;
        }
        self.params = settings.penumbra_parameters();
        self.enabled = settings.enable_shadows;
        self.debug_view = settings.debug_view;
        self.update_frame(&settings.light_rig(), &settings.camera_rig());
        Ok(())
    }

    /// Recreate the variance and SAT images at a new resolution.
    pub fn resize(&mut self, map_size: u32, workgroup_size: u32) -> Result<()> {
        validate_against_limits(&self.ctx.limits(), map_size, workgroup_size)?;
        let gpu = &mut self.gpu;
        self.ctx.scoped("resize shadow map", |device, _| {
            gpu.resize_map(device, map_size, workgroup_size)
        })?;
        debug!("Shadow map resized to {map_size}, work-group {workgroup_size}");
        self.map_size = map_size;
        self.workgroup_size = workgroup_size;
        self.write_uniform();
        Ok(())
    }

    pub fn resize_screen(&mut self, width: u32, height: u32) -> Result<()> {
        check_screen(&self.ctx.limits(), (width, height))?;
        let gpu = &mut self.gpu;
        self.ctx.scoped("resize shadow mask", |device, _| {
            gpu.mask_targets = MaskTargets::new(device, width, height);
        })?;
        self.screen = (width, height);
        Ok(())
    }

    // ---- Casters ----

    /// Upload a mesh as a shadow caster and return its index.
    pub fn add_caster(&mut self, mesh: &MeshData) -> Result<usize> {
        let layout = &self.gpu.model_layout;
        let caster = self
            .ctx
            .scoped("upload caster", |device, _| ShadowCaster::new(device, layout, mesh))??;
        self.casters.push(caster);
        Ok(self.casters.len() - 1)
    }

    pub fn set_caster_model(&self, index: usize, model: Mat4) -> Result<()> {
        let caster = self
            .casters
            .get(index)
            .ok_or_else(|| Error::invalid(format!("no caster {index}")))?;
        caster.set_model(&self.ctx.queue, model);
        Ok(())
    }

    pub fn casters(&self) -> &[ShadowCaster] {
        &self.casters
    }

    pub fn clear_casters(&mut self) {
        self.casters.clear();
    }

    // ---- Stages ----

    /// Replace the variance image with CPU data (bypasses [`capture`](Self::capture)).
    pub fn upload_variance(&self, variance: &VarianceBuffer) -> Result<()> {
        if variance.size() != self.map_size {
            return Err(Error::InvalidResolution {
                size: variance.size(),
                max: self.map_size,
            });
        }
        let texture = &self.gpu.targets.variance.texture;
        let size = self.map_size;
        self.ctx.scoped("upload variance", |_, queue| {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                variance.as_bytes(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(size * MOMENTS_TEXEL_BYTES),
                    rows_per_image: Some(size),
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
            );
        })
    }

    /// Render every caster from the light into the variance image.
    ///
    /// With shadows disabled the image is only cleared to the far sentinel.
    #[tracing::instrument(skip_all)]
    pub fn capture(&mut self) -> Result<()> {
        self.submit("variance capture", |this, encoder| this.encode_capture(encoder))
    }

    /// Row scan into image A, then column scan into image B.
    #[tracing::instrument(skip_all)]
    pub fn build_sat(&mut self) -> Result<()> {
        self.submit("sat build", |this, encoder| this.gpu.sat.encode(encoder))
    }

    /// Capture, SAT build and shadow mask in one submission.
    pub fn render_frame(&mut self) -> Result<()> {
        let _span = tracing::info_span!("shadow_frame", frame = self.frame).entered();
        self.submit("shadow frame", |this, encoder| {
            this.encode_capture(encoder);
            if this.enabled {
                this.gpu.sat.encode(encoder);
            }
            this.gpu.mask.encode(
                encoder,
                &this.gpu.mask_targets,
                &this.gpu.shadow_bind_group,
                &this.casters,
            );
        })?;
        self.frame += 1;
        debug!("Shadow frame {} submitted ({} casters)", self.frame, self.casters.len());
        Ok(())
    }

    /// Evaluate the GPU sampler at light-space points (one attenuation each).
    #[tracing::instrument(skip_all, fields(points = points.len()))]
    pub fn sample(&self, points: &[LightSpacePoint]) -> Result<Vec<f32>> {
        let encoded: Vec<[f32; 4]> = points
            .iter()
            .map(|p| [p.uv.x, p.uv.y, p.depth, 0.0])
            .collect();
        self.evaluate(&encoded)
    }

    /// Evaluate the GPU sampler at world positions through the light transform.
    #[tracing::instrument(skip_all, fields(points = points.len()))]
    pub fn sample_world(&self, points: &[Vec3]) -> Result<Vec<f32>> {
        let encoded: Vec<[f32; 4]> = points.iter().map(|p| [p.x, p.y, p.z, 1.0]).collect();
        self.evaluate(&encoded)
    }

    fn evaluate(&self, encoded: &[[f32; 4]]) -> Result<Vec<f32>> {
        let gpu = &self.gpu;
        self.ctx.scoped("shadow query", |device, queue| {
            gpu.query
                .evaluate(device, queue, &gpu.shadow_bind_group, encoded)
        })?
    }

    // ---- Presentation and readback ----

    /// Texture the active [`DebugView`] selects.
    pub fn presented_texture(&self) -> &wgpu::Texture {
        self.texture_for(self.debug_view)
    }

    pub fn texture_for(&self, view: DebugView) -> &wgpu::Texture {
        match view {
            DebugView::Final => &self.gpu.mask_targets.mask.texture,
            DebugView::Variance => &self.gpu.targets.variance.texture,
            DebugView::SatRows => &self.gpu.targets.sat_rows.texture,
            DebugView::Sat => &self.gpu.targets.sat.texture,
        }
    }

    /// Bind group 0 for an external lighting pass (uniform + SAT B).
    pub fn shadow_bind_group(&self) -> &wgpu::BindGroup {
        &self.gpu.shadow_bind_group
    }

    pub fn shadow_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.gpu.shadow_layout
    }

    pub fn read_variance(&self) -> Result<VarianceBuffer> {
        VarianceBuffer::from_moments(self.map_size, self.read_moments(DebugView::Variance)?)
    }

    /// Image A: row prefix sums only.
    pub fn read_sat_rows(&self) -> Result<Vec<Moments>> {
        self.read_moments(DebugView::SatRows)
    }

    pub fn read_sat(&self) -> Result<SummedAreaTable> {
        SummedAreaTable::from_moments(self.map_size, self.read_moments(DebugView::Sat)?)
    }

    pub fn read_debug_view(&self, view: DebugView) -> Result<DebugImage> {
        let texture = self.texture_for(view);
        let channels = match view {
            DebugView::Final => 1,
            _ => 2,
        };
        let bytes = self.read_texture(texture, channels * 4, view)?;
        DebugImage::new(
            texture.width(),
            texture.height(),
            channels,
            bytemuck::pod_collect_to_vec(&bytes),
        )
    }

    fn read_moments(&self, view: DebugView) -> Result<Vec<Moments>> {
        let bytes = self.read_texture(self.texture_for(view), MOMENTS_TEXEL_BYTES, view)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    fn read_texture(&self, texture: &wgpu::Texture, bytes_per_texel: u32, view: DebugView) -> Result<Vec<u8>> {
        let label = format!("read {view}");
        self.ctx.scoped(&label, |device, queue| {
            readback::read_texture(device, queue, texture, bytes_per_texel)
        })?
    }

    // ---- Internals ----

    fn encode_capture(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.enabled {
            self.gpu.capture.encode(
                encoder,
                &self.gpu.targets,
                &self.gpu.shadow_bind_group,
                &self.casters,
            );
        } else {
            VarianceCapture::clear(encoder, &self.gpu.targets);
        }
    }

    fn submit(&self, label: &str, encode: impl FnOnce(&Self, &mut wgpu::CommandEncoder)) -> Result<()> {
        self.ctx.scoped(label, |device, queue| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            });
            encode(self, &mut encoder);
            queue.submit(Some(encoder.finish()));
        })
    }

    fn write_uniform(&self) {
        let uniform = ShadowUniform::new(
            &self.params,
            self.map_size,
            self.enabled,
            self.light_view_proj,
            self.camera_view_proj,
        );
        self.ctx
            .queue
            .write_buffer(&self.gpu.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
    }
}

/// Texture usages and compute support every target needs, checked before any
/// resource is created so a missing capability is not reported as a GPU error.
pub fn check_capabilities(ctx: &GpuContext) -> Result<()> {
    use wgpu::TextureUsages as U;
    ctx.require_compute()?;
    ctx.require_format(MOMENTS_FORMAT, ShadowTargets::VARIANCE_USAGES)?;
    ctx.require_format(MOMENTS_FORMAT, ShadowTargets::SAT_USAGES)?;
    ctx.require_format(MASK_FORMAT, U::RENDER_ATTACHMENT | U::TEXTURE_BINDING | U::COPY_SRC)?;
    ctx.require_format(CAPTURE_DEPTH_FORMAT, U::RENDER_ATTACHMENT)
}

fn check_screen(limits: &wgpu::Limits, (width, height): (u32, u32)) -> Result<()> {
    let max = limits.max_texture_dimension_2d;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(Error::invalid(format!(
            "screen size {width}x{height} outside 1..={max}"
        )));
    }
    Ok(())
}
