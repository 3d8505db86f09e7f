//! Variance capture: rasterize casters from the light into (d, d²).

use glam::Mat4;
use wgpu::util::DeviceExt;

use super::resources::{ModelUniform, ShadowTargets, CAPTURE_DEPTH_FORMAT, MOMENTS_FORMAT};
use super::shaders;
use crate::scene::MeshData;
use crate::shadow::FAR_DEPTH;
use crate::util::{Error, Result};

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

/// Per-object model matrix, bind group 1.
pub fn create_model_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("shadow_model_bind_group_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Vertex layout shared by the capture and mask pipelines.
pub(crate) fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

/// GPU copy of one shadow-casting mesh.
pub struct ShadowCaster {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    model_buffer: wgpu::Buffer,
    model_bind_group: wgpu::BindGroup,
}

impl ShadowCaster {
    pub fn new(device: &wgpu::Device, model_layout: &wgpu::BindGroupLayout, mesh: &MeshData) -> Result<Self> {
        if mesh.indices.len() % 3 != 0 {
            return Err(Error::invalid(format!(
                "index count {} is not a multiple of 3",
                mesh.indices.len()
            )));
        }
        let vertex_count = mesh.positions.len();
        if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::invalid(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("shadow_caster_vertices"),
            contents: bytemuck::cast_slice(&mesh.positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("shadow_caster_indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let model_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("shadow_caster_model"),
            contents: bytemuck::bytes_of(&ModelUniform {
                model: mesh.model.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let model_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow_caster_model_bind_group"),
            layout: model_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: model_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            model_buffer,
            model_bind_group,
        })
    }

    /// Move the caster; takes effect at the next submit.
    pub fn set_model(&self, queue: &wgpu::Queue, model: Mat4) {
        let uniform = ModelUniform {
            model: model.to_cols_array_2d(),
        };
        queue.write_buffer(&self.model_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Bind and draw into an already configured pass.
    pub(crate) fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        if self.index_count == 0 {
            return;
        }
        pass.set_bind_group(1, &self.model_bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

/// Render pipeline writing light-space moments into the variance target.
pub struct VarianceCapture {
    pipeline: wgpu::RenderPipeline,
}

impl VarianceCapture {
    pub fn new(
        device: &wgpu::Device,
        shadow_layout: &wgpu::BindGroupLayout,
        model_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("variance_capture_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::variance_capture_source().into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("variance_capture_pipeline_layout"),
            bind_group_layouts: &[shadow_layout, model_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("variance_capture_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_capture"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_capture"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: MOMENTS_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Casters are captured double sided
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: CAPTURE_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self { pipeline }
    }

    /// Clear to the far sentinel and draw every caster.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &ShadowTargets,
        shadow_bind_group: &wgpu::BindGroup,
        casters: &[ShadowCaster],
    ) {
        let mut pass = begin_clear_pass(encoder, targets, "variance_capture_pass");
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, shadow_bind_group, &[]);
        for caster in casters {
            caster.draw(&mut pass);
        }
    }

    /// Clear only; used when shadows are disabled.
    pub fn clear(encoder: &mut wgpu::CommandEncoder, targets: &ShadowTargets) {
        let _pass = begin_clear_pass(encoder, targets, "variance_clear_pass");
    }
}

fn begin_clear_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    targets: &ShadowTargets,
    label: &str,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &targets.variance.view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color {
                    r: FAR_DEPTH as f64,
                    g: (FAR_DEPTH * FAR_DEPTH) as f64,
                    b: 0.0,
                    a: 1.0,
                }),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &targets.capture_depth.view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Discard,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
