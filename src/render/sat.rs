//! GPU summed-area table build: row scan into A, column scan into B.

use wgpu::util::DeviceExt;

use super::resources::{ScanParams, ShadowTargets, MOMENTS_FORMAT};
use super::shaders;
use crate::shadow::ScanAxis;

/// Scan pipeline plus the bind groups for both stages.
pub struct SatCompute {
    pipeline: wgpu::ComputePipeline,
    // Kept alive alongside the bind groups that reference them
    _params: [wgpu::Buffer; 2],
    rows_bind_group: wgpu::BindGroup,
    columns_bind_group: wgpu::BindGroup,
    size: u32,
    workgroup_size: u32,
}

impl SatCompute {
    pub fn new(device: &wgpu::Device, targets: &ShadowTargets, workgroup_size: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sat_scan_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::sat_scan_source(workgroup_size).into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sat_scan_bind_group_layout"),
            entries: &[
                // Source moments
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Destination prefix sums
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: MOMENTS_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sat_scan_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("sat_scan_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("scan_lines"),
            compilation_options: Default::default(),
            cache: None,
        });

        let size = targets.size;
        let (rows_params, rows_bind_group) = Self::stage_bind_group(
            device,
            &layout,
            &targets.variance.view,
            &targets.sat_rows.view,
            size,
            ScanAxis::Rows,
        );
        let (columns_params, columns_bind_group) = Self::stage_bind_group(
            device,
            &layout,
            &targets.sat_rows.view,
            &targets.sat.view,
            size,
            ScanAxis::Columns,
        );

        Self {
            pipeline,
            _params: [rows_params, columns_params],
            rows_bind_group,
            columns_bind_group,
            size,
            workgroup_size,
        }
    }

    fn stage_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        src: &wgpu::TextureView,
        dst: &wgpu::TextureView,
        size: u32,
        axis: ScanAxis,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sat_scan_params"),
            contents: bytemuck::bytes_of(&ScanParams {
                size,
                axis: axis.as_u32(),
                _pad: [0; 2],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(match axis {
                ScanAxis::Rows => "sat_scan_rows_bind_group",
                ScanAxis::Columns => "sat_scan_columns_bind_group",
            }),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(dst),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        (params, bind_group)
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Stage H then stage V, each in its own compute pass.
    ///
    /// The pass boundary makes every A write visible to the column scan.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        self.encode_stage(encoder, &self.rows_bind_group, "sat_scan_rows");
        self.encode_stage(encoder, &self.columns_bind_group, "sat_scan_columns");
    }

    fn encode_stage(&self, encoder: &mut wgpu::CommandEncoder, bind_group: &wgpu::BindGroup, label: &str) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        // One work-group per line
        pass.dispatch_workgroups(self.size, 1, 1);
    }
}
