// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of the depth decode stages
//!
//! All buffers are sized for the fixed 512x424 sensor, so they are created
//! once together with the bind groups and reused for every packet.

use super::{
    BILATERAL_SHADER, DECODE_SHADER, EDGE_AWARE_SHADER, PHASE_TO_DEPTH_SHADER, stage_source,
};
use crate::calibration::GeometryTables;
use crate::config::{DepthConfig, DepthParameters};
use crate::constants::{DEPTH_HEIGHT, DEPTH_PACKET_SIZE, DEPTH_WIDTH, LUT_SIZE, TABLE_SIZE};
use crate::errors::{PipelineError, PipelineResult};
use crate::gpu::{self, DeviceHealth, GpuDeviceInfo, wgpu};
use crate::processors::DepthAccelerator;
use crate::resource::Releasable;
use crate::shaders::{compute_dispatch_size, map_staging_blocking};
use tracing::{debug, info};

/// Threads per workgroup, must match `@workgroup_size` in the shaders
const WORKGROUP_SIZE: u32 = 256;

/// Storage buffers bound by the widest stage (decode)
const REQUIRED_STORAGE_BUFFERS: u32 = 8;

/// Bytes in one f32 image plane
const PLANE_BYTES: u64 = (TABLE_SIZE * 4) as u64;

/// Bytes in one vec4<f32> per-pixel buffer
const VEC4_PLANE_BYTES: u64 = PLANE_BYTES * 4;

/// Uniform block shared by every stage (mirrors `DepthParams` in params.wgsl)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DepthUniforms {
    ab_multiplier_per_frq: [f32; 4],
    phase_in_rad: [f32; 4],
    gaussian_kernel: [f32; 4],
    ab_multiplier: f32,
    ab_output_multiplier: f32,
    joint_bilateral_ab_threshold: f32,
    joint_bilateral_max_edge: f32,
    joint_bilateral_exp: f32,
    phase_offset: f32,
    unambiguous_dist: f32,
    individual_ab_threshold: f32,
    ab_threshold: f32,
    ab_confidence_slope: f32,
    ab_confidence_offset: f32,
    min_dealias_confidence: f32,
    max_dealias_confidence: f32,
    edge_ab_avg_min_value: f32,
    edge_ab_std_dev_threshold: f32,
    edge_close_delta_threshold: f32,
    edge_far_delta_threshold: f32,
    edge_max_delta_threshold: f32,
    edge_avg_delta_threshold: f32,
    /// millimeters
    min_depth: f32,
    /// millimeters
    max_depth: f32,
    width: u32,
    height: u32,
    use_edge_test: u32,
}

impl DepthUniforms {
    fn new(config: &DepthConfig, params: &DepthParameters) -> Self {
        let pad = |v: [f32; 3]| [v[0], v[1], v[2], 0.0];
        Self {
            ab_multiplier_per_frq: pad(params.ab_multiplier_per_frq),
            phase_in_rad: pad(params.phase_in_rad),
            gaussian_kernel: pad(params.gaussian_kernel),
            ab_multiplier: params.ab_multiplier,
            ab_output_multiplier: params.ab_output_multiplier,
            joint_bilateral_ab_threshold: params.joint_bilateral_ab_threshold,
            joint_bilateral_max_edge: params.joint_bilateral_max_edge,
            joint_bilateral_exp: params.joint_bilateral_exp,
            phase_offset: params.phase_offset,
            unambiguous_dist: params.unambiguous_dist,
            individual_ab_threshold: params.individual_ab_threshold,
            ab_threshold: params.ab_threshold,
            ab_confidence_slope: params.ab_confidence_slope,
            ab_confidence_offset: params.ab_confidence_offset,
            min_dealias_confidence: params.min_dealias_confidence,
            max_dealias_confidence: params.max_dealias_confidence,
            edge_ab_avg_min_value: params.edge_ab_avg_min_value,
            edge_ab_std_dev_threshold: params.edge_ab_std_dev_threshold,
            edge_close_delta_threshold: params.edge_close_delta_threshold,
            edge_far_delta_threshold: params.edge_far_delta_threshold,
            edge_max_delta_threshold: params.edge_max_delta_threshold,
            edge_avg_delta_threshold: params.edge_avg_delta_threshold,
            min_depth: config.min_depth * 1000.0,
            max_depth: config.max_depth * 1000.0,
            width: DEPTH_WIDTH as u32,
            height: DEPTH_HEIGHT as u32,
            use_edge_test: config.enable_bilateral_filter as u32,
        }
    }
}

/// How a stage binds one buffer
#[derive(Clone, Copy)]
enum Access {
    Uniform,
    Read,
    ReadWrite,
}

/// One compute stage: pipeline plus its bind group layout
struct Stage {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl Stage {
    fn new(device: &wgpu::Device, label: &str, body: &str, bindings: &[Access]) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(stage_source(body).into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
            .iter()
            .enumerate()
            .map(|(binding, access)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match access {
                        Access::Uniform => wgpu::BufferBindingType::Uniform,
                        Access::Read => wgpu::BufferBindingType::Storage { read_only: true },
                        Access::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self { pipeline, layout }
    }

    fn bind(
        &self,
        device: &wgpu::Device,
        label: &str,
        buffers: &[&wgpu::Buffer],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &entries,
        })
    }

    fn dispatch(&self, pass: &mut wgpu::ComputePass, bind_group: &wgpu::BindGroup) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(compute_dispatch_size(TABLE_SIZE as u32, WORKGROUP_SIZE), 1, 1);
    }
}

/// GPU buffers for one decode, sized for the fixed sensor geometry
struct DepthBuffers {
    uniforms: wgpu::Buffer,
    lut: wgpu::Buffer,
    raw: wgpu::Buffer,
    p0: wgpu::Buffer,
    x_table: wgpu::Buffer,
    z_table: wgpu::Buffer,
    a: wgpu::Buffer,
    b: wgpu::Buffer,
    n: wgpu::Buffer,
    a_filtered: wgpu::Buffer,
    b_filtered: wgpu::Buffer,
    edge_test: wgpu::Buffer,
    ir: wgpu::Buffer,
    depth: wgpu::Buffer,
    ir_sums: wgpu::Buffer,
    filtered: wgpu::Buffer,
    /// IR plane followed by the depth plane
    staging: wgpu::Buffer,
}

impl DepthBuffers {
    fn new(device: &wgpu::Device) -> Self {
        let storage = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | usage,
                mapped_at_creation: false,
            })
        };
        let input = wgpu::BufferUsages::COPY_DST;
        let output = wgpu::BufferUsages::COPY_SRC;
        let scratch = wgpu::BufferUsages::empty();

        Self {
            uniforms: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("depth_uniform_buffer"),
                size: std::mem::size_of::<DepthUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            lut: storage("depth_lut_buffer", (LUT_SIZE * 4) as u64, input),
            raw: storage("depth_raw_buffer", DEPTH_PACKET_SIZE as u64, input),
            p0: storage("depth_p0_buffer", PLANE_BYTES * 3, input),
            x_table: storage("depth_x_table_buffer", PLANE_BYTES, input),
            z_table: storage("depth_z_table_buffer", PLANE_BYTES, input),
            a: storage("depth_a_buffer", VEC4_PLANE_BYTES, scratch),
            b: storage("depth_b_buffer", VEC4_PLANE_BYTES, scratch),
            n: storage("depth_n_buffer", VEC4_PLANE_BYTES, scratch),
            a_filtered: storage("depth_a_filtered_buffer", VEC4_PLANE_BYTES, scratch),
            b_filtered: storage("depth_b_filtered_buffer", VEC4_PLANE_BYTES, scratch),
            edge_test: storage("depth_edge_test_buffer", PLANE_BYTES, scratch),
            ir: storage("depth_ir_buffer", PLANE_BYTES, output),
            depth: storage("depth_output_buffer", PLANE_BYTES, output),
            ir_sums: storage("depth_ir_sums_buffer", PLANE_BYTES, scratch),
            filtered: storage("depth_filtered_buffer", PLANE_BYTES, output),
            staging: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("depth_staging_buffer"),
                size: PLANE_BYTES * 2,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
        }
    }
}

struct BindGroups {
    decode: wgpu::BindGroup,
    bilateral: wgpu::BindGroup,
    depth_raw: wgpu::BindGroup,
    depth_filtered: wgpu::BindGroup,
    edge_aware: wgpu::BindGroup,
}

/// Depth accelerator running the decode stages as wgpu compute shaders
pub struct WgpuDepthAccelerator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: GpuDeviceInfo,
    health: DeviceHealth,
    decode: Stage,
    bilateral: Stage,
    phase_to_depth: Stage,
    edge_aware: Stage,
    buffers: DepthBuffers,
    bind_groups: BindGroups,
}

impl WgpuDepthAccelerator {
    /// Create the device, pipelines and all per-packet buffers
    pub fn new() -> PipelineResult<Self> {
        info!("Initializing GPU depth accelerator");

        let compute = pollster::block_on(gpu::create_compute_device("depth_processor_gpu"))
            .map_err(PipelineError::DeviceUnavailable)?;
        let device = compute.device;

        let storage_limit = device.limits().max_storage_buffers_per_shader_stage;
        if storage_limit < REQUIRED_STORAGE_BUFFERS {
            return Err(PipelineError::DeviceUnavailable(format!(
                "adapter allows {} storage buffers per stage, need {}",
                storage_limit, REQUIRED_STORAGE_BUFFERS
            )));
        }

        use Access::{Read, ReadWrite, Uniform};
        let decode = Stage::new(
            &device,
            "depth_decode",
            DECODE_SHADER,
            &[Uniform, Read, Read, Read, Read, ReadWrite, ReadWrite, ReadWrite, ReadWrite],
        );
        let bilateral = Stage::new(
            &device,
            "depth_bilateral",
            BILATERAL_SHADER,
            &[Uniform, Read, Read, Read, ReadWrite, ReadWrite, ReadWrite],
        );
        let phase_to_depth = Stage::new(
            &device,
            "depth_phase_to_depth",
            PHASE_TO_DEPTH_SHADER,
            &[Uniform, Read, Read, Read, Read, ReadWrite, ReadWrite],
        );
        let edge_aware = Stage::new(
            &device,
            "depth_edge_aware",
            EDGE_AWARE_SHADER,
            &[Uniform, Read, Read, Read, ReadWrite],
        );

        let buffers = DepthBuffers::new(&device);
        let b = &buffers;
        let bind_groups = BindGroups {
            decode: decode.bind(
                &device,
                "depth_decode_bind_group",
                &[&b.uniforms, &b.lut, &b.raw, &b.p0, &b.z_table, &b.a, &b.b, &b.n, &b.ir],
            ),
            bilateral: bilateral.bind(
                &device,
                "depth_bilateral_bind_group",
                &[&b.uniforms, &b.a, &b.b, &b.n, &b.a_filtered, &b.b_filtered, &b.edge_test],
            ),
            depth_raw: phase_to_depth.bind(
                &device,
                "depth_phase_raw_bind_group",
                &[&b.uniforms, &b.a, &b.b, &b.x_table, &b.z_table, &b.depth, &b.ir_sums],
            ),
            depth_filtered: phase_to_depth.bind(
                &device,
                "depth_phase_filtered_bind_group",
                &[
                    &b.uniforms,
                    &b.a_filtered,
                    &b.b_filtered,
                    &b.x_table,
                    &b.z_table,
                    &b.depth,
                    &b.ir_sums,
                ],
            ),
            edge_aware: edge_aware.bind(
                &device,
                "depth_edge_aware_bind_group",
                &[&b.uniforms, &b.depth, &b.ir_sums, &b.edge_test, &b.filtered],
            ),
        };

        info!(
            adapter_name = %compute.info.adapter_name,
            adapter_backend = ?compute.info.backend,
            "GPU depth accelerator ready"
        );

        Ok(Self {
            device,
            queue: compute.queue,
            info: compute.info,
            health: compute.health,
            decode,
            bilateral,
            phase_to_depth,
            edge_aware,
            buffers,
            bind_groups,
        })
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn check_device(&self) -> PipelineResult<()> {
        if self.health.is_healthy() {
            Ok(())
        } else {
            Err(PipelineError::DeviceUnavailable(format!(
                "GPU device '{}' lost",
                self.info.adapter_name
            )))
        }
    }

    fn write_plane(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        name: &'static str,
        values: &[f32],
    ) -> PipelineResult<()> {
        if values.len() != TABLE_SIZE {
            return Err(PipelineError::ResourceCreation(format!(
                "{} upload has {} values, expected {}",
                name,
                values.len(),
                TABLE_SIZE
            )));
        }
        self.queue.write_buffer(buffer, offset, bytemuck::cast_slice(values));
        Ok(())
    }
}

impl DepthAccelerator for WgpuDepthAccelerator {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    fn upload_p0_tables(&mut self, phase_offsets: &[Vec<f32>; 3]) -> PipelineResult<()> {
        self.check_device()?;
        for (frequency, table) in phase_offsets.iter().enumerate() {
            self.write_plane(&self.buffers.p0, frequency as u64 * PLANE_BYTES, "P0 table", table)?;
        }
        debug!("P0 tables uploaded");
        Ok(())
    }

    fn upload_xz_tables(&mut self, tables: &GeometryTables) -> PipelineResult<()> {
        self.check_device()?;
        self.write_plane(&self.buffers.x_table, 0, "X table", &tables.x)?;
        self.write_plane(&self.buffers.z_table, 0, "Z table", &tables.z)?;
        debug!("X/Z tables uploaded");
        Ok(())
    }

    fn upload_lookup_table(&mut self, lut: &[f32]) -> PipelineResult<()> {
        self.check_device()?;
        if lut.len() != LUT_SIZE {
            return Err(PipelineError::ResourceCreation(format!(
                "lookup table upload has {} values, expected {}",
                lut.len(),
                LUT_SIZE
            )));
        }
        self.queue
            .write_buffer(&self.buffers.lut, 0, bytemuck::cast_slice(lut));
        debug!("Lookup table uploaded");
        Ok(())
    }

    fn process(
        &mut self,
        raw: &[u8],
        config: &DepthConfig,
        params: &DepthParameters,
        ir: &mut [f32],
        depth: &mut [f32],
    ) -> PipelineResult<()> {
        self.check_device()?;

        if raw.len() != DEPTH_PACKET_SIZE {
            return Err(PipelineError::InvalidPacket {
                expected: DEPTH_PACKET_SIZE,
                actual: raw.len(),
            });
        }
        if ir.len() != TABLE_SIZE || depth.len() != TABLE_SIZE {
            return Err(PipelineError::ResourceCreation(
                "output frames do not match the sensor size".into(),
            ));
        }

        let uniforms = DepthUniforms::new(config, params);
        self.queue
            .write_buffer(&self.buffers.uniforms, 0, bytemuck::bytes_of(&uniforms));
        self.queue.write_buffer(&self.buffers.raw, 0, raw);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("depth_decode_encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("depth_decode_pass"),
                timestamp_writes: None,
            });

            self.decode.dispatch(&mut pass, &self.bind_groups.decode);
            if config.enable_bilateral_filter {
                self.bilateral.dispatch(&mut pass, &self.bind_groups.bilateral);
                self.phase_to_depth
                    .dispatch(&mut pass, &self.bind_groups.depth_filtered);
            } else {
                self.phase_to_depth
                    .dispatch(&mut pass, &self.bind_groups.depth_raw);
            }
            if config.enable_edge_aware_filter {
                self.edge_aware
                    .dispatch(&mut pass, &self.bind_groups.edge_aware);
            }
        }

        let depth_source = if config.enable_edge_aware_filter {
            &self.buffers.filtered
        } else {
            &self.buffers.depth
        };
        encoder.copy_buffer_to_buffer(&self.buffers.ir, 0, &self.buffers.staging, 0, PLANE_BYTES);
        encoder.copy_buffer_to_buffer(
            depth_source,
            0,
            &self.buffers.staging,
            PLANE_BYTES,
            PLANE_BYTES,
        );

        self.queue.submit(Some(encoder.finish()));

        let mapped = map_staging_blocking(&self.device, &self.buffers.staging)
            .map_err(PipelineError::ResourceCreation)?;
        mapped.read_f32(0, ir);
        mapped.read_f32(PLANE_BYTES, depth);

        Ok(())
    }
}

impl Releasable for WgpuDepthAccelerator {
    fn release(&mut self) {
        debug!(adapter = %self.info.adapter_name, "Releasing GPU depth accelerator");
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        self.device.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Scoped;

    #[test]
    fn test_uniform_layout_matches_shader() {
        // 3 x vec4 + 24 scalars, a multiple of 16 as uniform blocks require
        assert_eq!(std::mem::size_of::<DepthUniforms>(), 144);
    }

    #[test]
    fn test_uniforms_convert_range_to_millimeters() {
        let config = DepthConfig {
            min_depth: 0.5,
            max_depth: 4.5,
            enable_bilateral_filter: false,
            enable_edge_aware_filter: true,
        };
        let uniforms = DepthUniforms::new(&config, &DepthParameters::default());
        assert_eq!(uniforms.min_depth, 500.0);
        assert_eq!(uniforms.max_depth, 4500.0);
        assert_eq!(uniforms.use_edge_test, 0);
        assert_eq!(uniforms.phase_in_rad[3], 0.0);
    }

    #[test]
    fn test_every_parameter_reaches_the_uniforms() {
        let config = DepthConfig::default();
        let defaults = DepthParameters::default();
        let baseline = DepthUniforms::new(&config, &defaults);

        let serde_json::Value::Object(fields) = serde_json::to_value(defaults).unwrap() else {
            panic!("parameters serialize to an object");
        };
        assert!(!fields.is_empty());

        for (name, value) in &fields {
            let bumped = match value {
                serde_json::Value::Array(items) => {
                    let mut items = items.clone();
                    items[0] = serde_json::json!(items[0].as_f64().unwrap() + 1.0);
                    serde_json::Value::Array(items)
                }
                other => serde_json::json!(other.as_f64().unwrap() + 1.0),
            };
            let mut changed = fields.clone();
            changed.insert(name.clone(), bumped);
            let params: DepthParameters =
                serde_json::from_value(serde_json::Value::Object(changed)).unwrap();

            let uniforms = DepthUniforms::new(&config, &params);
            assert_ne!(
                bytemuck::bytes_of(&uniforms),
                bytemuck::bytes_of(&baseline),
                "{} does not reach the shaders",
                name
            );
        }
    }

    #[test]
    fn test_zero_packet_decodes_to_zero_depth() {
        // This test requires a GPU, so it may be skipped in CI
        let accelerator = match WgpuDepthAccelerator::new() {
            Ok(accelerator) => accelerator,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut accelerator = Scoped::new(accelerator);

        let zeros = vec![0.0f32; TABLE_SIZE];
        accelerator
            .upload_p0_tables(&[zeros.clone(), zeros.clone(), zeros.clone()])
            .unwrap();
        let tables = GeometryTables::new(&zeros, &vec![1.0; TABLE_SIZE]).unwrap();
        accelerator.upload_xz_tables(&tables).unwrap();
        accelerator.upload_lookup_table(&vec![0.0; LUT_SIZE]).unwrap();

        let mut ir = vec![f32::NAN; TABLE_SIZE];
        let mut depth = vec![f32::NAN; TABLE_SIZE];
        accelerator
            .process(
                &vec![0u8; DEPTH_PACKET_SIZE],
                &DepthConfig::default(),
                &DepthParameters::default(),
                &mut ir,
                &mut depth,
            )
            .unwrap();

        assert!(ir.iter().all(|&v| v == 0.0));
        assert!(depth.iter().all(|&v| v == 0.0));
    }
}
