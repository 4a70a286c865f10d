//! wgpu-backed reference device.
//!
//! Adapter and device setup, one compute pipeline per compiled kernel,
//! packed arguments uploaded as a storage buffer at binding 0 and the
//! launch geometry as a uniform at binding 1. The workgroup size is
//! baked into the emitted shader, so the block dimensions passed to
//! `launch` only feed that uniform.
//!
//! wgpu exposes no architecture generation, so staging copies stay
//! synchronous (`generation: 0`) and the bank count uses the common 32.

use wgpu::util::DeviceExt;

use crate::codegen::CompiledMeta;
use crate::error::{Error, Result};
use crate::ir;
use crate::runtime::Options;

use super::{BlockDim, Device, DeviceCaps, Grid, KernelHandle, Stream, WgslEmitter};

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    emitter: Box<dyn WgslEmitter>,
    caps: DeviceCaps,
}

impl WgpuDevice {
    /// Create the device on the highest-performance available adapter.
    /// Returns `None` when the host has no usable GPU.
    pub fn try_new(emitter: Box<dyn WgslEmitter>) -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tilec-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .ok()?;

        let limits = device.limits();
        let caps = DeviceCaps {
            parallel: true,
            shared_memory: limits.max_compute_workgroup_storage_size as u64,
            generation: 0,
            shared_banks: 32,
        };
        Some(Self {
            device,
            queue,
            emitter,
            caps,
        })
    }

    pub fn stream(&self) -> WgpuStream<'_> {
        WgpuStream {
            device: &self.device,
        }
    }
}

impl Device for WgpuDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn codegen(
        &self,
        module: &ir::Module,
        meta: &CompiledMeta,
        opt: &Options,
        label: &str,
    ) -> Result<Box<dyn KernelHandle>> {
        let source = self
            .emitter
            .emit(module, meta, opt)
            .map_err(Error::Backend)?;
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &shader,
                entry_point: Some(module.entry().name.as_str()),
                compilation_options: Default::default(),
                cache: None,
            });
        Ok(Box::new(WgpuKernel {
            device: self.device.clone(),
            queue: self.queue.clone(),
            pipeline,
            label: label.to_string(),
        }))
    }
}

/// GPU launch geometry matching the WGSL `Launch` uniform layout.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct LaunchParams {
    grid: [u32; 3],
    block_x: u32,
}

struct WgpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    label: String,
}

impl KernelHandle for WgpuKernel {
    fn launch(&self, args: &[u8], grid: Grid, block: BlockDim, _stream: &dyn Stream) -> Result<()> {
        let args_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel-args"),
                contents: args,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
        let params = LaunchParams {
            grid: [grid[0] as u32, grid[1] as u32, grid[2] as u32],
            block_x: block[0],
        };
        let params_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("launch-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let layout = self.pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel-bind-group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: args_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid[0] as u32, grid[1] as u32, grid[2] as u32);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

pub struct WgpuStream<'a> {
    device: &'a wgpu::Device,
}

impl Stream for WgpuStream<'_> {
    fn synchronize(&self) -> Result<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}
