//! wgpu-backed [`DeviceSurface`].
//!
//! Owns the device, queue and window surface. Shader modules and bind group layouts are
//! created once here; the simulation loop asks for pipelines and bind groups against them
//! whenever the grid is rebuilt.

use std::sync::{Arc, Mutex};

use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, Buffer, BufferUsages, CommandEncoderDescriptor, ComputePipeline, Device,
    FragmentState, Instance, LoadOp, MultisampleState, Operations, PipelineCompilationOptions,
    PipelineLayoutDescriptor, PrimitiveState, Queue, RenderPassColorAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderModule, ShaderStages,
    StoreOp, Surface, SurfaceConfiguration, SurfaceError, TextureUsages, TextureViewDescriptor,
    VertexAttribute, VertexBufferLayout, VertexFormat, VertexState, VertexStepMode,
    util::{BufferInitDescriptor, DeviceExt},
};
use winit::window::Window;

use crate::{
    device::{BufferRole, ComputeBindings, DeviceLimits, DeviceSurface, FrameBatch, SubmitOutcome},
    error::SimError,
    rendering::BACKGROUND_COLOR,
};

pub struct WgpuSurface {
    #[allow(dead_code)]
    instance: Instance, // Keep instance alive for the lifetime of the surface
    device: Device,
    queue: Queue,
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    window: Arc<Window>,
    compute_shader: ShaderModule,
    render_shader: ShaderModule,
    compute_layout: BindGroupLayout,
    render_layout: BindGroupLayout,
    lost: Arc<Mutex<Option<String>>>,
}

fn uniform_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn usages(role: BufferRole) -> BufferUsages {
    match role {
        BufferRole::CellStorage => {
            BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC
        }
        BufferRole::Drawable => {
            BufferUsages::STORAGE | BufferUsages::VERTEX | BufferUsages::COPY_DST
        }
        BufferRole::GridSize | BufferRole::Uniforms => {
            BufferUsages::UNIFORM | BufferUsages::COPY_DST
        }
        BufferRole::QuadVertices => BufferUsages::VERTEX | BufferUsages::COPY_DST,
    }
}

impl WgpuSurface {
    /// Open an adapter and device able to run compute shaders and configure `window` for
    /// presentation.
    pub async fn new(window: Arc<Window>) -> Result<Self, anyhow::Error> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());

        // Create surface first to find compatible adapter
        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await?;

        log::info!("Using adapter: {:?}", adapter.get_info());

        let downlevel_caps = adapter.get_downlevel_capabilities();
        if !downlevel_caps
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(anyhow::anyhow!("adapter does not support compute shaders"));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("cellsim device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await?;

        let lost = Arc::new(Mutex::new(None));
        let lost_slot = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("device lost ({reason:?}): {message}");
            if let Ok(mut slot) = lost_slot.lock() {
                *slot = Some(message);
            }
        });

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("surface reports no supported formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let compute_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("simulation compute shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("./sim/shader.wgsl").into()),
        });
        let render_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("render shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("./rendering/render.wgsl").into()),
        });

        // Binding order is grid size, source, destination, drawable, parameters.
        let compute_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("simulation bind group layout"),
            entries: &[
                uniform_entry(0, ShaderStages::COMPUTE),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
                uniform_entry(4, ShaderStages::COMPUTE),
            ],
        });
        let render_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("render size bind group layout"),
            entries: &[uniform_entry(0, ShaderStages::VERTEX)],
        });

        Ok(Self {
            instance,
            device,
            queue,
            surface,
            surface_config,
            window,
            compute_shader,
            render_shader,
            compute_layout,
            render_layout,
            lost,
        })
    }

    /// Request a redraw of the window
    /// Call this after rendering to keep the animation loop going
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost.lock().ok().and_then(|slot| slot.clone())
    }
}

impl DeviceSurface for WgpuSurface {
    type Buffer = Buffer;
    type ComputePipeline = ComputePipeline;
    type RenderPipeline = RenderPipeline;
    type BindGroup = BindGroup;

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            max_buffer_size: limits
                .max_buffer_size
                .min(limits.max_storage_buffer_binding_size as u64),
            max_workgroup_size: limits
                .max_compute_workgroup_size_x
                .min(limits.max_compute_invocations_per_workgroup),
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        }
    }

    fn create_buffer(
        &self,
        label: &str,
        role: BufferRole,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Buffer {
        match contents {
            Some(contents) => self.device.create_buffer_init(&BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: usages(role),
            }),
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: usages(role),
                mapped_at_creation: false,
            }),
        }
    }

    fn write_buffer(&self, buffer: &Buffer, offset: u64, bytes: &[u8]) {
        self.queue.write_buffer(buffer, offset, bytes);
    }

    fn create_compute_pipeline(&self, workgroup_size: u32) -> ComputePipeline {
        let pipeline_layout = self.device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("simulation pipeline layout"),
            bind_group_layouts: &[&self.compute_layout],
            push_constant_ranges: &[],
        });

        self.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("simulation compute pipeline"),
                layout: Some(&pipeline_layout),
                module: &self.compute_shader,
                entry_point: Some("main"),
                compilation_options: PipelineCompilationOptions {
                    constants: &[("blockSize", workgroup_size as f64)],
                    zero_initialize_workgroup_memory: true,
                },
                cache: None,
            })
    }

    fn create_compute_bind_group(
        &self,
        label: &str,
        _pipeline: &ComputePipeline,
        bindings: ComputeBindings<'_, Buffer>,
    ) -> BindGroup {
        let resources = [
            bindings.grid_size,
            bindings.source,
            bindings.destination,
            bindings.drawable,
            bindings.uniforms,
        ];
        let entries: Vec<BindGroupEntry> = resources
            .iter()
            .zip(0u32..)
            .map(|(buffer, binding)| BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout: &self.compute_layout,
            entries: &entries,
        })
    }

    fn create_render_pipeline(&self) -> RenderPipeline {
        let pipeline_layout = self.device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("render pipeline layout"),
            bind_group_layouts: &[&self.render_layout],
            push_constant_ranges: &[],
        });

        let vertex_buffers = [
            // One drawable scalar per instance.
            VertexBufferLayout {
                array_stride: size_of::<f32>() as u64,
                step_mode: VertexStepMode::Instance,
                attributes: &[VertexAttribute {
                    format: VertexFormat::Float32,
                    offset: 0,
                    shader_location: 0,
                }],
            },
            // Unit quad corner per vertex.
            VertexBufferLayout {
                array_stride: size_of::<[u32; 2]>() as u64,
                step_mode: VertexStepMode::Vertex,
                attributes: &[VertexAttribute {
                    format: VertexFormat::Uint32x2,
                    offset: 0,
                    shader_location: 1,
                }],
            },
        ];

        self.device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("render pipeline"),
                layout: Some(&pipeline_layout),
                vertex: VertexState {
                    module: &self.render_shader,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(FragmentState {
                    module: &self.render_shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_config.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
    }

    fn create_render_bind_group(
        &self,
        _pipeline: &RenderPipeline,
        grid_size: &Buffer,
    ) -> BindGroup {
        self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("render size bind group"),
            layout: &self.render_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: grid_size.as_entire_binding(),
            }],
        })
    }

    fn submit_frame(&mut self, batch: FrameBatch<'_, Self>) -> Result<SubmitOutcome, SimError> {
        if let Some(reason) = self.lost_reason() {
            return Err(SimError::DeviceSubmission(reason));
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                self.reconfigure();
                return Ok(SubmitOutcome::Skipped);
            }
            Err(SurfaceError::Timeout) => return Ok(SubmitOutcome::Skipped),
            Err(SurfaceError::OutOfMemory) => {
                return Err(SimError::DeviceSubmission("out of memory".into()));
            }
            Err(e) => {
                log::warn!("Surface error: {e:?}");
                return Ok(SubmitOutcome::Skipped);
            }
        };
        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("compute and render encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("simulation step compute pass"),
                ..Default::default()
            });
            pass.set_pipeline(batch.compute.pipeline);
            pass.set_bind_group(0, batch.compute.bind_group, &[]);
            pass.dispatch_workgroups(batch.compute.workgroups, 1, 1);
        }

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("render pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(BACKGROUND_COLOR.to_wgpu()),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(batch.render.pipeline);
            render_pass.set_bind_group(0, batch.render.bind_group, &[]);
            render_pass.set_vertex_buffer(0, batch.render.drawable.slice(..));
            render_pass.set_vertex_buffer(1, batch.render.quad.slice(..));
            render_pass.draw(0..batch.render.vertex_count, 0..batch.render.instance_count);
        }

        // Compute and render go out in one submission so the draw sees this step's output.
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        match self.lost_reason() {
            Some(reason) => Err(SimError::DeviceSubmission(reason)),
            None => Ok(SubmitOutcome::Presented),
        }
    }
}
