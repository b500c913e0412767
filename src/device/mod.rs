//! The device contract the simulation core is written against.
//!
//! `gpu::WgpuSurface` implements it on top of wgpu and a window surface;
//! [`headless::HeadlessDevice`] implements it without a GPU so the orchestration
//! can be driven and inspected from tests and benchmarks.

use crate::error::SimError;

pub mod headless;

/// What a buffer is used for. Each backend maps this to its own usage flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRole {
    /// Ping-pong cell records, read and written by the compute stage.
    CellStorage,
    /// Per-cell scalar written by compute and read as an instance vertex buffer.
    Drawable,
    /// `[width, height]` as two `u32`, shared by compute and render.
    GridSize,
    /// The packed `UniformParams` block.
    Uniforms,
    /// Unit-quad corner offsets.
    QuadVertices,
}

/// Limits the core validates allocations against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest buffer that can be created and bound as storage.
    pub max_buffer_size: u64,
    pub max_workgroup_size: u32,
    pub max_workgroups_per_dimension: u32,
}

impl Default for DeviceLimits {
    /// Conservative limits matching wgpu's downlevel defaults.
    fn default() -> Self {
        Self {
            max_buffer_size: 128 << 20,
            max_workgroup_size: 256,
            max_workgroups_per_dimension: 65535,
        }
    }
}

/// The five compute bindings, in binding order.
pub struct ComputeBindings<'a, B> {
    pub grid_size: &'a B,
    pub source: &'a B,
    pub destination: &'a B,
    pub drawable: &'a B,
    pub uniforms: &'a B,
}

pub struct ComputeDispatch<'a, D: DeviceSurface + ?Sized> {
    pub pipeline: &'a D::ComputePipeline,
    pub bind_group: &'a D::BindGroup,
    pub workgroups: u32,
}

pub struct RenderDraw<'a, D: DeviceSurface + ?Sized> {
    pub pipeline: &'a D::RenderPipeline,
    pub bind_group: &'a D::BindGroup,
    /// Instance-rate vertex buffer (slot 0).
    pub drawable: &'a D::Buffer,
    /// Vertex-rate vertex buffer (slot 1).
    pub quad: &'a D::Buffer,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// One tick worth of device work. Both passes go into a single submission so the
/// render pass always observes the drawable written by the compute pass before it.
pub struct FrameBatch<'a, D: DeviceSurface + ?Sized> {
    pub compute: ComputeDispatch<'a, D>,
    pub render: RenderDraw<'a, D>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Presented,
    /// No surface frame was available; nothing was submitted.
    Skipped,
}

pub trait DeviceSurface {
    type Buffer;
    type ComputePipeline;
    type RenderPipeline;
    type BindGroup;

    fn limits(&self) -> DeviceLimits;

    /// Create a buffer of `size` bytes, zero-filled unless `contents` is given.
    fn create_buffer(
        &self,
        label: &str,
        role: BufferRole,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Self::Buffer;

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]);

    fn create_compute_pipeline(&self, workgroup_size: u32) -> Self::ComputePipeline;

    fn create_compute_bind_group(
        &self,
        label: &str,
        pipeline: &Self::ComputePipeline,
        bindings: ComputeBindings<'_, Self::Buffer>,
    ) -> Self::BindGroup;

    fn create_render_pipeline(&self) -> Self::RenderPipeline;

    fn create_render_bind_group(
        &self,
        pipeline: &Self::RenderPipeline,
        grid_size: &Self::Buffer,
    ) -> Self::BindGroup;

    /// Encode compute then render into one command batch, submit it and present.
    fn submit_frame(&mut self, batch: FrameBatch<'_, Self>) -> Result<SubmitOutcome, SimError>;
}
