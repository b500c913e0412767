use crate::{
    device::{BufferRole, DeviceSurface, RenderDraw},
    sim::grid::GridState,
    util::Color,
};

/// Corner offsets of the unit quad, drawn as a triangle strip.
pub const QUAD_CORNERS: [u32; 8] = [0, 0, 0, 1, 1, 0, 1, 1];
pub const QUAD_VERTICES: u32 = 4;

/// Colour the frame is cleared to before the cells are drawn.
pub const BACKGROUND_COLOR: Color = Color::rgb(191, 191, 191);

/// Instanced quad pipeline: one instance per cell, coloured from the drawable buffer.
pub struct RenderStage<D: DeviceSurface> {
    pipeline: D::RenderPipeline,
    bind_group: D::BindGroup,
    quad: D::Buffer,
    instances: u32,
}

impl<D: DeviceSurface> RenderStage<D> {
    pub fn build(device: &D, grid: &GridState<D>) -> Self {
        let pipeline = device.create_render_pipeline();
        let bind_group = device.create_render_bind_group(&pipeline, grid.grid_size());
        let quad_bytes: &[u8] = bytemuck::cast_slice(&QUAD_CORNERS);
        let quad = device.create_buffer(
            "unit quad buffer",
            BufferRole::QuadVertices,
            quad_bytes.len() as u64,
            Some(quad_bytes),
        );
        Self {
            pipeline,
            bind_group,
            quad,
            instances: grid.cell_count(),
        }
    }

    pub fn instances(&self) -> u32 {
        self.instances
    }

    pub fn draw<'a>(&'a self, grid: &'a GridState<D>) -> RenderDraw<'a, D> {
        RenderDraw {
            pipeline: &self.pipeline,
            bind_group: &self.bind_group,
            drawable: grid.drawable(),
            quad: &self.quad,
            vertex_count: QUAD_VERTICES,
            instance_count: self.instances,
        }
    }
}
