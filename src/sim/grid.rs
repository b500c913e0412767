//! Cell storage: two ping-pong record buffers, the drawable scalar buffer and the grid
//! size uniform, allocated together and replaced together.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use fastrand::Rng;

use super::frame::Source;
use crate::{
    device::{BufferRole, DeviceLimits, DeviceSurface},
    error::{DimensionError, SimError},
};

/// Smallest grid side the update rule supports.
pub const MIN_EXTENT: u32 = 3;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CellRecord {
    pub value: f32,
    pub status: f32,
    pub angle: f32,
    pub direction_x: f32,
    pub direction_y: f32,
}

// Must match `struct Cell` in shader.wgsl.
const _: () = {
    assert!(size_of::<CellRecord>() == 20);
    assert!(offset_of!(CellRecord, value) == 0);
    assert!(offset_of!(CellRecord, status) == 4);
    assert!(offset_of!(CellRecord, angle) == 8);
    assert!(offset_of!(CellRecord, direction_x) == 12);
    assert!(offset_of!(CellRecord, direction_y) == 16);
};

impl CellRecord {
    pub fn random(rng: &mut Rng) -> Self {
        Self {
            value: rng.f32(),
            status: rng.f32(),
            angle: rng.f32(),
            direction_x: rng.f32(),
            direction_y: rng.f32(),
        }
    }
}

/// Validated grid extents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    width: u32,
    height: u32,
}

impl GridLayout {
    pub fn new(width: u32, height: u32, limits: &DeviceLimits) -> Result<Self, SimError> {
        let reject = |reason| SimError::InvalidDimensions {
            width,
            height,
            reason,
        };
        if width < MIN_EXTENT || height < MIN_EXTENT {
            return Err(reject(DimensionError::BelowMinimum { min: MIN_EXTENT }));
        }
        let required = (width as u64)
            .checked_mul(height as u64)
            .and_then(|cells| cells.checked_mul(size_of::<CellRecord>() as u64))
            .unwrap_or(u64::MAX);
        if required > limits.max_buffer_size || width.checked_mul(height).is_none() {
            return Err(reject(DimensionError::ExceedsBufferLimit {
                required,
                limit: limits.max_buffer_size,
            }));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cell_count(&self) -> u32 {
        self.width * self.height
    }
}

pub struct GridState<D: DeviceSurface> {
    layout: GridLayout,
    buffer_a: D::Buffer,
    buffer_b: D::Buffer,
    drawable: D::Buffer,
    grid_size: D::Buffer,
    generation: u64,
}

impl<D: DeviceSurface> GridState<D> {
    /// Allocate a freshly seeded grid at generation zero.
    pub fn allocate(device: &D, width: u32, height: u32, rng: &mut Rng) -> Result<Self, SimError> {
        Self::allocate_generation(device, width, height, rng, 0)
    }

    /// Build the replacement for `self`. Nothing about `self` changes; the caller swaps the
    /// result in once everything that depends on it has been rebuilt too.
    pub fn resize(
        &self,
        device: &D,
        width: u32,
        height: u32,
        rng: &mut Rng,
    ) -> Result<Self, SimError> {
        Self::allocate_generation(device, width, height, rng, self.generation + 1)
    }

    fn allocate_generation(
        device: &D,
        width: u32,
        height: u32,
        rng: &mut Rng,
        generation: u64,
    ) -> Result<Self, SimError> {
        let layout = GridLayout::new(width, height, &device.limits())?;
        let count = layout.cell_count() as usize;

        let cells: Vec<CellRecord> = (0..count).map(|_| CellRecord::random(rng)).collect();
        let drawable: Vec<f32> = (0..count).map(|_| rng.f32()).collect();
        let cell_bytes: &[u8] = bytemuck::cast_slice(&cells);
        let drawable_bytes: &[u8] = bytemuck::cast_slice(&drawable);

        let buffer_a = device.create_buffer(
            "cells buffer A",
            BufferRole::CellStorage,
            cell_bytes.len() as u64,
            Some(cell_bytes),
        );
        let buffer_b = device.create_buffer(
            "cells buffer B",
            BufferRole::CellStorage,
            cell_bytes.len() as u64,
            None,
        );
        let drawable = device.create_buffer(
            "drawable buffer",
            BufferRole::Drawable,
            drawable_bytes.len() as u64,
            Some(drawable_bytes),
        );
        let size = [width, height];
        let grid_size = device.create_buffer(
            "grid size buffer",
            BufferRole::GridSize,
            size_of::<[u32; 2]>() as u64,
            Some(bytemuck::cast_slice(&size)),
        );

        Ok(Self {
            layout,
            buffer_a,
            buffer_b,
            drawable,
            grid_size,
            generation,
        })
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.layout.width
    }

    pub fn height(&self) -> u32 {
        self.layout.height
    }

    pub fn cell_count(&self) -> u32 {
        self.layout.cell_count()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cells(&self, which: Source) -> &D::Buffer {
        match which {
            Source::A => &self.buffer_a,
            Source::B => &self.buffer_b,
        }
    }

    pub fn drawable(&self) -> &D::Buffer {
        &self.drawable
    }

    pub fn grid_size(&self) -> &D::Buffer {
        &self.grid_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    #[test]
    fn buffers_hold_one_element_per_cell() {
        let device = HeadlessDevice::new();
        let mut rng = Rng::with_seed(7);
        for (w, h) in [(3, 3), (3, 17), (128, 128), (200, 31)] {
            let grid = GridState::allocate(&device, w, h, &mut rng).unwrap();
            let cells = (w * h) as u64;
            assert_eq!(grid.cells(Source::A).size(), cells * 20);
            assert_eq!(grid.cells(Source::B).size(), cells * 20);
            assert_eq!(grid.drawable().size(), cells * 4);
            assert_eq!(grid.grid_size().floats().len(), 2);
            assert_eq!(grid.cell_count() as u64, cells);
        }
    }

    #[test]
    fn seeded_cells_are_unit_interval() {
        let device = HeadlessDevice::new();
        let grid = GridState::allocate(&device, 8, 8, &mut Rng::with_seed(1)).unwrap();
        let words = grid.cells(Source::A).floats();
        assert!(words.iter().all(|v| (0.0..1.0).contains(v)));
        assert!(grid.cells(Source::B).floats().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn grid_size_buffer_holds_extents() {
        let device = HeadlessDevice::new();
        let grid = GridState::allocate(&device, 5, 9, &mut Rng::with_seed(1)).unwrap();
        assert_eq!(grid.grid_size().words(), [5, 9]);
    }

    #[test]
    fn rejects_tiny_grids() {
        let device = HeadlessDevice::new();
        let err = GridState::allocate(&device, 2, 10, &mut Rng::with_seed(1)).err();
        assert!(matches!(
            err,
            Some(SimError::InvalidDimensions {
                width: 2,
                reason: DimensionError::BelowMinimum { min: 3 },
                ..
            })
        ));
    }

    #[test]
    fn rejects_grids_over_the_buffer_limit() {
        let limits = DeviceLimits {
            max_buffer_size: 20 * 100,
            ..DeviceLimits::default()
        };
        assert!(GridLayout::new(10, 10, &limits).is_ok());
        assert!(matches!(
            GridLayout::new(10, 11, &limits),
            Err(SimError::InvalidDimensions {
                reason: DimensionError::ExceedsBufferLimit { required: 2200, .. },
                ..
            })
        ));
        assert!(GridLayout::new(u32::MAX, u32::MAX, &DeviceLimits::default()).is_err());
    }

    #[test]
    fn resize_bumps_generation() {
        let device = HeadlessDevice::new();
        let mut rng = Rng::with_seed(3);
        let grid = GridState::allocate(&device, 4, 4, &mut rng).unwrap();
        let next = grid.resize(&device, 6, 4, &mut rng).unwrap();
        assert_eq!(grid.generation(), 0);
        assert_eq!(next.generation(), 1);
        assert_eq!((next.width(), next.height()), (6, 4));
    }
}
