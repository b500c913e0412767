use super::{frame::Source, grid::GridState};
use crate::{
    device::{ComputeBindings, ComputeDispatch, DeviceSurface},
    error::{DimensionError, SimError},
};

/// Workgroups needed so that every cell gets an invocation. The shader discards the
/// invocations past the last cell.
pub fn dispatch_count(cell_count: u32, workgroup_size: u32) -> u32 {
    cell_count.div_ceil(workgroup_size.max(1))
}

/// The compute pipeline plus one immutable bind group per ping-pong direction.
pub struct ComputeStage<D: DeviceSurface> {
    pipeline: D::ComputePipeline,
    from_a: D::BindGroup,
    from_b: D::BindGroup,
    workgroup_size: u32,
    workgroups: u32,
}

impl<D: DeviceSurface> ComputeStage<D> {
    pub fn build(
        device: &D,
        grid: &GridState<D>,
        uniforms: &D::Buffer,
        workgroup_size: u32,
    ) -> Result<Self, SimError> {
        let limits = device.limits();
        let reject = |reason| SimError::InvalidDimensions {
            width: grid.width(),
            height: grid.height(),
            reason,
        };
        if workgroup_size == 0 || workgroup_size > limits.max_workgroup_size {
            return Err(reject(DimensionError::WorkgroupSize {
                size: workgroup_size,
                max: limits.max_workgroup_size,
            }));
        }
        let workgroups = dispatch_count(grid.cell_count(), workgroup_size);
        if workgroups > limits.max_workgroups_per_dimension {
            return Err(reject(DimensionError::TooManyWorkgroups {
                groups: workgroups as u64,
                limit: limits.max_workgroups_per_dimension,
            }));
        }

        let pipeline = device.create_compute_pipeline(workgroup_size);
        let bindings = |source: Source| ComputeBindings {
            grid_size: grid.grid_size(),
            source: grid.cells(source),
            destination: grid.cells(source.destination()),
            drawable: grid.drawable(),
            uniforms,
        };
        let from_a = device.create_compute_bind_group(
            "compute bind group (A -> B)",
            &pipeline,
            bindings(Source::A),
        );
        let from_b = device.create_compute_bind_group(
            "compute bind group (B -> A)",
            &pipeline,
            bindings(Source::B),
        );

        Ok(Self {
            pipeline,
            from_a,
            from_b,
            workgroup_size,
            workgroups,
        })
    }

    pub fn bind_group(&self, source: Source) -> &D::BindGroup {
        match source {
            Source::A => &self.from_a,
            Source::B => &self.from_b,
        }
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    pub fn workgroups(&self) -> u32 {
        self.workgroups
    }

    pub fn dispatch(&self, source: Source) -> ComputeDispatch<'_, D> {
        ComputeDispatch {
            pipeline: &self.pipeline,
            bind_group: self.bind_group(source),
            workgroups: self.workgroups,
        }
    }
}
