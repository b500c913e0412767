//! A device that keeps buffers in host memory and records submissions instead of
//! running them. Shaders never execute here, so buffer contents only change through
//! `create_buffer` and `write_buffer`.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use super::{
    BufferRole, ComputeBindings, DeviceLimits, DeviceSurface, FrameBatch, SubmitOutcome,
};
use crate::error::SimError;

#[derive(Clone, Debug)]
pub struct HeadlessBuffer {
    id: usize,
    role: BufferRole,
    data: Rc<RefCell<Vec<u8>>>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn size(&self) -> u64 {
        self.data.borrow().len() as u64
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// Contents as little-endian `u32` words.
    pub fn words(&self) -> Vec<u32> {
        self.data
            .borrow()
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    /// Contents as `f32` words.
    pub fn floats(&self) -> Vec<f32> {
        self.words().into_iter().map(f32::from_bits).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessComputePipeline {
    pub workgroup_size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessRenderPipeline;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessBindGroup {
    Compute {
        grid_size: usize,
        source: usize,
        destination: usize,
        drawable: usize,
        uniforms: usize,
    },
    Render {
        grid_size: usize,
    },
}

/// Everything a submitted frame referenced, by buffer id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedFrame {
    pub workgroup_size: u32,
    pub workgroups: u32,
    pub source: usize,
    pub destination: usize,
    pub drawable: usize,
    pub drawn: usize,
    pub quad: usize,
    pub vertex_count: u32,
    pub instance_count: u32,
}

#[derive(Default)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    next_id: Cell<usize>,
    allocations: RefCell<Vec<Weak<RefCell<Vec<u8>>>>>,
    submissions: Vec<SubmittedFrame>,
    skip_frames: u32,
    lost: Option<String>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn submissions(&self) -> &[SubmittedFrame] {
        &self.submissions
    }

    /// Buffers that are still referenced by someone.
    pub fn live_buffers(&self) -> usize {
        self.allocations
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn buffers_created(&self) -> usize {
        self.next_id.get()
    }

    /// Make the next `frames` submissions report that no surface frame was available.
    pub fn skip_frames(&mut self, frames: u32) {
        self.skip_frames = frames;
    }

    /// Reject every submission from now on, as a lost device would.
    pub fn lose_device(&mut self, reason: impl Into<String>) {
        self.lost = Some(reason.into());
    }
}

impl DeviceSurface for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type ComputePipeline = HeadlessComputePipeline;
    type RenderPipeline = HeadlessRenderPipeline;
    type BindGroup = HeadlessBindGroup;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(
        &self,
        label: &str,
        role: BufferRole,
        size: u64,
        contents: Option<&[u8]>,
    ) -> HeadlessBuffer {
        let mut data = vec![0u8; size as usize];
        if let Some(contents) = contents {
            let n = contents.len().min(data.len());
            data[..n].copy_from_slice(&contents[..n]);
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        log::trace!("headless: created {label} (#{id}, {size} bytes)");
        let data = Rc::new(RefCell::new(data));
        self.allocations.borrow_mut().push(Rc::downgrade(&data));
        HeadlessBuffer { id, role, data }
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, bytes: &[u8]) {
        let mut data = buffer.data.borrow_mut();
        let start = offset as usize;
        let Some(end) = start.checked_add(bytes.len()).filter(|end| *end <= data.len()) else {
            log::error!(
                "headless: write of {} bytes at {offset} overruns buffer #{}",
                bytes.len(),
                buffer.id
            );
            return;
        };
        data[start..end].copy_from_slice(bytes);
    }

    fn create_compute_pipeline(&self, workgroup_size: u32) -> HeadlessComputePipeline {
        HeadlessComputePipeline { workgroup_size }
    }

    fn create_compute_bind_group(
        &self,
        _label: &str,
        _pipeline: &HeadlessComputePipeline,
        bindings: ComputeBindings<'_, HeadlessBuffer>,
    ) -> HeadlessBindGroup {
        HeadlessBindGroup::Compute {
            grid_size: bindings.grid_size.id,
            source: bindings.source.id,
            destination: bindings.destination.id,
            drawable: bindings.drawable.id,
            uniforms: bindings.uniforms.id,
        }
    }

    fn create_render_pipeline(&self) -> HeadlessRenderPipeline {
        HeadlessRenderPipeline
    }

    fn create_render_bind_group(
        &self,
        _pipeline: &HeadlessRenderPipeline,
        grid_size: &HeadlessBuffer,
    ) -> HeadlessBindGroup {
        HeadlessBindGroup::Render {
            grid_size: grid_size.id,
        }
    }

    fn submit_frame(&mut self, batch: FrameBatch<'_, Self>) -> Result<SubmitOutcome, SimError> {
        if let Some(reason) = &self.lost {
            return Err(SimError::DeviceSubmission(reason.clone()));
        }
        if self.skip_frames > 0 {
            self.skip_frames -= 1;
            return Ok(SubmitOutcome::Skipped);
        }
        let HeadlessBindGroup::Compute {
            source,
            destination,
            drawable,
            ..
        } = *batch.compute.bind_group
        else {
            return Err(SimError::DeviceSubmission(
                "compute pass bound a render bind group".into(),
            ));
        };
        self.submissions.push(SubmittedFrame {
            workgroup_size: batch.compute.pipeline.workgroup_size,
            workgroups: batch.compute.workgroups,
            source,
            destination,
            drawable,
            drawn: batch.render.drawable.id,
            quad: batch.render.quad.id,
            vertex_count: batch.render.vertex_count,
            instance_count: batch.render.instance_count,
        });
        Ok(SubmitOutcome::Presented)
    }
}
