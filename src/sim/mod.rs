//! The per-frame scheduler.
//!
//! [`SimulationLoop`] owns the grid buffers and both pipelines. The host calls
//! [`SimulationLoop::tick`] once per display refresh; each call runs to completion before
//! returning, so parameter commits (which are drained at the start of a tick) can never
//! interleave with encoding.

pub mod compute;
pub mod frame;
pub mod grid;

use fastrand::Rng;

use crate::{
    control::{ControlMessage, ControlPanel},
    device::{BufferRole, DeviceSurface, FrameBatch, SubmitOutcome},
    error::SimError,
    params::{Dimension, GridOptions, ParamClass, ParamId, ParameterStore, UniformParams},
    rendering::RenderStage,
    util,
};
use compute::ComputeStage;
use frame::{FrameState, Source};
use grid::GridState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    /// Only held for the duration of a rebuild; `&mut self` keeps it invisible to callers.
    Rebuilding,
    Running,
}

/// What a single call to [`SimulationLoop::tick`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Submitted(TickReport),
    /// The surface had no frame to give; nothing was encoded and the buffers did not swap.
    Skipped,
    /// The loop is not running.
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickReport {
    /// Buffer the compute pass read from.
    pub source: Source,
    /// Whether B was the source, i.e. the buffers had already swapped before this tick.
    pub flipped: bool,
    /// `whole_time` after the tick advanced it.
    pub whole_time: u32,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Written straight into the live parameters; the grid was untouched.
    Patched,
    /// The grid and pipelines were replaced.
    Rebuilt { generation: u64 },
    /// The loop is not running yet; the value takes effect at `init`.
    Stored,
}

/// Grid plus the pipelines built against it. Always replaced as one unit.
struct Resources<D: DeviceSurface> {
    grid: GridState<D>,
    compute: ComputeStage<D>,
    render: RenderStage<D>,
}

impl<D: DeviceSurface> Resources<D> {
    fn build(
        device: &D,
        rng: &mut Rng,
        uniforms: &D::Buffer,
        previous: Option<&GridState<D>>,
        options: GridOptions,
    ) -> Result<Self, SimError> {
        let grid = match previous {
            Some(previous) => previous.resize(device, options.width, options.height, rng)?,
            None => GridState::allocate(device, options.width, options.height, rng)?,
        };
        let compute = ComputeStage::build(device, &grid, uniforms, options.workgroup_size)?;
        let render = RenderStage::build(device, &grid);
        Ok(Self {
            grid,
            compute,
            render,
        })
    }
}

pub struct SimulationLoop<D: DeviceSurface> {
    device: D,
    params: ParameterStore,
    panel: ControlPanel,
    rng: Rng,
    uniforms: Option<D::Buffer>,
    resources: Option<Resources<D>>,
    frame: FrameState,
    state: LoopState,
    ticks: u64,
}

impl<D: DeviceSurface> SimulationLoop<D> {
    /// `seed` makes the initial cell contents reproducible; without it every allocation
    /// draws fresh randomness.
    pub fn new(device: D, params: ParameterStore, seed: Option<u64>) -> Self {
        let panel = ControlPanel::new(&params);
        let frame = FrameState::new(params.timestep());
        Self {
            device,
            params,
            panel,
            rng: seed.map_or_else(Rng::new, Rng::with_seed),
            uniforms: None,
            resources: None,
            frame,
            state: LoopState::Idle,
            ticks: 0,
        }
    }

    /// Allocate the grid and build both pipelines. Leaves the loop `Idle` on failure.
    ///
    /// After a terminal submission error this may be called again; the grid is then
    /// reallocated from the previous one, so the generation keeps counting up.
    pub fn init(&mut self) -> Result<(), SimError> {
        if self.state != LoopState::Idle {
            log::warn!("init called on a loop that is already {:?}", self.state);
            return Ok(());
        }
        let started = util::now_ms();
        let options = self.params.grid_options()?;

        let uniforms = match self.uniforms.take() {
            Some(uniforms) => uniforms,
            None => self.device.create_buffer(
                "simulation parameters buffer",
                BufferRole::Uniforms,
                size_of::<UniformParams>() as u64,
                None,
            ),
        };
        self.device
            .write_buffer(&uniforms, 0, bytemuck::bytes_of(&self.params.uniforms()));

        let previous = self.resources.as_ref().map(|r| &r.grid);
        let built = Resources::build(&self.device, &mut self.rng, &uniforms, previous, options);
        self.uniforms = Some(uniforms);
        let resources = built?;

        log::info!(
            "simulation running on a {}x{} grid, {} workgroups of {} (took {})",
            resources.grid.width(),
            resources.grid.height(),
            resources.compute.workgroups(),
            resources.compute.workgroup_size(),
            util::elapsed_since(started),
        );
        self.resources = Some(resources);
        self.frame = FrameState::new(self.params.timestep());
        self.state = LoopState::Running;
        Ok(())
    }

    /// Run one frame: apply queued commits, then encode compute and render into one batch
    /// and submit it. A submission error is terminal and leaves the loop `Idle`.
    pub fn tick(&mut self) -> Result<TickOutcome, SimError> {
        self.apply_pending();
        if self.state != LoopState::Running {
            return Ok(TickOutcome::Idle);
        }
        let Some(resources) = &self.resources else {
            return Ok(TickOutcome::Idle);
        };

        let source = self.frame.source();
        let flipped = self.frame.flipped();
        let generation = resources.grid.generation();
        let batch = FrameBatch {
            compute: resources.compute.dispatch(source),
            render: resources.render.draw(&resources.grid),
        };

        match self.device.submit_frame(batch) {
            Ok(SubmitOutcome::Presented) => {
                self.frame.advance();
                self.ticks += 1;
                Ok(TickOutcome::Submitted(TickReport {
                    source,
                    flipped,
                    whole_time: self.frame.whole_time(),
                    generation,
                }))
            }
            Ok(SubmitOutcome::Skipped) => {
                log::warn!("no surface frame available, skipping tick");
                Ok(TickOutcome::Skipped)
            }
            Err(e) => {
                log::error!("{e}; stopping the simulation");
                self.state = LoopState::Idle;
                Err(e)
            }
        }
    }

    /// Apply everything the control panel has queued. Rejected commits are logged and
    /// the panel is put back in line with the value actually in effect.
    pub fn apply_pending(&mut self) {
        for message in self.panel.drain() {
            let result = match message {
                ControlMessage::Commit { id, value } => self.commit(id, value).map(drop),
                ControlMessage::Reset => self.reset().map(drop),
            };
            if let Err(e) = result {
                log::warn!("rejected control change: {e}");
                if let ControlMessage::Commit { id, .. } = message {
                    self.panel.sync(id, self.params.get(id));
                }
            }
        }
    }

    /// Route a parameter change by its declared class. On success the control panel is
    /// updated to show the value now in effect.
    pub fn commit(&mut self, id: ParamId, value: f32) -> Result<CommitOutcome, SimError> {
        let outcome = match self.params.class(id) {
            ParamClass::HotPatch => {
                self.hot_patch(id, value);
                CommitOutcome::Patched
            }
            ParamClass::Structural => {
                let candidate = self.params.clone().with_value(id, value);
                self.rebuild(candidate)?
            }
        };
        self.panel.sync(id, self.params.get(id));
        Ok(outcome)
    }

    /// Numeric change for a hot-patchable parameter: written to the uniform buffer, or to
    /// the frame state for `timestep`. The grid is left alone.
    ///
    /// Structural ids (grid size, workgroup size, `dist_1`, `dist_2`) are not rejected.
    /// They are forwarded to [`commit`](Self::commit) and trigger a full rebuild, which
    /// the returned [`CommitOutcome::Rebuilt`] reports.
    pub fn set_scalar(&mut self, id: ParamId, value: f32) -> Result<CommitOutcome, SimError> {
        if self.params.class(id) == ParamClass::Structural {
            log::info!("{} is structural, rebuilding the grid", id.name());
        }
        self.commit(id, value)
    }

    pub fn set_dimension(
        &mut self,
        dimension: Dimension,
        value: u32,
    ) -> Result<CommitOutcome, SimError> {
        self.commit(dimension.param(), value as f32)
    }

    /// Reseed the grid with the parameters currently in effect.
    pub fn reset(&mut self) -> Result<CommitOutcome, SimError> {
        self.rebuild(self.params.clone())
    }

    fn hot_patch(&mut self, id: ParamId, value: f32) {
        self.params.set(id, value);
        match self.params.declaration(id).uniform_slot {
            Some(_) => {
                if let Some(uniforms) = &self.uniforms {
                    self.device
                        .write_buffer(uniforms, 0, bytemuck::bytes_of(&self.params.uniforms()));
                }
            }
            None => self.frame.set_timestep(self.params.timestep()),
        }
        log::debug!("{} = {value}", id.name());
    }

    /// Build a complete replacement against `candidate` and swap it in only if every
    /// piece succeeded. On failure nothing observable changes.
    fn rebuild(&mut self, candidate: ParameterStore) -> Result<CommitOutcome, SimError> {
        let options = candidate.grid_options()?;
        let (Some(uniforms), Some(current)) = (&self.uniforms, &self.resources) else {
            self.params = candidate;
            self.frame.set_timestep(self.params.timestep());
            return Ok(CommitOutcome::Stored);
        };

        let started = util::now_ms();
        let resumed = self.state;
        self.state = LoopState::Rebuilding;
        let built = Resources::build(
            &self.device,
            &mut self.rng,
            uniforms,
            Some(&current.grid),
            options,
        );
        let next = match built {
            Ok(next) => next,
            Err(e) => {
                self.state = resumed;
                return Err(e);
            }
        };

        self.device
            .write_buffer(uniforms, 0, bytemuck::bytes_of(&candidate.uniforms()));
        let generation = next.grid.generation();
        // Dropping the previous resources releases their buffers.
        self.resources = Some(next);
        self.params = candidate;
        self.frame.reset();
        self.state = resumed;

        log::info!(
            "rebuilt {}x{} grid, generation {generation} (took {})",
            options.width,
            options.height,
            util::elapsed_since(started),
        );
        Ok(CommitOutcome::Rebuilt { generation })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn frame(&self) -> &FrameState {
        &self.frame
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn panel(&self) -> &ControlPanel {
        &self.panel
    }

    pub fn grid(&self) -> Option<&GridState<D>> {
        self.resources.as_ref().map(|r| &r.grid)
    }

    pub fn compute(&self) -> Option<&ComputeStage<D>> {
        self.resources.as_ref().map(|r| &r.compute)
    }

    pub fn render(&self) -> Option<&RenderStage<D>> {
        self.resources.as_ref().map(|r| &r.render)
    }

    pub fn uniforms(&self) -> Option<&D::Buffer> {
        self.uniforms.as_ref()
    }

    pub fn generation(&self) -> Option<u64> {
        self.grid().map(GridState::generation)
    }

    /// Ticks submitted since the loop was created.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}
