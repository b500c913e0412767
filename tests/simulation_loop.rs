use cellsim::{
    device::headless::HeadlessDevice,
    error::{DimensionError, SimError},
    params::{Dimension, ParamId, ParameterStore},
    sim::{CommitOutcome, LoopState, SimulationLoop, TickOutcome, TickReport, frame::Source},
};

fn running(width: u32, height: u32) -> SimulationLoop<HeadlessDevice> {
    let params = ParameterStore::new()
        .with_value(ParamId::Width, width as f32)
        .with_value(ParamId::Height, height as f32);
    let mut sim = SimulationLoop::new(HeadlessDevice::new(), params, Some(42));
    sim.init().unwrap();
    sim
}

fn submitted(outcome: Result<TickOutcome, SimError>) -> TickReport {
    match outcome {
        Ok(TickOutcome::Submitted(report)) => report,
        other => panic!("expected a submitted tick, got {other:?}"),
    }
}

#[test]
fn buffers_hold_one_element_per_cell() {
    for (w, h) in [(3, 3), (4, 9), (128, 128), (256, 3)] {
        let sim = running(w, h);
        let grid = sim.grid().unwrap();
        let cells = (w * h) as u64;
        assert_eq!(grid.cells(Source::A).size(), cells * 20);
        assert_eq!(grid.cells(Source::B).size(), cells * 20);
        assert_eq!(grid.drawable().size(), cells * 4);
        assert_eq!(sim.render().unwrap().instances() as u64, cells);
    }
}

#[test]
fn source_alternates_every_tick() {
    let mut sim = running(8, 8);
    let sources: Vec<Source> = (0..6).map(|_| submitted(sim.tick()).source).collect();
    assert_eq!(
        sources,
        [Source::A, Source::B, Source::A, Source::B, Source::A, Source::B]
    );

    let grid = sim.grid().unwrap();
    let (a, b) = (grid.cells(Source::A).id(), grid.cells(Source::B).id());
    for (i, frame) in sim.device().submissions().iter().enumerate() {
        let (source, destination) = if i % 2 == 0 { (a, b) } else { (b, a) };
        assert_eq!(frame.source, source);
        assert_eq!(frame.destination, destination);
        assert_eq!(frame.drawable, frame.drawn);
    }
}

#[test]
fn uniform_block_uses_declared_offsets() {
    let mut sim = running(16, 16);
    let expected: [f32; 12] = [
        0.395, 0.967, 0.0391, 0.9995, 0.95, 0.9, 15.0, 7.0, 7.0, 3.0, 2.0, 0.0,
    ];
    assert_eq!(sim.uniforms().unwrap().floats(), expected);

    sim.set_scalar(ParamId::K33, 1.1).unwrap();
    sim.set_scalar(ParamId::AngleDiv, 3.0).unwrap();
    let floats = sim.uniforms().unwrap().floats();
    assert_eq!(floats[5], 1.1);
    assert_eq!(floats[8], 3.0);
    assert_eq!(floats[0], 0.395);
}

#[test]
fn default_grid_dispatches_2048_groups() {
    let mut sim = SimulationLoop::new(HeadlessDevice::new(), ParameterStore::new(), Some(1));
    sim.init().unwrap();
    submitted(sim.tick());
    let frame = &sim.device().submissions()[0];
    assert_eq!(frame.workgroup_size, 8);
    assert_eq!(frame.workgroups, 2048);
    assert_eq!(frame.instance_count, 128 * 128);
    assert_eq!(frame.vertex_count, 4);
}

#[test]
fn hot_patch_keeps_the_grid_and_structural_change_replaces_it() {
    let params = ParameterStore::new().with_value(ParamId::Timestep, 10.0);
    let mut sim = SimulationLoop::new(HeadlessDevice::new(), params, Some(5));
    sim.init().unwrap();
    for _ in 0..3 {
        submitted(sim.tick());
    }
    assert!(sim.frame().flipped());
    assert_eq!(sim.frame().whole_time(), 3);

    assert_eq!(sim.set_scalar(ParamId::K1, 0.5), Ok(CommitOutcome::Patched));
    assert_eq!(sim.generation(), Some(0));
    assert!(sim.frame().flipped());
    assert_eq!(sim.frame().whole_time(), 3);
    assert_eq!(sim.params().get(ParamId::K1), 0.5);

    assert_eq!(
        sim.set_dimension(Dimension::Width, 64),
        Ok(CommitOutcome::Rebuilt { generation: 1 })
    );
    assert_eq!(sim.generation(), Some(1));
    assert!(!sim.frame().flipped());
    assert_eq!(sim.frame().whole_time(), 0);
    assert_eq!(sim.grid().unwrap().width(), 64);
    assert_eq!(sim.state(), LoopState::Running);
    // The patched value survives the rebuild.
    assert_eq!(sim.uniforms().unwrap().floats()[0], 0.5);

    let report = submitted(sim.tick());
    assert_eq!(report.source, Source::A);
    assert_eq!(report.generation, 1);
}

#[test]
fn invalid_resize_leaves_the_grid_alone() {
    let mut sim = running(12, 10);
    submitted(sim.tick());
    let before = sim.grid().unwrap().cells(Source::A).contents();
    let frame = *sim.frame();

    let err = sim.set_dimension(Dimension::Width, 1).unwrap_err();
    assert!(matches!(
        err,
        SimError::InvalidDimensions {
            width: 1,
            reason: DimensionError::BelowMinimum { min: 3 },
            ..
        }
    ));

    let grid = sim.grid().unwrap();
    assert_eq!(grid.generation(), 0);
    assert_eq!((grid.width(), grid.height()), (12, 10));
    assert_eq!(grid.cells(Source::A).contents(), before);
    assert_eq!(sim.params().get(ParamId::Width), 12.0);
    assert_eq!(*sim.frame(), frame);
    assert_eq!(sim.state(), LoopState::Running);
    assert_eq!(submitted(sim.tick()).source, Source::B);
}

#[test]
fn three_by_three_runs_four_ticks() {
    let mut sim = running(3, 3);
    assert_eq!(sim.grid().unwrap().cell_count(), 9);

    let mut flipped = Vec::new();
    for _ in 0..4 {
        flipped.push(submitted(sim.tick()).flipped);
        assert_eq!(sim.grid().unwrap().drawable().floats().len(), 9);
    }
    assert_eq!(flipped, [false, true, false, true]);
    assert_eq!(sim.ticks(), 4);
    // 9 cells in groups of 8.
    assert!(sim.device().submissions().iter().all(|f| f.workgroups == 2));
}

#[test]
fn skipped_frames_do_not_flip() {
    let mut sim = running(6, 6);
    sim.device_mut().skip_frames(2);
    assert_eq!(sim.tick(), Ok(TickOutcome::Skipped));
    assert_eq!(sim.tick(), Ok(TickOutcome::Skipped));
    assert!(!sim.frame().flipped());
    assert!(sim.device().submissions().is_empty());
    assert_eq!(submitted(sim.tick()).source, Source::A);
}

#[test]
fn submission_failure_is_terminal() {
    let mut sim = running(6, 6);
    submitted(sim.tick());
    sim.device_mut().lose_device("device removed");

    let err = sim.tick().unwrap_err();
    assert_eq!(err, SimError::DeviceSubmission("device removed".into()));
    // Still pointing at B: the failed tick did not flip.
    assert!(sim.frame().flipped());
    assert_eq!(sim.state(), LoopState::Idle);
    assert_eq!(sim.tick(), Ok(TickOutcome::Idle));
}

#[test]
fn rebuild_releases_old_buffers() {
    let mut sim = running(10, 10);
    let live = sim.device().live_buffers();
    let created = sim.device().buffers_created();

    sim.set_dimension(Dimension::Height, 20).unwrap();
    assert_eq!(sim.device().live_buffers(), live);
    assert!(sim.device().buffers_created() > created);
}

#[test]
fn failed_rebuild_keeps_old_buffers() {
    let mut sim = running(10, 10);
    let a = sim.grid().unwrap().cells(Source::A).id();
    let live = sim.device().live_buffers();

    // The grid itself allocates fine; the pipeline rejects the workgroup size.
    let err = sim.set_dimension(Dimension::WorkgroupSize, 512).unwrap_err();
    assert!(matches!(
        err,
        SimError::InvalidDimensions {
            reason: DimensionError::WorkgroupSize { size: 512, .. },
            ..
        }
    ));
    assert_eq!(sim.device().live_buffers(), live);
    assert_eq!(sim.grid().unwrap().cells(Source::A).id(), a);
    assert_eq!(sim.compute().unwrap().workgroup_size(), 8);
    assert_eq!(sim.params().get(ParamId::WorkgroupSize), 8.0);
}

#[test]
fn panel_commits_apply_before_the_next_submission() {
    let mut sim = running(8, 8);
    let k2 = sim.panel().binding(ParamId::K2);
    k2.set(0.5);
    // Staged only.
    assert_eq!(sim.uniforms().unwrap().floats()[1], 0.967);

    k2.on_commit();
    submitted(sim.tick());
    assert_eq!(sim.uniforms().unwrap().floats()[1], 0.5);
    assert_eq!(sim.params().get(ParamId::K2), 0.5);
    assert_eq!(sim.generation(), Some(0));
}

#[test]
fn rejected_panel_commit_is_rolled_back() {
    let mut sim = running(8, 8);
    let width = sim.panel().binding(ParamId::Width);
    width.set(1.0);
    width.on_commit();

    let report = submitted(sim.tick());
    assert_eq!(report.generation, 0);
    assert_eq!(width.get(), 8.0);
    assert_eq!(sim.grid().unwrap().width(), 8);
}

#[test]
fn panel_structural_commit_rebuilds_between_ticks() {
    let mut sim = running(8, 8);
    submitted(sim.tick());
    let dist = sim.panel().binding(ParamId::Dist1);
    dist.set(5.0);
    dist.on_commit();

    let report = submitted(sim.tick());
    assert_eq!(report.generation, 1);
    assert_eq!(report.source, Source::A);
    assert_eq!(sim.uniforms().unwrap().floats()[9], 5.0);
}

#[test]
fn reset_reseeds_at_the_same_size() {
    let mut sim = running(5, 7);
    let before = sim.grid().unwrap().cells(Source::A).contents();
    sim.panel().request_reset();
    let report = submitted(sim.tick());
    assert_eq!(report.generation, 1);
    let grid = sim.grid().unwrap();
    assert_eq!((grid.width(), grid.height()), (5, 7));
    assert_ne!(grid.cells(Source::A).contents(), before);
}

#[test]
fn fixed_seed_reproduces_the_grid() {
    let first = running(9, 9);
    let second = running(9, 9);
    let (a, b) = (first.grid().unwrap(), second.grid().unwrap());
    assert_eq!(a.cells(Source::A).contents(), b.cells(Source::A).contents());
    assert_eq!(a.drawable().contents(), b.drawable().contents());

    let mut other = SimulationLoop::new(HeadlessDevice::new(), ParameterStore::new(), Some(43));
    other.set_dimension(Dimension::Width, 9).unwrap();
    other.set_dimension(Dimension::Height, 9).unwrap();
    other.init().unwrap();
    assert_ne!(
        other.grid().unwrap().cells(Source::A).contents(),
        a.cells(Source::A).contents()
    );
}

#[test]
fn idle_loop_stores_changes_until_init() {
    let mut sim = SimulationLoop::new(HeadlessDevice::new(), ParameterStore::new(), Some(3));
    assert_eq!(sim.tick(), Ok(TickOutcome::Idle));
    assert_eq!(
        sim.set_dimension(Dimension::Width, 20),
        Ok(CommitOutcome::Stored)
    );
    assert!(sim.grid().is_none());

    sim.init().unwrap();
    assert_eq!(sim.state(), LoopState::Running);
    assert_eq!(sim.grid().unwrap().width(), 20);
    assert_eq!(sim.generation(), Some(0));
}

#[test]
fn timestep_is_host_only() {
    let mut sim = running(4, 4);
    let before = sim.uniforms().unwrap().contents();
    sim.set_scalar(ParamId::Timestep, 3.0).unwrap();
    assert_eq!(sim.uniforms().unwrap().contents(), before);
    assert_eq!(sim.frame().timestep(), 3);

    let times: Vec<u32> = (0..4).map(|_| submitted(sim.tick()).whole_time).collect();
    assert_eq!(times, [1, 2, 0, 1]);
}

#[test]
fn fractional_grid_size_is_rejected() {
    let mut sim = running(16, 16);
    let err = sim.set_scalar(ParamId::Width, 63.6).unwrap_err();
    assert!(matches!(
        err,
        SimError::InvalidDimensions {
            reason: DimensionError::NotWhole { .. },
            ..
        }
    ));
    assert_eq!(sim.generation(), Some(0));
    assert_eq!(sim.grid().unwrap().width(), 16);
    assert_eq!(sim.params().get(ParamId::Width), 16.0);
}

#[test]
fn direct_commits_show_up_in_the_panel() {
    let mut sim = running(16, 16);
    sim.set_scalar(ParamId::K1, 0.5).unwrap();
    sim.set_dimension(Dimension::Width, 64).unwrap();
    sim.commit(ParamId::Timestep, 4.0).unwrap();

    let panel = sim.panel();
    assert_eq!(panel.binding(ParamId::K1).get(), 0.5);
    assert_eq!(panel.binding(ParamId::Width).get(), 64.0);
    assert_eq!(panel.binding(ParamId::Timestep).get(), 4.0);

    // Committing the untouched binding must not bring back the old value.
    panel.binding(ParamId::K1).on_commit();
    submitted(sim.tick());
    assert_eq!(sim.params().get(ParamId::K1), 0.5);
    assert_eq!(sim.uniforms().unwrap().floats()[0], 0.5);
}

#[test]
fn stored_commit_shows_up_in_the_panel() {
    let mut sim = SimulationLoop::new(HeadlessDevice::new(), ParameterStore::new(), Some(3));
    sim.set_dimension(Dimension::Height, 30).unwrap();
    assert_eq!(sim.panel().binding(ParamId::Height).get(), 30.0);
}

#[test]
fn reinit_after_device_loss_keeps_counting_generations() {
    let mut sim = running(8, 8);
    sim.set_dimension(Dimension::Width, 9).unwrap();
    sim.set_dimension(Dimension::Width, 10).unwrap();
    assert_eq!(sim.generation(), Some(2));

    sim.device_mut().lose_device("device removed");
    assert!(sim.tick().is_err());
    assert_eq!(sim.state(), LoopState::Idle);

    sim.init().unwrap();
    assert_eq!(sim.state(), LoopState::Running);
    assert_eq!(sim.generation(), Some(3));
    assert_eq!(sim.grid().unwrap().width(), 10);
}

#[test]
fn set_scalar_on_a_structural_parameter_rebuilds() {
    let mut sim = running(16, 16);
    assert_eq!(
        sim.set_scalar(ParamId::Width, 20.0),
        Ok(CommitOutcome::Rebuilt { generation: 1 })
    );
    assert_eq!(sim.grid().unwrap().width(), 20);
}
