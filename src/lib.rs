use std::sync::Arc;

use wasm_bindgen::prelude::*;
#[cfg(target_arch = "wasm32")]
use web_sys::HtmlCanvasElement;
use winit::{
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::WindowAttributes,
};

#[cfg(target_arch = "wasm32")]
use winit::platform::web::WindowAttributesExtWebSys;

use crate::{
    config::AppConfig,
    error::SimError,
    gpu::WgpuSurface,
    params::ParameterStore,
    sim::{SimulationLoop, TickOutcome},
};

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod gpu;
pub mod params;
pub mod rendering;
pub mod sim;
pub mod util;

/// Id of the canvas the web build renders into.
pub const CANVAS_ID: &str = "sim-surface";

/// Message type for GPU surface events
pub enum GpuMessage {
    Initialized(WgpuSurface),
    Error(String),
}

struct Application {
    proxy: Option<EventLoopProxy<GpuMessage>>,
    simulation: Option<SimulationLoop<WgpuSurface>>,
    config: AppConfig,
}

impl Application {
    fn new(event_loop: &EventLoop<GpuMessage>, config: AppConfig) -> Self {
        Self {
            proxy: Some(event_loop.create_proxy()),
            simulation: None,
            config,
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(simulation) = self.simulation.as_mut() else {
            return;
        };
        match simulation.tick() {
            Ok(TickOutcome::Submitted(_) | TickOutcome::Skipped) => {
                simulation.device().request_redraw();
            }
            Ok(TickOutcome::Idle) => {}
            Err(e) => {
                log::error!("simulation stopped: {e}");
                event_loop.exit();
            }
        }
    }

    fn key_pressed(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.logical_key {
            Key::Named(NamedKey::Escape) => event_loop.exit(),
            Key::Character(c) if c.eq_ignore_ascii_case("r") => {
                if let Some(simulation) = &self.simulation {
                    simulation.panel().request_reset();
                }
            }
            _ => {}
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn window_attributes() -> Result<WindowAttributes, SimError> {
    let missing = |what: &str| SimError::Initialization(format!("could not get {what}"));
    let canvas: HtmlCanvasElement = web_sys::window()
        .ok_or_else(|| missing("window"))?
        .document()
        .ok_or_else(|| missing("document"))?
        .get_element_by_id(CANVAS_ID)
        .ok_or_else(|| missing(&format!("element with id `{CANVAS_ID}`")))?
        .dyn_into()
        .map_err(|_| SimError::Initialization(format!("`{CANVAS_ID}` is not a canvas")))?;
    Ok(WindowAttributes::default().with_canvas(Some(canvas)))
}

#[cfg(not(target_arch = "wasm32"))]
fn window_attributes() -> Result<WindowAttributes, SimError> {
    Ok(WindowAttributes::default().with_title("cellsim"))
}

impl winit::application::ApplicationHandler<GpuMessage> for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(proxy) = self.proxy.take() else {
            return;
        };
        let window = window_attributes().and_then(|attrs| {
            event_loop
                .create_window(attrs)
                .map_err(|e| SimError::Initialization(e.to_string()))
        });
        let window = match window {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        let connect = async move {
            let message = match WgpuSurface::new(window).await {
                Ok(surface) => GpuMessage::Initialized(surface),
                Err(e) => GpuMessage::Error(format!("{e:#}")),
            };
            let _ = proxy.send_event(message);
        };

        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(connect);

        // On native, use pollster to block on the future
        #[cfg(not(target_arch = "wasm32"))]
        pollster::block_on(connect);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.simulation = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(simulation) = self.simulation.as_mut() {
                    simulation.device_mut().resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.key_pressed(event_loop, event),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => (),
        };
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: GpuMessage) {
        match event {
            GpuMessage::Initialized(surface) => {
                let mut simulation =
                    SimulationLoop::new(surface, ParameterStore::new(), self.config.seed);
                if let Err(e) = simulation.init() {
                    log::error!("{e}");
                    event_loop.exit();
                    return;
                }
                #[cfg(target_arch = "wasm32")]
                web::install(simulation.panel());

                // Request first redraw to kick off the animation loop
                simulation.device().request_redraw();
                self.simulation = Some(simulation);
            }
            GpuMessage::Error(e) => {
                log::error!("{}", SimError::Initialization(e));
                event_loop.exit();
            }
        }
    }
}

/// Log to stderr with RFC 3339 timestamps.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("wgpu_core", log::LevelFilter::Warn)
        .level_for("wgpu_hal", log::LevelFilter::Warn)
        .level_for("naga", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn initialize() {
    console_error_panic_hook::set_once();
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Debug)
        .level_for("wgpu_core", log::LevelFilter::Warn)
        .level_for("wgpu_hal", log::LevelFilter::Warn)
        .chain(fern::Output::call(console_log::log))
        .apply();
}

/// Open a window and run the simulation until it is closed.
pub fn run(config: AppConfig) -> anyhow::Result<()> {
    log::info!("Starting cell simulation with GPU rendering");

    let event_loop = EventLoop::<GpuMessage>::with_user_event().build()?;

    #[allow(unused_mut)]
    let mut app = Application::new(&event_loop, config);

    // On web, we need to spawn the event loop
    #[cfg(target_arch = "wasm32")]
    {
        use winit::platform::web::EventLoopExtWebSys;
        event_loop.spawn_app(app);
    }

    #[cfg(not(target_arch = "wasm32"))]
    event_loop.run_app(&mut app)?;

    Ok(())
}

/// Start the cell simulation with GPU rendering
#[wasm_bindgen]
pub fn start() {
    if let Err(e) = run(AppConfig::default()) {
        log::error!("{e:#}");
    }
}

/// Parameter exports for a page-side control panel. Edits are staged until
/// `commit_parameter`; the simulation applies commits between frames.
#[cfg(target_arch = "wasm32")]
mod web {
    use std::cell::RefCell;

    use wasm_bindgen::prelude::*;

    use crate::control::{ControlPanel, NamedControls, ParamBinding};

    // WASM is single-threaded
    thread_local! {
        static CONTROLS: RefCell<Option<NamedControls>> = const { RefCell::new(None) };
    }

    pub(crate) fn install(panel: &ControlPanel) {
        let mut controls = NamedControls::default();
        panel.register(&mut controls);
        CONTROLS.with(|c| *c.borrow_mut() = Some(controls));
    }

    fn with_binding<T>(name: &str, f: impl FnOnce(&ParamBinding) -> T) -> Result<T, JsValue> {
        CONTROLS.with(|c| {
            let controls = c.borrow();
            let controls = controls
                .as_ref()
                .ok_or_else(|| JsValue::from_str("simulation is not running yet"))?;
            let binding = controls
                .parameter(name)
                .ok_or_else(|| JsValue::from_str(&format!("unknown parameter `{name}`")))?;
            Ok(f(binding))
        })
    }

    #[wasm_bindgen]
    pub fn set_parameter(name: &str, value: f32) -> Result<(), JsValue> {
        with_binding(name, |b| b.set(value))
    }

    #[wasm_bindgen]
    pub fn get_parameter(name: &str) -> Result<f32, JsValue> {
        with_binding(name, ParamBinding::get)
    }

    #[wasm_bindgen]
    pub fn commit_parameter(name: &str) -> Result<(), JsValue> {
        with_binding(name, ParamBinding::on_commit)
    }

    /// `[min, max]`, plus the step when the parameter has one.
    #[wasm_bindgen]
    pub fn parameter_range(name: &str) -> Result<Vec<f32>, JsValue> {
        with_binding(name, |b| {
            let range = b.range();
            let mut out = vec![range.min, range.max];
            out.extend(range.step);
            out
        })
    }

    #[wasm_bindgen]
    pub fn parameter_names() -> Vec<String> {
        CONTROLS.with(|c| {
            c.borrow()
                .as_ref()
                .map(|controls| controls.names().map(str::to_string).collect())
                .unwrap_or_default()
        })
    }

    #[wasm_bindgen]
    pub fn reset_simulation() -> Result<(), JsValue> {
        CONTROLS.with(|c| match c.borrow().as_ref() {
            Some(controls) if controls.trigger("Reset Game Data") => Ok(()),
            _ => Err(JsValue::from_str("simulation is not running yet")),
        })
    }
}
