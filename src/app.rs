//! Windowed runner: a winit event loop driving a [`FrameDriver`] on a [`GpuContext`].

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::ModifiersState;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::component::ComponentCollection;
use crate::config::Config;
use crate::driver::FrameDriver;
use crate::error::{Error, Result};
use crate::gpu::GpuContext;
use crate::input::KeyEvent;
use crate::logging::init_logging;

type SetupFn = Box<dyn FnOnce(&GpuContext, &Config) -> Result<ComponentCollection>>;

/// Opens a window, builds the component tree with `setup` and runs it until the
/// window closes.
///
/// Startup failures (no adapter, a shader that does not compile on first load)
/// end the loop and are returned.
///
/// # Example
/// ```no_run
/// use glint::{ComponentCollection, Config, OperatorComponent};
///
/// glint::run(Config::from_env().title("Plasma"), |_gpu, config| {
///     let loader = std::rc::Rc::new(config.shader_loader());
///     let mut root = ComponentCollection::new();
///     root.add(OperatorComponent::new("plasma", loader, "quad.vert.wgsl", "plasma.wgsl")?);
///     Ok(root)
/// })
/// .unwrap();
/// ```
pub fn run<S>(config: Config, setup: S) -> Result<()>
where
    S: FnOnce(&GpuContext, &Config) -> Result<ComponentCollection> + 'static,
{
    init_logging(config.logging.clone());
    let event_loop = EventLoop::new().map_err(|e| Error::Device(e.to_string()))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = GlintApp::Pending {
        config,
        setup: Some(Box::new(setup)),
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| Error::Device(e.to_string()))?;

    match app {
        GlintApp::Failed(e) => Err(e),
        _ => Ok(()),
    }
}

enum GlintApp {
    Pending {
        config: Config,
        setup: Option<SetupFn>,
    },
    Running {
        window: Arc<Window>,
        driver: FrameDriver<GpuContext>,
        modifiers: ModifiersState,
    },
    Failed(Error),
    Finished,
}

impl GlintApp {
    fn start(event_loop: &ActiveEventLoop, config: &Config, setup: SetupFn) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|e| Error::Device(e.to_string()))?,
        );
        let gpu = GpuContext::new(window.clone())?;
        let root = setup(&gpu, config)?;
        let (width, height) = gpu.surface_size();

        let mut driver = FrameDriver::new(gpu, root, width, height);
        if let Some(poller) = config.poller() {
            log::info!("watching {:?} for changes", poller.paths());
            driver = driver.with_poller(poller);
        }
        driver.startup()?;
        window.request_redraw();
        Ok(GlintApp::Running {
            window,
            driver,
            modifiers: ModifiersState::empty(),
        })
    }
}

impl ApplicationHandler for GlintApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let GlintApp::Pending { config, setup } = self else {
            return;
        };
        let Some(setup) = setup.take() else {
            return;
        };
        *self = match GlintApp::start(event_loop, config, setup) {
            Ok(running) => running,
            Err(e) => {
                log::error!("startup failed: {e}");
                event_loop.exit();
                GlintApp::Failed(e)
            }
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let GlintApp::Running {
            window,
            driver,
            modifiers,
        } = self
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                driver.shutdown();
                *self = GlintApp::Finished;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                driver.device().resize(size.width, size.height);
                if let Err(e) = driver.resize(size.width, size.height) {
                    log::error!("resize failed: {e}");
                }
            }
            WindowEvent::ModifiersChanged(m) => *modifiers = m.state(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let Some((key, state)) = KeyEvent::from_winit(&event, *modifiers) {
                    let consumed = match state {
                        ElementState::Pressed => driver.key_down(&key),
                        ElementState::Released => driver.key_up(&key),
                    };
                    if !consumed {
                        log::trace!("unhandled key {}", key.spec);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = driver.device().begin_frame() {
                    log::warn!("skipping frame: {e}");
                } else {
                    if let Err(e) = driver.frame() {
                        log::error!("frame {} failed: {e}", driver.frame_count());
                    }
                    driver.device().end_frame();
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}
