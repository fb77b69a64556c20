//! Demo: a plasma rendered off-screen, then vignetted onto the window.
//!
//! Shaders are read from `./shaders` (or `GLINT_SHADER_PATH`) and reloaded when
//! they change on disk. Tab cycles the post pass, the raw scene and a texture
//! viewer; PageUp/PageDown page through the scene's outputs in the viewer.

use std::rc::Rc;

use glint::{
    BufferData, Component, ComponentBase, ComponentCollection, ComponentSwitcher, Config,
    FrameData, GraphicsDevice, KeyEvent, OperatorComponent, ReloadReport, RenderTarget,
    SlotParams, TextureFormat, TextureViewer,
};
use winit::keyboard::KeyCode;

/// Post-processing views; Tab cycles through them.
struct Views {
    switcher: ComponentSwitcher,
}

impl Component for Views {
    fn base(&self) -> &ComponentBase {
        self.switcher.base()
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        self.switcher.base_mut()
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> glint::Result<()> {
        self.switcher.load(device)
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        self.switcher.unload(device);
    }

    fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> glint::Result<()> {
        self.switcher.update(device, frame)
    }

    fn render(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> glint::Result<()> {
        self.switcher.render(device, frame)
    }

    fn resize(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32) -> glint::Result<()> {
        self.switcher.resize(device, width, height)
    }

    fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        self.switcher.reload(device)
    }

    fn key_down(&mut self, key: &KeyEvent) -> bool {
        if !key.is(KeyCode::Tab) {
            return self.switcher.key_down(key);
        }
        self.switcher.next();
        true
    }
}

fn frame_uniforms(frame: &FrameData) -> BufferData {
    BufferData::Float(vec![
        frame.time,
        frame.width as f32,
        frame.height as f32,
        0.0,
    ])
}

fn main() {
    let config = Config::from_env()
        .title("glint")
        .shader_path("shaders")
        .watch_path("shaders");

    let result = glint::run(config, |gpu, config| {
        let loader = Rc::new(config.shader_loader());
        let (width, height) = gpu.surface_size();

        let plasma = OperatorComponent::new(
            "plasma",
            loader.clone(),
            "quad.vert.wgsl",
            "plasma.frag.wgsl",
        )?
        .with_uniform_source(frame_uniforms(&FrameData::default()), frame_uniforms);

        let scene = RenderTarget::new("scene", width, height, false)
            .with_output(0, SlotParams::new(TextureFormat::Rgba8Unorm))?
            .with_clear(Some([0.0, 0.0, 0.0, 1.0]), None)
            .with_child(plasma);
        let scene_output = scene.output_link(0)?;

        let vignette = OperatorComponent::new(
            "vignette",
            loader.clone(),
            "quad.vert.wgsl",
            "vignette.frag.wgsl",
        )?
        .with_input(scene_output.clone());
        let raw = OperatorComponent::new(
            "raw",
            loader,
            "quad.vert.wgsl",
            "passthrough.frag.wgsl",
        )?
        .with_input(scene_output);

        let viewer = TextureViewer::new("viewer")?.with_sources(scene.textures());

        let views = Views {
            switcher: ComponentSwitcher::new("views")
                .with_child(vignette)
                .with_child(raw)
                .with_child(viewer),
        };

        let mut root = ComponentCollection::new();
        root.add_with_load_order(scene, 0);
        root.add_with_load_order(views, 1);
        Ok(root)
    });

    if let Err(e) = result {
        eprintln!("glint: {e}");
        std::process::exit(1);
    }
}
