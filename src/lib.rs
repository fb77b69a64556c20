//! # Glint
//!
//! **A real-time rendering framework built around explicit resource lifecycles.**
//!
//! Every GPU object (textures, buffers, framebuffers, shader programs) is a
//! [`Resource`] that is constructed cheaply, loaded onto a device, and unloaded
//! again. Components own resources and children, and a [`FrameDriver`] runs the
//! tree: hot-reload, update, render.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::rc::Rc;
//! use glint::*;
//!
//! fn main() -> Result<()> {
//!     let config = Config::from_env().shader_path("shaders").watch_path("shaders");
//!     run(config, |gpu, config| {
//!         let loader = Rc::new(config.shader_loader());
//!         let (w, h) = gpu.surface_size();
//!
//!         // draw a plasma into an off-screen target...
//!         let scene = RenderTarget::new("scene", w, h, false)
//!             .with_output(0, SlotParams::new(TextureFormat::Rgba8Unorm))?
//!             .with_child(OperatorComponent::new(
//!                 "plasma", loader.clone(), "quad.vert.wgsl", "plasma.frag.wgsl",
//!             )?);
//!
//!         // ...then sample it on screen
//!         let post = OperatorComponent::new(
//!             "post", loader, "quad.vert.wgsl", "vignette.frag.wgsl",
//!         )?
//!         .with_input(scene.output_link(0)?);
//!
//!         let mut root = ComponentCollection::new();
//!         root.add(scene);
//!         root.add(post);
//!         Ok(root)
//!     })
//! }
//! ```
//!
//! ## Philosophy
//!
//! - **Construct, then load.** Building a tree never touches the GPU; `load` does.
//! - **Hot reload without gaps.** A replacement shader is built before the old one
//!   is released, and a failed rebuild keeps the old one running.
//! - **Backend behind a trait.** [`GraphicsDevice`] is implemented by the wgpu
//!   [`GpuContext`] and by [`HeadlessDevice`] for tests.

mod app;
pub mod component;
mod config;
pub mod device;
mod driver;
mod error;
mod gpu;
mod headless;
mod image_loader;
mod input;
pub mod lifecycle;
mod loader;
mod logging;
pub mod resource;
mod watch;
pub mod wgsl;

pub use app::run;
pub use component::{
    Capabilities, Component, ComponentBase, ComponentCollection, ComponentSwitcher, Composite,
    FrameData, NamedTexture, OperatorComponent, RenderTarget, TextureViewer,
};
pub use config::Config;
pub use device::{
    BufferUsage, DepthState, FilterMode, GraphicsDevice, SamplerParams, ShaderStage,
    TextureFormat, TextureId, Viewport, WrapMode,
};
pub use driver::FrameDriver;
pub use error::{Error, Result};
pub use gpu::GpuContext;
pub use headless::{DeviceCall, HeadlessDevice};
pub use image_loader::DecodedImage;
pub use input::{KeyEvent, KeySpec};
pub use lifecycle::{Lifecycle, LifecycleEvent, LifecycleState};
pub use loader::{MemoryLoader, MultiPathLoader, ShaderLoader, split_search_string};
pub use logging::{LoggingConfig, init_logging};
pub use resource::{
    BufferData, BufferObject, DoubleBufferedTexture, FrameBuffer, GBuffer, Rebuild, Reload,
    ReloadReport, ReloadableResource, Resource, ResourceCollection, Shader, ShaderProgram,
    SharedTexture, SlotParams, Texture, TextureLink,
};
pub use watch::FileSystemPoller;

// Re-export glam math types for convenience
pub use glam::{Vec2, Vec3, Vec4};

// Re-export commonly used winit types for convenience
pub use winit::keyboard::{KeyCode, ModifiersState};
