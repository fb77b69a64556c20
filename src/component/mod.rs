//! Renderable, updatable units arranged in a tree.
//!
//! Every component carries a [`ComponentBase`]: a lifecycle, ordering keys, a
//! capability set and its own [`ResourceCollection`]. Loading a component loads
//! its resources; composites also load their children as part of the same
//! transition.
//!
//! A [`ComponentCollection`] drives a set of components through the frame:
//!
//! ```text
//! load      ascending load order
//! update    insertion order, UPDATE components
//! render    ascending draw order (ties: insertion), visible RENDER components
//! unload    reverse of load
//! ```
//!
//! Capabilities are declared when the component is built; collections only ever
//! consult that set to decide which calls to forward.

use std::time::Duration;

use bitflags::bitflags;

use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::input::KeyEvent;
use crate::lifecycle::{Lifecycle, LifecycleEvent, LifecycleState};
use crate::resource::{AsAny, ReloadReport, Resource, ResourceCollection, TextureLink};

pub mod collection;
pub mod composite;
pub mod operator;
pub mod render_target;
pub mod switcher;
pub mod viewer;

pub use collection::ComponentCollection;
pub use composite::Composite;
pub use operator::OperatorComponent;
pub use render_target::RenderTarget;
pub use switcher::ComponentSwitcher;
pub use viewer::TextureViewer;

bitflags! {
    /// Which per-frame calls a component wants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const RENDER = 1 << 0;
        const UPDATE = 1 << 1;
        const RESIZE = 1 << 2;
        const RELOAD = 1 << 3;
        const KEYBOARD = 1 << 4;
    }
}

/// Shared per-frame data passed to update and render.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameData {
    /// Frame index, starting at 0.
    pub frame: u64,
    /// Seconds since startup.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
    pub width: u32,
    pub height: u32,
}

/// State every component carries.
pub struct ComponentBase {
    lifecycle: Lifecycle,
    capabilities: Capabilities,
    load_order: i32,
    draw_order: i32,
    keyboard_priority: i32,
    visible: bool,
    resources: ResourceCollection,
    last_render: Duration,
}

impl ComponentBase {
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        let name = name.into();
        Self {
            resources: ResourceCollection::new(format!("{name}.resources")),
            lifecycle: Lifecycle::new("component", name),
            capabilities,
            load_order: 0,
            draw_order: 0,
            keyboard_priority: 0,
            visible: true,
            last_render: Duration::ZERO,
        }
    }

    pub fn with_load_order(mut self, order: i32) -> Self {
        self.load_order = order;
        self
    }

    pub fn with_draw_order(mut self, order: i32) -> Self {
        self.draw_order = order;
        self
    }

    pub fn with_keyboard_priority(mut self, priority: i32) -> Self {
        self.keyboard_priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.lifecycle.is_loaded()
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&LifecycleEvent) + 'static) {
        self.lifecycle.subscribe(observer);
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn load_order(&self) -> i32 {
        self.load_order
    }

    pub fn set_load_order(&mut self, order: i32) {
        self.load_order = order;
    }

    pub fn draw_order(&self) -> i32 {
        self.draw_order
    }

    pub fn set_draw_order(&mut self, order: i32) {
        self.draw_order = order;
    }

    pub fn keyboard_priority(&self) -> i32 {
        self.keyboard_priority
    }

    pub fn set_keyboard_priority(&mut self, priority: i32) {
        self.keyboard_priority = priority;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn resources(&self) -> &ResourceCollection {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceCollection {
        &mut self.resources
    }

    /// Wall time of the last render call.
    pub fn last_render_time(&self) -> Duration {
        self.last_render
    }

    pub(crate) fn set_last_render_time(&mut self, elapsed: Duration) {
        self.last_render = elapsed;
    }

    /// Runs a load transition: resources first, then `children`.
    ///
    /// If anything fails, whatever was loaded is unloaded again and the component
    /// returns to `Unloaded`.
    pub fn load_with(
        &mut self,
        device: &dyn GraphicsDevice,
        children: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        if !self.lifecycle.begin_load() {
            return Ok(());
        }
        let loaded = self.resources.load(device).and_then(|()| children());
        match loaded {
            Ok(()) => {
                self.lifecycle.finish_load();
                Ok(())
            }
            Err(e) => {
                self.resources.unload(device);
                self.lifecycle.abort_load(&e);
                Err(e)
            }
        }
    }

    /// Runs an unload transition: `children` first, then resources.
    pub fn unload_with(&mut self, device: &dyn GraphicsDevice, children: impl FnOnce()) {
        if !self.lifecycle.begin_unload() {
            return;
        }
        children();
        self.resources.unload(device);
        self.lifecycle.finish_unload();
    }

    /// Resolves a resource that must be present, for use during render.
    pub fn resource<T: Resource>(&self, key: &str) -> Result<&T> {
        self.resources.get::<T>(key)
    }

    pub fn resource_mut<T: Resource>(&mut self, key: &str) -> Result<&mut T> {
        self.resources.get_mut::<T>(key)
    }
}

impl std::fmt::Debug for ComponentBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBase")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("capabilities", &self.capabilities)
            .field("load_order", &self.load_order)
            .field("draw_order", &self.draw_order)
            .field("visible", &self.visible)
            .finish()
    }
}

/// A texture some component renders into, under a display name.
#[derive(Debug, Clone)]
pub struct NamedTexture {
    pub name: String,
    pub link: TextureLink,
}

impl NamedTexture {
    pub fn new(name: impl Into<String>, link: TextureLink) -> Self {
        Self {
            name: name.into(),
            link,
        }
    }
}

/// A node in the component tree.
///
/// Only `base`/`base_mut` are required. The default `load`/`unload` drive the
/// base's resources; calls for capabilities a component does not declare are
/// never made by a [`ComponentCollection`].
pub trait Component: AsAny {
    fn base(&self) -> &ComponentBase;
    fn base_mut(&mut self) -> &mut ComponentBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        self.base_mut().load_with(device, || Ok(()))
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        self.base_mut().unload_with(device, || {});
    }

    fn update(&mut self, _device: &dyn GraphicsDevice, _frame: &FrameData) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, _device: &dyn GraphicsDevice, _frame: &FrameData) -> Result<()> {
        Ok(())
    }

    fn resize(&mut self, _device: &dyn GraphicsDevice, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    /// Hot-reloads the component's resources.
    fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        self.base_mut().resources_mut().reload(device)
    }

    /// Returns true if the key was consumed.
    fn key_down(&mut self, _key: &KeyEvent) -> bool {
        false
    }

    fn key_up(&mut self, _key: &KeyEvent) -> bool {
        false
    }

    /// Textures this component and its children render into, for inspection.
    fn textures(&self) -> Vec<NamedTexture> {
        Vec::new()
    }
}
