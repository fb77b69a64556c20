//! On-screen inspection of intermediate textures.

use winit::keyboard::KeyCode;

use crate::component::{
    Capabilities, Component, ComponentBase, FrameData, NamedTexture, OperatorComponent,
};
use crate::device::{GraphicsDevice, TextureId};
use crate::error::Result;
use crate::input::{KeyEvent, KeySpec};
use crate::resource::{ReloadReport, TextureLink};

const VIEW_VERTEX: &str = include_str!("../../shaders/quad.vert.wgsl");
const VIEW_FRAGMENT: &str = include_str!("../../shaders/passthrough.frag.wgsl");

/// Draws one of a list of textures over the current target.
///
/// Sources usually come from [`Component::textures`] on the tree being
/// inspected. PageDown and PageUp step through them; an empty list draws
/// nothing.
pub struct TextureViewer {
    base: ComponentBase,
    operator: OperatorComponent,
    view: TextureLink,
    sources: Vec<NamedTexture>,
    current: usize,
    next_key: KeySpec,
    previous_key: KeySpec,
}

impl TextureViewer {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let operator =
            OperatorComponent::from_sources(format!("{name}.blit"), VIEW_VERTEX, VIEW_FRAGMENT)?;
        Ok(Self::with_operator(name, operator))
    }

    /// Uses `operator` to draw; its first input is replaced by the selected texture.
    pub fn with_operator(name: impl Into<String>, mut operator: OperatorComponent) -> Self {
        let view = TextureLink::new();
        operator.set_input(0, view.clone());
        Self {
            base: ComponentBase::new(
                name,
                Capabilities::RENDER
                    | Capabilities::UPDATE
                    | Capabilities::RELOAD
                    | Capabilities::KEYBOARD,
            ),
            operator,
            view,
            sources: Vec::new(),
            current: 0,
            next_key: KeySpec::plain(KeyCode::PageDown),
            previous_key: KeySpec::plain(KeyCode::PageUp),
        }
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = NamedTexture>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_keys(mut self, next: impl Into<KeySpec>, previous: impl Into<KeySpec>) -> Self {
        self.next_key = next.into();
        self.previous_key = previous.into();
        self
    }

    pub fn with_draw_order(mut self, order: i32) -> Self {
        self.base.set_draw_order(order);
        self
    }

    pub fn add_source(&mut self, source: NamedTexture) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[NamedTexture] {
        &self.sources
    }

    pub fn current_index(&self) -> Option<usize> {
        (!self.sources.is_empty()).then_some(self.current)
    }

    pub fn current(&self) -> Option<&NamedTexture> {
        self.sources.get(self.current)
    }

    /// The texture drawn by the last render.
    pub fn shown(&self) -> Option<TextureId> {
        self.view.get()
    }

    /// Selects source `index`, clamped to the valid range.
    pub fn select(&mut self, index: usize) {
        self.current = index.min(self.sources.len().saturating_sub(1));
        if let Some(source) = self.current() {
            log::info!("{}: viewing '{}'", self.base.name(), source.name);
        }
    }

    pub fn next(&mut self) {
        if !self.sources.is_empty() {
            self.select((self.current + 1) % self.sources.len());
        }
    }

    pub fn previous(&mut self) {
        let count = self.sources.len();
        if count > 0 {
            self.select((self.current + count - 1) % count);
        }
    }
}

impl Component for TextureViewer {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let operator = &mut self.operator;
        self.base.load_with(device, || operator.load(device))
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let operator = &mut self.operator;
        self.base.unload_with(device, || operator.unload(device));
    }

    fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        self.operator.update(device, frame)
    }

    fn render(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        let Some(source) = self.sources.get(self.current) else {
            return Ok(());
        };
        self.view.set(source.link.get());
        self.operator.render(device, frame)
    }

    fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        self.operator.reload(device)
    }

    fn key_down(&mut self, key: &KeyEvent) -> bool {
        if key.is(self.next_key) {
            self.next();
        } else if key.is(self.previous_key) {
            self.previous();
        } else {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::component::{ComponentCollection, RenderTarget};
    use crate::device::TextureFormat;
    use crate::headless::DeviceCall;
    use crate::resource::{AsAny, SlotParams};

    fn scene() -> RenderTarget {
        RenderTarget::new("scene", 8, 8, true)
            .with_output(0, SlotParams::new(TextureFormat::Rgba8Unorm))
            .unwrap()
            .with_output(1, SlotParams::new(TextureFormat::R32Float))
            .unwrap()
            .with_clear(Some([1.0, 0.0, 0.0, 1.0]), Some(1.0))
    }

    #[test]
    fn render_target_lists_its_outputs_and_nested_targets() {
        let inner = RenderTarget::new("inner", 4, 4, false)
            .with_output(3, SlotParams::default())
            .unwrap();
        let outer = scene().with_child(inner);
        let names: Vec<_> = outer.textures().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            ["scene.slot00", "scene.slot01", "scene.depth", "inner.slot03"]
        );
    }

    #[test]
    fn pages_through_listed_textures() {
        let device = HeadlessDevice::new(8, 8);
        let scene = scene();
        let viewer = TextureViewer::new("viewer")
            .unwrap()
            .with_sources(scene.textures())
            .with_draw_order(1);
        assert_eq!(viewer.sources().len(), 3);

        let mut root = ComponentCollection::new();
        root.add(scene);
        root.add(viewer);
        root.load(&device).unwrap();

        let frame = FrameData::default();
        root.render(&device, &frame).unwrap();
        let listed = root.textures();
        let slot0 = listed[0].link.get();
        let slot1 = listed[1].link.get();
        let shown = |root: &ComponentCollection| {
            root.get("viewer")
                .and_then(|c| c.as_any().downcast_ref::<TextureViewer>())
                .and_then(TextureViewer::shown)
        };
        assert_eq!(shown(&root), slot0);

        assert!(root.key_down(&KeyEvent::new(KeyCode::PageDown)));
        root.render(&device, &frame).unwrap();
        assert_eq!(shown(&root), slot1);

        // wraps backwards past the first entry to depth
        root.key_down(&KeyEvent::new(KeyCode::PageUp));
        root.key_down(&KeyEvent::new(KeyCode::PageUp));
        device.clear_calls();
        root.render(&device, &frame).unwrap();
        assert_eq!(shown(&root), listed[2].link.get());
        assert!(
            device
                .calls()
                .iter()
                .any(|c| matches!(c, DeviceCall::Draw { target: None, .. }))
        );

        assert!(!root.key_down(&KeyEvent::new(KeyCode::Tab)));
        root.unload(&device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn empty_viewer_draws_nothing() {
        let device = HeadlessDevice::new(8, 8);
        let mut viewer = TextureViewer::new("viewer").unwrap();
        viewer.load(&device).unwrap();
        device.clear_calls();
        viewer.render(&device, &FrameData::default()).unwrap();
        assert!(device.calls().is_empty());
        assert!(viewer.current_index().is_none());
        viewer.next();
        assert!(viewer.current().is_none());
    }
}
