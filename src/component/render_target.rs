//! Render-to-texture composites.

use crate::component::{Capabilities, Component, ComponentBase, Composite, FrameData, NamedTexture};
use crate::device::{GraphicsDevice, TextureId};
use crate::error::Result;
use crate::input::KeyEvent;
use crate::resource::{GBuffer, ReloadReport, SharedTexture, SlotParams, TextureLink};

/// A composite whose children draw into a [`GBuffer`] instead of the current target.
///
/// ```text
/// render:  bind gbuffer for writing -> optional clear -> children -> unbind
/// ```
///
/// After `render` returns, the output is available through
/// [`texture_at_slot`](Self::texture_at_slot) or an [`output_link`](Self::output_link).
///
/// With `inherit_size` (the default) a resize is applied to the GBuffer; without
/// it the GBuffer keeps its own resolution and the resize only reaches the
/// children.
pub struct RenderTarget {
    inner: Composite,
    gbuffer: String,
    inherit_size: bool,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
}

impl RenderTarget {
    pub fn new(name: impl Into<String>, width: u32, height: u32, want_depth: bool) -> Self {
        let name = name.into();
        let mut inner = Composite::new(name.clone());
        let gbuffer = inner
            .base_mut()
            .resources_mut()
            .add(GBuffer::new(format!("{name}.gbuffer"), width, height, want_depth));
        Self {
            inner,
            gbuffer,
            inherit_size: true,
            clear_color: None,
            clear_depth: None,
        }
    }

    /// Keeps the GBuffer at its construction size regardless of resizes.
    pub fn with_fixed_size(mut self) -> Self {
        self.inherit_size = false;
        self
    }

    /// Clears every output to `color` (and depth to `depth`) after binding.
    pub fn with_clear(mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> Self {
        self.clear_color = color;
        self.clear_depth = depth;
        self
    }

    pub fn with_output(mut self, slot: usize, params: SlotParams) -> Result<Self> {
        self.set_output(slot, params)?;
        Ok(self)
    }

    pub fn with_child(mut self, child: impl Component) -> Self {
        self.inner.add(child);
        self
    }

    pub fn inherits_size(&self) -> bool {
        self.inherit_size
    }

    pub fn set_inherit_size(&mut self, inherit: bool) {
        self.inherit_size = inherit;
    }

    pub fn add(&mut self, child: impl Component) {
        self.inner.add(child);
    }

    pub fn composite(&self) -> &Composite {
        &self.inner
    }

    pub fn composite_mut(&mut self) -> &mut Composite {
        &mut self.inner
    }

    pub fn gbuffer(&self) -> Result<&GBuffer> {
        self.inner.base().resource::<GBuffer>(&self.gbuffer)
    }

    pub fn gbuffer_mut(&mut self) -> Result<&mut GBuffer> {
        self.inner.base_mut().resource_mut::<GBuffer>(&self.gbuffer)
    }

    /// Declares an internal output texture for `slot`.
    pub fn set_output(&mut self, slot: usize, params: SlotParams) -> Result<()> {
        self.gbuffer_mut()?.set_slot(slot, params)?;
        Ok(())
    }

    /// Renders into a texture owned elsewhere.
    pub fn set_external_output(&mut self, slot: usize, texture: SharedTexture) -> Result<()> {
        self.gbuffer_mut()?.set_external_slot(slot, texture)?;
        Ok(())
    }

    pub fn texture_at_slot(&self, slot: usize) -> Result<TextureId> {
        self.gbuffer()?.texture_at_slot(slot)
    }

    /// A link another component can sample from; it follows resizes.
    pub fn output_link(&self, slot: usize) -> Result<TextureLink> {
        self.gbuffer()?.texture_link(slot)
    }
}

impl Component for RenderTarget {
    fn base(&self) -> &ComponentBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        self.inner.base_mut()
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        self.inner.load(device)
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        self.inner.unload(device);
    }

    fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        self.inner.update(device, frame)
    }

    fn render(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        let (color, depth) = (self.clear_color, self.clear_depth);
        {
            let gbuffer = self.gbuffer_mut()?;
            gbuffer.bind_for_writing(device)?;
            if (color.is_some() || depth.is_some())
                && let Err(e) = gbuffer.clear(device, color, depth)
            {
                gbuffer.unbind_from_writing(device)?;
                return Err(e);
            }
        }
        let rendered = self.inner.render(device, frame);
        let unbound = self.gbuffer_mut()?.unbind_from_writing(device);
        rendered.and(unbound)
    }

    fn resize(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32) -> Result<()> {
        let children = self.inner.resize(device, width, height);
        if self.inherit_size {
            self.gbuffer_mut()?.resize(device, width, height)?;
        } else {
            log::debug!(
                "{}: fixed size, ignoring resize to {width}x{height}",
                self.inner.name()
            );
        }
        children
    }

    fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        self.inner.reload(device)
    }

    fn key_down(&mut self, key: &KeyEvent) -> bool {
        self.inner.key_down(key)
    }

    fn key_up(&mut self, key: &KeyEvent) -> bool {
        self.inner.key_up(key)
    }

    /// Enabled output slots, then depth, then whatever the children list.
    fn textures(&self) -> Vec<NamedTexture> {
        let name = self.inner.name();
        let mut textures = Vec::new();
        if let Ok(gbuffer) = self.gbuffer() {
            for slot in gbuffer.enabled_slots() {
                if let Ok(link) = gbuffer.texture_link(slot as usize) {
                    textures.push(NamedTexture::new(format!("{name}.slot{slot:02}"), link));
                }
            }
            if gbuffer.has_depth() {
                textures.push(NamedTexture::new(format!("{name}.depth"), gbuffer.depth_link()));
            }
        }
        textures.extend(self.inner.textures());
        textures
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::HeadlessDevice;
    use crate::device::{TextureFormat, Viewport};
    use crate::resource::{Resource, Texture};

    /// Clears whatever is bound to a fixed color.
    struct Fill {
        base: ComponentBase,
        color: [f32; 4],
        seen_target: Rc<RefCell<Vec<Option<crate::device::FramebufferId>>>>,
    }

    impl Component for Fill {
        fn base(&self) -> &ComponentBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ComponentBase {
            &mut self.base
        }

        fn render(&mut self, device: &dyn GraphicsDevice, _: &FrameData) -> Result<()> {
            self.seen_target.borrow_mut().push(device.bound_framebuffer());
            device.clear(Some(self.color), None)
        }
    }

    fn fill(color: [f32; 4]) -> (Fill, Rc<RefCell<Vec<Option<crate::device::FramebufferId>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let f = Fill {
            base: ComponentBase::new("fill", Capabilities::RENDER),
            color,
            seen_target: seen.clone(),
        };
        (f, seen)
    }

    #[test]
    fn children_draw_into_the_gbuffer() {
        let device = HeadlessDevice::new(32, 32);
        let (child, seen) = fill([0.0, 1.0, 0.0, 1.0]);
        let mut target = RenderTarget::new("rt", 4, 4, false)
            .with_output(0, SlotParams::default())
            .unwrap()
            .with_child(child);
        target.load(&device).unwrap();
        target.render(&device, &FrameData::default()).unwrap();

        let fb = target.gbuffer().unwrap().framebuffer().id().unwrap();
        assert_eq!(*seen.borrow(), [Some(fb)]);
        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(device.viewport(), Viewport::sized(32, 32));

        let pixels = device.read_texture(target.texture_at_slot(0).unwrap()).unwrap();
        assert_eq!(&pixels[..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn render_recovers_after_a_failed_resize() {
        let device = HeadlessDevice::new(32, 32);
        let (child, seen) = fill([1.0, 1.0, 0.0, 1.0]);
        let mut target = RenderTarget::new("rt", 8, 8, true)
            .with_output(0, SlotParams::new(TextureFormat::Rgba8Unorm))
            .unwrap()
            .with_child(child);
        let link = target.output_link(0).unwrap();
        target.load(&device).unwrap();

        assert!(target.resize(&device, 0, 0).is_err());
        assert!(target.base().is_loaded());
        assert!(target.gbuffer().unwrap().needs_rebuild());
        assert!(target.render(&device, &FrameData::default()).is_err());
        assert_eq!(device.bound_framebuffer(), None);

        target.resize(&device, 16, 16).unwrap();
        target.render(&device, &FrameData::default()).unwrap();
        let id = link.get().unwrap();
        assert_eq!(device.texture_size(id), Some((16, 16)));
        let pixels = device.read_texture(id).unwrap();
        assert!(pixels.chunks_exact(4).all(|p| p == [255, 255, 0, 255]));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn fixed_size_target_ignores_resize_but_children_still_get_it() {
        let device = HeadlessDevice::new(32, 32);
        let mut inner = RenderTarget::new("inner", 2, 2, false)
            .with_output(0, SlotParams::default())
            .unwrap();
        inner.set_inherit_size(true);
        let mut outer = RenderTarget::new("outer", 4, 4, false)
            .with_fixed_size()
            .with_output(0, SlotParams::default())
            .unwrap()
            .with_child(inner);
        outer.load(&device).unwrap();

        outer.resize(&device, 64, 48).unwrap();
        let outer_tex = outer.texture_at_slot(0).unwrap();
        assert_eq!(device.texture_size(outer_tex), Some((4, 4)));

        let inner = outer
            .composite()
            .children()
            .get_as::<RenderTarget>("inner")
            .unwrap();
        let inner_tex = inner.texture_at_slot(0).unwrap();
        assert_eq!(device.texture_size(inner_tex), Some((64, 48)));
    }

    #[test]
    fn clears_on_bind_when_configured() {
        let device = HeadlessDevice::new(8, 8);
        let mut target = RenderTarget::new("rt", 2, 2, false)
            .with_clear(Some([1.0, 0.0, 0.0, 1.0]), None)
            .with_output(0, SlotParams::default())
            .unwrap();
        target.load(&device).unwrap();
        target.render(&device, &FrameData::default()).unwrap();
        let pixels = device.read_texture(target.texture_at_slot(0).unwrap()).unwrap();
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn external_output_survives_unload() {
        let device = HeadlessDevice::new(8, 8);
        let external = Rc::new(RefCell::new(Texture::new(
            "shared",
            4,
            4,
            TextureFormat::Rgba8Unorm,
        )));
        external.borrow_mut().load(&device).unwrap();
        let id = external.borrow().id().unwrap();

        let mut target = RenderTarget::new("rt", 4, 4, false).with_fixed_size();
        target.set_external_output(0, external.clone()).unwrap();
        target.load(&device).unwrap();
        assert_eq!(target.output_link(0).unwrap().get(), Some(id));
        target.unload(&device);
        assert!(device.is_texture_live(id));
        assert_eq!(target.output_link(0).unwrap().get(), None);
    }
}
