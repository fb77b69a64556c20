//! Multi-render-target framebuffer.
//!
//! A [`GBuffer`] owns one framebuffer with up to [`MAX_SLOTS`] color slots and an
//! optional depth texture. Each slot is either *internal* (the GBuffer creates,
//! resizes and destroys its texture) or *external* (a caller-owned texture the
//! GBuffer only attaches).
//!
//! ```text
//! load/resize:  bind fb -> recreate internal textures -> attach slots -> depth
//!               -> draw buffers (enabled slots, ascending) -> completeness -> unbind
//! ```
//!
//! Rendering into it is bracketed by [`GBuffer::bind_for_writing`] and
//! [`GBuffer::unbind_from_writing`]; afterwards the slot textures can be sampled
//! through [`GBuffer::texture_at_slot`] or a [`TextureLink`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::device::{
    DepthState, FramebufferId, GraphicsDevice, SamplerParams, TextureFormat, TextureId, Viewport,
};
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, Observers};
use crate::resource::{FrameBuffer, Resource, Texture};

/// Number of color slots in a GBuffer.
pub const MAX_SLOTS: usize = 16;

/// A texture owned elsewhere and shared with a GBuffer.
pub type SharedTexture = Rc<RefCell<Texture>>;

/// How an internal slot texture is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotParams {
    pub format: TextureFormat,
    /// Regenerate mipmaps after every write pass.
    pub mipmaps: bool,
    pub sampler: SamplerParams,
}

impl SlotParams {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_mipmaps(mut self) -> Self {
        self.mipmaps = true;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerParams) -> Self {
        self.sampler = sampler;
        self
    }
}

impl Default for SlotParams {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            mipmaps: false,
            sampler: SamplerParams::default(),
        }
    }
}

/// A live view of whichever texture currently backs a slot.
///
/// Links stay valid across resizes and reloads, so a consumer can hold one
/// instead of a texture id that goes stale.
#[derive(Debug, Clone, Default)]
pub struct TextureLink(Rc<Cell<Option<TextureId>>>);

impl TextureLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link pinned to a fixed texture.
    pub fn fixed(id: TextureId) -> Self {
        Self(Rc::new(Cell::new(Some(id))))
    }

    pub fn get(&self) -> Option<TextureId> {
        self.0.get()
    }

    pub(crate) fn set(&self, id: Option<TextureId>) {
        self.0.set(id);
    }
}

enum SlotSource {
    Internal(Option<Texture>),
    External(SharedTexture),
}

/// One color attachment point of a [`GBuffer`].
pub struct TextureSlot {
    index: usize,
    enabled: bool,
    params: SlotParams,
    source: SlotSource,
    attached: Option<TextureId>,
    link: TextureLink,
}

impl TextureSlot {
    fn new(index: usize) -> Self {
        Self {
            index,
            enabled: false,
            params: SlotParams::default(),
            source: SlotSource::Internal(None),
            attached: None,
            link: TextureLink::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_external(&self) -> bool {
        matches!(self.source, SlotSource::External(_))
    }

    pub fn params(&self) -> SlotParams {
        self.params
    }

    /// The texture currently attached for this slot.
    pub fn texture_id(&self) -> Option<TextureId> {
        self.attached
    }

    /// Detaches an internal texture for later destruction.
    fn take_internal(&mut self) -> Option<Texture> {
        match &mut self.source {
            SlotSource::Internal(texture) => texture.take(),
            SlotSource::External(_) => None,
        }
    }
}

/// Dimensions passed to resize observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resized {
    pub width: u32,
    pub height: u32,
}

/// State saved by `bind_for_writing` and restored by `unbind_from_writing`.
#[derive(Debug, Clone, Copy)]
struct SavedBinding {
    framebuffer: Option<FramebufferId>,
    viewport: Viewport,
    depth: DepthState,
}

/// An off-screen framebuffer rendering into up to 16 textures.
pub struct GBuffer {
    lifecycle: Lifecycle,
    width: u32,
    height: u32,
    want_depth: bool,
    slots: Vec<TextureSlot>,
    framebuffer: FrameBuffer,
    depth: Option<Texture>,
    depth_link: TextureLink,
    retired: Vec<Texture>,
    saved: Option<SavedBinding>,
    needs_rebuild: bool,
    resized: Observers<Resized>,
}

impl GBuffer {
    pub fn new(name: impl Into<String>, width: u32, height: u32, want_depth: bool) -> Self {
        let name = name.into();
        Self {
            framebuffer: FrameBuffer::new(format!("{name}.fbo")),
            lifecycle: Lifecycle::new("gbuffer", name),
            width,
            height,
            want_depth,
            slots: (0..MAX_SLOTS).map(TextureSlot::new).collect(),
            depth: None,
            depth_link: TextureLink::new(),
            retired: Vec::new(),
            saved: None,
            needs_rebuild: false,
            resized: Observers::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn wants_depth(&self) -> bool {
        self.want_depth
    }

    pub fn framebuffer(&self) -> &FrameBuffer {
        &self.framebuffer
    }

    fn check_range(slot: usize) -> Result<()> {
        if slot < MAX_SLOTS {
            Ok(())
        } else {
            Err(Error::SlotRange { slot })
        }
    }

    /// Declares an internal texture for `slot`. Takes effect on the next load or resize.
    pub fn set_slot(&mut self, slot: usize, params: SlotParams) -> Result<&mut Self> {
        Self::check_range(slot)?;
        let s = &mut self.slots[slot];
        if let Some(old) = s.take_internal() {
            self.retired.push(old);
        }
        s.enabled = true;
        s.params = params;
        s.source = SlotSource::Internal(None);
        log::trace!("{}: slot {slot} internal {:?}", self.lifecycle.name(), params.format);
        Ok(self)
    }

    /// Binds a caller-owned texture to `slot`. The GBuffer never creates, resizes or
    /// destroys it; it must be loaded before the GBuffer is.
    pub fn set_external_slot(&mut self, slot: usize, texture: SharedTexture) -> Result<&mut Self> {
        Self::check_range(slot)?;
        let params = {
            let t = texture.borrow();
            SlotParams {
                format: t.format(),
                mipmaps: t.has_mipmaps(),
                sampler: t.sampler(),
            }
        };
        let s = &mut self.slots[slot];
        if let Some(old) = s.take_internal() {
            self.retired.push(old);
        }
        s.enabled = true;
        s.params = params;
        s.source = SlotSource::External(texture);
        log::trace!("{}: slot {slot} external", self.lifecycle.name());
        Ok(self)
    }

    /// Turns a slot off. Takes effect on the next load or resize.
    pub fn disable_slot(&mut self, slot: usize) -> Result<&mut Self> {
        Self::check_range(slot)?;
        let s = &mut self.slots[slot];
        if let Some(old) = s.take_internal() {
            self.retired.push(old);
        }
        s.enabled = false;
        s.source = SlotSource::Internal(None);
        Ok(self)
    }

    pub fn slot(&self, slot: usize) -> Result<&TextureSlot> {
        Self::check_range(slot)?;
        Ok(&self.slots[slot])
    }

    /// Enabled slot indices in ascending order; these are the draw buffers.
    pub fn enabled_slots(&self) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.index as u32)
            .collect()
    }

    /// The texture rendered into `slot`.
    pub fn texture_at_slot(&self, slot: usize) -> Result<TextureId> {
        Self::check_range(slot)?;
        let s = &self.slots[slot];
        s.attached
            .filter(|_| s.enabled)
            .ok_or_else(|| Error::SlotNotBound {
                name: self.lifecycle.name().to_string(),
                slot,
            })
    }

    /// A link that follows `slot` across resizes and reloads.
    pub fn texture_link(&self, slot: usize) -> Result<TextureLink> {
        Self::check_range(slot)?;
        Ok(self.slots[slot].link.clone())
    }

    pub fn has_depth(&self) -> bool {
        self.want_depth
    }

    pub fn depth_texture(&self) -> Option<TextureId> {
        self.depth.as_ref().and_then(Texture::handle)
    }

    pub fn depth_link(&self) -> TextureLink {
        self.depth_link.clone()
    }

    /// Every attached slot texture as `(slot, texture)`.
    pub fn textures(&self) -> Vec<(usize, TextureId)> {
        self.slots
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| s.attached.map(|id| (s.index, id)))
            .collect()
    }

    pub fn on_resized(&mut self, observer: impl FnMut(&Resized) + 'static) {
        self.resized.subscribe(observer);
    }

    /// Changes the size. When loaded, every internal texture is destroyed and
    /// recreated; external textures are left alone. Observers are notified after.
    ///
    /// If the rebuild fails the GBuffer stays loaded with its attachments
    /// released, and the next resize or bind tries again.
    pub fn resize(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32) -> Result<()> {
        self.width = width;
        self.height = height;
        if self.lifecycle.is_loaded() {
            log::debug!("{}: resizing to {width}x{height}", self.lifecycle.name());
            self.rebuild(device)?;
        }
        self.resized.notify(&Resized { width, height });
        Ok(())
    }

    /// True after a failed resize, until a rebuild succeeds.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    fn rebuild(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        match self.build(device) {
            Ok(()) => {
                self.needs_rebuild = false;
                Ok(())
            }
            Err(e) => {
                log::error!("{}: rebuild failed: {e}", self.lifecycle.name());
                self.release_attachments(device);
                self.needs_rebuild = true;
                Err(e)
            }
        }
    }

    fn ensure_built(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        self.lifecycle.require_loaded("binding for writing")?;
        if self.needs_rebuild {
            log::debug!("{}: retrying rebuild", self.lifecycle.name());
            self.rebuild(device)?;
        }
        Ok(())
    }

    /// Saves the current target, viewport and depth state, then directs drawing
    /// into every enabled slot.
    pub fn bind_for_writing(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        self.ensure_built(device)?;
        let slots = self.enabled_slots();
        self.begin_writing(device, &slots)
    }

    /// Like [`bind_for_writing`](Self::bind_for_writing) but only draws into `slots`,
    /// in the given order.
    pub fn bind_for_writing_to(&mut self, device: &dyn GraphicsDevice, slots: &[usize]) -> Result<()> {
        self.ensure_built(device)?;
        for &slot in slots {
            self.texture_at_slot(slot)?;
        }
        let slots: Vec<u32> = slots.iter().map(|&s| s as u32).collect();
        self.begin_writing(device, &slots)
    }

    fn begin_writing(&mut self, device: &dyn GraphicsDevice, draw_buffers: &[u32]) -> Result<()> {
        self.lifecycle.require_loaded("binding for writing")?;
        let saved = SavedBinding {
            framebuffer: device.bound_framebuffer(),
            viewport: device.viewport(),
            depth: device.depth_state(),
        };
        self.framebuffer.bind(device)?;
        self.saved = Some(saved);
        device.set_viewport(Viewport::sized(self.width, self.height));
        device.set_draw_buffers(self.framebuffer.id()?, draw_buffers)?;
        if self.want_depth {
            device.set_depth_state(DepthState::ENABLED);
        }
        Ok(())
    }

    /// Restores what `bind_for_writing` saved and regenerates requested mipmaps.
    pub fn unbind_from_writing(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        match self.saved.take() {
            Some(saved) => {
                device.bind_framebuffer(saved.framebuffer)?;
                device.set_viewport(saved.viewport);
                device.set_depth_state(saved.depth);
            }
            None => {
                log::debug!("{}: unbind without matching bind", self.lifecycle.name());
                device.bind_framebuffer(None)?;
            }
        }
        for slot in self.slots.iter().filter(|s| s.enabled && s.params.mipmaps) {
            if let Some(id) = slot.attached {
                device.generate_mipmaps(id)?;
            }
        }
        Ok(())
    }

    /// Clears one slot. The GBuffer must be bound for writing.
    pub fn clear_color_buffer(
        &self,
        device: &dyn GraphicsDevice,
        slot: usize,
        color: [f32; 4],
    ) -> Result<()> {
        self.texture_at_slot(slot)?;
        self.framebuffer
            .clear_color_attachment(device, slot as u32, color)
    }

    /// Clears every active draw buffer. The GBuffer must be bound for writing.
    pub fn clear_all_color_buffers(&self, device: &dyn GraphicsDevice, color: [f32; 4]) -> Result<()> {
        self.clear(device, Some(color), None)
    }

    /// Clears color and/or depth. The GBuffer must be bound for writing.
    pub fn clear(
        &self,
        device: &dyn GraphicsDevice,
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    ) -> Result<()> {
        if !self.framebuffer.is_bound(device) {
            return Err(Error::not_loaded(
                self.lifecycle.name(),
                "clearing (bind it for writing first)",
            ));
        }
        device.clear(color, depth)
    }

    /// Loads the framebuffer if needed and rebuilds every attachment with the
    /// current size, leaving the previous binding in place.
    fn build(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        self.framebuffer.load(device)?;
        let previous = device.bound_framebuffer();
        self.framebuffer.bind(device)?;
        let result = self.attach_all(device);
        let restored = device.bind_framebuffer(previous);
        result.and(restored)
    }

    fn attach_all(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let name = self.lifecycle.name().to_string();
        let fb = self.framebuffer.id()?;
        let (width, height) = (self.width, self.height);
        // after a failed build the attachment bookkeeping is gone but the
        // framebuffer may still reference destroyed textures
        let stale = self.needs_rebuild;
        log::trace!("{name}: building {width}x{height}");

        for mut texture in self.retired.drain(..) {
            texture.unload(device);
        }

        for slot in &mut self.slots {
            if let Some(mut old) = slot.take_internal() {
                old.unload(device);
            }
            if !slot.enabled {
                if slot.attached.take().is_some() || stale {
                    device.attach_color(fb, slot.index as u32, None)?;
                }
                slot.link.set(None);
                continue;
            }

            let id = match &mut slot.source {
                SlotSource::Internal(texture) => {
                    let mut t = Texture::new(
                        format!("{name}.slot{:02}", slot.index),
                        width,
                        height,
                        slot.params.format,
                    )
                    .with_sampler(slot.params.sampler)
                    .with_mipmaps(slot.params.mipmaps);
                    t.load(device)?;
                    let id = t.id()?;
                    *texture = Some(t);
                    id
                }
                SlotSource::External(shared) => {
                    shared.borrow().handle().ok_or_else(|| Error::SlotNotBound {
                        name: name.clone(),
                        slot: slot.index,
                    })?
                }
            };
            device.attach_color(fb, slot.index as u32, Some(id))?;
            slot.attached = Some(id);
            slot.link.set(Some(id));
        }

        let had_depth = match self.depth.take() {
            Some(mut old) => {
                old.unload(device);
                true
            }
            None => false,
        };
        self.depth_link.set(None);
        if self.want_depth {
            let mut depth = Texture::new(
                format!("{name}.depth"),
                width,
                height,
                TextureFormat::Depth32Float,
            )
            .with_sampler(SamplerParams::nearest());
            depth.load(device)?;
            let id = depth.id()?;
            self.depth = Some(depth);
            device.attach_depth(fb, Some(id))?;
            self.depth_link.set(Some(id));
        } else if had_depth || stale {
            device.attach_depth(fb, None)?;
        }

        device.set_draw_buffers(fb, &self.enabled_slots())?;
        self.framebuffer.require_complete(device).inspect_err(|e| {
            log::error!("{name}: {e}");
        })
    }

    /// Destroys everything the GBuffer owns. External textures are untouched.
    fn release(&mut self, device: &dyn GraphicsDevice) {
        self.release_attachments(device);
        self.needs_rebuild = false;
        self.saved = None;
        self.framebuffer.unload(device);
    }

    /// Destroys internal and depth textures but keeps the framebuffer.
    fn release_attachments(&mut self, device: &dyn GraphicsDevice) {
        for slot in &mut self.slots {
            if let Some(mut texture) = slot.take_internal() {
                texture.unload(device);
            }
            slot.attached = None;
            slot.link.set(None);
        }
        if let Some(mut depth) = self.depth.take() {
            depth.unload(device);
        }
        self.depth_link.set(None);
        for mut texture in self.retired.drain(..) {
            texture.unload(device);
        }
    }
}

impl Resource for GBuffer {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        if !self.lifecycle.begin_load() {
            return Ok(());
        }
        match self.build(device) {
            Ok(()) => {
                self.lifecycle.finish_load();
                Ok(())
            }
            Err(e) => {
                self.release(device);
                self.lifecycle.abort_load(&e);
                Err(e)
            }
        }
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        if self.lifecycle.begin_unload() {
            self.release(device);
            self.lifecycle.finish_unload();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::device::FramebufferStatus;
    use crate::headless::DeviceCall;

    fn loaded(device: &HeadlessDevice) -> GBuffer {
        let mut gb = GBuffer::new("gb", 8, 8, true);
        gb.set_slot(0, SlotParams::default()).unwrap();
        gb.set_slot(2, SlotParams::new(TextureFormat::R32Float)).unwrap();
        gb.load(device).unwrap();
        gb
    }

    #[test]
    fn draw_buffers_follow_enabled_slots() {
        let device = HeadlessDevice::new(8, 8);
        let gb = loaded(&device);
        let fb = gb.framebuffer().id().unwrap();
        assert_eq!(device.draw_buffers(fb), Some(vec![0, 2]));
        assert!(gb.depth_texture().is_some());
        assert_eq!(gb.textures().len(), 2);
        assert_eq!(device.bound_framebuffer(), None);
    }

    #[test]
    fn slot_lookup_errors() {
        let device = HeadlessDevice::new(8, 8);
        let mut gb = loaded(&device);
        assert!(matches!(gb.texture_at_slot(16), Err(Error::SlotRange { slot: 16 })));
        assert!(matches!(gb.texture_at_slot(1), Err(Error::SlotNotBound { slot: 1, .. })));
        assert!(matches!(gb.set_slot(99, SlotParams::default()), Err(Error::SlotRange { .. })));
    }

    #[test]
    fn resize_recreates_internal_textures_and_updates_links() {
        let device = HeadlessDevice::new(8, 8);
        let mut gb = loaded(&device);
        let link = gb.texture_link(0).unwrap();
        let before = gb.texture_at_slot(0).unwrap();
        assert_eq!(link.get(), Some(before));

        let seen = Rc::new(Cell::new(None));
        let sink = seen.clone();
        gb.on_resized(move |r| sink.set(Some((r.width, r.height))));

        gb.resize(&device, 16, 4).unwrap();
        let after = gb.texture_at_slot(0).unwrap();
        assert_ne!(before, after);
        assert!(!device.is_texture_live(before));
        assert_eq!(device.texture_size(after), Some((16, 4)));
        assert_eq!(link.get(), Some(after));
        assert_eq!(seen.get(), Some((16, 4)));
    }

    #[test]
    fn resize_before_load_only_records_size() {
        let device = HeadlessDevice::new(8, 8);
        let mut gb = GBuffer::new("gb", 8, 8, false);
        gb.set_slot(0, SlotParams::default()).unwrap();
        gb.resize(&device, 32, 32).unwrap();
        assert!(device.calls().is_empty());
        gb.load(&device).unwrap();
        assert_eq!(
            device.texture_size(gb.texture_at_slot(0).unwrap()),
            Some((32, 32))
        );
    }

    #[test]
    fn failed_resize_stays_loaded_and_next_resize_recovers() {
        let device = HeadlessDevice::new(8, 8);
        let mut gb = loaded(&device);
        let link = gb.texture_link(0).unwrap();
        let notified = Rc::new(Cell::new(0));
        let sink = notified.clone();
        gb.on_resized(move |_| sink.set(sink.get() + 1));

        device.fail_next_allocation("out of memory");
        assert!(matches!(
            gb.resize(&device, 16, 16),
            Err(Error::Allocation { .. })
        ));
        assert!(gb.is_loaded());
        assert!(gb.needs_rebuild());
        assert_eq!(link.get(), None);
        assert_eq!(device.live_textures(), 0);
        assert_eq!(notified.get(), 0);

        gb.resize(&device, 16, 16).unwrap();
        assert!(!gb.needs_rebuild());
        let id = gb.texture_at_slot(0).unwrap();
        assert_eq!(link.get(), Some(id));
        assert_eq!(device.texture_size(id), Some((16, 16)));
        assert!(gb.depth_texture().is_some());
        assert_eq!(notified.get(), 1);
    }

    #[test]
    fn bind_retries_after_failed_resize() {
        let device = HeadlessDevice::new(8, 8);
        let mut gb = loaded(&device);
        device.fail_allocation_after(1, "out of memory");
        assert!(gb.resize(&device, 4, 4).is_err());
        assert!(matches!(
            gb.texture_at_slot(0),
            Err(Error::SlotNotBound { slot: 0, .. })
        ));

        gb.bind_for_writing(&device).unwrap();
        gb.clear_all_color_buffers(&device, [0.0, 0.0, 1.0, 1.0]).unwrap();
        gb.unbind_from_writing(&device).unwrap();

        assert!(!gb.needs_rebuild());
        let fb = gb.framebuffer().id().unwrap();
        assert_eq!(device.draw_buffers(fb), Some(vec![0, 2]));
        let id = gb.texture_at_slot(0).unwrap();
        assert_eq!(device.texture_size(id), Some((4, 4)));
        assert_eq!(&device.read_texture(id).unwrap()[..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn write_pass_restores_viewport_and_generates_mipmaps() {
        let device = HeadlessDevice::new(100, 50);
        let mut gb = GBuffer::new("gb", 8, 8, false);
        gb.set_slot(0, SlotParams::default().with_mipmaps()).unwrap();
        gb.load(&device).unwrap();

        gb.bind_for_writing(&device).unwrap();
        assert_eq!(device.viewport(), Viewport::sized(8, 8));
        gb.unbind_from_writing(&device).unwrap();

        assert_eq!(device.viewport(), Viewport::sized(100, 50));
        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(device.mipmap_generations(gb.texture_at_slot(0).unwrap()), 1);
    }

    #[test]
    fn bind_for_writing_to_subset() {
        let device = HeadlessDevice::new(8, 8);
        let mut gb = loaded(&device);
        gb.bind_for_writing_to(&device, &[2]).unwrap();
        let fb = gb.framebuffer().id().unwrap();
        assert_eq!(device.draw_buffers(fb), Some(vec![2]));
        gb.clear_all_color_buffers(&device, [1.0, 0.0, 0.0, 1.0]).unwrap();
        gb.unbind_from_writing(&device).unwrap();

        let slot2 = device.read_texture(gb.texture_at_slot(2).unwrap()).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&slot2)[0], 1.0);
        let slot0 = device.read_texture(gb.texture_at_slot(0).unwrap()).unwrap();
        assert!(slot0.iter().all(|&b| b == 0));

        assert!(matches!(
            gb.bind_for_writing_to(&device, &[1]),
            Err(Error::SlotNotBound { .. })
        ));
    }

    #[test]
    fn external_texture_is_never_destroyed() {
        let device = HeadlessDevice::new(8, 8);
        let external = Rc::new(RefCell::new(Texture::new(
            "ext",
            8,
            8,
            TextureFormat::Rgba8Unorm,
        )));
        external.borrow_mut().load(&device).unwrap();
        let ext_id = external.borrow().id().unwrap();

        let mut gb = GBuffer::new("gb", 8, 8, false);
        gb.set_external_slot(0, external.clone()).unwrap();
        gb.set_slot(1, SlotParams::default()).unwrap();
        gb.load(&device).unwrap();
        assert_eq!(gb.texture_at_slot(0).unwrap(), ext_id);

        gb.resize(&device, 8, 8).unwrap();
        gb.unload(&device);

        assert!(device.is_texture_live(ext_id));
        assert!(!device.calls().contains(&DeviceCall::DestroyTexture(ext_id)));
    }

    #[test]
    fn mismatched_external_size_is_reported() {
        let device = HeadlessDevice::new(8, 8);
        let external = Rc::new(RefCell::new(Texture::new(
            "ext",
            4,
            4,
            TextureFormat::Rgba8Unorm,
        )));
        external.borrow_mut().load(&device).unwrap();

        let mut gb = GBuffer::new("gb", 8, 8, false);
        gb.set_external_slot(0, external.clone()).unwrap();
        gb.set_slot(1, SlotParams::default()).unwrap();
        let err = gb.load(&device).unwrap_err();
        assert!(matches!(
            err,
            Error::FramebufferIncomplete {
                status: FramebufferStatus::MismatchedDimensions,
                ..
            }
        ));
        assert!(!gb.is_loaded());
        // only the caller's texture is left
        assert_eq!(device.live_objects(), 1);
    }
}
