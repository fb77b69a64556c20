use crate::device::{
    GraphicsDevice, SamplerParams, TextureDescriptor, TextureFormat, TextureId,
};
use crate::error::{Error, Result};
use crate::image_loader::DecodedImage;
use crate::lifecycle::{ContentObservers, Lifecycle, ReadyForContent};
use crate::resource::Resource;

/// A 2D texture with an explicit lifecycle.
///
/// Size, format and sampling are fixed at construction; [`load`](Resource::load)
/// allocates the device texture and uploads the initial pixels if any were given.
pub struct Texture {
    lifecycle: Lifecycle,
    width: u32,
    height: u32,
    format: TextureFormat,
    mipmaps: bool,
    sampler: SamplerParams,
    initial: Option<Vec<u8>>,
    handle: Option<TextureId>,
    content: ContentObservers<TextureId>,
}

impl Texture {
    pub fn new(name: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            lifecycle: Lifecycle::new("texture", name),
            width,
            height,
            format,
            mipmaps: false,
            sampler: SamplerParams::default(),
            initial: None,
            handle: None,
            content: ContentObservers::new(),
        }
    }

    /// A texture initialised from decoded image pixels.
    pub fn from_image(name: impl Into<String>, image: DecodedImage) -> Result<Self> {
        let format = match image.channels {
            1 => TextureFormat::R8Unorm,
            2 => TextureFormat::Rg8Unorm,
            4 => TextureFormat::Rgba8Unorm,
            n => {
                return Err(Error::UnsupportedPixelLayout(format!(
                    "{n} channels cannot be uploaded directly"
                )));
            }
        };
        Ok(Self::new(name, image.width, image.height, format).with_data(image.pixels))
    }

    pub fn with_sampler(mut self, sampler: SamplerParams) -> Self {
        self.sampler = sampler;
        self
    }

    /// Allocates a full mip chain; levels are regenerated after every upload.
    pub fn with_mipmaps(mut self, mipmaps: bool) -> Self {
        self.mipmaps = mipmaps;
        self
    }

    /// Pixels uploaded on every load.
    pub fn with_data(mut self, pixels: Vec<u8>) -> Self {
        self.initial = Some(pixels);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn sampler(&self) -> SamplerParams {
        self.sampler
    }

    pub fn has_mipmaps(&self) -> bool {
        self.mipmaps
    }

    /// The native handle while loaded.
    pub fn handle(&self) -> Option<TextureId> {
        self.handle
    }

    pub fn id(&self) -> Result<TextureId> {
        self.handle
            .ok_or_else(|| Error::not_loaded(self.lifecycle.name(), "sampling"))
    }

    /// Runs right after allocation, before the initial upload.
    pub fn on_ready_for_content(
        &mut self,
        observer: impl for<'a> FnMut(&ReadyForContent<'a, TextureId>) -> Result<()> + 'static,
    ) {
        self.content.subscribe(observer);
    }

    /// Replaces the base level.
    pub fn upload(&self, device: &dyn GraphicsDevice, pixels: &[u8]) -> Result<()> {
        self.lifecycle.require_loaded("upload")?;
        let id = self.id()?;
        let expected = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(Error::InvalidUpload {
                name: self.lifecycle.name().to_string(),
                expected,
                actual: pixels.len(),
            });
        }
        device.write_texture(id, pixels)?;
        if self.mipmaps {
            device.generate_mipmaps(id)?;
        }
        Ok(())
    }

    pub fn read(&self, device: &dyn GraphicsDevice) -> Result<Vec<u8>> {
        self.lifecycle.require_loaded("readback")?;
        device.read_texture(self.id()?)
    }

    pub fn generate_mipmaps(&self, device: &dyn GraphicsDevice) -> Result<()> {
        self.lifecycle.require_loaded("mipmap generation")?;
        device.generate_mipmaps(self.id()?)
    }
}

impl Resource for Texture {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let name = self.lifecycle.name().to_string();
        let desc = TextureDescriptor {
            label: &name,
            width: self.width,
            height: self.height,
            format: self.format,
            mipmaps: self.mipmaps,
            sampler: self.sampler,
        };
        let handle = &mut self.handle;
        let content = &mut self.content;
        let initial = self.initial.as_deref();
        self.lifecycle.run_load(|| {
            let id = device.create_texture(&desc)?;
            let mut fill = || -> Result<()> {
                content.notify(device, id, &name)?;
                if let Some(pixels) = initial {
                    device.write_texture(id, pixels)?;
                    if desc.mipmaps {
                        device.generate_mipmaps(id)?;
                    }
                }
                Ok(())
            };
            if let Err(e) = fill() {
                device.destroy_texture(id);
                return Err(e);
            }
            *handle = Some(id);
            Ok(())
        })
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let handle = &mut self.handle;
        self.lifecycle.run_unload(|| {
            if let Some(id) = handle.take() {
                device.destroy_texture(id);
            }
        });
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.lifecycle.name())
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::headless::DeviceCall;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn load_is_idempotent_and_reload_gives_new_handle() {
        let device = HeadlessDevice::new(8, 8);
        let mut tex = Texture::new("t", 4, 4, TextureFormat::Rgba8Unorm);
        assert!(tex.id().is_err());

        tex.load(&device).unwrap();
        let first = tex.id().unwrap();
        tex.load(&device).unwrap();
        assert_eq!(tex.id().unwrap(), first);

        tex.unload(&device);
        assert!(!device.is_texture_live(first));
        tex.load(&device).unwrap();
        assert_ne!(tex.id().unwrap(), first);
    }

    #[test]
    fn lifecycle_observer_takes_a_plain_closure() {
        use crate::lifecycle::LifecycleEvent;

        let device = HeadlessDevice::new(8, 8);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let mut tex = Texture::new("t", 1, 1, TextureFormat::R8Unorm);
        tex.subscribe(move |e| sink.borrow_mut().push(*e));

        tex.load(&device).unwrap();
        tex.unload(&device);
        assert_eq!(
            *events.borrow(),
            [
                LifecycleEvent::Loading,
                LifecycleEvent::Loaded,
                LifecycleEvent::Unloading,
                LifecycleEvent::Unloaded,
            ]
        );
    }

    #[test]
    fn content_observer_runs_before_initial_upload() {
        let device = HeadlessDevice::new(8, 8);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut tex = Texture::new("t", 1, 1, TextureFormat::Rgba8Unorm).with_data(vec![1, 2, 3, 4]);
        tex.on_ready_for_content(move |ready| {
            sink.borrow_mut().push(ready.handle);
            Ok(())
        });
        tex.load(&device).unwrap();

        let id = tex.id().unwrap();
        assert_eq!(*seen.borrow(), vec![id]);
        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::CreateTexture {
                    id,
                    label: "t".into(),
                    width: 1,
                    height: 1,
                    format: TextureFormat::Rgba8Unorm,
                },
                DeviceCall::WriteTexture(id),
            ]
        );
        assert_eq!(tex.read(&device).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn failing_content_observer_releases_the_handle() {
        let device = HeadlessDevice::new(8, 8);
        let mut tex = Texture::new("t", 1, 1, TextureFormat::R8Unorm);
        tex.on_ready_for_content(|ready| Err(Error::NotFound(ready.name.to_string())));
        assert!(tex.load(&device).is_err());
        assert!(!tex.is_loaded());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn allocation_failure_is_loud() {
        let device = HeadlessDevice::new(8, 8);
        device.fail_next_allocation("no memory");
        let mut tex = Texture::new("t", 1, 1, TextureFormat::R8Unorm);
        assert!(matches!(tex.load(&device), Err(Error::Allocation { .. })));
        assert!(!tex.is_loaded());
        assert!(tex.handle().is_none());
    }

    #[test]
    fn upload_requires_load_and_matching_size() {
        let device = HeadlessDevice::new(8, 8);
        let mut tex = Texture::new("t", 2, 1, TextureFormat::Rg8Unorm).with_mipmaps(true);
        assert!(matches!(
            tex.upload(&device, &[0; 4]),
            Err(Error::NotLoaded { .. })
        ));
        tex.load(&device).unwrap();
        assert!(matches!(
            tex.upload(&device, &[0; 3]),
            Err(Error::InvalidUpload { .. })
        ));
        tex.upload(&device, &[9; 4]).unwrap();
        assert_eq!(device.mipmap_generations(tex.id().unwrap()), 1);
    }
}
