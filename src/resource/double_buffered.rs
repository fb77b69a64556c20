use crate::device::{GraphicsDevice, SamplerParams, TextureFormat, TextureId};
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::resource::{Resource, Texture};

/// Two identical textures used as a read/write pair, swapped once per frame.
pub struct DoubleBufferedTexture {
    lifecycle: Lifecycle,
    textures: [Texture; 2],
    write: usize,
}

impl DoubleBufferedTexture {
    pub fn new(name: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self::with_sampler(name, width, height, format, SamplerParams::default())
    }

    pub fn with_sampler(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
        sampler: SamplerParams,
    ) -> Self {
        let name = name.into();
        let make = |i: usize| {
            Texture::new(format!("{name}_{i}"), width, height, format).with_sampler(sampler)
        };
        Self {
            textures: [make(0), make(1)],
            lifecycle: Lifecycle::new("double-buffered texture", name),
            write: 1,
        }
    }

    pub fn read(&self) -> &Texture {
        &self.textures[1 - self.write]
    }

    pub fn write(&self) -> &Texture {
        &self.textures[self.write]
    }

    pub fn read_id(&self) -> Result<TextureId> {
        self.read().id()
    }

    pub fn write_id(&self) -> Result<TextureId> {
        self.write().id()
    }

    pub fn swap(&mut self) {
        self.write = 1 - self.write;
    }

    pub fn width(&self) -> u32 {
        self.textures[0].width()
    }

    pub fn height(&self) -> u32 {
        self.textures[0].height()
    }
}

impl Resource for DoubleBufferedTexture {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let [a, b] = &mut self.textures;
        self.lifecycle.run_load(|| {
            a.load(device)?;
            if let Err(e) = b.load(device) {
                a.unload(device);
                return Err(e);
            }
            Ok(())
        })
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let textures = &mut self.textures;
        self.lifecycle.run_unload(|| {
            for t in textures.iter_mut() {
                t.unload(device);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;

    #[test]
    fn swap_exchanges_roles() {
        let device = HeadlessDevice::new(8, 8);
        let mut pair = DoubleBufferedTexture::new("sim", 4, 4, TextureFormat::Rgba32Float);
        pair.load(&device).unwrap();
        let (r, w) = (pair.read_id().unwrap(), pair.write_id().unwrap());
        assert_ne!(r, w);
        pair.swap();
        assert_eq!(pair.read_id().unwrap(), w);
        assert_eq!(pair.write_id().unwrap(), r);
        pair.unload(&device);
        assert_eq!(device.live_textures(), 0);
    }
}
