use glam::{Vec2, Vec3, Vec4};

use crate::device::{BufferId, BufferUsage, ElementLayout, GraphicsDevice};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::resource::Resource;

/// Typed buffer contents. The variant picks the element layout.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    Float(Vec<f32>),
    Vec2(Vec<Vec2>),
    Vec3(Vec<Vec3>),
    Vec4(Vec<Vec4>),
    Uint(Vec<u32>),
    Byte(Vec<u8>),
}

impl BufferData {
    pub fn layout(&self) -> ElementLayout {
        match self {
            BufferData::Float(_) => ElementLayout::Float,
            BufferData::Vec2(_) => ElementLayout::Vec2,
            BufferData::Vec3(_) => ElementLayout::Vec3,
            BufferData::Vec4(_) => ElementLayout::Vec4,
            BufferData::Uint(_) => ElementLayout::Uint,
            BufferData::Byte(_) => ElementLayout::Byte,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            BufferData::Float(v) => v.len(),
            BufferData::Vec2(v) => v.len(),
            BufferData::Vec3(v) => v.len(),
            BufferData::Vec4(v) => v.len(),
            BufferData::Uint(v) => v.len(),
            BufferData::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BufferData::Float(v) => bytemuck::cast_slice(v),
            BufferData::Vec2(v) => bytemuck::cast_slice(v),
            BufferData::Vec3(v) => bytemuck::cast_slice(v),
            BufferData::Vec4(v) => bytemuck::cast_slice(v),
            BufferData::Uint(v) => bytemuck::cast_slice(v),
            BufferData::Byte(v) => v,
        }
    }
}

/// A device buffer (vertex, index or uniform).
///
/// Data set before loading is kept and re-uploaded on every load, so the buffer
/// survives unload/load cycles with its contents intact.
pub struct BufferObject {
    lifecycle: Lifecycle,
    usage: BufferUsage,
    data: Option<BufferData>,
    handle: Option<BufferId>,
}

impl BufferObject {
    pub fn new(name: impl Into<String>, usage: BufferUsage) -> Self {
        Self {
            lifecycle: Lifecycle::new("buffer", name),
            usage,
            data: None,
            handle: None,
        }
    }

    pub fn with_data(mut self, data: BufferData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Element count, `None` until data is present.
    pub fn len(&self) -> Option<usize> {
        self.data.as_ref().map(BufferData::len)
    }

    pub fn layout(&self) -> Option<ElementLayout> {
        self.data.as_ref().map(BufferData::layout)
    }

    pub fn data(&self) -> Option<&BufferData> {
        self.data.as_ref()
    }

    pub fn handle(&self) -> Option<BufferId> {
        self.handle
    }

    pub fn id(&self) -> Result<BufferId> {
        self.handle
            .ok_or_else(|| Error::not_loaded(self.lifecycle.name(), "binding"))
    }

    /// Replaces contents and element layout. Uploads immediately when loaded.
    pub fn set_data(&mut self, device: &dyn GraphicsDevice, data: BufferData) -> Result<()> {
        if let Some(id) = self.handle {
            device.write_buffer(id, data.as_bytes())?;
        }
        self.data = Some(data);
        Ok(())
    }
}

impl Resource for BufferObject {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let name = self.lifecycle.name().to_string();
        let usage = self.usage;
        let data = self.data.as_ref();
        let handle = &mut self.handle;
        self.lifecycle.run_load(|| {
            let id = device.create_buffer(&name, usage)?;
            if let Some(data) = data
                && let Err(e) = device.write_buffer(id, data.as_bytes())
            {
                device.destroy_buffer(id);
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
                device.destroy_buffer(id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;

    #[test]
    fn layouts_and_byte_views() {
        let data = BufferData::Vec3(vec![Vec3::ONE, Vec3::ZERO]);
        assert_eq!(data.layout(), ElementLayout::Vec3);
        assert_eq!(data.len(), 2);
        assert_eq!(data.as_bytes().len(), 24);
        assert_eq!(BufferData::Byte(vec![1, 2, 3]).as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn data_survives_reload() {
        let device = HeadlessDevice::new(8, 8);
        let mut vb = BufferObject::new("vb", BufferUsage::Vertex)
            .with_data(BufferData::Float(vec![1.0, 2.0]));
        assert_eq!(vb.len(), Some(2));

        vb.load(&device).unwrap();
        vb.unload(&device);
        vb.load(&device).unwrap();
        let contents = device.buffer_contents(vb.id().unwrap()).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&contents), &[1.0, 2.0]);
    }

    #[test]
    fn set_data_switches_layout() {
        let device = HeadlessDevice::new(8, 8);
        let mut ib = BufferObject::new("ib", BufferUsage::Index);
        assert_eq!(ib.len(), None);
        ib.load(&device).unwrap();
        ib.set_data(&device, BufferData::Uint(vec![0, 1, 2])).unwrap();
        assert_eq!(ib.layout(), Some(ElementLayout::Uint));
        assert_eq!(device.buffer_contents(ib.id().unwrap()).unwrap().len(), 12);
    }
}
