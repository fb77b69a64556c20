use crate::device::{FramebufferId, FramebufferStatus, GraphicsDevice};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::resource::Resource;

/// A bare framebuffer object. Attachments are managed by its owner.
pub struct FrameBuffer {
    lifecycle: Lifecycle,
    handle: Option<FramebufferId>,
    status: FramebufferStatus,
}

impl FrameBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifecycle: Lifecycle::new("framebuffer", name),
            handle: None,
            status: FramebufferStatus::Undefined,
        }
    }

    pub fn handle(&self) -> Option<FramebufferId> {
        self.handle
    }

    pub fn id(&self) -> Result<FramebufferId> {
        self.handle
            .ok_or_else(|| Error::not_loaded(self.lifecycle.name(), "binding"))
    }

    /// Status from the last [`check_status`](Self::check_status).
    pub fn last_status(&self) -> &FramebufferStatus {
        &self.status
    }

    pub fn bind(&self, device: &dyn GraphicsDevice) -> Result<()> {
        device.bind_framebuffer(Some(self.id()?))
    }

    pub fn unbind(&self, device: &dyn GraphicsDevice) -> Result<()> {
        device.bind_framebuffer(None)
    }

    pub fn is_bound(&self, device: &dyn GraphicsDevice) -> bool {
        self.handle.is_some() && device.bound_framebuffer() == self.handle
    }

    pub fn check_status(&mut self, device: &dyn GraphicsDevice) -> Result<&FramebufferStatus> {
        self.status = device.framebuffer_status(self.id()?);
        Ok(&self.status)
    }

    /// Fails with [`Error::FramebufferIncomplete`] unless complete.
    pub fn require_complete(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let status = self.check_status(device)?.clone();
        if status.is_complete() {
            Ok(())
        } else {
            Err(Error::FramebufferIncomplete {
                name: self.lifecycle.name().to_string(),
                status,
            })
        }
    }

    /// Clears one color attachment. The framebuffer must be bound.
    pub fn clear_color_attachment(
        &self,
        device: &dyn GraphicsDevice,
        index: u32,
        color: [f32; 4],
    ) -> Result<()> {
        if !self.is_bound(device) {
            return Err(Error::not_loaded(self.lifecycle.name(), "clearing (bind it first)"));
        }
        device.clear_color_attachment(index, color)
    }
}

impl Resource for FrameBuffer {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let name = self.lifecycle.name().to_string();
        let handle = &mut self.handle;
        self.lifecycle.run_load(|| {
            let id = device.create_framebuffer(&name)?;
            log::trace!("framebuffer '{name}': {id}");
            *handle = Some(id);
            Ok(())
        })
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let handle = &mut self.handle;
        let status = &mut self.status;
        self.lifecycle.run_unload(|| {
            if let Some(id) = handle.take() {
                device.destroy_framebuffer(id);
            }
            *status = FramebufferStatus::Undefined;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;

    #[test]
    fn bind_requires_load() {
        let device = HeadlessDevice::new(8, 8);
        let mut fb = FrameBuffer::new("fb");
        assert!(matches!(fb.bind(&device), Err(Error::NotLoaded { .. })));

        fb.load(&device).unwrap();
        fb.bind(&device).unwrap();
        assert!(fb.is_bound(&device));
        fb.unbind(&device).unwrap();
        assert!(!fb.is_bound(&device));
    }

    #[test]
    fn empty_framebuffer_is_incomplete() {
        let device = HeadlessDevice::new(8, 8);
        let mut fb = FrameBuffer::new("fb");
        fb.load(&device).unwrap();
        let err = fb.require_complete(&device).unwrap_err();
        assert!(matches!(
            err,
            Error::FramebufferIncomplete {
                status: FramebufferStatus::MissingAttachment,
                ..
            }
        ));
        fb.unload(&device);
        assert_eq!(fb.last_status(), &FramebufferStatus::Undefined);
    }
}
