//! Atomic hot-swap of a resource.

use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::resource::{Reload, Resource};

/// What a rebuild produced.
pub enum Rebuild<T> {
    /// The current instance was updated in place.
    InPlace,
    /// A fresh, unloaded instance to swap in.
    Replace(T),
}

type RebuildFn<T> = Box<dyn FnMut(&mut T) -> Result<Rebuild<T>>>;

/// Wraps a resource so it can be rebuilt while the frame loop runs.
///
/// A reload loads the replacement first and only then unloads the instance it
/// replaces, so there is always exactly one live instance. If rebuilding or
/// loading the replacement fails, the current instance is left untouched.
pub struct ReloadableResource<T: Resource> {
    lifecycle: Lifecycle,
    current: T,
    rebuild: RebuildFn<T>,
    generation: u32,
}

impl<T: Resource> ReloadableResource<T> {
    /// Builds the first instance with `create`. Failure here is a setup error.
    pub fn new(
        name: impl Into<String>,
        create: impl FnOnce() -> Result<T>,
        rebuild: impl FnMut(&mut T) -> Result<Rebuild<T>> + 'static,
    ) -> Result<Self> {
        Ok(Self {
            lifecycle: Lifecycle::new("reloadable", name),
            current: create()?,
            rebuild: Box::new(rebuild),
            generation: 0,
        })
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.current
    }

    /// Number of successful reloads so far.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T: Resource> Reload for ReloadableResource<T> {
    fn try_reload(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let next = match (self.rebuild)(&mut self.current) {
            Ok(Rebuild::InPlace) => {
                self.generation += 1;
                return Ok(());
            }
            Ok(Rebuild::Replace(next)) => next,
            Err(e) => {
                log::warn!("'{}': rebuild failed, keeping current instance", self.name());
                return Err(e);
            }
        };

        let mut next = next;
        if self.current.is_loaded() {
            next.load(device)?;
            self.current.unload(device);
        }
        self.current = next;
        self.generation += 1;
        log::debug!("'{}': swapped in generation {}", self.name(), self.generation);
        Ok(())
    }
}

impl<T: Resource> Resource for ReloadableResource<T> {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let current = &mut self.current;
        self.lifecycle.run_load(|| current.load(device))
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let current = &mut self.current;
        self.lifecycle.run_unload(|| current.unload(device));
    }

    fn as_reloadable(&mut self) -> Option<&mut dyn Reload> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::device::TextureFormat;
    use crate::error::Error;
    use crate::resource::Texture;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn failed_rebuild_keeps_current_instance() {
        let device = HeadlessDevice::new(8, 8);
        let mut res = ReloadableResource::new(
            "tex",
            || Ok(Texture::new("tex", 2, 2, TextureFormat::R8Unorm)),
            |_| Err(Error::NotFound("source".into())),
        )
        .unwrap();
        res.load(&device).unwrap();
        let before = res.current().id().unwrap();

        let err = res.try_reload(&device).unwrap_err();
        assert!(!err.to_string().is_empty());
        assert_eq!(res.current().id().unwrap(), before);
        assert!(device.is_texture_live(before));
        assert_eq!(res.generation(), 0);
    }

    #[test]
    fn in_place_rebuild_issues_no_device_calls() {
        let device = HeadlessDevice::new(8, 8);
        let mut res = ReloadableResource::new(
            "tex",
            || Ok(Texture::new("tex", 2, 2, TextureFormat::R8Unorm)),
            |_| Ok(Rebuild::InPlace),
        )
        .unwrap();
        res.load(&device).unwrap();
        device.clear_calls();
        res.try_reload(&device).unwrap();
        assert!(device.calls().is_empty());
        assert_eq!(res.generation(), 1);
    }

    #[test]
    fn unloaded_wrapper_swaps_without_loading() {
        let device = HeadlessDevice::new(8, 8);
        let size = Rc::new(Cell::new(2));
        let next_size = size.clone();
        let mut res = ReloadableResource::new(
            "tex",
            || Ok(Texture::new("tex", 2, 2, TextureFormat::R8Unorm)),
            move |_| {
                next_size.set(next_size.get() * 2);
                let s = next_size.get();
                Ok(Rebuild::Replace(Texture::new("tex", s, s, TextureFormat::R8Unorm)))
            },
        )
        .unwrap();
        res.try_reload(&device).unwrap();
        assert_eq!(res.current().width(), 4);
        assert!(!res.current().is_loaded());
        assert_eq!(device.live_objects(), 0);
        assert_eq!(size.get(), 4);
    }
}
