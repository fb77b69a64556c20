//! GPU-resident resources with explicit lifecycles.
//!
//! Constructing a resource never touches the device. [`Resource::load`] allocates
//! native objects and [`Resource::unload`] releases them; in between the resource
//! is `Loaded` and its handle is valid. Owners (a [`ResourceCollection`] or a
//! component) drive these calls.

use std::any::Any;

use crate::device::GraphicsDevice;
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, LifecycleEvent, LifecycleState};

pub mod buffer;
pub mod collection;
pub mod double_buffered;
pub mod framebuffer;
pub mod gbuffer;
pub mod reloadable;
pub mod shader;
pub mod texture;

pub use buffer::{BufferData, BufferObject};
pub use collection::ResourceCollection;
pub use double_buffered::DoubleBufferedTexture;
pub use framebuffer::FrameBuffer;
pub use gbuffer::{GBuffer, MAX_SLOTS, SharedTexture, SlotParams, TextureLink, TextureSlot};
pub use reloadable::{Rebuild, ReloadableResource};
pub use shader::{Shader, ShaderProgram};
pub use texture::Texture;

/// Downcasting support for trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Anything that owns native device objects.
pub trait Resource: AsAny {
    fn lifecycle(&self) -> &Lifecycle;
    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Allocates native objects. A no-op unless unloaded.
    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()>;

    /// Releases native objects. A no-op unless loaded.
    fn unload(&mut self, device: &dyn GraphicsDevice);

    /// Hot-reload entry point, for resources that support it.
    fn as_reloadable(&mut self) -> Option<&mut dyn Reload> {
        None
    }

    fn name(&self) -> &str {
        self.lifecycle().name()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle().state()
    }

    fn is_loaded(&self) -> bool {
        self.lifecycle().is_loaded()
    }

    fn subscribe(&mut self, observer: impl FnMut(&LifecycleEvent) + 'static)
    where
        Self: Sized,
    {
        self.lifecycle_mut().subscribe(observer);
    }
}

/// A resource whose native objects can be swapped while it stays loaded.
pub trait Reload {
    /// Rebuilds the underlying objects. On error the previous objects stay live.
    fn try_reload(&mut self, device: &dyn GraphicsDevice) -> Result<()>;
}

/// One resource that failed to reload.
#[derive(Debug)]
pub struct ReloadFailure {
    pub resource: String,
    pub error: Error,
}

/// Outcome of a reload pass over many resources.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub reloaded: Vec<String>,
    pub failures: Vec<ReloadFailure>,
}

impl ReloadReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, resource: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.reloaded.push(resource.to_string()),
            Err(error) => self.failures.push(ReloadFailure {
                resource: resource.to_string(),
                error,
            }),
        }
    }

    pub fn merge(&mut self, other: ReloadReport) {
        self.reloaded.extend(other.reloaded);
        self.failures.extend(other.failures);
    }

    /// One human-readable line per failure.
    pub fn messages(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.resource, f.error))
            .collect()
    }
}
