//! The load/unload state machine shared by resources and components.
//!
//! ```text
//! Unloaded --load()--> Loading --ok--> Loaded --unload()--> Unloading --> Unloaded
//!                         |
//!                         +--err--> Unloaded
//! ```
//!
//! Calls made from the wrong state are logged and ignored so a misbehaving caller
//! never interrupts the frame loop. Observers are notified synchronously, in the
//! order they subscribed.

use std::fmt;

use crate::device::GraphicsDevice;
use crate::error::{Error, Result};

/// Where an entity is in its load/unload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Unloading => "unloading",
        };
        f.write_str(s)
    }
}

/// Notification fired around lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// About to load.
    Loading,
    Loaded,
    /// About to unload.
    Unloading,
    Unloaded,
}

/// An ordered list of callbacks.
pub struct Observers<E> {
    subscribers: Vec<Box<dyn FnMut(&E)>>,
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&E) + 'static) {
        self.subscribers.push(Box::new(observer));
    }

    pub fn notify(&mut self, event: &E) {
        for observer in &mut self.subscribers {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Passed to content observers right after a native handle has been allocated and
/// before any data has been uploaded.
pub struct ReadyForContent<'a, H> {
    pub device: &'a dyn GraphicsDevice,
    pub handle: H,
    pub name: &'a str,
}

type ContentObserver<H> = Box<dyn for<'a> FnMut(&ReadyForContent<'a, H>) -> Result<()>>;

/// Observers that supply content for a freshly allocated handle.
///
/// Unlike [`Observers`], these can fail; the first error aborts the load.
pub struct ContentObservers<H> {
    subscribers: Vec<ContentObserver<H>>,
}

impl<H: Copy> ContentObservers<H> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        observer: impl for<'a> FnMut(&ReadyForContent<'a, H>) -> Result<()> + 'static,
    ) {
        self.subscribers.push(Box::new(observer));
    }

    pub fn notify(&mut self, device: &dyn GraphicsDevice, handle: H, name: &str) -> Result<()> {
        if !self.subscribers.is_empty() {
            log::trace!("{name}: ready for content");
        }
        let event = ReadyForContent {
            device,
            handle,
            name,
        };
        for observer in &mut self.subscribers {
            observer(&event)?;
        }
        Ok(())
    }
}

impl<H: Copy> Default for ContentObservers<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// State machine plus observers for one named entity.
pub struct Lifecycle {
    kind: &'static str,
    name: String,
    state: LifecycleState,
    observers: Observers<LifecycleEvent>,
}

impl Lifecycle {
    /// `kind` is only used in log lines ("texture", "gbuffer", ...).
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            state: LifecycleState::Unloaded,
            observers: Observers::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LifecycleState::Loaded
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&LifecycleEvent) + 'static) {
        self.observers.subscribe(observer);
    }

    /// Fails with [`Error::NotLoaded`] unless the entity is loaded.
    pub fn require_loaded(&self, operation: &'static str) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(Error::not_loaded(&self.name, operation))
        }
    }

    /// Enters `Loading`. Returns `false` (and logs) when the entity is not unloaded.
    pub fn begin_load(&mut self) -> bool {
        if self.state != LifecycleState::Unloaded {
            log::debug!(
                "{} '{}': load ignored, already {}",
                self.kind,
                self.name,
                self.state
            );
            return false;
        }
        log::trace!("{} '{}': loading", self.kind, self.name);
        self.state = LifecycleState::Loading;
        self.observers.notify(&LifecycleEvent::Loading);
        true
    }

    pub fn finish_load(&mut self) {
        self.state = LifecycleState::Loaded;
        log::trace!("{} '{}': loaded", self.kind, self.name);
        self.observers.notify(&LifecycleEvent::Loaded);
    }

    /// Returns a failed load to `Unloaded`. No `Loaded` event is fired.
    pub fn abort_load(&mut self, error: &Error) {
        log::error!("{} '{}': load failed: {error}", self.kind, self.name);
        self.state = LifecycleState::Unloaded;
    }

    /// Enters `Unloading`. Returns `false` (and logs) when the entity is not loaded.
    pub fn begin_unload(&mut self) -> bool {
        if self.state != LifecycleState::Loaded {
            log::debug!(
                "{} '{}': unload ignored, currently {}",
                self.kind,
                self.name,
                self.state
            );
            return false;
        }
        log::trace!("{} '{}': unloading", self.kind, self.name);
        self.state = LifecycleState::Unloading;
        self.observers.notify(&LifecycleEvent::Unloading);
        true
    }

    pub fn finish_unload(&mut self) {
        self.state = LifecycleState::Unloaded;
        log::trace!("{} '{}': unloaded", self.kind, self.name);
        self.observers.notify(&LifecycleEvent::Unloaded);
    }

    /// Runs `load` inside a guarded transition.
    ///
    /// `load` only runs from `Unloaded`; if it fails the state returns to `Unloaded`
    /// and the error is handed back. `load` must release anything it allocated
    /// before failing.
    pub fn run_load(&mut self, load: impl FnOnce() -> Result<()>) -> Result<()> {
        if !self.begin_load() {
            return Ok(());
        }
        match load() {
            Ok(()) => {
                self.finish_load();
                Ok(())
            }
            Err(error) => {
                self.abort_load(&error);
                Err(error)
            }
        }
    }

    /// Runs `unload` inside a guarded transition. A no-op unless loaded.
    pub fn run_unload(&mut self, unload: impl FnOnce()) {
        if self.begin_unload() {
            unload();
            self.finish_unload();
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}
