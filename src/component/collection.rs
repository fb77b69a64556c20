use std::time::Instant;

use crate::component::{Capabilities, Component, FrameData, NamedTexture};
use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::input::KeyEvent;
use crate::resource::ReloadReport;

/// An ordered set of components driven as one.
///
/// Insertion order is kept; every ordering key (load, draw, keyboard) is applied
/// with a stable sort, so ties resolve to insertion order.
#[derive(Default)]
pub struct ComponentCollection {
    components: Vec<Box<dyn Component>>,
}

impl ComponentCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn add(&mut self, component: impl Component) {
        self.components.push(Box::new(component));
    }

    pub fn add_boxed(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    /// Adds `component` after overriding its load order.
    pub fn add_with_load_order(&mut self, mut component: impl Component, load_order: i32) {
        component.base_mut().set_load_order(load_order);
        self.add(component);
    }

    /// Removes the first component called `name`. It is returned as-is; unload it
    /// first if it is loaded.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Component>> {
        let index = self.components.iter().position(|c| c.name() == name)?;
        Some(self.components.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Component> {
        self.components.iter().map(|c| c.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Component> {
        self.iter().find(|c| c.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Component + 'static)> {
        self.components
            .iter_mut()
            .find(|c| c.name() == name)
            .map(|c| c.as_mut())
    }

    /// The component called `name`, if it is a `T`.
    pub fn get_as<T: Component>(&self, name: &str) -> Option<&T> {
        self.get(name).and_then(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn get_as_mut<T: Component>(&mut self, name: &str) -> Option<&mut T> {
        self.get_mut(name)
            .and_then(|c| c.as_any_mut().downcast_mut::<T>())
    }

    pub fn at(&self, index: usize) -> Option<&dyn Component> {
        self.components.get(index).map(|c| c.as_ref())
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut (dyn Component + 'static)> {
        self.components.get_mut(index).map(|c| c.as_mut())
    }

    /// Indices sorted by `key`, stable.
    fn ordered_by(&self, key: impl Fn(&dyn Component) -> i32) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.components.len()).collect();
        order.sort_by_key(|&i| key(self.components[i].as_ref()));
        order
    }

    fn load_sequence(&self) -> Vec<usize> {
        self.ordered_by(|c| c.base().load_order())
    }

    /// Loads every component in ascending load order. If one fails, the ones
    /// already loaded are unloaded in reverse and the error is returned.
    pub fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let sequence = self.load_sequence();
        for (done, &i) in sequence.iter().enumerate() {
            if let Err(e) = self.components[i].load(device) {
                log::error!("loading '{}' failed: {e}", self.components[i].name());
                for &j in sequence[..done].iter().rev() {
                    self.components[j].unload(device);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unloads in exactly the reverse of load order.
    pub fn unload(&mut self, device: &dyn GraphicsDevice) {
        for i in self.load_sequence().into_iter().rev() {
            self.components[i].unload(device);
        }
    }

    pub fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        for component in &mut self.components {
            if component.base().has(Capabilities::UPDATE) {
                component.update(device, frame)?;
            }
        }
        Ok(())
    }

    /// Renders visible components in ascending draw order, timing each one.
    pub fn render(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        for i in self.ordered_by(|c| c.base().draw_order()) {
            let component = &mut self.components[i];
            let base = component.base();
            if !base.has(Capabilities::RENDER) || !base.is_visible() {
                continue;
            }
            let started = Instant::now();
            let result = component.render(device, frame);
            component.base_mut().set_last_render_time(started.elapsed());
            result?;
        }
        Ok(())
    }

    /// Forwards a new size to every resizable component, even after a failure.
    /// The first error is returned.
    pub fn resize(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32) -> Result<()> {
        let mut first_error = None;
        for component in &mut self.components {
            if !component.base().has(Capabilities::RESIZE) {
                continue;
            }
            if let Err(e) = component.resize(device, width, height) {
                log::error!("resizing '{}' failed: {e}", component.name());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Reloads every reloadable component; failures are collected, not fatal.
    pub fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        let mut report = ReloadReport::default();
        for component in &mut self.components {
            if component.base().has(Capabilities::RELOAD) {
                report.merge(component.reload(device));
            }
        }
        report
    }

    /// Offers the key to keyboard components by ascending priority until one
    /// consumes it.
    pub fn key_down(&mut self, key: &KeyEvent) -> bool {
        self.dispatch_key(|c| c.key_down(key))
    }

    pub fn key_up(&mut self, key: &KeyEvent) -> bool {
        self.dispatch_key(|c| c.key_up(key))
    }

    /// Every texture listed by the components, in insertion order.
    pub fn textures(&self) -> Vec<NamedTexture> {
        self.iter().flat_map(|c| c.textures()).collect()
    }

    fn dispatch_key(&mut self, mut handle: impl FnMut(&mut dyn Component) -> bool) -> bool {
        for i in self.ordered_by(|c| c.base().keyboard_priority()) {
            let component = self.components[i].as_mut();
            if component.base().has(Capabilities::KEYBOARD) && handle(component) {
                log::trace!("key consumed by '{}'", self.components[i].name());
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for ComponentCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.components.iter().map(|c| c.base()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use winit::keyboard::KeyCode;

    use super::*;
    use crate::HeadlessDevice;
    use crate::component::ComponentBase;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        base: ComponentBase,
        log: Log,
        consume_keys: bool,
    }

    impl Probe {
        fn new(name: &str, caps: Capabilities, log: &Log) -> Self {
            Self {
                base: ComponentBase::new(name, caps),
                log: log.clone(),
                consume_keys: false,
            }
        }

        fn record(&self, what: &str) {
            self.log.borrow_mut().push(format!("{what}:{}", self.base.name()));
        }
    }

    impl Component for Probe {
        fn base(&self) -> &ComponentBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ComponentBase {
            &mut self.base
        }

        fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
            self.record("load");
            self.base.load_with(device, || Ok(()))
        }

        fn unload(&mut self, device: &dyn GraphicsDevice) {
            self.record("unload");
            self.base.unload_with(device, || {});
        }

        fn update(&mut self, _: &dyn GraphicsDevice, _: &FrameData) -> Result<()> {
            self.record("update");
            Ok(())
        }

        fn render(&mut self, _: &dyn GraphicsDevice, _: &FrameData) -> Result<()> {
            self.record("render");
            Ok(())
        }

        fn key_down(&mut self, _: &KeyEvent) -> bool {
            self.record("key");
            self.consume_keys
        }
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    #[test]
    fn unload_reverses_load_order() {
        let device = HeadlessDevice::new(8, 8);
        let log = Log::default();
        let mut set = ComponentCollection::new();
        for (name, order) in [("c", 2), ("a", 0), ("b", 1)] {
            set.add_with_load_order(Probe::new(name, Capabilities::empty(), &log), order);
        }
        set.load(&device).unwrap();
        assert_eq!(take(&log), ["load:a", "load:b", "load:c"]);
        set.unload(&device);
        assert_eq!(take(&log), ["unload:c", "unload:b", "unload:a"]);
    }

    #[test]
    fn render_skips_invisible_and_sorts_by_draw_order() {
        let device = HeadlessDevice::new(8, 8);
        let log = Log::default();
        let mut set = ComponentCollection::new();
        let caps = Capabilities::RENDER | Capabilities::UPDATE;
        let mut hidden = Probe::new("hidden", caps, &log);
        hidden.base.set_visible(false);
        let mut late = Probe::new("late", caps, &log);
        late.base.set_draw_order(5);
        set.add(late);
        set.add(hidden);
        set.add(Probe::new("first", caps, &log));
        set.add(Probe::new("second", caps, &log));
        set.add(Probe::new("no-render", Capabilities::UPDATE, &log));

        let frame = FrameData::default();
        set.update(&device, &frame).unwrap();
        assert_eq!(
            take(&log),
            ["update:late", "update:hidden", "update:first", "update:second", "update:no-render"]
        );
        set.render(&device, &frame).unwrap();
        assert_eq!(take(&log), ["render:first", "render:second", "render:late"]);
    }

    #[test]
    fn key_dispatch_stops_at_first_consumer() {
        let log = Log::default();
        let mut set = ComponentCollection::new();
        let mut low = Probe::new("low", Capabilities::KEYBOARD, &log);
        low.base.set_keyboard_priority(10);
        let mut high = Probe::new("high", Capabilities::KEYBOARD, &log);
        high.consume_keys = true;
        set.add(low);
        set.add(high);
        set.add(Probe::new("deaf", Capabilities::empty(), &log));

        assert!(set.key_down(&KeyEvent::new(KeyCode::Space)));
        assert_eq!(take(&log), ["key:high"]);
    }

    #[test]
    fn remove_and_typed_lookup() {
        let log = Log::default();
        let mut set = ComponentCollection::new();
        set.add(Probe::new("a", Capabilities::empty(), &log));
        set.add(Probe::new("b", Capabilities::empty(), &log));
        assert!(set.get_as::<Probe>("b").is_some());
        assert!(set.remove("a").is_some());
        assert!(set.remove("a").is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.at(0).map(|c| c.name().to_string()), Some("b".into()));
    }
}
