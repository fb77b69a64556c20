use crate::component::{Capabilities, Component, ComponentBase, Composite, FrameData, NamedTexture};
use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::input::KeyEvent;
use crate::resource::ReloadReport;

/// A composite that shows exactly one of its children at a time.
///
/// Every child stays loaded; switching only flips visibility. Keys go to the
/// current child, or to every keyboard child when `broadcast_keys` is set.
pub struct ComponentSwitcher {
    inner: Composite,
    current: Option<usize>,
    broadcast_keys: bool,
}

impl ComponentSwitcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Composite::new(name),
            current: None,
            broadcast_keys: false,
        }
    }

    pub fn with_broadcast_keys(mut self, broadcast: bool) -> Self {
        self.broadcast_keys = broadcast;
        self
    }

    pub fn with_child(mut self, child: impl Component) -> Self {
        self.add(child);
        self
    }

    /// Adds a child. The first child added becomes current.
    pub fn add(&mut self, child: impl Component) {
        self.inner.add(child);
        let index = self.current.unwrap_or(0);
        self.select(index);
    }

    pub fn len(&self) -> usize {
        self.inner.children().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.children().is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&dyn Component> {
        self.current.and_then(|i| self.inner.children().at(i))
    }

    /// Makes child `index` current, clamped to the valid range.
    pub fn select(&mut self, index: usize) {
        let count = self.len();
        self.current = (count > 0).then(|| index.min(count - 1));
        let current = self.current;
        let children = self.inner.children_mut();
        for i in 0..count {
            if let Some(child) = children.at_mut(i) {
                child.base_mut().set_visible(current == Some(i));
            }
        }
        if let Some(child) = self.current() {
            log::debug!("switched to '{}'", child.name());
        }
    }

    /// Moves to the next child, wrapping around.
    pub fn next(&mut self) {
        if let Some(i) = self.current {
            self.select((i + 1) % self.len());
        }
    }

    /// Moves to the previous child, wrapping around.
    pub fn previous(&mut self) {
        if let Some(i) = self.current {
            let count = self.len();
            self.select((i + count - 1) % count);
        }
    }

    fn dispatch(
        &mut self,
        key: &KeyEvent,
        all: impl FnOnce(&mut Composite, &KeyEvent) -> bool,
        one: impl FnOnce(&mut dyn Component, &KeyEvent) -> bool,
    ) -> bool {
        if self.broadcast_keys {
            return all(&mut self.inner, key);
        }
        let Some(index) = self.current else {
            return false;
        };
        match self.inner.children_mut().at_mut(index) {
            Some(child) if child.base().has(Capabilities::KEYBOARD) => one(child, key),
            _ => false,
        }
    }
}

impl Component for ComponentSwitcher {
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
        self.inner.render(device, frame)
    }

    fn resize(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32) -> Result<()> {
        self.inner.resize(device, width, height)
    }

    fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        self.inner.reload(device)
    }

    fn key_down(&mut self, key: &KeyEvent) -> bool {
        self.dispatch(key, |c, k| c.key_down(k), |c, k| c.key_down(k))
    }

    fn key_up(&mut self, key: &KeyEvent) -> bool {
        self.dispatch(key, |c, k| c.key_up(k), |c, k| c.key_up(k))
    }

    fn textures(&self) -> Vec<NamedTexture> {
        self.inner.textures()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use winit::keyboard::KeyCode;

    use super::*;
    use crate::HeadlessDevice;

    struct Page {
        base: ComponentBase,
        renders: Rc<Cell<u32>>,
        keys: Rc<Cell<u32>>,
    }

    impl Page {
        fn new(name: &str) -> (Self, Rc<Cell<u32>>, Rc<Cell<u32>>) {
            let (renders, keys) = (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)));
            let page = Self {
                base: ComponentBase::new(name, Capabilities::RENDER | Capabilities::KEYBOARD),
                renders: renders.clone(),
                keys: keys.clone(),
            };
            (page, renders, keys)
        }
    }

    impl Component for Page {
        fn base(&self) -> &ComponentBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ComponentBase {
            &mut self.base
        }

        fn render(&mut self, _: &dyn GraphicsDevice, _: &FrameData) -> Result<()> {
            self.renders.set(self.renders.get() + 1);
            Ok(())
        }

        fn key_down(&mut self, _: &KeyEvent) -> bool {
            self.keys.set(self.keys.get() + 1);
            false
        }
    }

    #[test]
    fn only_the_current_child_renders() {
        let device = HeadlessDevice::new(8, 8);
        let (a, a_renders, _) = Page::new("a");
        let (b, b_renders, _) = Page::new("b");
        let mut switcher = ComponentSwitcher::new("pages").with_child(a).with_child(b);
        assert_eq!(switcher.current_index(), Some(0));

        let frame = FrameData::default();
        switcher.render(&device, &frame).unwrap();
        switcher.next();
        switcher.render(&device, &frame).unwrap();
        assert_eq!((a_renders.get(), b_renders.get()), (1, 1));

        switcher.select(99);
        assert_eq!(switcher.current_index(), Some(1));
        switcher.next();
        assert_eq!(switcher.current().map(|c| c.name().to_string()), Some("a".into()));
    }

    #[test]
    fn keys_reach_invisible_children_only_when_broadcasting() {
        let (a, _, a_keys) = Page::new("a");
        let (b, _, b_keys) = Page::new("b");
        let mut switcher = ComponentSwitcher::new("pages").with_child(a).with_child(b);
        let key = KeyEvent::new(KeyCode::Tab);

        switcher.key_down(&key);
        assert_eq!((a_keys.get(), b_keys.get()), (1, 0));

        let (a, _, a_keys) = Page::new("a");
        let (b, _, b_keys) = Page::new("b");
        let mut switcher = ComponentSwitcher::new("pages")
            .with_broadcast_keys(true)
            .with_child(a)
            .with_child(b);
        switcher.key_down(&key);
        assert_eq!((a_keys.get(), b_keys.get()), (1, 1));
    }

    #[test]
    fn empty_switcher_has_no_current() {
        let mut switcher = ComponentSwitcher::new("none");
        switcher.select(3);
        switcher.next();
        assert!(switcher.current().is_none());
        assert!(!switcher.key_down(&KeyEvent::new(KeyCode::Tab)));
    }
}
