use crate::component::{
    Capabilities, Component, ComponentBase, ComponentCollection, FrameData, NamedTexture,
};
use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::input::KeyEvent;
use crate::resource::ReloadReport;

/// A component that owns an ordered set of children and forwards every call to
/// them.
///
/// Loading loads the composite's own resources, then its children in load order.
/// Unloading goes the other way round.
pub struct Composite {
    base: ComponentBase,
    children: ComponentCollection,
}

impl Composite {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_base(ComponentBase::new(name, Capabilities::all()))
    }

    pub fn with_base(base: ComponentBase) -> Self {
        Self {
            base,
            children: ComponentCollection::new(),
        }
    }

    pub fn with_child(mut self, child: impl Component) -> Self {
        self.add(child);
        self
    }

    pub fn add(&mut self, child: impl Component) {
        self.children.add(child);
    }

    pub fn add_with_load_order(&mut self, child: impl Component, load_order: i32) {
        self.children.add_with_load_order(child, load_order);
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Component>> {
        self.children.remove(name)
    }

    pub fn children(&self) -> &ComponentCollection {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut ComponentCollection {
        &mut self.children
    }
}

impl Component for Composite {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let children = &mut self.children;
        self.base.load_with(device, || children.load(device))
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let children = &mut self.children;
        self.base.unload_with(device, || children.unload(device));
    }

    fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        self.children.update(device, frame)
    }

    fn render(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        self.children.render(device, frame)
    }

    fn resize(&mut self, device: &dyn GraphicsDevice, width: u32, height: u32) -> Result<()> {
        self.children.resize(device, width, height)
    }

    /// Own resources first, then children; one report for both.
    fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        let mut report = self.base.resources_mut().reload(device);
        report.merge(self.children.reload(device));
        report
    }

    fn key_down(&mut self, key: &KeyEvent) -> bool {
        self.children.key_down(key)
    }

    fn key_up(&mut self, key: &KeyEvent) -> bool {
        self.children.key_up(key)
    }

    fn textures(&self) -> Vec<NamedTexture> {
        self.children.textures()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::HeadlessDevice;
    use crate::device::{BufferUsage, TextureFormat};
    use crate::error::Error;
    use crate::resource::{BufferObject, Texture};

    struct Leaf {
        base: ComponentBase,
        loads: Rc<RefCell<Vec<String>>>,
    }

    impl Component for Leaf {
        fn base(&self) -> &ComponentBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ComponentBase {
            &mut self.base
        }

        fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
            self.loads.borrow_mut().push(self.base.name().to_string());
            self.base.load_with(device, || Ok(()))
        }
    }

    #[test]
    fn children_load_by_load_order() {
        let device = HeadlessDevice::new(8, 8);
        let loads = Rc::new(RefCell::new(Vec::new()));
        let mut root = Composite::new("root");
        for (name, order) in [("two", 2), ("zero", 0), ("one", 1)] {
            let leaf = Leaf {
                base: ComponentBase::new(name, Capabilities::empty()),
                loads: loads.clone(),
            };
            root.add_with_load_order(leaf, order);
        }
        root.load(&device).unwrap();
        assert_eq!(*loads.borrow(), ["zero", "one", "two"]);
        assert!(root.base().is_loaded());
        assert!(root.children().iter().all(|c| c.base().is_loaded()));

        root.unload(&device);
        assert!(root.children().iter().all(|c| !c.base().is_loaded()));
    }

    #[test]
    fn resources_follow_component_lifecycle() {
        let device = HeadlessDevice::new(8, 8);
        let mut root = Composite::new("root");
        root.base_mut()
            .resources_mut()
            .add(Texture::new("t", 2, 2, TextureFormat::Rgba8Unorm));
        root.base_mut()
            .resources_mut()
            .add(BufferObject::new("b", BufferUsage::Uniform));

        root.load(&device).unwrap();
        assert_eq!(device.live_objects(), 2);
        root.unload(&device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn failed_child_rolls_back_the_whole_transition() {
        let device = HeadlessDevice::new(8, 8);
        let mut child = Composite::new("child");
        child
            .base_mut()
            .resources_mut()
            .add(Texture::new("t", 2, 2, TextureFormat::Rgba8Unorm));
        let mut root = Composite::new("root");
        root.base_mut()
            .resources_mut()
            .add(BufferObject::new("b", BufferUsage::Uniform));
        root.add(child);

        // buffer succeeds, the child's texture fails
        device.fail_allocation_after(1, "out of memory");
        let err = root.load(&device).unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }));
        assert!(!root.base().is_loaded());
        assert_eq!(device.live_objects(), 0);
    }
}
