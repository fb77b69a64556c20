//! Named, ordered ownership of resources.

use crate::device::GraphicsDevice;
use crate::error::{Error, Result};
use crate::resource::{AsAny, ReloadReport, Resource};

struct Entry {
    key: String,
    resource: Box<dyn Resource>,
}

/// Owns resources under unique keys, in insertion order.
///
/// A resource is stored under its own name. If that name is taken it gets a
/// synthetic key (`__res_00003`), which is returned from [`add`](Self::add).
pub struct ResourceCollection {
    name: String,
    entries: Vec<Entry>,
}

impl ResourceCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Resource)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.resource.as_ref()))
    }

    /// Adds `resource` and returns the key it was stored under.
    pub fn add(&mut self, resource: impl Resource) -> String {
        self.add_boxed(Box::new(resource))
    }

    pub fn add_boxed(&mut self, resource: Box<dyn Resource>) -> String {
        let key = if self.contains(resource.name()) {
            let key = self.synthetic_key();
            log::debug!(
                "{}: '{}' already present, storing as '{key}'",
                self.name,
                resource.name()
            );
            key
        } else {
            resource.name().to_string()
        };
        self.entries.push(Entry {
            key: key.clone(),
            resource,
        });
        key
    }

    fn synthetic_key(&self) -> String {
        let mut n = self.entries.len();
        loop {
            let key = format!("__res_{n:05}");
            if !self.contains(&key) {
                return key;
            }
            n += 1;
        }
    }

    /// Removes and returns the resource under `key` without unloading it.
    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Resource>> {
        let index = self.position(key)?;
        Some(self.entries.remove(index).resource)
    }

    pub fn get_dyn(&self, key: &str) -> Result<&dyn Resource> {
        self.position(key)
            .map(|i| self.entries[i].resource.as_ref())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub fn get_dyn_mut(&mut self, key: &str) -> Result<&mut dyn Resource> {
        let index = self
            .position(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        Ok(self.entries[index].resource.as_mut())
    }

    /// Looks up `key` as a `T`.
    pub fn get<T: Resource>(&self, key: &str) -> Result<&T> {
        let resource = self.get_dyn(key)?;
        resource
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::TypeMismatch {
                name: key.to_string(),
                expected: std::any::type_name::<T>(),
                actual: resource.type_name(),
            })
    }

    pub fn get_mut<T: Resource>(&mut self, key: &str) -> Result<&mut T> {
        let resource = self.get_dyn_mut(key)?;
        let actual = AsAny::type_name(&*resource);
        resource
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| Error::TypeMismatch {
                name: key.to_string(),
                expected: std::any::type_name::<T>(),
                actual,
            })
    }

    /// Loads every entry in insertion order, stopping at the first failure.
    pub fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        for entry in &mut self.entries {
            entry.resource.load(device)?;
        }
        Ok(())
    }

    /// Unloads every entry in insertion order.
    pub fn unload(&mut self, device: &dyn GraphicsDevice) {
        for entry in &mut self.entries {
            entry.resource.unload(device);
        }
    }

    /// Reloads every hot-reloadable entry. A failure never stops the pass.
    pub fn reload(&mut self, device: &dyn GraphicsDevice) -> ReloadReport {
        let mut report = ReloadReport::default();
        for entry in &mut self.entries {
            let Some(reloadable) = entry.resource.as_reloadable() else {
                continue;
            };
            let outcome = reloadable.try_reload(device);
            match &outcome {
                Ok(()) => log::info!("{}: reloaded '{}'", self.name, entry.key),
                Err(e) => log::warn!("{}: reload of '{}' failed: {e}", self.name, entry.key),
            }
            report.record(&entry.key, outcome);
        }
        report
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }
}

impl std::fmt::Debug for ResourceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCollection")
            .field("name", &self.name)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::device::{BufferUsage, TextureFormat};
    use crate::resource::{BufferObject, Rebuild, ReloadableResource, Texture};

    fn reloadable(name: &str, fails: bool) -> ReloadableResource<Texture> {
        let label = name.to_string();
        ReloadableResource::new(
            name,
            || Ok(Texture::new(name, 2, 2, TextureFormat::Rgba8Unorm)),
            move |_| {
                if fails {
                    Err(Error::Device(format!("{label}: bad source")))
                } else {
                    Ok(Rebuild::Replace(Texture::new(
                        label.as_str(),
                        4,
                        4,
                        TextureFormat::Rgba8Unorm,
                    )))
                }
            },
        )
        .unwrap()
    }

    #[test]
    fn name_collision_gets_synthetic_key() {
        let device = HeadlessDevice::new(8, 8);
        let mut resources = ResourceCollection::new("test");
        let first = resources.add(Texture::new("a", 2, 2, TextureFormat::Rgba8Unorm));
        let second = resources.add(Texture::new("a", 4, 4, TextureFormat::Rgba8Unorm));
        assert_eq!(first, "a");
        assert_eq!(second, "__res_00001");

        resources.load(&device).unwrap();
        assert_eq!(resources.get::<Texture>("a").unwrap().width(), 2);
        assert!(resources.get::<Texture>(&second).unwrap().is_loaded());
    }

    #[test]
    fn synthetic_key_skips_taken_names() {
        let mut resources = ResourceCollection::new("test");
        resources.add(Texture::new("x", 1, 1, TextureFormat::R8Unorm));
        resources.add(Texture::new("__res_00002", 1, 1, TextureFormat::R8Unorm));
        let key = resources.add(Texture::new("x", 1, 1, TextureFormat::R8Unorm));
        assert_eq!(key, "__res_00003");
    }

    #[test]
    fn lookup_errors() {
        let mut resources = ResourceCollection::new("test");
        resources.add(BufferObject::new("vb", BufferUsage::Vertex));
        assert!(matches!(
            resources.get::<Texture>("missing"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            resources.get::<Texture>("vb"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(resources.get_mut::<BufferObject>("vb").is_ok());
    }

    #[test]
    fn remove_keeps_order_of_the_rest() {
        let mut resources = ResourceCollection::new("test");
        for name in ["a", "b", "c"] {
            resources.add(Texture::new(name, 1, 1, TextureFormat::R8Unorm));
        }
        assert!(resources.remove("b").is_some());
        assert_eq!(resources.keys().collect::<Vec<_>>(), ["a", "c"]);
        assert!(resources.remove("b").is_none());
    }

    #[test]
    fn reload_reports_every_outcome_and_keeps_going() {
        let device = HeadlessDevice::new(8, 8);
        let mut resources = ResourceCollection::new("test");
        resources.add(reloadable("broken", true));
        resources.add(Texture::new("plain", 1, 1, TextureFormat::R8Unorm));
        resources.add(reloadable("fine", false));
        resources.load(&device).unwrap();

        let report = resources.reload(&device);
        assert!(!report.is_ok());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].resource, "broken");
        assert_eq!(report.reloaded, ["fine"]);

        let broken = resources.get::<ReloadableResource<Texture>>("broken").unwrap();
        assert_eq!(broken.generation(), 0);
        assert_eq!(broken.current().width(), 2);
        assert!(broken.current().is_loaded());

        let fine = resources.get::<ReloadableResource<Texture>>("fine").unwrap();
        assert_eq!(fine.generation(), 1);
        assert_eq!(fine.current().width(), 4);
        assert!(fine.current().is_loaded());
    }
}
