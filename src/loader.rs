//! Shader source providers.
//!
//! Programs never read files themselves; they are handed a [`ShaderLoader`] and ask
//! it for sources by logical identifier. That keeps search-path policy with the
//! application and lets tests feed sources from memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves a logical shader identifier to source text.
pub trait ShaderLoader {
    fn load(&self, identifier: &str) -> Result<String>;
}

/// Sources held in memory. Entries can be replaced at any time, which makes it
/// handy for driving hot-reload in tests.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: RefCell<HashMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, identifier: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(identifier, source);
        self
    }

    /// Adds or replaces a source.
    pub fn insert(&self, identifier: impl Into<String>, source: impl Into<String>) {
        self.sources
            .borrow_mut()
            .insert(identifier.into(), source.into());
    }

    pub fn remove(&self, identifier: &str) -> Option<String> {
        self.sources.borrow_mut().remove(identifier)
    }
}

impl ShaderLoader for MemoryLoader {
    fn load(&self, identifier: &str) -> Result<String> {
        self.sources
            .borrow()
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::SourceNotFound {
                identifier: identifier.to_string(),
                searched: Vec::new(),
            })
    }
}

/// Looks for `identifier` as a relative path under each search directory in turn.
/// The first existing file wins.
#[derive(Debug, Clone)]
pub struct MultiPathLoader {
    search_paths: Vec<PathBuf>,
}

impl MultiPathLoader {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a `;`-separated list such as `"shaders;../common/shaders"`.
    pub fn from_search_string(paths: &str) -> Self {
        Self::new(split_search_string(paths))
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    fn candidates<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        self.search_paths.iter().map(move |dir| dir.join(identifier))
    }
}

impl Default for MultiPathLoader {
    fn default() -> Self {
        Self::new([Path::new(".")])
    }
}

impl ShaderLoader for MultiPathLoader {
    fn load(&self, identifier: &str) -> Result<String> {
        for path in self.candidates(identifier) {
            if path.is_file() {
                log::trace!("shader '{identifier}' -> {}", path.display());
                return Ok(fs::read_to_string(&path)?);
            }
        }
        Err(Error::SourceNotFound {
            identifier: identifier.to_string(),
            searched: self.candidates(identifier).collect(),
        })
    }
}

/// Splits a `;`-separated path list, skipping empty entries.
pub fn split_search_string(paths: &str) -> Vec<PathBuf> {
    paths
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_replaces_entries() {
        let loader = MemoryLoader::new().with_source("a.wgsl", "one");
        assert_eq!(loader.load("a.wgsl").unwrap(), "one");
        loader.insert("a.wgsl", "two");
        assert_eq!(loader.load("a.wgsl").unwrap(), "two");
        assert!(matches!(loader.load("b.wgsl"), Err(Error::SourceNotFound { .. })));
    }

    #[test]
    fn first_search_path_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("x.wgsl"), "second").unwrap();
        let loader = MultiPathLoader::new([first.path(), second.path()]);
        assert_eq!(loader.load("x.wgsl").unwrap(), "second");

        fs::write(first.path().join("x.wgsl"), "first").unwrap();
        assert_eq!(loader.load("x.wgsl").unwrap(), "first");
    }

    #[test]
    fn missing_source_lists_every_searched_path() {
        let dir = tempfile::tempdir().unwrap();
        let search = format!("{};{}", dir.path().display(), "nowhere");
        let loader = MultiPathLoader::from_search_string(&search);
        match loader.load("missing.wgsl") {
            Err(Error::SourceNotFound { identifier, searched }) => {
                assert_eq!(identifier, "missing.wgsl");
                assert_eq!(searched.len(), 2);
                assert_eq!(searched[0], dir.path().join("missing.wgsl"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn search_string_skips_blanks() {
        assert_eq!(
            split_search_string("a; ;b;"),
            vec![PathBuf::from("a"), PathBuf::from("b")]
        );
    }
}
