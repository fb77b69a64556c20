use std::path::PathBuf;
use std::time::Duration;

use crate::loader::{MultiPathLoader, split_search_string};
use crate::logging::LoggingConfig;
use crate::watch::FileSystemPoller;

/// Application settings.
///
/// ```
/// use glint::Config;
///
/// let config = Config::new()
///     .title("Feedback")
///     .size(1280, 720)
///     .shader_path("shaders")
///     .watch_path("shaders");
/// assert_eq!(config.width, 1280);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Directories searched for shader sources, in order.
    pub shader_paths: Vec<PathBuf>,
    /// Directories watched for changes; empty disables hot-reload.
    pub watch_paths: Vec<PathBuf>,
    /// File extensions that count as changes; empty means all files.
    pub watch_extensions: Vec<String>,
    pub poll_interval: Duration,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "glint".to_string(),
            width: 800,
            height: 600,
            shader_paths: vec![PathBuf::from(".")],
            watch_paths: Vec::new(),
            watch_extensions: vec!["wgsl".to_string()],
            poll_interval: FileSystemPoller::DEFAULT_INTERVAL,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub const SHADER_PATH_VAR: &'static str = "GLINT_SHADER_PATH";
    pub const WATCH_PATH_VAR: &'static str = "GLINT_WATCH_PATH";
    pub const POLL_MS_VAR: &'static str = "GLINT_POLL_MS";

    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `GLINT_SHADER_PATH`, `GLINT_WATCH_PATH` (both
    /// `;`-separated) and `GLINT_POLL_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(paths) = lookup(Self::SHADER_PATH_VAR) {
            config.shader_paths = split_search_string(&paths);
        }
        if let Some(paths) = lookup(Self::WATCH_PATH_VAR) {
            config.watch_paths = split_search_string(&paths);
        }
        if let Some(ms) = lookup(Self::POLL_MS_VAR) {
            match ms.trim().parse::<u64>() {
                Ok(ms) => config.poll_interval = Duration::from_millis(ms),
                Err(e) => log::warn!("ignoring {}={ms:?}: {e}", Self::POLL_MS_VAR),
            }
        }
        config
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Appends a shader search directory.
    pub fn shader_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shader_paths.push(path.into());
        self
    }

    /// Appends a directory to watch for hot-reload.
    pub fn watch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_paths.push(path.into());
        self
    }

    pub fn watch_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn shader_loader(&self) -> MultiPathLoader {
        MultiPathLoader::new(self.shader_paths.iter().cloned())
    }

    /// A poller over the watch paths, or `None` when nothing is watched.
    pub fn poller(&self) -> Option<FileSystemPoller> {
        if self.watch_paths.is_empty() {
            return None;
        }
        Some(
            FileSystemPoller::new(self.watch_paths.iter().cloned())
                .with_extensions(self.watch_extensions.iter().cloned())
                .with_interval(self.poll_interval),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (Config::SHADER_PATH_VAR, "shaders;common"),
            (Config::WATCH_PATH_VAR, "shaders"),
            (Config::POLL_MS_VAR, "250"),
        ]
        .into();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(
            config.shader_paths,
            vec![PathBuf::from("shaders"), PathBuf::from("common")]
        );
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.poller().is_some());
    }

    #[test]
    fn bad_poll_interval_keeps_default() {
        let config = Config::from_lookup(|k| (k == Config::POLL_MS_VAR).then(|| "soon".into()));
        assert_eq!(config.poll_interval, FileSystemPoller::DEFAULT_INTERVAL);
        assert!(config.poller().is_none());
    }
}
