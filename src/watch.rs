//! Change detection for hot-reload.
//!
//! [`FileSystemPoller`] fingerprints every watched file by path and modification
//! time. The frame driver polls it once per frame; the actual walk only happens
//! when the poll interval has elapsed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use walkdir::WalkDir;

type Fingerprint = BTreeMap<PathBuf, SystemTime>;

pub struct FileSystemPoller {
    paths: Vec<PathBuf>,
    extensions: Vec<String>,
    interval: Duration,
    last_poll: Option<Instant>,
    baseline: Option<Fingerprint>,
    current: Fingerprint,
}

impl FileSystemPoller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            extensions: Vec::new(),
            interval: Self::DEFAULT_INTERVAL,
            last_poll: None,
            baseline: None,
            current: Fingerprint::new(),
        }
    }

    /// Only files with one of these extensions count. Empty means every file.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_string())
            .collect();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Rescans if the interval has elapsed and returns whether anything changed
    /// since the last [`reset`](Self::reset).
    pub fn poll(&mut self) -> bool {
        let due = self
            .last_poll
            .is_none_or(|at| at.elapsed() >= self.interval);
        if !due {
            return false;
        }
        self.poll_now();
        self.has_changes()
    }

    /// Rescans regardless of the interval. The first scan becomes the baseline.
    pub fn poll_now(&mut self) {
        self.last_poll = Some(Instant::now());
        self.current = self.scan();
        if self.baseline.is_none() {
            self.baseline = Some(self.current.clone());
        }
    }

    pub fn has_changes(&self) -> bool {
        self.baseline
            .as_ref()
            .is_some_and(|baseline| *baseline != self.current)
    }

    /// Accepts the current state as the new baseline.
    pub fn reset(&mut self) {
        self.baseline = Some(self.current.clone());
    }

    fn scan(&self) -> Fingerprint {
        let mut fingerprint = Fingerprint::new();
        for root in &self.paths {
            for entry in WalkDir::new(root).into_iter().filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::trace!("skipping {}: {err}", root.display());
                    None
                }
            }) {
                if !entry.file_type().is_file() || !self.matches(entry.path()) {
                    continue;
                }
                if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                    fingerprint.insert(entry.into_path(), modified);
                }
            }
        }
        fingerprint
    }

    fn matches(&self, path: &Path) -> bool {
        self.extensions.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| self.extensions.iter().any(|x| x == e))
    }
}

impl std::fmt::Debug for FileSystemPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemPoller")
            .field("paths", &self.paths)
            .field("extensions", &self.extensions)
            .field("interval", &self.interval)
            .field("files", &self.current.len())
            .finish()
    }
}
