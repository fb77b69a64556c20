//! The per-frame loop, independent of any window.
//!
//! ```text
//! startup()           load the tree once; failure is fatal
//! frame()             poll watcher -> reload (top of frame) -> update -> render
//! resize(w, h)        forwarded to every resizable component
//! shutdown()          unload the tree
//! ```

use std::time::Instant;

use crate::component::{ComponentCollection, FrameData};
use crate::device::GraphicsDevice;
use crate::error::Result;
use crate::input::KeyEvent;
use crate::resource::ReloadReport;
use crate::watch::FileSystemPoller;

pub struct FrameDriver<D> {
    device: D,
    root: ComponentCollection,
    poller: Option<FileSystemPoller>,
    width: u32,
    height: u32,
    frame: u64,
    started: Instant,
    last_frame: Instant,
    running: bool,
}

impl<D: GraphicsDevice> FrameDriver<D> {
    pub fn new(device: D, root: ComponentCollection, width: u32, height: u32) -> Self {
        let now = Instant::now();
        Self {
            device,
            root,
            poller: None,
            width,
            height,
            frame: 0,
            started: now,
            last_frame: now,
            running: false,
        }
    }

    /// Reload the tree whenever `poller` reports a change.
    pub fn with_poller(mut self, poller: FileSystemPoller) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn root(&self) -> &ComponentCollection {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ComponentCollection {
        &mut self.root
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames rendered so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Loads every component. An error here means the application cannot start.
    pub fn startup(&mut self) -> Result<()> {
        log::info!(
            "starting on {} backend at {}x{}",
            self.device.backend_name(),
            self.width,
            self.height
        );
        if let Err(e) = self.root.load(&self.device) {
            log::error!("startup failed: {e}");
            return Err(e);
        }
        if let Some(poller) = self.poller.as_mut() {
            poller.poll_now();
        }
        let now = Instant::now();
        self.started = now;
        self.last_frame = now;
        self.running = true;
        Ok(())
    }

    /// Runs one frame timed by the wall clock.
    pub fn frame(&mut self) -> Result<FrameData> {
        let now = Instant::now();
        let time = now.duration_since(self.started).as_secs_f32();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_at(time, delta)
    }

    /// Runs one frame with explicit timing.
    pub fn frame_at(&mut self, time: f32, delta: f32) -> Result<FrameData> {
        if self.poller.as_mut().is_some_and(FileSystemPoller::poll) {
            log::info!("change detected, reloading");
            self.reload();
        }
        let data = FrameData {
            frame: self.frame,
            time,
            delta,
            width: self.width,
            height: self.height,
        };
        self.root.update(&self.device, &data)?;
        self.root.render(&self.device, &data)?;
        self.frame += 1;
        Ok(data)
    }

    /// Hot-reloads the whole tree. Failures are logged; the previous objects stay
    /// in use.
    pub fn reload(&mut self) -> ReloadReport {
        let report = self.root.reload(&self.device);
        for message in report.messages() {
            log::warn!("reload failed: {message}");
        }
        if report.is_ok() {
            log::info!("reloaded {} resource(s)", report.reloaded.len());
        }
        if let Some(poller) = self.poller.as_mut() {
            poller.reset();
        }
        report
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        log::debug!("resize to {width}x{height}");
        self.width = width;
        self.height = height;
        self.root.resize(&self.device, width, height)
    }

    pub fn key_down(&mut self, key: &KeyEvent) -> bool {
        self.root.key_down(key)
    }

    pub fn key_up(&mut self, key: &KeyEvent) -> bool {
        self.root.key_up(key)
    }

    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.root.unload(&self.device);
        self.running = false;
        log::info!("shut down after {} frame(s)", self.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::component::OperatorComponent;

    const VS: &str = "@vertex fn main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> { return vec4<f32>(p, 1.0); }";
    const FS: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";

    #[test]
    fn frames_are_numbered_and_sized() {
        let mut root = ComponentCollection::new();
        root.add(OperatorComponent::from_sources("op", VS, FS).unwrap());
        let mut driver = FrameDriver::new(HeadlessDevice::new(16, 16), root, 16, 16);
        driver.startup().unwrap();

        let first = driver.frame_at(0.0, 0.0).unwrap();
        driver.resize(32, 8).unwrap();
        let second = driver.frame_at(0.5, 0.5).unwrap();
        assert_eq!((first.frame, second.frame), (0, 1));
        assert_eq!((second.width, second.height), (32, 8));

        driver.shutdown();
        assert_eq!(driver.device().live_objects(), 0);
    }

    #[test]
    fn failed_startup_is_reported() {
        let mut root = ComponentCollection::new();
        root.add(OperatorComponent::from_sources("op", VS, "@fragment fn main( {").unwrap());
        let mut driver = FrameDriver::new(HeadlessDevice::new(16, 16), root, 16, 16);
        assert!(driver.startup().is_err());
        assert!(!driver.is_running());
        assert_eq!(driver.device().live_objects(), 0);
    }
}
