//! Shader hot-reload driven by file changes on disk.

use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use glint::{
    ComponentCollection, FileSystemPoller, FrameDriver, HeadlessDevice, MultiPathLoader,
    OperatorComponent,
};

const VS: &str = "@vertex fn main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> { return vec4<f32>(p, 1.0); }";
const RED: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0, 0.0, 0.0, 1.0); }";
const BLUE: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(0.0, 0.0, 1.0, 1.0); }";

/// Rewrites `path` and pushes its mtime forward so the change is visible even on
/// coarse-grained filesystems.
fn rewrite(path: &Path, source: &str, age: u64) {
    fs::write(path, source).unwrap();
    let stamp = SystemTime::now() + Duration::from_secs(age);
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(stamp)
        .unwrap();
}

fn driver_for(dir: &Path) -> FrameDriver<HeadlessDevice> {
    let loader = Rc::new(MultiPathLoader::new([dir.to_path_buf()]));
    let mut root = ComponentCollection::new();
    root.add(OperatorComponent::new("op", loader, "quad.vert.wgsl", "tint.frag.wgsl").unwrap());
    let poller = FileSystemPoller::new([dir.to_path_buf()])
        .with_extensions(["wgsl"])
        .with_interval(Duration::ZERO);
    FrameDriver::new(HeadlessDevice::new(16, 16), root, 16, 16).with_poller(poller)
}

fn program_state(driver: &FrameDriver<HeadlessDevice>) -> (u32, glint::device::ProgramId) {
    let program = driver
        .root()
        .get_as::<OperatorComponent>("op")
        .unwrap()
        .program()
        .unwrap();
    (program.generation(), program.current().id().unwrap())
}

#[test]
fn edited_shader_is_swapped_in_at_the_next_frame() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("quad.vert.wgsl"), VS).unwrap();
    fs::write(dir.path().join("tint.frag.wgsl"), RED).unwrap();

    let mut driver = driver_for(dir.path());
    driver.startup().unwrap();
    driver.frame_at(0.0, 0.0).unwrap();
    let (generation, first) = program_state(&driver);
    assert_eq!(generation, 0);

    rewrite(&dir.path().join("tint.frag.wgsl"), BLUE, 5);
    driver.frame_at(0.1, 0.1).unwrap();
    let (generation, second) = program_state(&driver);
    assert_eq!(generation, 1);
    assert_ne!(first, second);
    assert!(!driver.device().is_program_live(first));
    assert!(driver.device().is_program_live(second));

    // no further change, no further reload
    driver.frame_at(0.2, 0.1).unwrap();
    assert_eq!(program_state(&driver).0, 1);

    driver.shutdown();
    assert_eq!(driver.device().live_objects(), 0);
}

#[test]
fn broken_edit_keeps_the_running_program() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("quad.vert.wgsl"), VS).unwrap();
    fs::write(dir.path().join("tint.frag.wgsl"), RED).unwrap();

    let mut driver = driver_for(dir.path());
    driver.startup().unwrap();
    let (_, running) = program_state(&driver);

    rewrite(&dir.path().join("tint.frag.wgsl"), "@fragment fn main( {", 5);
    driver.frame_at(0.1, 0.1).unwrap();
    assert_eq!(program_state(&driver), (0, running));
    assert!(driver.device().is_program_live(running));

    // fixing the file recovers on the following frame
    rewrite(&dir.path().join("tint.frag.wgsl"), BLUE, 10);
    driver.frame_at(0.2, 0.1).unwrap();
    let (generation, fixed) = program_state(&driver);
    assert_eq!(generation, 1);
    assert_ne!(fixed, running);
}

#[test]
fn explicit_reload_reports_failures() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("quad.vert.wgsl"), VS).unwrap();
    fs::write(dir.path().join("tint.frag.wgsl"), RED).unwrap();

    let mut driver = driver_for(dir.path());
    driver.startup().unwrap();
    fs::remove_file(dir.path().join("tint.frag.wgsl")).unwrap();

    let report = driver.reload();
    assert!(!report.is_ok());
    assert_eq!(report.failures.len(), 1);
    assert!(report.messages()[0].contains("tint.frag.wgsl"));
}
