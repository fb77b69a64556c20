//! Shader stages and linked programs.

use std::rc::Rc;

use crate::device::{GraphicsDevice, ProgramId, ShaderId, ShaderStage};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::loader::ShaderLoader;
use crate::resource::{Rebuild, ReloadableResource, Resource};

/// One WGSL stage. Compiled on load.
pub struct Shader {
    lifecycle: Lifecycle,
    stage: ShaderStage,
    source: String,
    handle: Option<ShaderId>,
}

impl Shader {
    pub fn new(name: impl Into<String>, stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            lifecycle: Lifecycle::new("shader", name),
            stage,
            source: source.into(),
            handle: None,
        }
    }

    /// Reads the source for `identifier` through `loader`.
    pub fn from_loader(
        loader: &dyn ShaderLoader,
        stage: ShaderStage,
        identifier: &str,
    ) -> Result<Self> {
        Ok(Self::new(identifier, stage, loader.load(identifier)?))
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn handle(&self) -> Option<ShaderId> {
        self.handle
    }
}

impl Resource for Shader {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let name = self.lifecycle.name().to_string();
        let (stage, source) = (self.stage, &self.source);
        let handle = &mut self.handle;
        self.lifecycle.run_load(|| {
            *handle = Some(device.compile_shader(&name, stage, source)?);
            Ok(())
        })
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let handle = &mut self.handle;
        self.lifecycle.run_unload(|| {
            if let Some(id) = handle.take() {
                device.destroy_shader(id);
            }
        });
    }
}

/// A linked program made of at most one shader per stage.
///
/// Loading compiles every stage, then links. Any failure releases whatever was
/// allocated and leaves the program handle unallocated.
pub struct ShaderProgram {
    lifecycle: Lifecycle,
    shaders: Vec<Shader>,
    handle: Option<ProgramId>,
}

impl ShaderProgram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifecycle: Lifecycle::new("program", name),
            shaders: Vec::new(),
            handle: None,
        }
    }

    /// A vertex + fragment program from in-memory sources.
    pub fn from_sources(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let vs = Shader::new(format!("{name}.vert"), ShaderStage::Vertex, vertex);
        let fs = Shader::new(format!("{name}.frag"), ShaderStage::Fragment, fragment);
        Self {
            lifecycle: Lifecycle::new("program", name),
            shaders: vec![vs, fs],
            handle: None,
        }
    }

    /// Reads every `(stage, identifier)` through `loader`.
    pub fn from_loader(
        name: impl Into<String>,
        loader: &dyn ShaderLoader,
        stages: &[(ShaderStage, String)],
    ) -> Result<Self> {
        let mut program = Self::new(name);
        for (stage, identifier) in stages {
            program.attach(Shader::from_loader(loader, *stage, identifier)?)?;
        }
        Ok(program)
    }

    /// Builds a program that re-reads its sources from `loader` on every reload.
    ///
    /// Missing sources fail here; compile and link errors surface on load, or as
    /// a reload failure that keeps the running program.
    pub fn reloadable(
        name: impl Into<String>,
        loader: Rc<dyn ShaderLoader>,
        stages: Vec<(ShaderStage, String)>,
    ) -> Result<ReloadableResource<ShaderProgram>> {
        let name = name.into();
        let create = {
            let (name, loader, stages) = (name.clone(), loader.clone(), stages.clone());
            move || ShaderProgram::from_loader(name, loader.as_ref(), &stages)
        };
        let rebuild = {
            let name = name.clone();
            move |_: &mut ShaderProgram| {
                ShaderProgram::from_loader(name.clone(), loader.as_ref(), &stages)
                    .map(Rebuild::Replace)
            }
        };
        ReloadableResource::new(name, create, rebuild)
    }

    pub fn with_shader(mut self, shader: Shader) -> Result<Self> {
        self.attach(shader)?;
        Ok(self)
    }

    /// Adds a stage. Fails if the program already has one for that stage.
    pub fn attach(&mut self, shader: Shader) -> Result<()> {
        if self.shaders.iter().any(|s| s.stage == shader.stage) {
            return Err(Error::DuplicateStage {
                name: self.lifecycle.name().to_string(),
                stage: shader.stage,
            });
        }
        self.shaders.push(shader);
        Ok(())
    }

    pub fn shaders(&self) -> &[Shader] {
        &self.shaders
    }

    pub fn handle(&self) -> Option<ProgramId> {
        self.handle
    }

    pub fn id(&self) -> Result<ProgramId> {
        self.handle
            .ok_or_else(|| Error::not_loaded(self.lifecycle.name(), "drawing"))
    }
}

impl Resource for ShaderProgram {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let name = self.lifecycle.name().to_string();
        let shaders = &mut self.shaders;
        let handle = &mut self.handle;
        self.lifecycle.run_load(|| {
            let linked = shaders
                .iter_mut()
                .try_for_each(|s| s.load(device))
                .and_then(|()| {
                    let ids: Vec<ShaderId> = shaders.iter().filter_map(|s| s.handle).collect();
                    device.link_program(&name, &ids)
                });
            match linked {
                Ok(id) => {
                    *handle = Some(id);
                    Ok(())
                }
                Err(e) => {
                    for shader in shaders.iter_mut() {
                        shader.unload(device);
                    }
                    Err(e)
                }
            }
        })
    }

    fn unload(&mut self, device: &dyn GraphicsDevice) {
        let shaders = &mut self.shaders;
        let handle = &mut self.handle;
        self.lifecycle.run_unload(|| {
            if let Some(id) = handle.take() {
                device.destroy_program(id);
            }
            for shader in shaders.iter_mut() {
                shader.unload(device);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;
    use crate::loader::MemoryLoader;
    use crate::resource::Reload;

    const VS: &str = "@vertex fn main(@location(0) p: vec2<f32>) -> @builtin(position) vec4<f32> { return vec4<f32>(p, 0.0, 1.0); }";
    const FS: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";

    #[test]
    fn invalid_fragment_source_is_a_compile_error() {
        let device = HeadlessDevice::new(8, 8);
        let mut program = ShaderProgram::from_sources("p", VS, "@fragment fn main( {");
        let err = program.load(&device).unwrap_err();
        match err {
            Error::Compile { name, diagnostic } => {
                assert_eq!(name, "p.frag");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(program.handle().is_none());
        assert!(!program.is_loaded());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let program = ShaderProgram::new("p")
            .with_shader(Shader::new("a", ShaderStage::Vertex, VS))
            .unwrap();
        assert!(matches!(
            program.with_shader(Shader::new("b", ShaderStage::Vertex, VS)),
            Err(Error::DuplicateStage { .. })
        ));
    }

    #[test]
    fn link_failure_releases_compiled_stages() {
        let device = HeadlessDevice::new(8, 8);
        let mut program = ShaderProgram::new("p")
            .with_shader(Shader::new("v", ShaderStage::Vertex, VS))
            .unwrap();
        assert!(matches!(program.load(&device), Err(Error::Link { .. })));
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn reloadable_program_survives_broken_edit() {
        let device = HeadlessDevice::new(8, 8);
        let loader = Rc::new(MemoryLoader::new());
        loader.insert("quad.vert", VS);
        loader.insert("quad.frag", FS);
        let mut program = ShaderProgram::reloadable(
            "quad",
            loader.clone(),
            vec![
                (ShaderStage::Vertex, "quad.vert".into()),
                (ShaderStage::Fragment, "quad.frag".into()),
            ],
        )
        .unwrap();
        program.load(&device).unwrap();
        let first = program.current().id().unwrap();

        loader.insert("quad.frag", "@fragment fn main( {");
        assert!(program.try_reload(&device).is_err());
        assert_eq!(program.current().id().unwrap(), first);
        assert!(device.is_program_live(first));

        loader.insert("quad.frag", FS);
        program.try_reload(&device).unwrap();
        let second = program.current().id().unwrap();
        assert_ne!(second, first);
        assert!(!device.is_program_live(first));
        assert!(device.is_program_live(second));
    }
}
