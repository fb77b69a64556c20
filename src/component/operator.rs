//! Full-screen shader passes.

use std::rc::Rc;

use glam::Vec3;

use crate::component::{Capabilities, Component, ComponentBase, FrameData};
use crate::device::{
    BufferUsage, DepthState, DrawCall, ElementLayout, GraphicsDevice, ShaderStage, TextureId,
    VertexInput,
};
use crate::error::{Error, Result};
use crate::loader::{MemoryLoader, ShaderLoader};
use crate::resource::{BufferData, BufferObject, ReloadableResource, ShaderProgram, TextureLink};

/// Quad corners in clip space.
const QUAD_VERTICES: [Vec3; 4] = [
    Vec3::new(-1.0, 1.0, 0.0),
    Vec3::new(-1.0, -1.0, 0.0),
    Vec3::new(1.0, 1.0, 0.0),
    Vec3::new(1.0, -1.0, 0.0),
];

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 1, 3, 2];

type UniformSource = Box<dyn FnMut(&FrameData) -> BufferData>;

/// Draws a quad covering the current target with a hot-reloadable program.
///
/// The vertex stage receives the corner position at `@location(0)` as a
/// `vec3<f32>`. Input textures are bound in order at `@binding(1 + 2i)` with
/// their samplers at `@binding(2 + 2i)`; the optional uniform buffer sits at
/// `@binding(0)`. Usually placed inside a [`RenderTarget`](super::RenderTarget)
/// and fed another target's [`TextureLink`]s.
pub struct OperatorComponent {
    base: ComponentBase,
    program: String,
    vertices: String,
    indices: String,
    uniforms: Option<String>,
    uniform_source: Option<UniformSource>,
    inputs: Vec<TextureLink>,
}

impl OperatorComponent {
    /// Reads `vertex` and `fragment` through `loader`, now and on every reload.
    pub fn new(
        name: impl Into<String>,
        loader: Rc<dyn ShaderLoader>,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self> {
        let name = name.into();
        let mut base = ComponentBase::new(
            name.clone(),
            Capabilities::RENDER | Capabilities::UPDATE | Capabilities::RELOAD,
        );
        let resources = base.resources_mut();
        let vertices = resources.add(
            BufferObject::new(format!("{name}.vertices"), BufferUsage::Vertex)
                .with_data(BufferData::Vec3(QUAD_VERTICES.to_vec())),
        );
        let indices = resources.add(
            BufferObject::new(format!("{name}.indices"), BufferUsage::Index)
                .with_data(BufferData::Uint(QUAD_INDICES.to_vec())),
        );
        let program = resources.add(ShaderProgram::reloadable(
            format!("{name}.program"),
            loader,
            vec![
                (ShaderStage::Vertex, vertex.to_string()),
                (ShaderStage::Fragment, fragment.to_string()),
            ],
        )?);
        Ok(Self {
            base,
            program,
            vertices,
            indices,
            uniforms: None,
            uniform_source: None,
            inputs: Vec::new(),
        })
    }

    /// An operator with fixed in-memory sources.
    pub fn from_sources(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let (vs, fs) = (format!("{name}.vert.wgsl"), format!("{name}.frag.wgsl"));
        let loader = MemoryLoader::new()
            .with_source(vs.clone(), vertex)
            .with_source(fs.clone(), fragment);
        Self::new(name, Rc::new(loader), &vs, &fs)
    }

    pub fn with_draw_order(mut self, order: i32) -> Self {
        self.base.set_draw_order(order);
        self
    }

    /// Appends a sampled input.
    pub fn with_input(mut self, input: TextureLink) -> Self {
        self.inputs.push(input);
        self
    }

    /// Adds a uniform buffer with initial contents.
    pub fn with_uniforms(mut self, data: BufferData) -> Self {
        let name = format!("{}.uniforms", self.base.name());
        let key = self
            .base
            .resources_mut()
            .add(BufferObject::new(name, BufferUsage::Uniform).with_data(data));
        self.uniforms = Some(key);
        self
    }

    /// Recomputes the uniforms every update.
    pub fn with_uniform_source(
        mut self,
        initial: BufferData,
        source: impl FnMut(&FrameData) -> BufferData + 'static,
    ) -> Self {
        self = self.with_uniforms(initial);
        self.uniform_source = Some(Box::new(source));
        self
    }

    pub fn inputs(&self) -> &[TextureLink] {
        &self.inputs
    }

    pub fn set_input(&mut self, index: usize, input: TextureLink) {
        if index < self.inputs.len() {
            self.inputs[index] = input;
        } else {
            self.inputs.push(input);
        }
    }

    pub fn program(&self) -> Result<&ReloadableResource<ShaderProgram>> {
        self.base.resource(&self.program)
    }

    /// Replaces the uniform contents, uploading right away when loaded.
    pub fn set_uniforms(&mut self, device: &dyn GraphicsDevice, data: BufferData) -> Result<()> {
        let key = self
            .uniforms
            .as_deref()
            .ok_or_else(|| Error::NotFound(format!("{}.uniforms", self.base.name())))?;
        self.base
            .resources_mut()
            .get_mut::<BufferObject>(key)?
            .set_data(device, data)
    }

    fn resolve_inputs(&self) -> Result<Vec<TextureId>> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(slot, link)| {
                link.get().ok_or_else(|| Error::SlotNotBound {
                    name: self.base.name().to_string(),
                    slot,
                })
            })
            .collect()
    }
}

impl Component for OperatorComponent {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameData) -> Result<()> {
        let Some(source) = self.uniform_source.as_mut() else {
            return Ok(());
        };
        let data = source(frame);
        self.set_uniforms(device, data)
    }

    fn render(&mut self, device: &dyn GraphicsDevice, _frame: &FrameData) -> Result<()> {
        self.base.lifecycle().require_loaded("rendering")?;
        let program = self.program()?.current().id()?;
        let vertices = self.base.resource::<BufferObject>(&self.vertices)?.id()?;
        let indices = self.base.resource::<BufferObject>(&self.indices)?.id()?;
        let uniforms = match &self.uniforms {
            Some(key) => Some(self.base.resource::<BufferObject>(key)?.id()?),
            None => None,
        };
        let textures = self.resolve_inputs()?;

        let saved = device.depth_state();
        device.set_depth_state(DepthState::DISABLED);
        let drawn = device.draw(&DrawCall {
            program,
            vertices: Some(VertexInput {
                buffer: vertices,
                layout: ElementLayout::Vec3,
            }),
            indices: Some(indices),
            count: QUAD_INDICES.len() as u32,
            textures: &textures,
            uniforms,
        });
        device.set_depth_state(saved);
        drawn
    }
}
