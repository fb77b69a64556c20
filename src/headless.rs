//! CPU-side [`GraphicsDevice`].
//!
//! Keeps texel data in memory, applies the same framebuffer completeness rules a
//! GL driver would, validates shaders with naga and records every call it
//! receives. Draws are validated and recorded but not rasterized.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::device::{
    AttachmentState, BufferId, BufferUsage, DepthState, DrawCall, FramebufferId, FramebufferStatus,
    GraphicsDevice, MAX_COLOR_ATTACHMENTS, ProgramId, SamplerParams, ShaderId, ShaderStage,
    TextureDescriptor, TextureFormat, TextureId, Viewport,
};
use crate::error::{Error, Result};
use crate::wgsl::{self, CompiledShader};

/// One recorded device command.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateTexture {
        id: TextureId,
        label: String,
        width: u32,
        height: u32,
        format: TextureFormat,
    },
    DestroyTexture(TextureId),
    WriteTexture(TextureId),
    GenerateMipmaps(TextureId),
    CreateBuffer(BufferId),
    WriteBuffer { id: BufferId, len: usize },
    DestroyBuffer(BufferId),
    CreateFramebuffer(FramebufferId),
    DestroyFramebuffer(FramebufferId),
    AttachColor {
        framebuffer: FramebufferId,
        index: u32,
        texture: Option<TextureId>,
    },
    AttachDepth {
        framebuffer: FramebufferId,
        texture: Option<TextureId>,
    },
    SetDrawBuffers {
        framebuffer: FramebufferId,
        attachments: Vec<u32>,
    },
    BindFramebuffer(Option<FramebufferId>),
    SetViewport(Viewport),
    SetDepthState(DepthState),
    Clear {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    },
    ClearColorAttachment { index: u32, color: [f32; 4] },
    CompileShader { id: ShaderId, stage: ShaderStage },
    DestroyShader(ShaderId),
    LinkProgram(ProgramId),
    DestroyProgram(ProgramId),
    Draw {
        program: ProgramId,
        target: Option<FramebufferId>,
        count: u32,
    },
}

struct TextureState {
    label: String,
    width: u32,
    height: u32,
    format: TextureFormat,
    mip_levels: u32,
    sampler: SamplerParams,
    data: Vec<u8>,
    mipmap_generations: u32,
}

impl TextureState {
    fn fill(&mut self, texel: &[u8]) {
        for chunk in self.data.chunks_exact_mut(texel.len()) {
            chunk.copy_from_slice(texel);
        }
    }
}

#[derive(Default)]
struct Inner {
    textures: HashMap<TextureId, TextureState>,
    buffers: HashMap<BufferId, (BufferUsage, Vec<u8>)>,
    framebuffers: HashMap<FramebufferId, AttachmentState>,
    shaders: HashMap<ShaderId, CompiledShader>,
    programs: HashMap<ProgramId, Vec<ShaderStage>>,
    bound: Option<FramebufferId>,
    viewport: Viewport,
    depth_state: DepthState,
    surface: Vec<u8>,
    calls: Vec<DeviceCall>,
}

impl Inner {
    fn status(&self, fb: FramebufferId) -> FramebufferStatus {
        match self.framebuffers.get(&fb) {
            Some(state) => state.status(|id| {
                self.textures
                    .get(&id)
                    .map(|t| (t.format, t.width, t.height))
            }),
            None => FramebufferStatus::Undefined,
        }
    }

    fn require_complete(&self, fb: FramebufferId) -> Result<&AttachmentState> {
        let status = self.status(fb);
        if !status.is_complete() {
            return Err(Error::FramebufferIncomplete {
                name: fb.to_string(),
                status,
            });
        }
        self.framebuffers
            .get(&fb)
            .ok_or_else(|| Error::Device(format!("unknown framebuffer {fb}")))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut TextureState> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| Error::Device(format!("unknown texture {id}")))
    }

    fn framebuffer_mut(&mut self, id: FramebufferId) -> Result<&mut AttachmentState> {
        self.framebuffers
            .get_mut(&id)
            .ok_or_else(|| Error::Device(format!("unknown framebuffer {id}")))
    }
}

/// A [`GraphicsDevice`] that never touches a GPU.
pub struct HeadlessDevice {
    inner: RefCell<Inner>,
    next_id: Cell<u64>,
    fail_next: RefCell<Option<(usize, String)>>,
    surface_size: (u32, u32),
}

impl HeadlessDevice {
    /// Creates a device whose default target is an RGBA8 surface of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let inner = Inner {
            viewport: Viewport::sized(width, height),
            surface: vec![0; width as usize * height as usize * 4],
            ..Inner::default()
        };
        Self {
            inner: RefCell::new(inner),
            next_id: Cell::new(1),
            fail_next: RefCell::new(None),
            surface_size: (width, height),
        }
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    /// Makes the next allocation of any kind fail with `reason`.
    pub fn fail_next_allocation(&self, reason: impl Into<String>) {
        self.fail_allocation_after(0, reason);
    }

    /// Lets `skip` allocations succeed, then fails the one after with `reason`.
    pub fn fail_allocation_after(&self, skip: usize, reason: impl Into<String>) {
        *self.fail_next.borrow_mut() = Some((skip, reason.into()));
    }

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    pub fn is_texture_live(&self, id: TextureId) -> bool {
        self.inner.borrow().textures.contains_key(&id)
    }

    pub fn is_buffer_live(&self, id: BufferId) -> bool {
        self.inner.borrow().buffers.contains_key(&id)
    }

    pub fn is_framebuffer_live(&self, id: FramebufferId) -> bool {
        self.inner.borrow().framebuffers.contains_key(&id)
    }

    pub fn is_program_live(&self, id: ProgramId) -> bool {
        self.inner.borrow().programs.contains_key(&id)
    }

    pub fn live_textures(&self) -> usize {
        self.inner.borrow().textures.len()
    }

    /// Count of every native object still allocated.
    pub fn live_objects(&self) -> usize {
        let inner = self.inner.borrow();
        inner.textures.len()
            + inner.buffers.len()
            + inner.framebuffers.len()
            + inner.shaders.len()
            + inner.programs.len()
    }

    pub fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.inner
            .borrow()
            .textures
            .get(&id)
            .map(|t| (t.width, t.height))
    }

    pub fn texture_label(&self, id: TextureId) -> Option<String> {
        self.inner.borrow().textures.get(&id).map(|t| t.label.clone())
    }

    pub fn texture_sampler(&self, id: TextureId) -> Option<SamplerParams> {
        self.inner.borrow().textures.get(&id).map(|t| t.sampler)
    }

    pub fn texture_mip_levels(&self, id: TextureId) -> Option<u32> {
        self.inner.borrow().textures.get(&id).map(|t| t.mip_levels)
    }

    /// How many times mipmaps were regenerated for `id`.
    pub fn mipmap_generations(&self, id: TextureId) -> u32 {
        self.inner
            .borrow()
            .textures
            .get(&id)
            .map_or(0, |t| t.mipmap_generations)
    }

    pub fn buffer_contents(&self, id: BufferId) -> Option<Vec<u8>> {
        self.inner.borrow().buffers.get(&id).map(|(_, d)| d.clone())
    }

    pub fn draw_buffers(&self, id: FramebufferId) -> Option<Vec<u32>> {
        self.inner
            .borrow()
            .framebuffers
            .get(&id)
            .map(|f| f.draw_buffers.clone())
    }

    /// RGBA8 contents of the default target.
    pub fn read_surface(&self) -> Vec<u8> {
        self.inner.borrow().surface.clone()
    }

    fn record(&self, call: DeviceCall) {
        self.inner.borrow_mut().calls.push(call);
    }

    fn allocate(&self, kind: &'static str, label: &str) -> Result<u64> {
        let mut pending = self.fail_next.borrow_mut();
        let fail_now = match pending.as_mut() {
            Some((0, _)) => true,
            Some((skip, _)) => {
                *skip -= 1;
                false
            }
            None => false,
        };
        if fail_now && let Some((_, reason)) = pending.take() {
            return Err(Error::allocation(kind, label, reason));
        }
        drop(pending);
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Ok(id)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::allocation(
                "texture",
                desc.label,
                format!("invalid size {}x{}", desc.width, desc.height),
            ));
        }
        let id = TextureId(self.allocate("texture", desc.label)?);
        let mut inner = self.inner.borrow_mut();
        inner.textures.insert(
            id,
            TextureState {
                label: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
                format: desc.format,
                mip_levels: desc.mip_level_count(),
                sampler: desc.sampler,
                data: vec![0; desc.byte_len()],
                mipmap_generations: 0,
            },
        );
        inner.calls.push(DeviceCall::CreateTexture {
            id,
            label: desc.label.to_string(),
            width: desc.width,
            height: desc.height,
            format: desc.format,
        });
        Ok(id)
    }

    fn destroy_texture(&self, texture: TextureId) {
        if self.inner.borrow_mut().textures.remove(&texture).is_none() {
            log::warn!("headless: destroying unknown texture {texture}");
        }
        self.record(DeviceCall::DestroyTexture(texture));
    }

    fn write_texture(&self, texture: TextureId, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let tex = inner.texture_mut(texture)?;
        if data.len() != tex.data.len() {
            return Err(Error::InvalidUpload {
                name: tex.label.clone(),
                expected: tex.data.len(),
                actual: data.len(),
            });
        }
        tex.data.copy_from_slice(data);
        inner.calls.push(DeviceCall::WriteTexture(texture));
        Ok(())
    }

    fn read_texture(&self, texture: TextureId) -> Result<Vec<u8>> {
        let inner = self.inner.borrow();
        inner
            .textures
            .get(&texture)
            .map(|t| t.data.clone())
            .ok_or_else(|| Error::Device(format!("unknown texture {texture}")))
    }

    fn generate_mipmaps(&self, texture: TextureId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.texture_mut(texture)?.mipmap_generations += 1;
        inner.calls.push(DeviceCall::GenerateMipmaps(texture));
        Ok(())
    }

    fn create_buffer(&self, label: &str, usage: BufferUsage) -> Result<BufferId> {
        let id = BufferId(self.allocate("buffer", label)?);
        let mut inner = self.inner.borrow_mut();
        inner.buffers.insert(id, (usage, Vec::new()));
        inner.calls.push(DeviceCall::CreateBuffer(id));
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let (_, contents) = inner
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::Device(format!("unknown buffer {buffer}")))?;
        *contents = data.to_vec();
        inner.calls.push(DeviceCall::WriteBuffer {
            id: buffer,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if self.inner.borrow_mut().buffers.remove(&buffer).is_none() {
            log::warn!("headless: destroying unknown buffer {buffer}");
        }
        self.record(DeviceCall::DestroyBuffer(buffer));
    }

    fn create_framebuffer(&self, label: &str) -> Result<FramebufferId> {
        let id = FramebufferId(self.allocate("framebuffer", label)?);
        let mut inner = self.inner.borrow_mut();
        inner.framebuffers.insert(id, AttachmentState::default());
        inner.calls.push(DeviceCall::CreateFramebuffer(id));
        Ok(id)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) {
        let mut inner = self.inner.borrow_mut();
        if inner.framebuffers.remove(&framebuffer).is_none() {
            log::warn!("headless: destroying unknown framebuffer {framebuffer}");
        }
        if inner.bound == Some(framebuffer) {
            inner.bound = None;
        }
        inner.calls.push(DeviceCall::DestroyFramebuffer(framebuffer));
    }

    fn attach_color(
        &self,
        framebuffer: FramebufferId,
        index: u32,
        texture: Option<TextureId>,
    ) -> Result<()> {
        if index as usize >= MAX_COLOR_ATTACHMENTS {
            return Err(Error::Device(format!(
                "color attachment {index} exceeds the limit of {MAX_COLOR_ATTACHMENTS}"
            )));
        }
        let mut inner = self.inner.borrow_mut();
        let fb = inner.framebuffer_mut(framebuffer)?;
        match texture {
            Some(t) => fb.colors.insert(index, t),
            None => fb.colors.remove(&index),
        };
        inner.calls.push(DeviceCall::AttachColor {
            framebuffer,
            index,
            texture,
        });
        Ok(())
    }

    fn attach_depth(&self, framebuffer: FramebufferId, texture: Option<TextureId>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.framebuffer_mut(framebuffer)?.depth = texture;
        inner.calls.push(DeviceCall::AttachDepth {
            framebuffer,
            texture,
        });
        Ok(())
    }

    fn set_draw_buffers(&self, framebuffer: FramebufferId, attachments: &[u32]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.framebuffer_mut(framebuffer)?.draw_buffers = attachments.to_vec();
        inner.calls.push(DeviceCall::SetDrawBuffers {
            framebuffer,
            attachments: attachments.to_vec(),
        });
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        self.inner.borrow().status(framebuffer)
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(fb) = framebuffer
            && !inner.framebuffers.contains_key(&fb)
        {
            return Err(Error::Device(format!("unknown framebuffer {fb}")));
        }
        inner.bound = framebuffer;
        inner.calls.push(DeviceCall::BindFramebuffer(framebuffer));
        Ok(())
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.inner.borrow().bound
    }

    fn viewport(&self) -> Viewport {
        self.inner.borrow().viewport
    }

    fn set_viewport(&self, viewport: Viewport) {
        let mut inner = self.inner.borrow_mut();
        inner.viewport = viewport;
        inner.calls.push(DeviceCall::SetViewport(viewport));
    }

    fn depth_state(&self) -> DepthState {
        self.inner.borrow().depth_state
    }

    fn set_depth_state(&self, state: DepthState) {
        let mut inner = self.inner.borrow_mut();
        inner.depth_state = state;
        inner.calls.push(DeviceCall::SetDepthState(state));
    }

    fn clear(&self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let bound = inner.bound;
        match bound {
            None => {
                if let Some(color) = color {
                    let texel = TextureFormat::Rgba8Unorm.encode_color(color);
                    for chunk in inner.surface.chunks_exact_mut(4) {
                        chunk.copy_from_slice(&texel);
                    }
                }
            }
            Some(fb) => {
                let state = inner.require_complete(fb)?;
                let targets = state.draw_targets();
                let depth_target = depth.and(state.depth);
                if let Some(color) = color {
                    for id in targets {
                        let tex = inner.texture_mut(id)?;
                        let texel = tex.format.encode_color(color);
                        tex.fill(&texel);
                    }
                }
                if let (Some(id), Some(value)) = (depth_target, depth) {
                    let tex = inner.texture_mut(id)?;
                    tex.fill(&value.to_ne_bytes());
                }
            }
        }
        inner.calls.push(DeviceCall::Clear { color, depth });
        Ok(())
    }

    fn clear_color_attachment(&self, index: u32, color: [f32; 4]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let fb = inner
            .bound
            .ok_or_else(|| Error::Device("no framebuffer bound".into()))?;
        let texture = inner
            .require_complete(fb)?
            .colors
            .get(&index)
            .copied()
            .ok_or_else(|| Error::Device(format!("color attachment {index} is empty")))?;
        let tex = inner.texture_mut(texture)?;
        let texel = tex.format.encode_color(color);
        tex.fill(&texel);
        inner
            .calls
            .push(DeviceCall::ClearColorAttachment { index, color });
        Ok(())
    }

    fn compile_shader(&self, label: &str, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        let compiled = wgsl::compile(label, stage, source)?;
        let id = ShaderId(self.allocate("shader", label)?);
        let mut inner = self.inner.borrow_mut();
        inner.shaders.insert(id, compiled);
        inner.calls.push(DeviceCall::CompileShader { id, stage });
        Ok(id)
    }

    fn destroy_shader(&self, shader: ShaderId) {
        if self.inner.borrow_mut().shaders.remove(&shader).is_none() {
            log::warn!("headless: destroying unknown shader {shader}");
        }
        self.record(DeviceCall::DestroyShader(shader));
    }

    fn link_program(&self, label: &str, shaders: &[ShaderId]) -> Result<ProgramId> {
        let stages = {
            let inner = self.inner.borrow();
            let compiled = shaders
                .iter()
                .map(|id| {
                    inner
                        .shaders
                        .get(id)
                        .ok_or_else(|| Error::Link {
                            name: label.to_string(),
                            diagnostic: format!("shader {id} does not exist"),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            wgsl::link(label, &compiled)?;
            compiled.iter().map(|s| s.stage).collect::<Vec<_>>()
        };
        let id = ProgramId(self.allocate("program", label)?);
        let mut inner = self.inner.borrow_mut();
        inner.programs.insert(id, stages);
        inner.calls.push(DeviceCall::LinkProgram(id));
        Ok(id)
    }

    fn destroy_program(&self, program: ProgramId) {
        if self.inner.borrow_mut().programs.remove(&program).is_none() {
            log::warn!("headless: destroying unknown program {program}");
        }
        self.record(DeviceCall::DestroyProgram(program));
    }

    fn draw(&self, call: &DrawCall<'_>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.programs.contains_key(&call.program) {
            return Err(Error::Device(format!("unknown program {}", call.program)));
        }
        let buffers = call
            .vertices
            .map(|v| v.buffer)
            .into_iter()
            .chain(call.indices)
            .chain(call.uniforms);
        for buffer in buffers {
            if !inner.buffers.contains_key(&buffer) {
                return Err(Error::Device(format!("unknown buffer {buffer}")));
            }
        }
        if let Some(missing) = call.textures.iter().find(|t| !inner.textures.contains_key(*t)) {
            return Err(Error::Device(format!("unknown texture {missing}")));
        }
        if let Some(fb) = inner.bound {
            inner.require_complete(fb)?;
        }
        let target = inner.bound;
        inner.calls.push(DeviceCall::Draw {
            program: call.program,
            target,
            count: call.count,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Attachment;

    fn desc(label: &str, format: TextureFormat) -> TextureDescriptor<'_> {
        TextureDescriptor {
            label,
            width: 4,
            height: 4,
            format,
            mipmaps: false,
            sampler: SamplerParams::default(),
        }
    }

    #[test]
    fn ids_are_never_reused() {
        let device = HeadlessDevice::new(8, 8);
        let a = device.create_texture(&desc("a", TextureFormat::R8Unorm)).unwrap();
        device.destroy_texture(a);
        let b = device.create_texture(&desc("b", TextureFormat::R8Unorm)).unwrap();
        assert_ne!(a, b);
        assert!(!device.is_texture_live(a));
        assert!(device.is_texture_live(b));
    }

    #[test]
    fn injected_failure_hits_only_the_next_allocation() {
        let device = HeadlessDevice::new(8, 8);
        device.fail_next_allocation("out of memory");
        let err = device.create_buffer("vb", BufferUsage::Vertex).unwrap_err();
        assert!(matches!(err, Error::Allocation { kind: "buffer", .. }));
        assert!(device.create_buffer("vb", BufferUsage::Vertex).is_ok());
    }

    #[test]
    fn completeness_rules() {
        let device = HeadlessDevice::new(8, 8);
        let fb = device.create_framebuffer("fb").unwrap();
        assert_eq!(
            device.framebuffer_status(fb),
            FramebufferStatus::MissingAttachment
        );

        let color = device.create_texture(&desc("c", TextureFormat::Rgba8Unorm)).unwrap();
        device.attach_color(fb, 0, Some(color)).unwrap();
        device.set_draw_buffers(fb, &[0, 1]).unwrap();
        assert_eq!(
            device.framebuffer_status(fb),
            FramebufferStatus::IncompleteDrawBuffer(1)
        );

        device.set_draw_buffers(fb, &[0]).unwrap();
        assert!(device.framebuffer_status(fb).is_complete());

        device.attach_depth(fb, Some(color)).unwrap();
        assert!(matches!(
            device.framebuffer_status(fb),
            FramebufferStatus::IncompleteAttachment {
                attachment: Attachment::Depth,
                ..
            }
        ));
    }

    #[test]
    fn clear_writes_only_declared_draw_buffers() {
        let device = HeadlessDevice::new(8, 8);
        let fb = device.create_framebuffer("fb").unwrap();
        let a = device.create_texture(&desc("a", TextureFormat::Rgba8Unorm)).unwrap();
        let b = device.create_texture(&desc("b", TextureFormat::Rgba8Unorm)).unwrap();
        device.attach_color(fb, 0, Some(a)).unwrap();
        device.attach_color(fb, 1, Some(b)).unwrap();
        device.set_draw_buffers(fb, &[1]).unwrap();
        device.bind_framebuffer(Some(fb)).unwrap();

        device.clear(Some([0.0, 1.0, 0.0, 1.0]), None).unwrap();

        assert!(device.read_texture(a).unwrap().iter().all(|&x| x == 0));
        assert_eq!(&device.read_texture(b).unwrap()[..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn upload_size_is_checked() {
        let device = HeadlessDevice::new(8, 8);
        let t = device.create_texture(&desc("t", TextureFormat::Rg8Unorm)).unwrap();
        assert!(matches!(
            device.write_texture(t, &[0; 3]),
            Err(Error::InvalidUpload {
                expected: 32,
                actual: 3,
                ..
            })
        ));
        device.write_texture(t, &[7; 32]).unwrap();
        assert_eq!(device.read_texture(t).unwrap(), vec![7; 32]);
    }
}
