//! The native graphics seam.
//!
//! Every resource talks to the GPU through [`GraphicsDevice`]. The trait exposes a
//! small, GL-shaped command set (allocate, attach, bind, clear, draw, destroy) and
//! hands out opaque ids instead of native objects, so resources never hold backend
//! types directly.
//!
//! Two devices ship with the crate:
//!
//! - [`GpuContext`](crate::GpuContext): wgpu, windowed or offscreen.
//! - [`HeadlessDevice`](crate::HeadlessDevice): CPU-side, records every call.
//!
//! Ids are never reused, so a resource that is unloaded and loaded again always
//! receives a different handle.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw id, useful for logging.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

native_id!(
    /// Handle to a device texture.
    TextureId
);
native_id!(
    /// Handle to a device buffer.
    BufferId
);
native_id!(
    /// Handle to a framebuffer object.
    FramebufferId
);
native_id!(
    /// Handle to a compiled shader stage.
    ShaderId
);
native_id!(
    /// Handle to a linked shader program.
    ProgramId
);

/// Maximum color attachment points a framebuffer exposes.
pub const MAX_COLOR_ATTACHMENTS: usize = 16;

/// Pixel formats supported for textures and render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    #[default]
    Rgba8Unorm,
    R32Float,
    Rg32Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm => 2,
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::R32Float => 4,
            TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth32Float => 4,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 1,
            TextureFormat::Rg8Unorm | TextureFormat::Rg32Float => 2,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba32Float => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        self == TextureFormat::Depth32Float
    }

    /// Encodes a normalized RGBA color as one texel of this format.
    ///
    /// Channels the format does not store are dropped.
    pub fn encode_color(self, color: [f32; 4]) -> Vec<u8> {
        let channels = &color[..self.channels()];
        match self {
            TextureFormat::R8Unorm | TextureFormat::Rg8Unorm | TextureFormat::Rgba8Unorm => channels
                .iter()
                .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
            TextureFormat::R32Float
            | TextureFormat::Rg32Float
            | TextureFormat::Rgba32Float
            | TextureFormat::Depth32Float => bytemuck::cast_slice(channels).to_vec(),
        }
    }
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Texture addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Sampling parameters attached to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerParams {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

impl SamplerParams {
    /// Nearest filtering, clamped. The usual choice for depth and data textures.
    pub fn nearest() -> Self {
        Self {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            ..Self::default()
        }
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap_u = wrap;
        self.wrap_v = wrap;
        self
    }
}

/// Everything a device needs to allocate a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Allocate a full mip chain.
    pub mipmaps: bool,
    pub sampler: SamplerParams,
}

impl TextureDescriptor<'_> {
    /// Number of mip levels implied by `mipmaps` and the size.
    pub fn mip_level_count(&self) -> u32 {
        if self.mipmaps {
            u32::BITS - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }

    /// Size in bytes of the base level.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// How a buffer is used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    #[default]
    Vertex,
    Index,
    Uniform,
}

/// Element layout of buffer data, used to describe vertex attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementLayout {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Uint,
    Byte,
}

impl ElementLayout {
    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementLayout::Float => 4,
            ElementLayout::Vec2 => 8,
            ElementLayout::Vec3 => 12,
            ElementLayout::Vec4 => 16,
            ElementLayout::Uint => 4,
            ElementLayout::Byte => 1,
        }
    }
}

/// Pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        };
        f.write_str(s)
    }
}

/// Pixel rectangle that draws are mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A viewport covering `width` x `height` from the origin.
    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Depth test and depth write switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
}

impl DepthState {
    pub const DISABLED: DepthState = DepthState {
        test: false,
        write: false,
    };
    pub const ENABLED: DepthState = DepthState {
        test: true,
        write: true,
    };
}

/// An attachment point of a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color(u32),
    Depth,
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attachment::Color(i) => write!(f, "color attachment {i}"),
            Attachment::Depth => f.write_str("depth attachment"),
        }
    }
}

/// Result of a framebuffer completeness check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FramebufferStatus {
    /// Never checked.
    #[default]
    Undefined,
    Complete,
    /// Nothing is attached.
    MissingAttachment,
    /// An attachment is unusable (missing texture, wrong kind of format).
    IncompleteAttachment {
        attachment: Attachment,
        reason: String,
    },
    /// A declared draw buffer has no color attachment behind it.
    IncompleteDrawBuffer(u32),
    /// Attachments differ in size.
    MismatchedDimensions,
    /// The backend cannot render this combination.
    Unsupported(String),
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        *self == FramebufferStatus::Complete
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramebufferStatus::Undefined => f.write_str("undefined"),
            FramebufferStatus::Complete => f.write_str("complete"),
            FramebufferStatus::MissingAttachment => f.write_str("no attachments"),
            FramebufferStatus::IncompleteAttachment { attachment, reason } => {
                write!(f, "{attachment} incomplete: {reason}")
            }
            FramebufferStatus::IncompleteDrawBuffer(i) => {
                write!(f, "draw buffer {i} has no attachment")
            }
            FramebufferStatus::MismatchedDimensions => f.write_str("attachment sizes differ"),
            FramebufferStatus::Unsupported(why) => write!(f, "unsupported: {why}"),
        }
    }
}

/// Attachment bookkeeping for one framebuffer, shared by the backends.
#[derive(Debug, Clone, Default)]
pub(crate) struct AttachmentState {
    pub colors: BTreeMap<u32, TextureId>,
    pub depth: Option<TextureId>,
    pub draw_buffers: Vec<u32>,
}

impl AttachmentState {
    /// GL completeness rules. `describe` returns format and size of a live texture.
    pub fn status(
        &self,
        describe: impl Fn(TextureId) -> Option<(TextureFormat, u32, u32)>,
    ) -> FramebufferStatus {
        if self.colors.is_empty() && self.depth.is_none() {
            return FramebufferStatus::MissingAttachment;
        }

        let mut size = None;
        let mut mismatched = false;
        let attachments = self
            .colors
            .iter()
            .map(|(i, t)| (Attachment::Color(*i), *t))
            .chain(self.depth.map(|t| (Attachment::Depth, t)));
        for (attachment, texture) in attachments {
            let Some((format, width, height)) = describe(texture) else {
                return FramebufferStatus::IncompleteAttachment {
                    attachment,
                    reason: format!("texture {texture} does not exist"),
                };
            };
            let wrong_kind = match attachment {
                Attachment::Color(_) => format.is_depth(),
                Attachment::Depth => !format.is_depth(),
            };
            if wrong_kind {
                return FramebufferStatus::IncompleteAttachment {
                    attachment,
                    reason: format!("format {format:?} cannot be used here"),
                };
            }
            match size {
                None => size = Some((width, height)),
                Some(s) if s != (width, height) => mismatched = true,
                Some(_) => {}
            }
        }

        if let Some(missing) = self
            .draw_buffers
            .iter()
            .find(|i| !self.colors.contains_key(*i))
        {
            return FramebufferStatus::IncompleteDrawBuffer(*missing);
        }
        if mismatched {
            return FramebufferStatus::MismatchedDimensions;
        }
        FramebufferStatus::Complete
    }

    /// Color textures in draw-buffer order.
    pub fn draw_targets(&self) -> Vec<TextureId> {
        self.draw_buffers
            .iter()
            .filter_map(|i| self.colors.get(i).copied())
            .collect()
    }
}

/// Vertex input for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInput {
    pub buffer: BufferId,
    pub layout: ElementLayout,
}

/// One draw against the currently bound framebuffer.
///
/// Resources are bound to `@group(0)`: the uniform buffer at binding 0, texture
/// `i` at binding `1 + 2i` and its sampler at `2 + 2i`.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub vertices: Option<VertexInput>,
    /// `u32` index buffer. When present `count` is the number of indices.
    pub indices: Option<BufferId>,
    pub count: u32,
    pub textures: &'a [TextureId],
    pub uniforms: Option<BufferId>,
}

/// GL-shaped command interface implemented by every backend.
///
/// All methods take `&self`; implementations use interior mutability and are only
/// ever driven from the frame loop thread.
pub trait GraphicsDevice {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<TextureId>;
    fn destroy_texture(&self, texture: TextureId);
    /// Replaces the base level. `data` must be exactly `width * height * bpp` bytes.
    fn write_texture(&self, texture: TextureId, data: &[u8]) -> Result<()>;
    /// Reads back the base level, tightly packed.
    fn read_texture(&self, texture: TextureId) -> Result<Vec<u8>>;
    fn generate_mipmaps(&self, texture: TextureId) -> Result<()>;

    fn create_buffer(&self, label: &str, usage: BufferUsage) -> Result<BufferId>;
    fn write_buffer(&self, buffer: BufferId, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&self, buffer: BufferId);

    fn create_framebuffer(&self, label: &str) -> Result<FramebufferId>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferId);
    /// Attaches (or with `None`, detaches) a color texture at `index`.
    fn attach_color(
        &self,
        framebuffer: FramebufferId,
        index: u32,
        texture: Option<TextureId>,
    ) -> Result<()>;
    fn attach_depth(&self, framebuffer: FramebufferId, texture: Option<TextureId>) -> Result<()>;
    /// Declares which color attachments fragment outputs `0..n` write to.
    fn set_draw_buffers(&self, framebuffer: FramebufferId, attachments: &[u32]) -> Result<()>;
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;
    /// Makes `framebuffer` the draw target; `None` selects the default target.
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) -> Result<()>;
    fn bound_framebuffer(&self) -> Option<FramebufferId>;

    fn viewport(&self) -> Viewport;
    fn set_viewport(&self, viewport: Viewport);
    fn depth_state(&self) -> DepthState;
    fn set_depth_state(&self, state: DepthState);

    /// Clears every draw buffer of the bound target to `color` and, when given and
    /// a depth attachment exists, the depth buffer to `depth`.
    fn clear(&self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<()>;
    /// Clears one color attachment of the bound framebuffer.
    fn clear_color_attachment(&self, index: u32, color: [f32; 4]) -> Result<()>;

    fn compile_shader(&self, label: &str, stage: ShaderStage, source: &str) -> Result<ShaderId>;
    fn destroy_shader(&self, shader: ShaderId);
    fn link_program(&self, label: &str, shaders: &[ShaderId]) -> Result<ProgramId>;
    fn destroy_program(&self, program: ProgramId);

    fn draw(&self, call: &DrawCall<'_>) -> Result<()>;
}
