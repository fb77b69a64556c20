//! wgpu implementation of [`GraphicsDevice`].
//!
//! [`GpuContext`] owns the wgpu device and queue plus a table of every object it
//! has handed out an id for. GL-style bind state (bound framebuffer, viewport,
//! depth state) lives on the context; each clear or draw is recorded as its own
//! render pass over the bound framebuffer's draw buffers, in draw-buffer order.
//!
//! # Initialization
//!
//! A `GpuContext` is created either from a winit [`Window`], in which case the
//! default target is the window surface, or offscreen with a fixed-size RGBA8
//! texture as the default target.
//!
//! ```no_run
//! use std::sync::Arc;
//! use winit::window::Window;
//! use glint::{GpuContext, GraphicsDevice};
//!
//! # fn run(window: Arc<Window>) -> glint::Result<()> {
//! let gpu = GpuContext::new(window)?;
//!
//! gpu.begin_frame()?;
//! gpu.clear(Some([0.1, 0.1, 0.1, 1.0]), Some(1.0))?;
//! gpu.end_frame();
//! # Ok(())
//! # }
//! ```
//!
//! [`Window`]: winit::window::Window

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;

use winit::window::Window;

use crate::device::{
    AttachmentState, BufferId, BufferUsage, DepthState, DrawCall, ElementLayout, FilterMode,
    FramebufferId, FramebufferStatus, GraphicsDevice, ProgramId, SamplerParams, ShaderId,
    ShaderStage, TextureDescriptor, TextureFormat, TextureId, Viewport, WrapMode,
};
use crate::error::{Error, Result};
use crate::wgsl::{self, CompiledShader};

/// WGSL used to downsample one mip level into the next.
const MIPMAP_SHADER: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((i << 1u) & 2u), f32(i & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let last = vec2<i32>(textureDimensions(src)) - vec2<i32>(1);
    let base = vec2<i32>(pos.xy) * 2;
    let a = textureLoad(src, min(base, last), 0);
    let b = textureLoad(src, min(base + vec2<i32>(1, 0), last), 0);
    let c = textureLoad(src, min(base + vec2<i32>(0, 1), last), 0);
    let d = textureLoad(src, min(base + vec2<i32>(1, 1), last), 0);
    return (a + b + c + d) * 0.25;
}
"#;

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn address(mode: WrapMode) -> wgpu::AddressMode {
    match mode {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn vertex_format(layout: ElementLayout) -> Result<wgpu::VertexFormat> {
    Ok(match layout {
        ElementLayout::Float => wgpu::VertexFormat::Float32,
        ElementLayout::Vec2 => wgpu::VertexFormat::Float32x2,
        ElementLayout::Vec3 => wgpu::VertexFormat::Float32x3,
        ElementLayout::Vec4 => wgpu::VertexFormat::Float32x4,
        ElementLayout::Uint => wgpu::VertexFormat::Uint32,
        ElementLayout::Byte => {
            return Err(Error::Device(
                "byte data cannot be used as a vertex attribute".into(),
            ));
        }
    })
}

fn to_wgpu_color(c: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: c[0] as f64,
        g: c[1] as f64,
        b: c[2] as f64,
        a: c[3] as f64,
    }
}

struct TextureEntry {
    texture: wgpu::Texture,
    /// Every mip level, for sampling.
    view: wgpu::TextureView,
    /// Base level only, for rendering into.
    target_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    format: TextureFormat,
    width: u32,
    height: u32,
    mip_levels: u32,
}

struct BufferEntry {
    label: String,
    usage: BufferUsage,
    buffer: Option<wgpu::Buffer>,
}

struct ShaderEntry {
    module: wgpu::ShaderModule,
    compiled: CompiledShader,
}

struct Stage {
    module: wgpu::ShaderModule,
    entry_point: String,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<DepthState>,
    vertex: Option<ElementLayout>,
}

struct ProgramEntry {
    label: String,
    vertex: Option<Stage>,
    fragment: Option<Stage>,
    bindings: Vec<u32>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

/// The default target when no framebuffer is bound.
enum Presentation {
    Window {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    },
    Offscreen(TextureEntry),
}

#[derive(Default)]
struct Objects {
    textures: HashMap<TextureId, TextureEntry>,
    buffers: HashMap<BufferId, BufferEntry>,
    framebuffers: HashMap<FramebufferId, AttachmentState>,
    shaders: HashMap<ShaderId, ShaderEntry>,
    programs: HashMap<ProgramId, ProgramEntry>,
    mip_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl Objects {
    fn status(&self, fb: FramebufferId, max_colors: u32) -> FramebufferStatus {
        let Some(state) = self.framebuffers.get(&fb) else {
            return FramebufferStatus::Undefined;
        };
        if let Some(index) = state.colors.keys().find(|i| **i >= max_colors) {
            return FramebufferStatus::Unsupported(format!(
                "color attachment {index} exceeds the adapter limit of {max_colors}"
            ));
        }
        state.status(|id| {
            self.textures
                .get(&id)
                .map(|t| (t.format, t.width, t.height))
        })
    }

    fn texture(&self, id: TextureId) -> Result<&TextureEntry> {
        self.textures
            .get(&id)
            .ok_or_else(|| Error::Device(format!("unknown texture {id}")))
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer> {
        self.buffers
            .get(&id)
            .and_then(|b| b.buffer.as_ref())
            .ok_or_else(|| Error::Device(format!("buffer {id} has no data")))
    }
}

/// One color attachment of a pass being recorded.
struct ColorTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct PassTargets {
    colors: Vec<ColorTarget>,
    depth: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
}

/// Core GPU context holding wgpu resources and the emulated bind state.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    presentation: RefCell<Presentation>,
    objects: RefCell<Objects>,
    next_id: Cell<u64>,
    bound: Cell<Option<FramebufferId>>,
    viewport: Cell<Viewport>,
    depth_state: Cell<DepthState>,
    max_color_attachments: u32,
}

impl GpuContext {
    /// Creates a context that presents to `window`.
    ///
    /// Fails with [`Error::Device`] if no adapter or device is available.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| Error::Device(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::Device(e.to_string()))?;

        let (device, queue) = Self::request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| Error::Device("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let viewport = Viewport::sized(config.width, config.height);
        Ok(Self::assemble(
            device,
            queue,
            Presentation::Window {
                surface,
                config,
                frame: None,
            },
            viewport,
        ))
    }

    /// Creates a context without a window. The default target is an RGBA8 texture
    /// of the given size that can be read back with [`GpuContext::read_default_target`].
    pub fn offscreen(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::Device(e.to_string()))?;
        let (device, queue) = Self::request_device(&adapter)?;

        let target = create_texture_entry(
            &device,
            &TextureDescriptor {
                label: "glint default target",
                width,
                height,
                format: TextureFormat::Rgba8Unorm,
                mipmaps: false,
                sampler: SamplerParams::default(),
            },
        );
        Ok(Self::assemble(
            device,
            queue,
            Presentation::Offscreen(target),
            Viewport::sized(width, height),
        ))
    }

    fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
        // Float render targets are only sampleable with a filtering sampler when
        // the adapter allows it.
        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Glint Device"),
            required_features,
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| Error::Device(e.to_string()))
    }

    fn assemble(
        device: wgpu::Device,
        queue: wgpu::Queue,
        presentation: Presentation,
        viewport: Viewport,
    ) -> Self {
        let max_color_attachments = device.limits().max_color_attachments;
        log::info!(
            "gpu: device ready, {max_color_attachments} color attachments per framebuffer"
        );
        Self {
            device,
            queue,
            presentation: RefCell::new(presentation),
            objects: RefCell::new(Objects::default()),
            next_id: Cell::new(1),
            bound: Cell::new(None),
            viewport: Cell::new(viewport),
            depth_state: Cell::new(DepthState::DISABLED),
            max_color_attachments,
        }
    }

    /// Resizes the window surface. Zero sizes (minimized windows) are ignored.
    pub fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Presentation::Window {
            surface, config, ..
        } = &mut *self.presentation.borrow_mut()
        {
            config.width = width;
            config.height = height;
            surface.configure(&self.device, config);
        }
    }

    /// Size of the default target.
    pub fn surface_size(&self) -> (u32, u32) {
        match &*self.presentation.borrow() {
            Presentation::Window { config, .. } => (config.width, config.height),
            Presentation::Offscreen(t) => (t.width, t.height),
        }
    }

    /// Acquires the next swapchain image. Needed before drawing to the default
    /// target of a windowed context; a no-op offscreen.
    pub fn begin_frame(&self) -> Result<()> {
        let mut presentation = self.presentation.borrow_mut();
        if let Presentation::Window {
            surface,
            config,
            frame,
        } = &mut *presentation
        {
            if frame.is_some() {
                return Ok(());
            }
            let texture = match surface.get_current_texture() {
                Ok(texture) => texture,
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    surface.configure(&self.device, config);
                    surface
                        .get_current_texture()
                        .map_err(|e| Error::Device(e.to_string()))?
                }
                Err(e) => return Err(Error::Device(e.to_string())),
            };
            let view = texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            *frame = Some((texture, view));
        }
        Ok(())
    }

    /// Presents the frame acquired by [`GpuContext::begin_frame`].
    pub fn end_frame(&self) {
        if let Presentation::Window { frame, .. } = &mut *self.presentation.borrow_mut()
            && let Some((texture, _)) = frame.take()
        {
            texture.present();
        }
    }

    /// Reads back the offscreen default target as tightly packed RGBA8.
    pub fn read_default_target(&self) -> Result<Vec<u8>> {
        match &*self.presentation.borrow() {
            Presentation::Offscreen(target) => self.read_entry(target),
            Presentation::Window { .. } => Err(Error::Device(
                "the window surface cannot be read back".into(),
            )),
        }
    }

    fn allocate(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn read_entry(&self, entry: &TextureEntry) -> Result<Vec<u8>> {
        let bpp = entry.format.bytes_per_pixel() as u32;
        let row = entry.width * bpp;
        let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Glint Readback"),
            size: padded_row as u64 * entry.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Glint Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(entry.height),
                },
            },
            wgpu::Extent3d {
                width: entry.width,
                height: entry.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let mapped = loop {
            self.device
                .poll(wgpu::PollType::Poll)
                .map_err(|e| Error::Device(e.to_string()))?;
            match rx.try_recv() {
                Ok(result) => break result,
                Err(mpsc::TryRecvError::Empty) => std::thread::yield_now(),
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Err(Error::Device("readback callback dropped".into()));
                }
            }
        };
        mapped.map_err(|e| Error::Device(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((row * entry.height) as usize);
        for chunk in data.chunks(padded_row as usize) {
            pixels.extend_from_slice(&chunk[..row as usize]);
        }
        drop(data);
        staging.unmap();
        Ok(pixels)
    }

    /// Collects the views a pass over the current bind state writes to.
    fn pass_targets(&self, objects: &Objects) -> Result<PassTargets> {
        match self.bound.get() {
            Some(fb) => {
                let status = objects.status(fb, self.max_color_attachments);
                if !status.is_complete() {
                    return Err(Error::FramebufferIncomplete {
                        name: fb.to_string(),
                        status,
                    });
                }
                let state = &objects.framebuffers[&fb];
                let mut colors = Vec::new();
                let mut size = None;
                for id in state.draw_targets() {
                    let entry = objects.texture(id)?;
                    size = Some((entry.width, entry.height));
                    colors.push(ColorTarget {
                        view: entry.target_view.clone(),
                        format: wgpu_format(entry.format),
                    });
                }
                let depth = match state.depth {
                    Some(id) => {
                        let entry = objects.texture(id)?;
                        size = size.or(Some((entry.width, entry.height)));
                        Some(entry.target_view.clone())
                    }
                    None => None,
                };
                let (width, height) = size.unwrap_or((1, 1));
                Ok(PassTargets {
                    colors,
                    depth,
                    width,
                    height,
                })
            }
            None => match &*self.presentation.borrow() {
                Presentation::Window { config, frame, .. } => {
                    let (_, view) = frame.as_ref().ok_or_else(|| {
                        Error::Device("no frame in flight, call begin_frame first".into())
                    })?;
                    Ok(PassTargets {
                        colors: vec![ColorTarget {
                            view: view.clone(),
                            format: config.format,
                        }],
                        depth: None,
                        width: config.width,
                        height: config.height,
                    })
                }
                Presentation::Offscreen(target) => Ok(PassTargets {
                    colors: vec![ColorTarget {
                        view: target.target_view.clone(),
                        format: wgpu_format(target.format),
                    }],
                    depth: None,
                    width: target.width,
                    height: target.height,
                }),
            },
        }
    }

    fn mip_pipeline(&self, objects: &mut Objects, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        objects
            .mip_pipelines
            .entry(format)
            .or_insert_with(|| {
                let module = self
                    .device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some("Glint Mipmap Shader"),
                        source: wgpu::ShaderSource::Wgsl(MIPMAP_SHADER.into()),
                    });
                let layout =
                    self.device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some("Glint Mipmap Bind Group Layout"),
                            entries: &[wgpu::BindGroupLayoutEntry {
                                binding: 0,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Texture {
                                    sample_type: wgpu::TextureSampleType::Float {
                                        filterable: false,
                                    },
                                    view_dimension: wgpu::TextureViewDimension::D2,
                                    multisampled: false,
                                },
                                count: None,
                            }],
                        });
                let pipeline_layout =
                    self.device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some("Glint Mipmap Pipeline Layout"),
                            bind_group_layouts: &[&layout],
                            push_constant_ranges: &[],
                        });
                self.device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some("Glint Mipmap Pipeline"),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point: Some("vs_main"),
                            buffers: &[],
                            compilation_options: Default::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: Some("fs_main"),
                            targets: &[Some(wgpu::ColorTargetState {
                                format,
                                blend: None,
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                            compilation_options: Default::default(),
                        }),
                        primitive: wgpu::PrimitiveState::default(),
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    })
            })
            .clone()
    }

    fn render_pipeline(
        &self,
        program: &mut ProgramEntry,
        key: PipelineKey,
    ) -> Result<wgpu::RenderPipeline> {
        if let Some(pipeline) = program.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }
        let (Some(vs), Some(fs)) = (&program.vertex, &program.fragment) else {
            return Err(Error::Device(format!(
                "program '{}' has no graphics stages",
                program.label
            )));
        };

        let attributes;
        let buffers = match key.vertex {
            Some(layout) => {
                attributes = [wgpu::VertexAttribute {
                    format: vertex_format(layout)?,
                    offset: 0,
                    shader_location: 0,
                }];
                vec![wgpu::VertexBufferLayout {
                    array_stride: layout.size_in_bytes() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }]
            }
            None => Vec::new(),
        };
        let targets: Vec<_> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_stencil = key.depth.map(|state| wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: state.write,
            depth_compare: if state.test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.label.as_str()),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: Some(vs.entry_point.as_str()),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs.module,
                    entry_point: Some(fs.entry_point.as_str()),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Link {
                name: program.label.clone(),
                diagnostic: error.to_string(),
            });
        }
        program.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }
}

fn create_texture_entry(device: &wgpu::Device, desc: &TextureDescriptor<'_>) -> TextureEntry {
    let mip_levels = desc.mip_level_count();
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(desc.label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu_format(desc.format),
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let target_view = texture.create_view(&wgpu::TextureViewDescriptor {
        base_mip_level: 0,
        mip_level_count: Some(1),
        ..Default::default()
    });
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(format!("{} Sampler", desc.label).as_str()),
        address_mode_u: address(desc.sampler.wrap_u),
        address_mode_v: address(desc.sampler.wrap_v),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter(desc.sampler.mag_filter),
        min_filter: filter(desc.sampler.min_filter),
        mipmap_filter: if mip_levels > 1 {
            filter(desc.sampler.min_filter)
        } else {
            wgpu::FilterMode::Nearest
        },
        ..Default::default()
    });
    TextureEntry {
        texture,
        view,
        target_view,
        sampler,
        format: desc.format,
        width: desc.width,
        height: desc.height,
        mip_levels,
    }
}

impl GraphicsDevice for GpuContext {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<TextureId> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(Error::allocation(
                "texture",
                desc.label,
                format!("invalid size {}x{} (max {max})", desc.width, desc.height),
            ));
        }
        let entry = create_texture_entry(&self.device, desc);
        let id = TextureId(self.allocate());
        log::trace!("gpu: texture {id} '{}' {}x{}", desc.label, desc.width, desc.height);
        self.objects.borrow_mut().textures.insert(id, entry);
        Ok(id)
    }

    fn destroy_texture(&self, texture: TextureId) {
        match self.objects.borrow_mut().textures.remove(&texture) {
            Some(entry) => entry.texture.destroy(),
            None => log::warn!("gpu: destroying unknown texture {texture}"),
        }
    }

    fn write_texture(&self, texture: TextureId, data: &[u8]) -> Result<()> {
        let objects = self.objects.borrow();
        let entry = objects.texture(texture)?;
        let row = entry.width * entry.format.bytes_per_pixel() as u32;
        let expected = (row * entry.height) as usize;
        if data.len() != expected {
            return Err(Error::InvalidUpload {
                name: texture.to_string(),
                expected,
                actual: data.len(),
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(entry.height),
            },
            wgpu::Extent3d {
                width: entry.width,
                height: entry.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&self, texture: TextureId) -> Result<Vec<u8>> {
        let objects = self.objects.borrow();
        self.read_entry(objects.texture(texture)?)
    }

    fn generate_mipmaps(&self, texture: TextureId) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let (source, format, mip_levels) = {
            let entry = objects.texture(texture)?;
            (entry.texture.clone(), entry.format, entry.mip_levels)
        };
        if mip_levels <= 1 || format.is_depth() {
            return Ok(());
        }
        let pipeline = self.mip_pipeline(&mut objects, wgpu_format(format));
        let layout = pipeline.get_bind_group_layout(0);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Glint Mipmap Encoder"),
            });
        for level in 1..mip_levels {
            let src = source.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level - 1,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let dst = source.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Glint Mipmap Bind Group"),
                layout: &layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src),
                }],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Glint Mipmap Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn create_buffer(&self, label: &str, usage: BufferUsage) -> Result<BufferId> {
        let id = BufferId(self.allocate());
        log::trace!("gpu: buffer {id} '{label}'");
        self.objects.borrow_mut().buffers.insert(
            id,
            BufferEntry {
                label: label.to_string(),
                usage,
                buffer: None,
            },
        );
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let entry = objects
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::Device(format!("unknown buffer {buffer}")))?;

        // Copies must be 4-byte aligned and uniform buffers at least 16 bytes.
        let mut padded = data.to_vec();
        let min = if entry.usage == BufferUsage::Uniform { 16 } else { 4 };
        let len = padded.len().max(min).next_multiple_of(4);
        padded.resize(len, 0);

        let fits = entry
            .buffer
            .as_ref()
            .is_some_and(|b| b.size() >= len as u64);
        if !fits {
            if let Some(old) = entry.buffer.take() {
                old.destroy();
            }
            let usage = match entry.usage {
                BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
                BufferUsage::Index => wgpu::BufferUsages::INDEX,
                BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
            };
            entry.buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(entry.label.as_str()),
                size: len as u64,
                usage: usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(b) = &entry.buffer {
            self.queue.write_buffer(b, 0, &padded);
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        match self.objects.borrow_mut().buffers.remove(&buffer) {
            Some(entry) => {
                if let Some(b) = entry.buffer {
                    b.destroy();
                }
            }
            None => log::warn!("gpu: destroying unknown buffer {buffer}"),
        }
    }

    fn create_framebuffer(&self, label: &str) -> Result<FramebufferId> {
        let id = FramebufferId(self.allocate());
        log::trace!("gpu: framebuffer {id} '{label}'");
        self.objects
            .borrow_mut()
            .framebuffers
            .insert(id, AttachmentState::default());
        Ok(id)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) {
        if self
            .objects
            .borrow_mut()
            .framebuffers
            .remove(&framebuffer)
            .is_none()
        {
            log::warn!("gpu: destroying unknown framebuffer {framebuffer}");
        }
        if self.bound.get() == Some(framebuffer) {
            self.bound.set(None);
        }
    }

    fn attach_color(
        &self,
        framebuffer: FramebufferId,
        index: u32,
        texture: Option<TextureId>,
    ) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let state = objects
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| Error::Device(format!("unknown framebuffer {framebuffer}")))?;
        match texture {
            Some(t) => state.colors.insert(index, t),
            None => state.colors.remove(&index),
        };
        Ok(())
    }

    fn attach_depth(&self, framebuffer: FramebufferId, texture: Option<TextureId>) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let state = objects
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| Error::Device(format!("unknown framebuffer {framebuffer}")))?;
        state.depth = texture;
        Ok(())
    }

    fn set_draw_buffers(&self, framebuffer: FramebufferId, attachments: &[u32]) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let state = objects
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| Error::Device(format!("unknown framebuffer {framebuffer}")))?;
        state.draw_buffers = attachments.to_vec();
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        self.objects
            .borrow()
            .status(framebuffer, self.max_color_attachments)
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) -> Result<()> {
        if let Some(fb) = framebuffer
            && !self.objects.borrow().framebuffers.contains_key(&fb)
        {
            return Err(Error::Device(format!("unknown framebuffer {fb}")));
        }
        self.bound.set(framebuffer);
        Ok(())
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound.get()
    }

    fn viewport(&self) -> Viewport {
        self.viewport.get()
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.viewport.set(viewport);
    }

    fn depth_state(&self) -> DepthState {
        self.depth_state.get()
    }

    fn set_depth_state(&self, state: DepthState) {
        self.depth_state.set(state);
    }

    fn clear(&self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<()> {
        let targets = self.pass_targets(&self.objects.borrow())?;
        let color_load = match color {
            Some(c) => wgpu::LoadOp::Clear(to_wgpu_color(c)),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<_> = targets
            .colors
            .iter()
            .map(|target| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment =
            targets
                .depth
                .as_ref()
                .map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Glint Clear Encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Glint Clear Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn clear_color_attachment(&self, index: u32, color: [f32; 4]) -> Result<()> {
        let fb = self
            .bound
            .get()
            .ok_or_else(|| Error::Device("no framebuffer bound".into()))?;
        let objects = self.objects.borrow();
        let status = objects.status(fb, self.max_color_attachments);
        if !status.is_complete() {
            return Err(Error::FramebufferIncomplete {
                name: fb.to_string(),
                status,
            });
        }
        let texture = objects.framebuffers[&fb]
            .colors
            .get(&index)
            .copied()
            .ok_or_else(|| Error::Device(format!("color attachment {index} is empty")))?;
        let entry = objects.texture(texture)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Glint Clear Encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Glint Clear Attachment Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &entry.target_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(to_wgpu_color(color)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn compile_shader(&self, label: &str, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        let compiled = wgsl::compile(label, stage, source)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Compile {
                name: label.to_string(),
                diagnostic: error.to_string(),
            });
        }

        let id = ShaderId(self.allocate());
        log::trace!("gpu: {stage} shader {id} '{label}'");
        self.objects
            .borrow_mut()
            .shaders
            .insert(id, ShaderEntry { module, compiled });
        Ok(id)
    }

    fn destroy_shader(&self, shader: ShaderId) {
        if self
            .objects
            .borrow_mut()
            .shaders
            .remove(&shader)
            .is_none()
        {
            log::warn!("gpu: destroying unknown shader {shader}");
        }
    }

    fn link_program(&self, label: &str, shaders: &[ShaderId]) -> Result<ProgramId> {
        let mut objects = self.objects.borrow_mut();
        let entries = shaders
            .iter()
            .map(|id| {
                objects.shaders.get(id).ok_or_else(|| Error::Link {
                    name: label.to_string(),
                    diagnostic: format!("shader {id} does not exist"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let compiled: Vec<_> = entries.iter().map(|e| &e.compiled).collect();
        wgsl::link(label, &compiled)?;

        let stage = |wanted: ShaderStage| {
            entries
                .iter()
                .find(|e| e.compiled.stage == wanted)
                .map(|e| Stage {
                    module: e.module.clone(),
                    entry_point: e.compiled.entry_point.clone(),
                })
        };
        let mut bindings: Vec<u32> = entries
            .iter()
            .flat_map(|e| e.compiled.bindings.iter().copied())
            .collect();
        bindings.sort_unstable();
        bindings.dedup();

        let program = ProgramEntry {
            label: label.to_string(),
            vertex: stage(ShaderStage::Vertex),
            fragment: stage(ShaderStage::Fragment),
            bindings,
            pipelines: HashMap::new(),
        };
        let id = ProgramId(self.allocate());
        log::trace!("gpu: program {id} '{label}'");
        objects.programs.insert(id, program);
        Ok(id)
    }

    fn destroy_program(&self, program: ProgramId) {
        if self
            .objects
            .borrow_mut()
            .programs
            .remove(&program)
            .is_none()
        {
            log::warn!("gpu: destroying unknown program {program}");
        }
    }

    fn draw(&self, call: &DrawCall<'_>) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let targets = self.pass_targets(&objects)?;
        let key = PipelineKey {
            colors: targets.colors.iter().map(|c| c.format).collect(),
            depth: targets.depth.as_ref().map(|_| self.depth_state.get()),
            vertex: call.vertices.map(|v| v.layout),
        };

        let program = objects
            .programs
            .get_mut(&call.program)
            .ok_or_else(|| Error::Device(format!("unknown program {}", call.program)))?;
        let pipeline = self.render_pipeline(program, key)?;
        let bindings = program.bindings.clone();

        let mut entries = Vec::new();
        for binding in &bindings {
            let resource = if *binding == 0 {
                let uniforms = call.uniforms.ok_or_else(|| {
                    Error::Device("shader reads uniforms but none were supplied".into())
                })?;
                objects.buffer(uniforms)?.as_entire_binding()
            } else {
                let slot = (*binding as usize - 1) / 2;
                let texture = call.textures.get(slot).ok_or_else(|| {
                    Error::Device(format!("shader samples texture {slot} but none was supplied"))
                })?;
                let entry = objects.texture(*texture)?;
                if binding % 2 == 1 {
                    wgpu::BindingResource::TextureView(&entry.view)
                } else {
                    wgpu::BindingResource::Sampler(&entry.sampler)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }
        let bind_group = (!entries.is_empty()).then(|| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Glint Draw Bind Group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            })
        });

        let color_attachments: Vec<_> = targets
            .colors
            .iter()
            .map(|target| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment =
            targets
                .depth
                .as_ref()
                .map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Glint Draw Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Glint Draw Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let vp = self.viewport.get();
            let x = vp.x.max(0) as u32;
            let y = vp.y.max(0) as u32;
            if x < targets.width && y < targets.height {
                let w = vp.width.min(targets.width - x);
                let h = vp.height.min(targets.height - y);
                pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
            }

            pass.set_pipeline(&pipeline);
            if let Some(group) = &bind_group {
                pass.set_bind_group(0, group, &[]);
            }
            if let Some(vertices) = call.vertices {
                pass.set_vertex_buffer(0, objects.buffer(vertices.buffer)?.slice(..));
            }
            match call.indices {
                Some(indices) => {
                    pass.set_index_buffer(
                        objects.buffer(indices)?.slice(..),
                        wgpu::IndexFormat::Uint32,
                    );
                    pass.draw_indexed(0..call.count, 0, 0..1);
                }
                None => pass.draw(0..call.count, 0..1),
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
