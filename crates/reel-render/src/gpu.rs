//! wgpu presentation.
//!
//! Frames arrive fully rendered and letterboxed, so the GPU side is a
//! single upload plus a full-screen blit onto the surface texture, with
//! one queue submission per presented frame.

use anyhow::{Context, Result};
use reel_core::{FrameBuffer, PixelFormat, ReelError, ReelResult};
use wgpu::util::DeviceExt;

use crate::backend::{Acquire, BackendKind, Drawable, DrawableTarget, OutputTarget, PresentBackend};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD: &[Vertex] = &[
    Vertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
    Vertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    Vertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    Vertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
    Vertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    Vertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
];

/// Present mode for a vsync setting, given what the surface supports.
pub fn choose_present_mode(vsync: bool, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if vsync {
        return wgpu::PresentMode::Fifo;
    }
    [wgpu::PresentMode::Immediate, wgpu::PresentMode::Mailbox]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
    }
}

/// Row pitch for texture-to-buffer copies.
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// The uploaded copy of the most recent frame.
struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
    format: PixelFormat,
}

// Field order is drop order: the surface goes before the device that
// configured it.
struct GpuState {
    frame: Option<FrameTexture>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    present_modes: Vec<wgpu::PresentMode>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    queue: wgpu::Queue,
    device: wgpu::Device,
    adapter_name: String,
    _instance: wgpu::Instance,
}

impl GpuState {
    fn init(target: &OutputTarget) -> Result<Self> {
        let window = target
            .window
            .clone()
            .context("no window handle for GPU presentation")?;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .context("failed to create presentation surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow::anyhow!("Failed to find a wgpu adapter for the surface"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Reel Presentation Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
            },
            None,
        ))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: target.width.max(1),
            height: target.height.max(1),
            present_mode: choose_present_mode(target.vsync, &caps.present_modes),
            desired_maximum_frame_latency: target.frames_in_flight.max(1),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::include_wgsl!("blit.wgsl"));
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blit_vertex_buffer"),
            contents: bytemuck::cast_slice(QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Ok(Self {
            frame: None,
            surface,
            config,
            present_modes: caps.present_modes,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            queue,
            device,
            adapter_name: adapter.get_info().name,
            _instance: instance,
        })
    }

    fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    /// Make sure the frame texture matches `frame`, recreating it if needed.
    fn ensure_frame_texture(&mut self, frame: &FrameBuffer) {
        let matches = self.frame.as_ref().is_some_and(|t| {
            t.width == frame.width && t.height == frame.height && t.format == frame.format
        });
        if !matches {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("frame_texture"),
                size: wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(frame.format),
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("blit_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            self.frame = Some(FrameTexture {
                texture,
                bind_group,
                width: frame.width,
                height: frame.height,
                format: frame.format,
            });
        }
    }

    fn present(&mut self, surface_texture: wgpu::SurfaceTexture, frame: &FrameBuffer) {
        let (width, height) = (frame.width, frame.height);
        self.ensure_frame_texture(frame);
        let Some(target) = self.frame.as_ref() else {
            return;
        };

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present_encoder"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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
            rpass.set_pipeline(&self.pipeline);
            rpass.set_bind_group(0, &target.bind_group, &[]);
            rpass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            rpass.draw(0..6, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        surface_texture.present();
    }

    fn read_back(&self) -> Result<Option<FrameBuffer>> {
        let Some(frame) = self.frame.as_ref() else {
            return Ok(None);
        };
        let (width, height) = (frame.width, frame.height);
        let padded = padded_bytes_per_row(width);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("screenshot_readback"),
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .context("readback callback dropped")?
            .context("failed to map readback buffer")?;

        let mut out = FrameBuffer::new(width, height, frame.format);
        {
            let mapped = slice.get_mapped_range();
            let row = (width * 4) as usize;
            for (dst, src) in out
                .data
                .chunks_exact_mut(row)
                .zip(mapped.chunks(padded as usize))
            {
                dst.copy_from_slice(&src[..row]);
            }
        }
        buffer.unmap();
        Ok(Some(out))
    }
}

/// Presents through a wgpu surface created from the output window.
pub struct GpuBackend {
    state: Option<GpuState>,
    name: String,
}

impl GpuBackend {
    pub fn new() -> Self {
        Self {
            state: None,
            name: "gpu".to_string(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&mut self) -> ReelResult<&mut GpuState> {
        self.state
            .as_mut()
            .ok_or_else(|| ReelError::BackendFailed("GPU backend not initialized".into()))
    }
}

impl Default for GpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBackend")
            .field("name", &self.name)
            .field("initialized", &self.state.is_some())
            .finish()
    }
}

impl PresentBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, target: &OutputTarget) -> ReelResult<()> {
        self.teardown();
        let state =
            GpuState::init(target).map_err(|e| ReelError::BackendInit(format!("{e:#}")))?;
        tracing::info!(
            adapter = %state.adapter_name,
            format = ?state.config.format,
            present_mode = ?state.config.present_mode,
            frame_latency = state.config.desired_maximum_frame_latency,
            "GPU backend ready"
        );
        self.name = format!("gpu ({})", state.adapter_name);
        self.state = Some(state);
        Ok(())
    }

    fn acquire_drawable(&mut self) -> ReelResult<Acquire> {
        let state = self.state()?;
        match state.surface.get_current_texture() {
            Ok(texture) => {
                if texture.suboptimal {
                    tracing::trace!("surface texture is suboptimal");
                }
                Ok(Acquire::Ready(Drawable::new(
                    BackendKind::Gpu,
                    DrawableTarget::Surface(texture),
                )))
            }
            Err(wgpu::SurfaceError::Timeout) => Ok(Acquire::Unavailable),
            Err(e @ (wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                tracing::debug!("surface {}, reconfiguring", e);
                state.reconfigure();
                Ok(Acquire::Unavailable)
            }
            Err(e) => Err(ReelError::BackendFailed(format!("surface error: {}", e))),
        }
    }

    fn present(&mut self, drawable: Drawable, frame: &FrameBuffer) -> ReelResult<()> {
        let state = self.state()?;
        match drawable.into_target() {
            DrawableTarget::Surface(texture) => {
                state.present(texture, frame);
                Ok(())
            }
            DrawableTarget::Image(_) => Err(ReelError::InvalidArgument(
                "drawable does not belong to the GPU backend".into(),
            )),
        }
    }

    fn discard(&mut self, drawable: Drawable) {
        // Dropping an unpresented surface texture hands it back to the
        // swapchain.
        drop(drawable);
    }

    fn resize(&mut self, width: u32, height: u32) -> ReelResult<()> {
        let state = self.state()?;
        state.config.width = width.max(1);
        state.config.height = height.max(1);
        state.reconfigure();
        Ok(())
    }

    fn set_vsync(&mut self, enabled: bool) -> ReelResult<()> {
        let state = self.state()?;
        let mode = choose_present_mode(enabled, &state.present_modes);
        if mode != state.config.present_mode {
            state.config.present_mode = mode;
            state.reconfigure();
            tracing::debug!(present_mode = ?mode, "vsync changed");
        }
        Ok(())
    }

    fn synchronize(&mut self) -> ReelResult<()> {
        let state = self.state()?;
        state.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_back(&mut self) -> ReelResult<Option<FrameBuffer>> {
        let state = self.state()?;
        state
            .read_back()
            .map_err(|e| ReelError::BackendFailed(format!("{e:#}")))
    }

    fn teardown(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        state.device.poll(wgpu::Maintain::Wait);
        let GpuState {
            frame,
            surface,
            config: _,
            present_modes: _,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            queue,
            device,
            adapter_name,
            _instance: instance,
        } = state;
        // Reverse acquisition order: presentable layer, then the objects
        // created from the device, then the device, then the instance.
        drop(frame);
        drop(surface);
        drop(pipeline);
        drop(bind_group_layout);
        drop(sampler);
        drop(vertex_buffer);
        drop(queue);
        drop(device);
        drop(instance);
        tracing::info!(adapter = %adapter_name, "GPU backend torn down");
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_selection() {
        use wgpu::PresentMode::*;
        assert_eq!(choose_present_mode(true, &[Immediate, Fifo]), Fifo);
        assert_eq!(choose_present_mode(false, &[Fifo, Immediate]), Immediate);
        assert_eq!(choose_present_mode(false, &[Fifo, Mailbox]), Mailbox);
        assert_eq!(choose_present_mode(false, &[Fifo]), Fifo);
    }

    #[test]
    fn test_padded_rows() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_frame_formats_map_to_unorm() {
        assert_eq!(texture_format(PixelFormat::Rgba8), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(texture_format(PixelFormat::Bgra8), wgpu::TextureFormat::Bgra8Unorm);
    }

    #[test]
    fn test_initialize_without_window_is_init_error() {
        let mut backend = GpuBackend::new();
        let err = backend.initialize(&OutputTarget::new(16, 16)).unwrap_err();
        assert!(matches!(err, ReelError::BackendInit(_)));
        assert!(backend.acquire_drawable().is_err());
        backend.teardown();
    }
}
