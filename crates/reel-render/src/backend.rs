//! The presentation backend seam.
//!
//! A backend owns whatever sits between a finished frame and the screen:
//! a wgpu surface for [`GpuBackend`](crate::gpu::GpuBackend), or an image
//! ring feeding a [`FrameSink`] for
//! [`SoftwareBackend`](crate::software::SoftwareBackend). The presenter
//! only ever talks to `dyn PresentBackend`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reel_core::{FrameBuffer, PixelFormat, ReelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gpu,
    Software,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Gpu => write!(f, "gpu"),
            BackendKind::Software => write!(f, "software"),
        }
    }
}

/// Receives frames from the software path: a window blitter, a test
/// harness, or [`MemorySink`].
pub trait FrameSink: Send + Sync {
    fn display(&self, frame: &FrameBuffer);
}

/// Keeps the most recent frame in memory. Used for headless playback.
#[derive(Debug, Default)]
pub struct MemorySink {
    last: Mutex<Option<FrameBuffer>>,
    frames: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> Option<FrameBuffer> {
        self.last.lock().clone()
    }

    pub fn frames_displayed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl FrameSink for MemorySink {
    fn display(&self, frame: &FrameBuffer) {
        let mut last = self.last.lock();
        let copied = last.as_mut().is_some_and(|existing| existing.copy_from(frame));
        if !copied {
            *last = Some(frame.clone());
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Where frames end up.
#[derive(Clone)]
pub struct OutputTarget {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub vsync: bool,
    /// Frames the backend may queue ahead; the pool's slot count.
    pub frames_in_flight: u32,
    /// Native window for the GPU path.
    pub window: Option<Arc<dyn wgpu::WindowHandle>>,
    /// Destination for the software path.
    pub sink: Option<Arc<dyn FrameSink>>,
}

impl OutputTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            vsync: false,
            frames_in_flight: 2,
            window: None,
            sink: None,
        }
    }

    pub fn with_window(mut self, window: Arc<dyn wgpu::WindowHandle>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("vsync", &self.vsync)
            .field("frames_in_flight", &self.frames_in_flight)
            .field("window", &self.window.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

static NEXT_DRAWABLE: AtomicU64 = AtomicU64::new(1);

/// What a drawable wraps.
#[derive(Debug)]
pub enum DrawableTarget {
    Surface(wgpu::SurfaceTexture),
    /// Index into a backend-owned image ring.
    Image(usize),
}

/// A presentable image acquired from a backend.
///
/// Each drawable is either presented or discarded exactly once; both
/// consume it.
#[must_use = "an acquired drawable must be presented or discarded"]
#[derive(Debug)]
pub struct Drawable {
    serial: u64,
    kind: BackendKind,
    target: DrawableTarget,
}

impl Drawable {
    pub fn new(kind: BackendKind, target: DrawableTarget) -> Self {
        Self {
            serial: NEXT_DRAWABLE.fetch_add(1, Ordering::Relaxed),
            kind,
            target,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn target(&self) -> &DrawableTarget {
        &self.target
    }

    pub fn into_target(self) -> DrawableTarget {
        self.target
    }
}

/// Result of asking a backend for a drawable.
#[derive(Debug)]
pub enum Acquire {
    Ready(Drawable),
    /// Nothing presentable right now (surface timeout, out-of-date
    /// swapchain, saturated ring). Counts toward failover.
    Unavailable,
}

/// A presentation path.
///
/// Errors from `initialize` are [`ReelError::BackendInit`]. Errors from
/// `acquire_drawable` and `present` are hard faults: the presenter fails
/// over rather than retrying them.
///
/// [`ReelError::BackendInit`]: reel_core::ReelError::BackendInit
pub trait PresentBackend: Send {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &str;

    fn initialize(&mut self, target: &OutputTarget) -> ReelResult<()>;

    fn acquire_drawable(&mut self) -> ReelResult<Acquire>;

    /// Show `frame` on `drawable`. The frame is already letterboxed to the
    /// output size.
    fn present(&mut self, drawable: Drawable, frame: &FrameBuffer) -> ReelResult<()>;

    /// Give back a drawable without showing anything.
    fn discard(&mut self, drawable: Drawable);

    /// Take back the image behind a drawable that was dropped without
    /// being presented or discarded. Backends whose drawables release
    /// themselves on drop keep the default.
    fn reclaim(&mut self, _serial: u64) {}

    fn resize(&mut self, width: u32, height: u32) -> ReelResult<()>;

    fn set_vsync(&mut self, enabled: bool) -> ReelResult<()>;

    /// Block until all submitted work has completed.
    fn synchronize(&mut self) -> ReelResult<()>;

    /// The last presented frame, if any.
    fn read_back(&mut self) -> ReelResult<Option<FrameBuffer>>;

    /// Release every resource. Idempotent.
    fn teardown(&mut self);
}

/// Creates backends for the presenter, at startup and on failover.
pub trait BackendFactory: Send {
    fn create(&mut self, kind: BackendKind) -> Box<dyn PresentBackend>;
}

/// The production factory: wgpu for GPU, the image ring for software.
#[derive(Debug, Default)]
pub struct DefaultBackends;

impl BackendFactory for DefaultBackends {
    fn create(&mut self, kind: BackendKind) -> Box<dyn PresentBackend> {
        match kind {
            BackendKind::Gpu => Box::new(crate::gpu::GpuBackend::new()),
            BackendKind::Software => Box::new(crate::software::SoftwareBackend::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::Color;

    #[test]
    fn test_memory_sink_keeps_latest() {
        let sink = MemorySink::new();
        sink.display(&FrameBuffer::solid(2, 2, &Color::RED));
        sink.display(&FrameBuffer::solid(2, 2, &Color::BLUE));
        assert_eq!(sink.frames_displayed(), 2);
        assert_eq!(sink.last_frame().unwrap().get_pixel(0, 0), Some([0, 0, 255, 255]));
        // A size change replaces the stored frame.
        sink.display(&FrameBuffer::solid(3, 1, &Color::GREEN));
        assert_eq!(sink.last_frame().unwrap().dimensions(), (3, 1));
    }

    #[test]
    fn test_drawable_serials_are_unique() {
        let a = Drawable::new(BackendKind::Software, DrawableTarget::Image(0));
        let b = Drawable::new(BackendKind::Software, DrawableTarget::Image(0));
        assert_ne!(a.serial(), b.serial());
        assert!(matches!(b.into_target(), DrawableTarget::Image(0)));
        let _ = a.into_target();
    }
}
