//! CPU presentation: a small ring of images handed to a [`FrameSink`].

use std::sync::Arc;

use reel_core::{FrameBuffer, PixelFormat, ReelError, ReelResult};

use crate::backend::{
    Acquire, BackendKind, Drawable, DrawableTarget, FrameSink, OutputTarget, PresentBackend,
};

#[derive(Default)]
pub struct SoftwareBackend {
    ring: Vec<FrameBuffer>,
    /// Serial of the drawable holding each image.
    in_use: Vec<Option<u64>>,
    next: usize,
    last_presented: Option<usize>,
    sink: Option<Arc<dyn FrameSink>>,
    format: PixelFormat,
    vsync: bool,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.sink.is_some()
    }

    fn allocate(&mut self, count: usize, width: u32, height: u32) {
        self.ring = (0..count)
            .map(|_| FrameBuffer::new(width, height, self.format))
            .collect();
        self.in_use = vec![None; count];
        self.next = 0;
        self.last_presented = None;
    }

    fn image_index(&self, drawable: &Drawable) -> ReelResult<usize> {
        match drawable.target() {
            DrawableTarget::Image(index) if *index < self.ring.len() => Ok(*index),
            other => Err(ReelError::InvalidArgument(format!(
                "drawable {:?} does not belong to the software backend",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("ring", &self.ring.len())
            .field("in_use", &self.in_use)
            .field("format", &self.format)
            .field("vsync", &self.vsync)
            .finish()
    }
}

impl PresentBackend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn name(&self) -> &str {
        "software"
    }

    fn initialize(&mut self, target: &OutputTarget) -> ReelResult<()> {
        let sink = target.sink.clone().ok_or_else(|| {
            ReelError::BackendInit("software presentation needs a frame sink".into())
        })?;
        if target.width == 0 || target.height == 0 {
            return Err(ReelError::BackendInit(format!(
                "invalid output size {}x{}",
                target.width, target.height
            )));
        }
        self.format = target.format;
        self.vsync = target.vsync;
        self.allocate(target.frames_in_flight.max(1) as usize, target.width, target.height);
        self.sink = Some(sink);
        tracing::info!(
            width = target.width,
            height = target.height,
            images = self.ring.len(),
            "software backend ready"
        );
        Ok(())
    }

    fn acquire_drawable(&mut self) -> ReelResult<Acquire> {
        if self.sink.is_none() {
            return Err(ReelError::BackendFailed("software backend not initialized".into()));
        }
        let count = self.ring.len();
        for offset in 0..count {
            let index = (self.next + offset) % count;
            if self.in_use[index].is_none() {
                let drawable = Drawable::new(BackendKind::Software, DrawableTarget::Image(index));
                self.in_use[index] = Some(drawable.serial());
                self.next = (index + 1) % count;
                return Ok(Acquire::Ready(drawable));
            }
        }
        Ok(Acquire::Unavailable)
    }

    fn present(&mut self, drawable: Drawable, frame: &FrameBuffer) -> ReelResult<()> {
        let index = self.image_index(&drawable)?;
        self.in_use[index] = None;
        let image = &mut self.ring[index];
        if !image.copy_from(frame) {
            return Err(ReelError::BackendFailed(format!(
                "frame is {}x{} but the output is {}x{}",
                frame.width, frame.height, image.width, image.height
            )));
        }
        if let Some(sink) = &self.sink {
            sink.display(image);
        }
        self.last_presented = Some(index);
        Ok(())
    }

    fn discard(&mut self, drawable: Drawable) {
        if let Ok(index) = self.image_index(&drawable) {
            self.in_use[index] = None;
        }
    }

    fn reclaim(&mut self, serial: u64) {
        for slot in self.in_use.iter_mut() {
            if *slot == Some(serial) {
                *slot = None;
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> ReelResult<()> {
        let count = self.ring.len().max(1);
        self.allocate(count, width.max(1), height.max(1));
        Ok(())
    }

    fn set_vsync(&mut self, enabled: bool) -> ReelResult<()> {
        // Frames go to the sink synchronously; there is no swap interval.
        self.vsync = enabled;
        Ok(())
    }

    fn synchronize(&mut self) -> ReelResult<()> {
        Ok(())
    }

    fn read_back(&mut self) -> ReelResult<Option<FrameBuffer>> {
        Ok(self.last_presented.map(|index| self.ring[index].clone()))
    }

    fn teardown(&mut self) {
        if self.sink.take().is_some() {
            tracing::debug!("software backend torn down");
        }
        self.ring.clear();
        self.in_use.clear();
        self.last_presented = None;
    }
}
