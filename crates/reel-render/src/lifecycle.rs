//! Ownership and per-frame discipline for the active presentation backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reel_core::{FrameBuffer, ReelError, ReelResult};

use crate::backend::{Acquire, BackendKind, Drawable, OutputTarget, PresentBackend};

/// Closed once teardown starts; no drawable is handed out after that.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGate {
    closed: Arc<AtomicBool>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

/// Owns the active backend and enforces the drawable rules around it:
/// one acquisition per frame, and every drawable presented or discarded
/// before the next frame begins.
pub struct BackendManager {
    backend: Option<Box<dyn PresentBackend>>,
    target: OutputTarget,
    gate: ShutdownGate,
    frame: u64,
    acquired_this_frame: bool,
    outstanding: Option<u64>,
    leaked: u64,
}

impl BackendManager {
    pub fn new(target: OutputTarget, gate: ShutdownGate) -> Self {
        Self {
            backend: None,
            target,
            gate,
            frame: 0,
            acquired_this_frame: false,
            outstanding: None,
            leaked: 0,
        }
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    pub fn kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|b| b.name())
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn leaked_drawables(&self) -> u64 {
        self.leaked
    }

    /// Initialize `backend` against the current target and make it active.
    /// Any previously active backend is torn down first.
    pub fn install(&mut self, mut backend: Box<dyn PresentBackend>) -> ReelResult<()> {
        if !self.gate.is_open() {
            return Err(ReelError::BackendInit("player is shutting down".into()));
        }
        self.release_backend();
        backend.initialize(&self.target)?;
        tracing::info!(backend = backend.name(), "presentation backend active");
        self.backend = Some(backend);
        Ok(())
    }

    fn backend(&mut self) -> ReelResult<&mut Box<dyn PresentBackend>> {
        self.backend
            .as_mut()
            .ok_or_else(|| ReelError::BackendFailed("no active backend".into()))
    }

    /// Start a new frame. A drawable left over from the previous frame
    /// counts as leaked and its image goes back to the backend.
    pub fn begin_frame(&mut self) -> bool {
        self.frame += 1;
        self.acquired_this_frame = false;
        match self.outstanding.take() {
            Some(serial) => {
                self.leaked += 1;
                tracing::warn!(
                    serial,
                    frame = self.frame,
                    "drawable was neither presented nor discarded"
                );
                if let Some(backend) = self.backend.as_mut() {
                    backend.reclaim(serial);
                }
                true
            }
            None => false,
        }
    }

    /// Acquire this frame's drawable.
    ///
    /// Fails with [`ReelError::DrawableUnavailable`] when the backend has
    /// nothing to hand out right now, and with [`ReelError::InvalidArgument`]
    /// on a second acquisition in the same frame.
    pub fn acquire_drawable(&mut self) -> ReelResult<Drawable> {
        if !self.gate.is_open() {
            return Err(ReelError::BackendFailed("player is shutting down".into()));
        }
        if self.acquired_this_frame {
            return Err(ReelError::InvalidArgument(format!(
                "drawable already acquired in frame {}",
                self.frame
            )));
        }
        self.acquired_this_frame = true;
        match self.backend()?.acquire_drawable()? {
            Acquire::Ready(drawable) => {
                self.outstanding = Some(drawable.serial());
                Ok(drawable)
            }
            Acquire::Unavailable => Err(ReelError::DrawableUnavailable),
        }
    }

    pub fn present(&mut self, drawable: Drawable, frame: &FrameBuffer) -> ReelResult<()> {
        self.settle(&drawable);
        self.backend()?.present(drawable, frame)
    }

    pub fn discard(&mut self, drawable: Drawable) {
        self.settle(&drawable);
        if let Some(backend) = self.backend.as_mut() {
            backend.discard(drawable);
        }
    }

    fn settle(&mut self, drawable: &Drawable) {
        if self.outstanding == Some(drawable.serial()) {
            self.outstanding = None;
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> ReelResult<()> {
        self.target.width = width;
        self.target.height = height;
        match self.backend.as_mut() {
            Some(backend) => backend.resize(width, height),
            None => Ok(()),
        }
    }

    pub fn set_vsync(&mut self, enabled: bool) -> ReelResult<()> {
        self.target.vsync = enabled;
        match self.backend.as_mut() {
            Some(backend) => backend.set_vsync(enabled),
            None => Ok(()),
        }
    }

    /// Finish outstanding work, then read the last presented frame.
    pub fn screenshot(&mut self) -> ReelResult<Option<FrameBuffer>> {
        let backend = self.backend()?;
        backend.synchronize()?;
        backend.read_back()
    }

    /// Tear down the active backend, leaving the manager usable.
    pub fn release_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            tracing::debug!(backend = backend.name(), "releasing backend");
            backend.teardown();
        }
        self.outstanding = None;
    }

    /// Close the gate and tear everything down. Idempotent.
    pub fn teardown(&mut self) {
        self.gate.close();
        self.release_backend();
    }
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("backend", &self.backend_name())
            .field("target", &self.target)
            .field("frame", &self.frame)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl Drop for BackendManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
