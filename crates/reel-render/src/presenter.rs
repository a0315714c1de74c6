//! The presentation loop: one call to [`Presenter::cycle`] moves at most
//! one ready frame onto the screen, and routes drawable failures through
//! the failover controller.

use std::collections::VecDeque;
use std::sync::Arc;

use reel_core::{BackendPreference, FrameBuffer, ReelError, ReelResult};

use crate::backend::{BackendFactory, BackendKind, OutputTarget};
use crate::failover::{BackendState, FailoverAction, FailoverController};
use crate::lifecycle::{BackendManager, ShutdownGate};
use crate::player::PlayerEvent;
use crate::pool::{FramePool, FrameSlot, SlotState};
use crate::stats::StatsRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A frame reached the screen.
    Presented,
    /// No frame was ready.
    Idle,
    /// A frame was ready but no drawable was; it stays queued.
    Deferred,
    /// The frame predated a resize and was dropped.
    Discarded,
    /// Presentation moved from GPU to software this cycle.
    FailedOver,
    /// Presentation has stopped for good.
    Halted,
}

pub struct Presenter {
    manager: BackendManager,
    failover: FailoverController,
    factory: Box<dyn BackendFactory>,
    stats: Arc<StatsRecorder>,
    events: VecDeque<PlayerEvent>,
}

impl Presenter {
    pub fn new(
        target: OutputTarget,
        gate: ShutdownGate,
        factory: Box<dyn BackendFactory>,
        threshold: u32,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            manager: BackendManager::new(target, gate),
            failover: FailoverController::new(threshold),
            factory,
            stats,
            events: VecDeque::new(),
        }
    }

    /// Bring up the first backend. A GPU that fails to initialize falls
    /// back to software straight away.
    pub fn start(&mut self, preference: BackendPreference) -> ReelResult<BackendKind> {
        let first = match preference {
            BackendPreference::Software => BackendKind::Software,
            BackendPreference::Auto | BackendPreference::Gpu => BackendKind::Gpu,
        };
        match self.activate(first) {
            Ok(()) => Ok(first),
            Err(e) if first == BackendKind::Gpu => {
                tracing::warn!("GPU presentation unavailable, using software: {}", e);
                self.failover.record_fault(BackendKind::Gpu);
                self.events.push_back(PlayerEvent::Degrading {
                    from: BackendKind::Gpu,
                    reason: e.to_string(),
                });
                match self.activate(BackendKind::Software) {
                    Ok(()) => Ok(BackendKind::Software),
                    Err(e) => Err(self.halted(format!("software presentation failed: {}", e))),
                }
            }
            Err(e) => Err(self.halted(format!("software presentation failed: {}", e))),
        }
    }

    fn activate(&mut self, kind: BackendKind) -> ReelResult<()> {
        let backend = self.factory.create(kind);
        self.manager.install(backend)?;
        self.failover.activated(kind);
        self.events.push_back(PlayerEvent::BackendActivated(kind));
        Ok(())
    }

    pub fn state(&self) -> BackendState {
        self.failover.state()
    }

    pub fn failovers(&self) -> u32 {
        self.failover.failovers()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failover.consecutive_failures()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.manager.backend_name()
    }

    pub fn take_events(&mut self) -> impl Iterator<Item = PlayerEvent> + '_ {
        self.events.drain(..)
    }

    /// Present at most one ready frame.
    ///
    /// Returns `Err` exactly once, with the terminal
    /// [`ReelError::BackendFailed`], when presentation halts; later calls
    /// report [`CycleOutcome::Halted`].
    pub fn cycle(&mut self, pool: &FramePool) -> ReelResult<CycleOutcome> {
        if self.failover.state().is_failed() {
            return Ok(CycleOutcome::Halted);
        }
        if self.manager.begin_frame() {
            self.stats.drawable_leaked();
        }

        let Some(slot) = pool.acquire_ready() else {
            return Ok(CycleOutcome::Idle);
        };

        let drawable = match self.manager.acquire_drawable() {
            Ok(drawable) => drawable,
            Err(ReelError::DrawableUnavailable) => {
                pool.release(slot, SlotState::ReadyToPresent)?;
                self.stats.frame_deferred();
                tracing::trace!(
                    failures = self.failover.consecutive_failures() + 1,
                    "no drawable available"
                );
                return match self.failover.record_unavailable() {
                    FailoverAction::None => Ok(CycleOutcome::Deferred),
                    FailoverAction::SwitchToSoftware => {
                        self.fail_over("drawable failure threshold reached")
                    }
                    FailoverAction::Halt => Err(self.halted(
                        "software presentation kept failing to provide drawables".into(),
                    )),
                };
            }
            Err(e) => {
                pool.release(slot, SlotState::ReadyToPresent)?;
                return self.fault(e);
            }
        };

        if let Err(e) = ensure_current(pool, &slot) {
            tracing::debug!("{}; dropping frame", e);
            self.manager.discard(drawable);
            pool.release(slot, SlotState::Free)?;
            self.stats.frame_discarded();
            return Ok(CycleOutcome::Discarded);
        }

        match self.manager.present(drawable, &slot.buffer) {
            Ok(()) => {
                self.failover.record_success();
                self.stats.frame_presented();
                tracing::trace!(
                    elapsed = slot.elapsed.as_seconds(),
                    revision = slot.revision,
                    "frame presented"
                );
                pool.release(slot, SlotState::Free)?;
                Ok(CycleOutcome::Presented)
            }
            Err(e) => {
                pool.release(slot, SlotState::ReadyToPresent)?;
                self.fault(e)
            }
        }
    }

    fn fault(&mut self, error: ReelError) -> ReelResult<CycleOutcome> {
        let Some(kind) = self.manager.kind() else {
            return Err(error);
        };
        tracing::error!(backend = %kind, "presentation fault: {}", error);
        match self.failover.record_fault(kind) {
            FailoverAction::SwitchToSoftware => self.fail_over(&error.to_string()),
            FailoverAction::Halt | FailoverAction::None => Err(self.halted(error.to_string())),
        }
    }

    fn fail_over(&mut self, reason: &str) -> ReelResult<CycleOutcome> {
        tracing::warn!("leaving GPU presentation: {}", reason);
        self.events.push_back(PlayerEvent::Degrading {
            from: BackendKind::Gpu,
            reason: reason.to_string(),
        });
        self.manager.release_backend();
        match self.activate(BackendKind::Software) {
            Ok(()) => Ok(CycleOutcome::FailedOver),
            Err(e) => Err(self.halted(format!("software presentation failed: {}", e))),
        }
    }

    /// Enter the terminal state and build its one error.
    fn halted(&mut self, reason: String) -> ReelError {
        self.failover.halt();
        self.manager.release_backend();
        tracing::error!("presentation halted: {}", reason);
        self.events.push_back(PlayerEvent::Halted {
            reason: reason.clone(),
        });
        ReelError::BackendFailed(reason)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> ReelResult<()> {
        self.manager.resize(width, height)
    }

    pub fn set_vsync(&mut self, enabled: bool) -> ReelResult<()> {
        self.manager.set_vsync(enabled)
    }

    /// Synchronize with the backend and read back the last presented frame.
    pub fn screenshot(&mut self) -> ReelResult<FrameBuffer> {
        if self.failover.state().is_failed() {
            return Err(ReelError::BackendFailed("presentation has halted".into()));
        }
        self.manager
            .screenshot()?
            .ok_or_else(|| ReelError::InvalidArgument("no frame has been presented yet".into()))
    }

    pub fn teardown(&mut self) {
        self.manager.teardown();
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("manager", &self.manager)
            .field("failover", &self.failover)
            .finish()
    }
}

fn ensure_current(pool: &FramePool, slot: &FrameSlot) -> ReelResult<()> {
    if pool.is_current(slot) {
        Ok(())
    } else {
        Err(ReelError::ResizeRace)
    }
}
