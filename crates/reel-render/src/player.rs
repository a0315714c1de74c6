//! The public player facade.
//!
//! A [`Player`] lives on the thread that owns the output surface. The host
//! calls [`Player::cycle`] once per display refresh; other threads steer
//! playback through a [`PlayerHandle`], whose commands are applied at the
//! start of the next cycle.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::MutexGuard;
use reel_core::{Clock, Duration, FrameBuffer, PlayerConfig, ReelError, ReelResult, SystemClock};
use reel_ir::{compile_animations, ensure_valid, AnimationDocument, RepeatMode, Timeline};

use crate::backend::{BackendFactory, BackendKind, DefaultBackends, OutputTarget};
use crate::failover::BackendState;
use crate::lifecycle::ShutdownGate;
use crate::pool::FramePool;
use crate::presenter::{CycleOutcome, Presenter};
use crate::raster::FrameRenderer;
use crate::stats::{PlaybackStats, StatsRecorder};
use crate::worker::{FrameProducer, RenderShared, RenderWorker};

/// Notable changes, collected by [`Player::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Loaded {
        document_id: String,
        duration: Duration,
        total_frames: u64,
    },
    BackendActivated(BackendKind),
    Degrading {
        from: BackendKind,
        reason: String,
    },
    Halted {
        reason: String,
    },
    Resized {
        width: u32,
        height: u32,
    },
    PlaybackEnded,
    ShutDown,
}

#[derive(Debug, Clone, PartialEq)]
enum PlayerCommand {
    Pause,
    Resume,
    Stop,
    Seek(f64),
    SeekBy(f64),
    SeekToFrame(u64),
    StepFrames(i64),
    SetLoop(bool),
    SetRepeatMode(RepeatMode),
    SetPlaybackRate(f64),
    BeginScrub,
    ScrubTo(f64),
    EndScrub(bool),
    SetVsync(bool),
    Resize(u32, u32),
    Shutdown,
}

/// Cross-thread remote for a [`Player`].
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    commands: Sender<PlayerCommand>,
    gate: ShutdownGate,
}

impl PlayerHandle {
    fn send(&self, command: PlayerCommand) -> ReelResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ReelError::Other("player is gone".into()))
    }

    pub fn pause(&self) -> ReelResult<()> {
        self.send(PlayerCommand::Pause)
    }

    pub fn resume(&self) -> ReelResult<()> {
        self.send(PlayerCommand::Resume)
    }

    pub fn stop(&self) -> ReelResult<()> {
        self.send(PlayerCommand::Stop)
    }

    pub fn seek(&self, seconds: f64) -> ReelResult<()> {
        self.send(PlayerCommand::Seek(seconds))
    }

    pub fn seek_by(&self, seconds: f64) -> ReelResult<()> {
        self.send(PlayerCommand::SeekBy(seconds))
    }

    pub fn seek_to_frame(&self, frame: u64) -> ReelResult<()> {
        self.send(PlayerCommand::SeekToFrame(frame))
    }

    pub fn step_frames(&self, frames: i64) -> ReelResult<()> {
        self.send(PlayerCommand::StepFrames(frames))
    }

    pub fn set_loop_enabled(&self, enabled: bool) -> ReelResult<()> {
        self.send(PlayerCommand::SetLoop(enabled))
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> ReelResult<()> {
        self.send(PlayerCommand::SetRepeatMode(mode))
    }

    pub fn set_playback_rate(&self, rate: f64) -> ReelResult<()> {
        self.send(PlayerCommand::SetPlaybackRate(rate))
    }

    pub fn begin_scrubbing(&self) -> ReelResult<()> {
        self.send(PlayerCommand::BeginScrub)
    }

    pub fn scrub_to_progress(&self, progress: f64) -> ReelResult<()> {
        self.send(PlayerCommand::ScrubTo(progress))
    }

    pub fn end_scrubbing(&self, resume: bool) -> ReelResult<()> {
        self.send(PlayerCommand::EndScrub(resume))
    }

    pub fn set_vsync(&self, enabled: bool) -> ReelResult<()> {
        self.send(PlayerCommand::SetVsync(enabled))
    }

    pub fn resize(&self, width: u32, height: u32) -> ReelResult<()> {
        self.send(PlayerCommand::Resize(width, height))
    }

    /// Stop handing out drawables immediately; the player finishes tearing
    /// down on its next cycle.
    pub fn shutdown(&self) {
        self.gate.close();
        let _ = self.send(PlayerCommand::Shutdown);
    }
}

pub struct Player {
    config: PlayerConfig,
    pool: Arc<FramePool>,
    shared: Arc<RenderShared>,
    worker: Option<RenderWorker>,
    inline: Option<FrameProducer>,
    presenter: Presenter,
    stats: Arc<StatsRecorder>,
    gate: ShutdownGate,
    commands: Receiver<PlayerCommand>,
    sender: Sender<PlayerCommand>,
    events: VecDeque<PlayerEvent>,
    ended_reported: bool,
    shut_down: bool,
}

impl Player {
    /// A player on the production backends and the system clock.
    pub fn new(config: PlayerConfig, target: OutputTarget) -> ReelResult<Self> {
        Self::with_parts(
            config,
            target,
            Box::new(DefaultBackends),
            Arc::new(SystemClock::new()),
        )
    }

    pub fn with_parts(
        config: PlayerConfig,
        mut target: OutputTarget,
        factory: Box<dyn BackendFactory>,
        clock: Arc<dyn Clock>,
    ) -> ReelResult<Self> {
        config.validate()?;
        if target.width == 0 || target.height == 0 {
            return Err(ReelError::InvalidArgument(format!(
                "output size must be non-zero, got {}x{}",
                target.width, target.height
            )));
        }

        let buffering = config.render.buffering;
        let slots = buffering.slot_count();
        target.frames_in_flight = slots as u32;
        target.vsync = config.render.vsync;
        target.format = config.render.pixel_format;

        let pool = Arc::new(FramePool::new(slots, target.width, target.height, target.format));
        let mut timeline = Timeline::new(clock);
        timeline.set_loop_enabled(config.playback.loop_enabled);
        timeline.set_playback_rate(config.playback.playback_rate);
        let shared = Arc::new(RenderShared::new(timeline));
        let stats = Arc::new(StatsRecorder::new());
        let renderer = FrameRenderer::new(config.render.background_color()?);
        let producer = FrameProducer::new(
            Arc::clone(&shared),
            Arc::clone(&pool),
            renderer,
            Arc::clone(&stats),
        );

        let gate = ShutdownGate::new();
        let mut presenter = Presenter::new(
            target,
            gate.clone(),
            factory,
            config.failover.threshold,
            Arc::clone(&stats),
        );
        let kind = presenter.start(config.render.backend)?;

        let (worker, inline) = if buffering.is_threaded() {
            let wait = StdDuration::from_millis(config.playback.worker_wait_ms.max(1));
            (Some(RenderWorker::spawn(producer, wait)?), None)
        } else {
            (None, Some(producer))
        };

        tracing::info!(
            backend = %kind,
            slots,
            threaded = buffering.is_threaded(),
            "player started"
        );

        let (sender, commands) = mpsc::channel();
        let mut player = Self {
            config,
            pool,
            shared,
            worker,
            inline,
            presenter,
            stats,
            gate,
            commands,
            sender,
            events: VecDeque::new(),
            ended_reported: false,
            shut_down: false,
        };
        player.collect_events();
        Ok(player)
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            commands: self.sender.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Validate, compile and start playing `document` from the beginning.
    /// On error the previous document keeps playing.
    pub fn load(&mut self, document: AnimationDocument) -> ReelResult<()> {
        self.ensure_running()?;
        ensure_valid(&document)?;
        let directives = compile_animations(&document)?;
        let document = Arc::new(document);

        let (duration, total_frames) = {
            let mut timeline = self.shared.timeline();
            timeline.load(directives);
            (timeline.duration(), timeline.total_frames())
        };
        self.shared.set_document(Arc::clone(&document));
        self.pool.invalidate();
        self.ended_reported = false;

        tracing::info!(
            id = %document.id,
            duration = %duration,
            total_frames,
            "document loaded"
        );
        self.events.push_back(PlayerEvent::Loaded {
            document_id: document.id.clone(),
            duration,
            total_frames,
        });
        Ok(())
    }

    pub fn pause(&mut self) {
        self.shared.timeline().pause();
        self.retime();
    }

    pub fn resume(&mut self) {
        self.shared.timeline().resume();
        self.shared.notify();
    }

    /// Jump to `seconds`, clamped to the document's duration.
    pub fn seek(&mut self, seconds: f64) -> ReelResult<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ReelError::InvalidArgument(format!(
                "seek target must be a non-negative number of seconds, got {}",
                seconds
            )));
        }
        self.shared.timeline().seek(Duration::from_seconds(seconds));
        self.retime();
        Ok(())
    }

    /// Move by `seconds` from the current position; negative goes back.
    pub fn seek_by(&mut self, seconds: f64) -> ReelResult<()> {
        if !seconds.is_finite() {
            return Err(ReelError::InvalidArgument(format!(
                "seek offset must be a finite number of seconds, got {}",
                seconds
            )));
        }
        self.shared.timeline().seek_by(seconds);
        self.retime();
        Ok(())
    }

    pub fn seek_to_frame(&mut self, frame: u64) {
        self.shared.timeline().seek_to_frame(frame);
        self.retime();
    }

    /// Pause at the start of the document.
    pub fn stop(&mut self) {
        self.shared.timeline().stop();
        self.ended_reported = false;
        self.retime();
    }

    /// Pause and move by `frames` frames.
    pub fn step_frames(&mut self, frames: i64) {
        self.shared.timeline().step_frames(frames);
        self.retime();
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.shared.timeline().set_loop_enabled(enabled);
        self.shared.notify();
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.shared.timeline().set_repeat_mode(mode);
        self.shared.notify();
    }

    /// Speed multiplier, clamped to `[-10, 10]`; negative plays backward.
    pub fn set_playback_rate(&mut self, rate: f64) -> ReelResult<()> {
        if !rate.is_finite() {
            return Err(ReelError::InvalidArgument(format!(
                "playback rate must be finite, got {}",
                rate
            )));
        }
        self.shared.timeline().set_playback_rate(rate);
        self.shared.notify();
        Ok(())
    }

    pub fn begin_scrubbing(&mut self) {
        self.shared.timeline().begin_scrubbing();
        self.retime();
    }

    pub fn scrub_to_progress(&mut self, progress: f64) {
        self.shared.timeline().scrub_to_progress(progress);
        self.retime();
    }

    pub fn end_scrubbing(&mut self, resume: bool) {
        self.shared.timeline().end_scrubbing(resume);
        self.shared.notify();
    }

    pub fn set_vsync(&mut self, enabled: bool) -> ReelResult<()> {
        self.presenter.set_vsync(enabled)
    }

    /// Resize the output. Frames rendered for the old size are never shown.
    pub fn resize(&mut self, width: u32, height: u32) -> ReelResult<()> {
        if width == 0 || height == 0 {
            return Err(ReelError::InvalidArgument(format!(
                "output size must be non-zero, got {}x{}",
                width, height
            )));
        }
        let dropped = self.pool.resize(width, height);
        self.presenter.resize(width, height)?;
        self.shared.notify();
        tracing::debug!(width, height, dropped, "output resized");
        self.events.push_back(PlayerEvent::Resized { width, height });
        Ok(())
    }

    /// The last presented frame, read back after the backend has finished
    /// all outstanding work.
    pub fn request_screenshot(&mut self) -> ReelResult<FrameBuffer> {
        self.ensure_running()?;
        self.presenter.screenshot()
    }

    /// Run one presentation cycle.
    pub fn cycle(&mut self) -> ReelResult<CycleOutcome> {
        if self.shut_down {
            return Ok(CycleOutcome::Halted);
        }
        let commands = self.drain_commands();
        if self.shut_down || !self.gate.is_open() {
            self.shutdown();
            return Ok(CycleOutcome::Halted);
        }
        commands?;

        if let Some(producer) = self.inline.as_mut() {
            producer.step(StdDuration::ZERO)?;
        }

        let outcome = self.presenter.cycle(&self.pool);
        self.collect_events();
        self.track_end();
        outcome
    }

    fn drain_commands(&mut self) -> ReelResult<()> {
        let mut first_error = None;
        while let Ok(command) = self.commands.try_recv() {
            tracing::trace!(?command, "applying command");
            let result = match command {
                PlayerCommand::Pause => {
                    self.pause();
                    Ok(())
                }
                PlayerCommand::Resume => {
                    self.resume();
                    Ok(())
                }
                PlayerCommand::Stop => {
                    self.stop();
                    Ok(())
                }
                PlayerCommand::Seek(seconds) => self.seek(seconds),
                PlayerCommand::SeekBy(seconds) => self.seek_by(seconds),
                PlayerCommand::SeekToFrame(frame) => {
                    self.seek_to_frame(frame);
                    Ok(())
                }
                PlayerCommand::StepFrames(frames) => {
                    self.step_frames(frames);
                    Ok(())
                }
                PlayerCommand::SetLoop(enabled) => {
                    self.set_loop_enabled(enabled);
                    Ok(())
                }
                PlayerCommand::SetRepeatMode(mode) => {
                    self.set_repeat_mode(mode);
                    Ok(())
                }
                PlayerCommand::SetPlaybackRate(rate) => self.set_playback_rate(rate),
                PlayerCommand::BeginScrub => {
                    self.begin_scrubbing();
                    Ok(())
                }
                PlayerCommand::ScrubTo(progress) => {
                    self.scrub_to_progress(progress);
                    Ok(())
                }
                PlayerCommand::EndScrub(resume) => {
                    self.end_scrubbing(resume);
                    Ok(())
                }
                PlayerCommand::SetVsync(enabled) => self.set_vsync(enabled),
                PlayerCommand::Resize(width, height) => self.resize(width, height),
                PlayerCommand::Shutdown => {
                    self.gate.close();
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!("command failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn retime(&mut self) {
        // Ready frames show the old time; drop them and redraw.
        self.pool.invalidate();
        self.shared.notify();
    }

    fn track_end(&mut self) {
        let ended = self.shared.timeline().has_ended();
        if ended && !self.ended_reported {
            self.events.push_back(PlayerEvent::PlaybackEnded);
        }
        self.ended_reported = ended;
    }

    fn collect_events(&mut self) {
        self.events.extend(self.presenter.take_events());
    }

    fn ensure_running(&self) -> ReelResult<()> {
        if self.shut_down {
            Err(ReelError::InvalidArgument("player has been shut down".into()))
        } else {
            Ok(())
        }
    }

    pub fn state(&self) -> BackendState {
        self.presenter.state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Drain the events recorded since the last call.
    pub fn events(&mut self) -> Vec<PlayerEvent> {
        self.events.drain(..).collect()
    }

    pub fn stats(&self) -> PlaybackStats {
        let mut stats = self.stats.snapshot();
        stats.backend = self
            .presenter
            .backend_name()
            .map(str::to_string)
            .unwrap_or_else(|| self.presenter.state().to_string());
        stats.failovers = self.presenter.failovers();
        let timeline = self.shared.timeline();
        stats.current_frame = timeline.current_frame();
        stats.total_frames = timeline.total_frames();
        stats.elapsed = Timeline::format_time(timeline.position());
        stats.duration = Timeline::format_time(timeline.duration());
        stats.completed_loops = timeline.completed_loops();
        stats.playback_rate = timeline.playback_rate();
        stats.repeat_mode = timeline.repeat_mode().to_string();
        stats.paused = timeline.is_paused();
        stats
    }

    /// Direct access to the timeline, e.g. for a scrubber UI.
    pub fn timeline(&self) -> MutexGuard<'_, Timeline> {
        self.shared.timeline()
    }

    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }

    /// Stop rendering and release the backend. Idempotent; must complete
    /// before the output surface is destroyed.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.gate.close();
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.inline = None;
        self.shared.stop();
        self.pool.close();
        self.presenter.teardown();
        self.collect_events();
        self.events.push_back(PlayerEvent::ShutDown);
        tracing::info!("player shut down");
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("pool", &self.pool)
            .field("presenter", &self.presenter)
            .field("threaded", &self.worker.is_some())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
