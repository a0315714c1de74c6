use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use reel_core::{BackendPreference, Buffering, Color, Duration, FrameBuffer, ManualClock};
use reel_core::{PlayerConfig, ReelError, ReelResult};
use reel_ir::{AnimationDocument, Element, RawAnimation, RepeatMode};
use reel_render::backend::{Acquire, Drawable, DrawableTarget};
use reel_render::{
    BackendFactory, BackendKind, BackendState, CycleOutcome, FrameSink, MemorySink, OutputTarget,
    Player, PlayerEvent, PresentBackend, SlotState, SoftwareBackend,
};

/// A GPU stand-in that reports "no drawable" a fixed number of times.
struct ScriptedGpu {
    unavailable: Arc<AtomicU32>,
    sink: Arc<MemorySink>,
}

impl PresentBackend for ScriptedGpu {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> &str {
        "scripted-gpu"
    }

    fn initialize(&mut self, _target: &OutputTarget) -> ReelResult<()> {
        Ok(())
    }

    fn acquire_drawable(&mut self) -> ReelResult<Acquire> {
        let left = self.unavailable.load(Ordering::SeqCst);
        if left > 0 {
            self.unavailable.store(left - 1, Ordering::SeqCst);
            return Ok(Acquire::Unavailable);
        }
        Ok(Acquire::Ready(Drawable::new(
            BackendKind::Gpu,
            DrawableTarget::Image(0),
        )))
    }

    fn present(&mut self, _drawable: Drawable, frame: &FrameBuffer) -> ReelResult<()> {
        self.sink.display(frame);
        Ok(())
    }

    fn discard(&mut self, _drawable: Drawable) {}

    fn resize(&mut self, _width: u32, _height: u32) -> ReelResult<()> {
        Ok(())
    }

    fn set_vsync(&mut self, _enabled: bool) -> ReelResult<()> {
        Ok(())
    }

    fn synchronize(&mut self) -> ReelResult<()> {
        Ok(())
    }

    fn read_back(&mut self) -> ReelResult<Option<FrameBuffer>> {
        Ok(self.sink.last_frame())
    }

    fn teardown(&mut self) {}
}

/// A software path that never comes up.
struct BrokenSoftware;

impl PresentBackend for BrokenSoftware {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn name(&self) -> &str {
        "broken-software"
    }

    fn initialize(&mut self, _target: &OutputTarget) -> ReelResult<()> {
        Err(ReelError::BackendInit("no framebuffer".into()))
    }

    fn acquire_drawable(&mut self) -> ReelResult<Acquire> {
        Ok(Acquire::Unavailable)
    }

    fn present(&mut self, _drawable: Drawable, _frame: &FrameBuffer) -> ReelResult<()> {
        Ok(())
    }

    fn discard(&mut self, _drawable: Drawable) {}

    fn resize(&mut self, _width: u32, _height: u32) -> ReelResult<()> {
        Ok(())
    }

    fn set_vsync(&mut self, _enabled: bool) -> ReelResult<()> {
        Ok(())
    }

    fn synchronize(&mut self) -> ReelResult<()> {
        Ok(())
    }

    fn read_back(&mut self) -> ReelResult<Option<FrameBuffer>> {
        Ok(None)
    }

    fn teardown(&mut self) {}
}

/// A GPU path whose initialization always fails.
struct BrokenGpu;

impl PresentBackend for BrokenGpu {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> &str {
        "broken-gpu"
    }

    fn initialize(&mut self, _target: &OutputTarget) -> ReelResult<()> {
        Err(ReelError::BackendInit("no adapter".into()))
    }

    fn acquire_drawable(&mut self) -> ReelResult<Acquire> {
        Ok(Acquire::Unavailable)
    }

    fn present(&mut self, _drawable: Drawable, _frame: &FrameBuffer) -> ReelResult<()> {
        Ok(())
    }

    fn discard(&mut self, _drawable: Drawable) {}

    fn resize(&mut self, _width: u32, _height: u32) -> ReelResult<()> {
        Ok(())
    }

    fn set_vsync(&mut self, _enabled: bool) -> ReelResult<()> {
        Ok(())
    }

    fn synchronize(&mut self) -> ReelResult<()> {
        Ok(())
    }

    fn read_back(&mut self) -> ReelResult<Option<FrameBuffer>> {
        Ok(None)
    }

    fn teardown(&mut self) {}
}

struct TestBackends {
    gpu_unavailable: Arc<AtomicU32>,
    gpu_sink: Arc<MemorySink>,
    gpu_init_fails: bool,
    software_broken: bool,
    software_created: Arc<AtomicBool>,
}

impl TestBackends {
    fn new(gpu_unavailable: u32) -> Self {
        Self {
            gpu_unavailable: Arc::new(AtomicU32::new(gpu_unavailable)),
            gpu_sink: Arc::new(MemorySink::new()),
            gpu_init_fails: false,
            software_broken: false,
            software_created: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl BackendFactory for TestBackends {
    fn create(&mut self, kind: BackendKind) -> Box<dyn PresentBackend> {
        match kind {
            BackendKind::Gpu if self.gpu_init_fails => Box::new(BrokenGpu),
            BackendKind::Gpu => Box::new(ScriptedGpu {
                unavailable: Arc::clone(&self.gpu_unavailable),
                sink: Arc::clone(&self.gpu_sink),
            }),
            BackendKind::Software => {
                self.software_created.store(true, Ordering::SeqCst);
                if self.software_broken {
                    Box::new(BrokenSoftware)
                } else {
                    Box::new(SoftwareBackend::new())
                }
            }
        }
    }
}

fn fading_box() -> AnimationDocument {
    let mut doc = AnimationDocument::new(8.0, 8.0);
    doc.add_element(
        Element::rect(0.0, 0.0, 8.0, 8.0)
            .with_id("box")
            .fill(Color::WHITE),
    );
    doc.add_animation(RawAnimation::new("box", "opacity", "0;1", "2s"));
    doc
}

fn config(buffering: Buffering, backend: BackendPreference, threshold: u32) -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.render.buffering = buffering;
    config.render.backend = backend;
    config.failover.threshold = threshold;
    config.playback.worker_wait_ms = 5;
    config
}

fn start_player(
    config: PlayerConfig,
    backends: TestBackends,
    size: (u32, u32),
) -> (Player, Arc<MemorySink>, Arc<ManualClock>) {
    let sink = Arc::new(MemorySink::new());
    let clock = Arc::new(ManualClock::new());
    let target = OutputTarget::new(size.0, size.1).with_sink(sink.clone());
    let player = Player::with_parts(config, target, Box::new(backends), clock.clone())
        .expect("player should start");
    (player, sink, clock)
}

/// Cycle until `done` accepts an outcome, collecting every outcome seen.
fn cycle_until(
    player: &mut Player,
    mut done: impl FnMut(&CycleOutcome) -> bool,
) -> Vec<CycleOutcome> {
    let deadline = Instant::now() + StdDuration::from_secs(10);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        let outcome = player.cycle().expect("cycle should not fail");
        seen.push(outcome);
        if done(&outcome) {
            return seen;
        }
        if outcome == CycleOutcome::Idle {
            std::thread::sleep(StdDuration::from_millis(1));
        }
    }
    panic!("timed out; last outcomes: {:?}", &seen[seen.len().saturating_sub(5)..]);
}

#[test]
fn test_gpu_drawable_starvation_fails_over_to_software() {
    let backends = TestBackends::new(15);
    let injected = Arc::clone(&backends.gpu_unavailable);
    let software_created = Arc::clone(&backends.software_created);
    let (mut player, sink, _clock) = start_player(
        config(Buffering::Double, BackendPreference::Gpu, 10),
        backends,
        (8, 8),
    );
    player.load(fading_box()).unwrap();
    assert_eq!(player.state(), BackendState::Active(BackendKind::Gpu));

    let seen = cycle_until(&mut player, |o| *o == CycleOutcome::FailedOver);
    let deferred = seen.iter().filter(|o| **o == CycleOutcome::Deferred).count();
    assert_eq!(deferred, 9);
    assert_eq!(injected.load(Ordering::SeqCst), 5);
    assert!(software_created.load(Ordering::SeqCst));
    assert_eq!(player.state(), BackendState::Active(BackendKind::Software));

    cycle_until(&mut player, |o| *o == CycleOutcome::Presented);
    assert!(sink.frames_displayed() >= 1);

    let stats = player.stats();
    assert_eq!(stats.failovers, 1);
    assert_eq!(stats.backend, "software");
    assert_eq!(stats.frames_deferred, 10);

    let events = player.events();
    assert!(events.contains(&PlayerEvent::BackendActivated(BackendKind::Gpu)));
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::Degrading { from: BackendKind::Gpu, .. })));
    assert!(events.contains(&PlayerEvent::BackendActivated(BackendKind::Software)));
}

#[test]
fn test_failures_below_threshold_stay_on_gpu() {
    let backends = TestBackends::new(3);
    let gpu_sink = Arc::clone(&backends.gpu_sink);
    let (mut player, sink, _clock) = start_player(
        config(Buffering::Double, BackendPreference::Gpu, 10),
        backends,
        (8, 8),
    );
    player.load(fading_box()).unwrap();

    let seen = cycle_until(&mut player, |o| *o == CycleOutcome::Presented);
    assert!(!seen.contains(&CycleOutcome::FailedOver));
    assert_eq!(player.state(), BackendState::Active(BackendKind::Gpu));
    assert_eq!(gpu_sink.frames_displayed(), 1);
    assert_eq!(sink.frames_displayed(), 0);
}

#[test]
fn test_gpu_init_failure_starts_on_software() {
    let mut backends = TestBackends::new(0);
    backends.gpu_init_fails = true;
    let (mut player, sink, _clock) = start_player(
        config(Buffering::Single, BackendPreference::Auto, 10),
        backends,
        (8, 8),
    );
    assert_eq!(player.state(), BackendState::Active(BackendKind::Software));
    assert_eq!(player.stats().failovers, 1);

    player.load(fading_box()).unwrap();
    cycle_until(&mut player, |o| *o == CycleOutcome::Presented);
    assert_eq!(sink.frames_displayed(), 1);
}

#[test]
fn test_software_init_failure_is_terminal() {
    let mut backends = TestBackends::new(0);
    backends.gpu_init_fails = true;
    backends.software_broken = true;
    let sink = Arc::new(MemorySink::new());
    let target = OutputTarget::new(8, 8).with_sink(sink);
    let err = Player::with_parts(
        config(Buffering::Double, BackendPreference::Gpu, 10),
        target,
        Box::new(backends),
        Arc::new(ManualClock::new()),
    )
    .unwrap_err();
    assert!(matches!(err, ReelError::BackendFailed(_)));
    assert!(err.is_terminal());
}

#[test]
fn test_halt_is_reported_once() {
    let mut backends = TestBackends::new(u32::MAX);
    backends.software_broken = true;
    let (mut player, _sink, _clock) = start_player(
        config(Buffering::Single, BackendPreference::Gpu, 2),
        backends,
        (8, 8),
    );
    player.load(fading_box()).unwrap();

    let mut errors = 0;
    for _ in 0..20 {
        match player.cycle() {
            Ok(_) => {}
            Err(e) => {
                assert!(e.is_terminal());
                errors += 1;
            }
        }
    }
    assert_eq!(errors, 1);
    assert_eq!(player.state(), BackendState::Failed);
    assert_eq!(player.cycle().unwrap(), CycleOutcome::Halted);

    let halts = player
        .events()
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::Halted { .. }))
        .count();
    assert_eq!(halts, 1);
    assert!(player.request_screenshot().is_err());
}

#[test]
fn test_no_old_size_frame_after_resize() {
    let (mut player, sink, clock) = start_player(
        config(Buffering::Double, BackendPreference::Software, 10),
        TestBackends::new(0),
        (8, 8),
    );
    player.load(fading_box()).unwrap();
    cycle_until(&mut player, |o| *o == CycleOutcome::Presented);
    assert_eq!(sink.last_frame().unwrap().dimensions(), (8, 8));

    player.resize(4, 6).unwrap();
    let mut presented = 0;
    while presented < 5 {
        clock.advance(Duration::from_millis(10.0));
        cycle_until(&mut player, |o| *o == CycleOutcome::Presented);
        presented += 1;
        assert_eq!(sink.last_frame().unwrap().dimensions(), (4, 6));
    }
    assert!(player
        .events()
        .contains(&PlayerEvent::Resized { width: 4, height: 6 }));
    assert!(player.resize(0, 6).is_err());
}

#[test]
fn test_triple_buffering_presents_one_frame_at_a_time() {
    let (mut player, sink, clock) = start_player(
        config(Buffering::Triple, BackendPreference::Software, 10),
        TestBackends::new(0),
        (8, 8),
    );
    assert_eq!(player.pool().slot_count(), 3);
    player.load(fading_box()).unwrap();

    let pool = Arc::clone(player.pool());
    let stop = Arc::new(AtomicBool::new(false));
    let sampler = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut max_presenting = 0;
            while !stop.load(Ordering::Relaxed) {
                max_presenting = max_presenting.max(pool.count(SlotState::Presenting));
                std::thread::yield_now();
            }
            max_presenting
        })
    };

    for _ in 0..30 {
        clock.advance(Duration::from_millis(16.0));
        cycle_until(&mut player, |o| *o == CycleOutcome::Presented);
    }
    stop.store(true, Ordering::Relaxed);
    assert!(sampler.join().unwrap() <= 1);
    assert!(sink.frames_displayed() >= 30);
}

#[test]
fn test_opacity_midpoint_reaches_the_screen() {
    let (mut player, sink, clock) = start_player(
        config(Buffering::Single, BackendPreference::Software, 10),
        TestBackends::new(0),
        (8, 8),
    );
    player.load(fading_box()).unwrap();
    clock.advance(Duration::from_seconds(1.0));
    player.pause();

    assert_eq!(player.cycle().unwrap(), CycleOutcome::Presented);
    let frame = sink.last_frame().unwrap();
    let [r, g, b, _] = frame.get_pixel(4, 4).unwrap();
    assert!((126..=129).contains(&r), "r = {r}");
    assert_eq!((r, g), (g, b));

    let shot = player.request_screenshot().unwrap();
    assert_eq!(shot.get_pixel(4, 4), frame.get_pixel(4, 4));

    // Paused and already shown: nothing new to present.
    assert_eq!(player.cycle().unwrap(), CycleOutcome::Idle);
}

#[test]
fn test_handle_commands_apply_on_next_cycle() {
    let (mut player, _sink, clock) = start_player(
        config(Buffering::Single, BackendPreference::Software, 10),
        TestBackends::new(0),
        (8, 8),
    );
    player.load(fading_box()).unwrap();
    let handle = player.handle();

    std::thread::spawn(move || {
        handle.seek(1.5).unwrap();
        handle.pause().unwrap();
    })
    .join()
    .unwrap();
    assert!(!player.timeline().is_paused());

    player.cycle().unwrap();
    clock.advance(Duration::from_seconds(3.0));
    let timeline = player.timeline();
    assert!(timeline.is_paused());
    assert!((timeline.elapsed().as_seconds() - 1.5).abs() < 1e-6);
}

#[test]
fn test_bad_seek_and_shutdown() {
    let (mut player, _sink, _clock) = start_player(
        config(Buffering::Double, BackendPreference::Software, 10),
        TestBackends::new(0),
        (8, 8),
    );
    player.load(fading_box()).unwrap();
    assert!(matches!(player.seek(-1.0), Err(ReelError::InvalidArgument(_))));
    assert!(matches!(player.seek(f64::NAN), Err(ReelError::InvalidArgument(_))));

    let handle = player.handle();
    handle.shutdown();
    assert_eq!(player.cycle().unwrap(), CycleOutcome::Halted);
    assert!(player.is_shut_down());
    assert!(player.events().contains(&PlayerEvent::ShutDown));

    player.shutdown();
    assert_eq!(player.cycle().unwrap(), CycleOutcome::Halted);
    assert!(player.load(fading_box()).is_err());
    drop(player);
    assert!(handle.pause().is_err());
}

#[test]
fn test_rate_repeat_and_scrub_through_handle() {
    let (mut player, _sink, clock) = start_player(
        config(Buffering::Single, BackendPreference::Software, 10),
        TestBackends::new(0),
        (8, 8),
    );
    player.load(fading_box()).unwrap();
    let handle = player.handle();
    handle.set_playback_rate(2.0).unwrap();
    handle.set_repeat_mode(RepeatMode::PingPong).unwrap();
    player.cycle().unwrap();

    // 1.5s at double speed: past the end of the 2s document and 1s back.
    clock.advance(Duration::from_seconds(1.5));
    let stats = player.stats();
    assert_eq!(stats.playback_rate, 2.0);
    assert_eq!(stats.repeat_mode, "ping-pong");
    assert!((player.timeline().position().as_seconds() - 1.0).abs() < 1e-9);
    player.cycle().unwrap();
    assert!(!player.timeline().is_playing_forward());
    assert!(matches!(
        player.set_playback_rate(f64::INFINITY),
        Err(ReelError::InvalidArgument(_))
    ));

    handle.stop().unwrap();
    handle.seek_by(0.5).unwrap();
    player.cycle().unwrap();
    {
        let timeline = player.timeline();
        assert!(timeline.is_paused());
        assert!(timeline.is_playing_forward());
        assert!((timeline.position().as_seconds() - 0.5).abs() < 1e-9);
    }

    handle.begin_scrubbing().unwrap();
    handle.scrub_to_progress(0.5).unwrap();
    handle.end_scrubbing(true).unwrap();
    player.cycle().unwrap();
    clock.advance(Duration::from_seconds(1.0));
    let timeline = player.timeline();
    assert!(timeline.is_paused());
    assert!(!timeline.is_scrubbing());
    assert!((timeline.position().as_seconds() - 1.0).abs() < 1e-9);
}
