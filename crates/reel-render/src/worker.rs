//! Frame production.
//!
//! [`FrameProducer`] turns one free slot into one ready frame. With double
//! or triple buffering it runs on a [`RenderWorker`] thread; with single
//! buffering the presenter calls it inline once per cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration as StdDuration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use reel_core::{ReelError, ReelResult};
use reel_ir::{AnimationDocument, Timeline};

use crate::pool::{FramePool, Release, SlotState};
use crate::raster::{CancelToken, Cancelled, FrameRenderer};
use crate::stats::StatsRecorder;

/// State the presentation thread shares with the render worker.
pub struct RenderShared {
    timeline: Mutex<Timeline>,
    document: Mutex<Option<Arc<AnimationDocument>>>,
    generation: Mutex<u64>,
    changed: Condvar,
    running: AtomicBool,
}

impl RenderShared {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline: Mutex::new(timeline),
            document: Mutex::new(None),
            generation: Mutex::new(0),
            changed: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    pub fn timeline(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock()
    }

    pub fn document(&self) -> Option<Arc<AnimationDocument>> {
        self.document.lock().clone()
    }

    pub fn set_document(&self, document: Arc<AnimationDocument>) {
        *self.document.lock() = Some(document);
        self.notify();
    }

    /// Wake the worker: something it renders from has changed.
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.changed.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn wait_for_change(&self, seen: u64, timeout: StdDuration) {
        let mut generation = self.generation.lock();
        if *generation == seen && self.is_running() {
            self.changed.wait_for(&mut generation, timeout);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.notify();
    }
}

impl std::fmt::Debug for RenderShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderShared")
            .field("timeline", &*self.timeline.lock())
            .field("has_document", &self.document.lock().is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStep {
    /// A frame was queued for presentation.
    Rendered,
    /// The slot went stale mid-render; nothing was queued.
    Cancelled,
    /// Nothing new to draw: no document, or a paused or static timeline
    /// whose current frame is already rendered.
    Idle,
    /// Every slot is in use.
    Busy,
}

/// Renders into free pool slots.
#[derive(Debug)]
pub struct FrameProducer {
    shared: Arc<RenderShared>,
    pool: Arc<FramePool>,
    renderer: FrameRenderer,
    stats: Arc<StatsRecorder>,
    /// `(revision, epoch)` of the last frame queued.
    last: Option<(u64, u64)>,
}

impl FrameProducer {
    pub fn new(
        shared: Arc<RenderShared>,
        pool: Arc<FramePool>,
        renderer: FrameRenderer,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            shared,
            pool,
            renderer,
            stats,
            last: None,
        }
    }

    /// Produce at most one frame, waiting up to `wait` for a free slot.
    pub fn step(&mut self, wait: StdDuration) -> ReelResult<RenderStep> {
        let Some(document) = self.shared.document() else {
            return Ok(RenderStep::Idle);
        };

        let (frozen, revision) = {
            let timeline = self.shared.timeline();
            (
                timeline.is_paused() || timeline.duration().is_zero(),
                timeline.revision(),
            )
        };
        if frozen && self.last == Some((revision, self.pool.epoch())) {
            return Ok(RenderStep::Idle);
        }

        let Ok(mut slot) = self.pool.acquire_free(wait) else {
            return Ok(RenderStep::Busy);
        };

        let snapshot = self.shared.timeline().sample();
        let overrides = snapshot.resolve();
        let token = CancelToken::new(self.pool.epoch_handle(), slot.epoch());
        let started = Instant::now();

        match self
            .renderer
            .render(&document, &overrides, &mut slot.buffer, &token)
        {
            Ok(()) => {
                let epoch = slot.epoch();
                slot.elapsed = snapshot.elapsed;
                slot.revision = snapshot.revision;
                match self.pool.release(slot, SlotState::ReadyToPresent)? {
                    Release::Accepted => {
                        self.stats.frame_rendered(started.elapsed());
                        self.last = Some((snapshot.revision, epoch));
                        Ok(RenderStep::Rendered)
                    }
                    Release::Stale => {
                        self.stats.render_cancelled();
                        Ok(RenderStep::Cancelled)
                    }
                }
            }
            Err(Cancelled) => {
                self.pool.release(slot, SlotState::Free)?;
                self.stats.render_cancelled();
                tracing::trace!("render cancelled by epoch change");
                Ok(RenderStep::Cancelled)
            }
        }
    }
}

/// The render thread used with double and triple buffering.
#[derive(Debug)]
pub struct RenderWorker {
    shared: Arc<RenderShared>,
    pool: Arc<FramePool>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Start producing frames. `wait` bounds every blocking wait, so the
    /// thread notices shutdown within that time even if nobody wakes it.
    pub fn spawn(producer: FrameProducer, wait: StdDuration) -> ReelResult<Self> {
        let shared = Arc::clone(&producer.shared);
        let pool = Arc::clone(&producer.pool);
        let handle = std::thread::Builder::new()
            .name("reel-render".into())
            .spawn(move || run(producer, wait))
            .map_err(ReelError::Io)?;
        Ok(Self {
            shared,
            pool,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.stop();
        self.pool.close();
        if handle.join().is_err() {
            tracing::error!("render worker panicked");
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut producer: FrameProducer, wait: StdDuration) {
    tracing::debug!("render worker started");
    while producer.shared.is_running() && !producer.pool.is_closed() {
        let seen = producer.shared.generation();
        match producer.step(wait) {
            Ok(RenderStep::Idle) => producer.shared.wait_for_change(seen, wait),
            Ok(_) => {}
            Err(e) => {
                tracing::error!("render worker: {}", e);
                producer.shared.wait_for_change(seen, wait);
            }
        }
    }
    tracing::debug!("render worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::{Color, Duration, ManualClock, PixelFormat};
    use reel_ir::{AnimationDirective, DirectiveSpec, Element};

    fn setup(slots: usize) -> (Arc<ManualClock>, Arc<RenderShared>, Arc<FramePool>, FrameProducer) {
        let clock = Arc::new(ManualClock::new());
        let mut timeline = Timeline::new(clock.clone());
        let directive: AnimationDirective = DirectiveSpec::new(
            "box",
            "opacity",
            vec![0.0.into(), 1.0.into()],
            Duration::from_seconds(2.0),
        )
        .build()
        .unwrap();
        timeline.load(vec![directive]);

        let mut doc = AnimationDocument::new(8.0, 8.0);
        doc.add_element(Element::rect(0.0, 0.0, 8.0, 8.0).with_id("box").fill(Color::WHITE));

        let shared = Arc::new(RenderShared::new(timeline));
        shared.set_document(Arc::new(doc));
        let pool = Arc::new(FramePool::new(slots, 8, 8, PixelFormat::Rgba8));
        let producer = FrameProducer::new(
            Arc::clone(&shared),
            Arc::clone(&pool),
            FrameRenderer::new(Color::BLACK),
            Arc::new(StatsRecorder::new()),
        );
        (clock, shared, pool, producer)
    }

    #[test]
    fn test_step_fills_slots_until_busy() {
        let (_clock, _shared, pool, mut producer) = setup(2);
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Rendered);
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Rendered);
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Busy);
        assert_eq!(pool.count(SlotState::ReadyToPresent), 2);
    }

    #[test]
    fn test_paused_renders_each_revision_once() {
        let (clock, shared, pool, mut producer) = setup(3);
        clock.advance(Duration::from_seconds(1.0));
        shared.timeline().pause();
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Rendered);
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Idle);

        let frame = pool.acquire_ready().unwrap();
        assert!((frame.elapsed.as_seconds() - 1.0).abs() < 1e-9);
        let [r, _, _, _] = frame.buffer.get_pixel(4, 4).unwrap();
        assert!((126..=129).contains(&r), "r = {r}");
        pool.release(frame, SlotState::Free).unwrap();

        shared.timeline().seek(Duration::from_seconds(0.5));
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Rendered);
        // A resize invalidates the rendered frame even while paused.
        pool.resize(4, 4);
        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Rendered);
        assert_eq!(pool.acquire_ready().unwrap().buffer.dimensions(), (4, 4));
    }

    #[test]
    fn test_resize_during_render_cancels_the_frame() {
        let mut timeline = Timeline::new(Arc::new(ManualClock::new()));
        timeline.load(vec![]);
        let mut doc = AnimationDocument::new(512.0, 512.0);
        for i in 0..4000 {
            let offset = (i % 64) as f64 * 4.0;
            doc.add_element(Element::ellipse(128.0 + offset, 256.0, 120.0, 120.0).fill(Color::RED));
        }
        let shared = Arc::new(RenderShared::new(timeline));
        shared.set_document(Arc::new(doc));
        let pool = Arc::new(FramePool::new(1, 512, 512, PixelFormat::Rgba8));
        let stats = Arc::new(StatsRecorder::new());
        let mut producer = FrameProducer::new(
            Arc::clone(&shared),
            Arc::clone(&pool),
            FrameRenderer::new(Color::BLACK),
            Arc::clone(&stats),
        );

        let resizer = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let deadline = Instant::now() + StdDuration::from_secs(5);
                while pool.count(SlotState::Rendering) == 0 {
                    if Instant::now() > deadline {
                        return false;
                    }
                    std::hint::spin_loop();
                }
                pool.resize(64, 48);
                true
            })
        };
        let step = producer.step(StdDuration::from_secs(1)).unwrap();
        assert!(resizer.join().unwrap());
        assert_eq!(step, RenderStep::Cancelled);
        assert_eq!(pool.snapshot(), vec![SlotState::Free]);
        assert_eq!(stats.snapshot().frames_cancelled, 1);

        assert_eq!(producer.step(StdDuration::ZERO).unwrap(), RenderStep::Rendered);
        let frame = pool.acquire_ready().unwrap();
        assert_eq!(frame.buffer.dimensions(), (64, 48));
    }

    #[test]
    fn test_no_document_is_idle() {
        let (_clock, shared, _pool, _producer) = setup(1);
        let pool = Arc::new(FramePool::new(1, 2, 2, PixelFormat::Rgba8));
        let mut empty = FrameProducer::new(
            Arc::new(RenderShared::new(Timeline::new(Arc::new(ManualClock::new())))),
            pool,
            FrameRenderer::default(),
            Arc::new(StatsRecorder::new()),
        );
        assert_eq!(empty.step(StdDuration::ZERO).unwrap(), RenderStep::Idle);
        assert!(shared.document().is_some());
    }

    #[test]
    fn test_worker_thread_produces_and_stops() {
        let (_clock, _shared, pool, producer) = setup(2);
        let mut worker = RenderWorker::spawn(producer, StdDuration::from_millis(10)).unwrap();
        let deadline = Instant::now() + StdDuration::from_secs(5);
        while pool.count(SlotState::ReadyToPresent) < 2 && Instant::now() < deadline {
            std::thread::sleep(StdDuration::from_millis(1));
        }
        assert_eq!(pool.count(SlotState::ReadyToPresent), 2);
        worker.stop();
        assert!(!worker.is_running());
        worker.stop();
    }
}
