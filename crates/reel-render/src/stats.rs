use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Counters shared between the render worker and the presenter.
#[derive(Debug)]
pub struct StatsRecorder {
    rendered: AtomicU64,
    cancelled: AtomicU64,
    presented: AtomicU64,
    deferred: AtomicU64,
    discarded: AtomicU64,
    leaked_drawables: AtomicU64,
    render_micros_total: AtomicU64,
    render_micros_last: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self {
            rendered: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            presented: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            leaked_drawables: AtomicU64::new(0),
            render_micros_total: AtomicU64::new(0),
            render_micros_last: AtomicU64::new(0),
            started: Mutex::new(None),
        }
    }
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_rendered(&self, took: std::time::Duration) {
        let micros = took.as_micros() as u64;
        self.rendered.fetch_add(1, Ordering::Relaxed);
        self.render_micros_total.fetch_add(micros, Ordering::Relaxed);
        self.render_micros_last.store(micros, Ordering::Relaxed);
    }

    pub fn render_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_presented(&self) {
        self.started.lock().get_or_insert_with(Instant::now);
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn drawable_leaked(&self) {
        self.leaked_drawables.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PlaybackStats {
        let rendered = self.rendered.load(Ordering::Relaxed);
        let presented = self.presented.load(Ordering::Relaxed);
        let total = self.render_micros_total.load(Ordering::Relaxed);
        let avg_render_ms = if rendered > 0 {
            total as f64 / rendered as f64 / 1000.0
        } else {
            0.0
        };
        let presented_fps = match *self.started.lock() {
            Some(started) => {
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 && presented > 1 {
                    (presented - 1) as f64 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        PlaybackStats {
            frames_rendered: rendered,
            frames_cancelled: self.cancelled.load(Ordering::Relaxed),
            frames_presented: presented,
            frames_deferred: self.deferred.load(Ordering::Relaxed),
            frames_discarded: self.discarded.load(Ordering::Relaxed),
            leaked_drawables: self.leaked_drawables.load(Ordering::Relaxed),
            last_render_ms: self.render_micros_last.load(Ordering::Relaxed) as f64 / 1000.0,
            avg_render_ms,
            presented_fps,
            ..PlaybackStats::default()
        }
    }
}

/// A point-in-time view of playback, as reported to callers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStats {
    pub backend: String,
    pub failovers: u32,
    pub frames_rendered: u64,
    pub frames_cancelled: u64,
    pub frames_presented: u64,
    /// Cycles where no drawable was available.
    pub frames_deferred: u64,
    /// Frames dropped because the output was resized under them.
    pub frames_discarded: u64,
    pub leaked_drawables: u64,
    pub last_render_ms: f64,
    pub avg_render_ms: f64,
    pub presented_fps: f64,
    pub current_frame: u64,
    pub total_frames: u64,
    pub elapsed: String,
    pub duration: String,
    pub completed_loops: u64,
    pub playback_rate: f64,
    pub repeat_mode: String,
    pub paused: bool,
}
