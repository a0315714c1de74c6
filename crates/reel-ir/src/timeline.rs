use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use reel_core::{Clock, Duration, Timestamp};

use crate::animation::{AnimationDirective, DirectiveSet, BOUNDARY_EPSILON};
use crate::value::AttributeValue;

const DEFAULT_FRAME_RATE: f64 = 30.0;
const MIN_FRAME_RATE: f64 = 1.0;
const MAX_FRAME_RATE: f64 = 240.0;
const MAX_PLAYBACK_RATE: f64 = 10.0;
const MIN_PLAYBACK_RATE: f64 = 0.01;

/// What happens when playback reaches either end of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    /// Play once and stop at the end.
    Once,
    /// Wrap around to the other end.
    #[default]
    Loop,
    /// Reverse direction at each end.
    PingPong,
    /// Play this many passes, then stop at the end.
    Count(u32),
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Once => write!(f, "once"),
            RepeatMode::Loop => write!(f, "loop"),
            RepeatMode::PingPong => write!(f, "ping-pong"),
            RepeatMode::Count(n) => write!(f, "count({})", n),
        }
    }
}

/// Where elapsed time comes from. Pausing freezes the reading instead of
/// setting a flag next to a still-running start time.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ClockAnchor {
    /// `elapsed = offset + (now - since) * velocity`.
    Running { since: Timestamp, offset: Duration },
    Frozen { elapsed: Duration },
}

/// A raw position after the repeat mode has been applied.
#[derive(Debug, Clone, Copy)]
struct Folded {
    position: f64,
    /// Ends crossed on the way.
    passes: u64,
    /// Direction flips (ping-pong only).
    reversed: bool,
    /// Playback stops here.
    stopped: bool,
}

/// Per-frame attribute values, keyed by element id then attribute name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeOverrides {
    map: HashMap<String, BTreeMap<String, AttributeValue>>,
}

impl AttributeOverrides {
    pub fn get(&self, target_id: &str, attribute: &str) -> Option<&AttributeValue> {
        self.map.get(target_id)?.get(attribute)
    }

    pub fn insert(&mut self, target_id: &str, attribute: &str, value: AttributeValue) {
        self.map
            .entry(target_id.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.map.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Evaluate every directive at `elapsed`. Later directives win when two
/// animate the same attribute.
pub fn resolve(directives: &[AnimationDirective], elapsed: Duration) -> AttributeOverrides {
    let mut out = AttributeOverrides::default();
    for directive in directives {
        out.insert(
            &directive.target_id,
            &directive.attribute_name,
            directive.value_at(elapsed),
        );
    }
    out
}

/// What the render worker needs to draw one frame.
#[derive(Debug, Clone)]
pub struct TimelineSnapshot {
    pub elapsed: Duration,
    pub directives: DirectiveSet,
    /// Changes whenever the timeline is loaded, seeked, paused or resumed.
    pub revision: u64,
    pub paused: bool,
}

impl TimelineSnapshot {
    pub fn resolve(&self) -> AttributeOverrides {
        resolve(&self.directives, self.elapsed)
    }
}

/// The active directive set plus the clock that drives it.
pub struct Timeline {
    directives: DirectiveSet,
    clock: Arc<dyn Clock>,
    anchor: ClockAnchor,
    repeat_mode: RepeatMode,
    /// Signed rate multiplier; negative plays backward.
    rate: f64,
    /// False during the backward half of a ping-pong.
    forward: bool,
    /// While scrubbing: whether playback was running before it began.
    scrub: Option<bool>,
    ended: bool,
    duration: Duration,
    total_frames: u64,
    frame_rate: f64,
    completed_loops: u64,
    revision: u64,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("directives", &self.directives.len())
            .field("anchor", &self.anchor)
            .field("repeat_mode", &self.repeat_mode)
            .field("rate", &self.rate)
            .field("forward", &self.forward)
            .field("duration", &self.duration)
            .field("total_frames", &self.total_frames)
            .finish()
    }
}

impl Timeline {
    /// An empty timeline, running from the clock's current reading.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let since = clock.now();
        Self {
            directives: Arc::from(Vec::new()),
            clock,
            anchor: ClockAnchor::Running {
                since,
                offset: Duration::zero(),
            },
            repeat_mode: RepeatMode::Loop,
            rate: 1.0,
            forward: true,
            scrub: None,
            ended: false,
            duration: Duration::zero(),
            total_frames: 0,
            frame_rate: DEFAULT_FRAME_RATE,
            completed_loops: 0,
            revision: 0,
        }
    }

    /// Replace the directive set wholesale and restart from zero. The
    /// paused state carries over.
    pub fn load(&mut self, directives: Vec<AnimationDirective>) {
        self.duration = directives
            .iter()
            .map(|d| d.active_duration().unwrap_or_else(|| d.duration()))
            .fold(Duration::zero(), |acc, d| if d > acc { d } else { acc });
        self.total_frames = directives
            .iter()
            .map(|d| d.values().len() as u64)
            .max()
            .unwrap_or(0);
        self.frame_rate = if self.total_frames > 0 && !self.duration.is_zero() {
            (self.total_frames as f64 / self.duration.as_seconds())
                .clamp(MIN_FRAME_RATE, MAX_FRAME_RATE)
        } else {
            DEFAULT_FRAME_RATE
        };
        self.directives = Arc::from(directives);
        self.completed_loops = 0;
        self.forward = true;
        self.ended = false;
        self.set_elapsed(Duration::zero());

        tracing::info!(
            directives = self.directives.len(),
            duration = %self.duration,
            frames = self.total_frames,
            fps = self.frame_rate,
            "timeline loaded"
        );
    }

    pub fn directives(&self) -> &DirectiveSet {
        &self.directives
    }

    /// Length of one pass through the document.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.anchor, ClockAnchor::Frozen { .. })
    }

    /// Playback stopped at the end because looping is off.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn loop_enabled(&self) -> bool {
        self.repeat_mode != RepeatMode::Once
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn playback_rate(&self) -> f64 {
        self.rate
    }

    /// False during the backward half of a ping-pong.
    pub fn is_playing_forward(&self) -> bool {
        self.forward
    }

    pub fn is_scrubbing(&self) -> bool {
        self.scrub.is_some()
    }

    pub fn completed_loops(&self) -> u64 {
        self.completed_loops
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Elapsed time as of now, without applying the repeat mode.
    pub fn elapsed(&self) -> Duration {
        Duration::from_seconds(self.raw_position())
    }

    /// Position within the document as of now, with the repeat mode
    /// applied. Does not change any state.
    pub fn position(&self) -> Duration {
        match self.anchor {
            ClockAnchor::Running { .. } => {
                Duration::from_seconds(self.fold(self.raw_position()).position)
            }
            ClockAnchor::Frozen { elapsed } => elapsed,
        }
    }

    fn velocity(&self) -> f64 {
        if self.forward {
            self.rate
        } else {
            -self.rate
        }
    }

    fn raw_position(&self) -> f64 {
        match self.anchor {
            ClockAnchor::Running { since, offset } => {
                offset.as_seconds() + self.clock.now().since(since).as_seconds() * self.velocity()
            }
            ClockAnchor::Frozen { elapsed } => elapsed.as_seconds(),
        }
    }

    fn fold(&self, raw: f64) -> Folded {
        let end = self.duration.as_seconds();
        if end <= 0.0 || (0.0..end).contains(&raw) {
            return Folded {
                position: raw.max(0.0),
                passes: 0,
                reversed: false,
                stopped: false,
            };
        }
        let stop_at = |position: f64, passes: u64| Folded {
            position,
            passes,
            reversed: false,
            stopped: true,
        };
        let cycles = (raw / end).floor();
        let within = raw - cycles * end;
        let passes = cycles.abs() as u64;
        match self.repeat_mode {
            RepeatMode::Once => stop_at(raw.clamp(0.0, end), 0),
            RepeatMode::Loop => Folded {
                position: within,
                passes,
                reversed: false,
                stopped: false,
            },
            RepeatMode::PingPong => {
                let odd = passes % 2 == 1;
                Folded {
                    position: if odd { end - within } else { within },
                    passes,
                    reversed: odd,
                    stopped: false,
                }
            }
            RepeatMode::Count(count) => {
                if raw < 0.0 {
                    return stop_at(0.0, 0);
                }
                let remaining = u64::from(count).saturating_sub(self.completed_loops);
                if passes >= remaining {
                    stop_at(end, remaining)
                } else {
                    Folded {
                        position: within,
                        passes,
                        reversed: false,
                        stopped: false,
                    }
                }
            }
        }
    }

    /// Read the clock, apply the repeat mode, and hand back what a frame
    /// should show.
    pub fn sample(&mut self) -> TimelineSnapshot {
        let elapsed = self.advance();
        TimelineSnapshot {
            elapsed,
            directives: self.directives.clone(),
            revision: self.revision,
            paused: self.is_paused(),
        }
    }

    /// Attribute values at the current time.
    pub fn resolve_now(&mut self) -> AttributeOverrides {
        self.sample().resolve()
    }

    fn advance(&mut self) -> Duration {
        let raw = self.raw_position();
        let end = self.duration.as_seconds();
        let running = matches!(self.anchor, ClockAnchor::Running { .. });
        if !running || end <= 0.0 || (0.0..end).contains(&raw) {
            return Duration::from_seconds(raw);
        }

        let folded = self.fold(raw);
        self.completed_loops += folded.passes;
        let position = Duration::from_seconds(folded.position);
        if folded.stopped {
            self.ended = folded.position >= end;
            self.anchor = ClockAnchor::Frozen { elapsed: position };
            self.revision += 1;
            if self.ended {
                tracing::info!(loops = self.completed_loops, "playback reached the end");
            } else {
                tracing::info!("playback reached the start");
            }
        } else {
            if folded.reversed {
                self.forward = !self.forward;
            }
            self.anchor = ClockAnchor::Running {
                since: self.clock.now(),
                offset: position,
            };
            tracing::debug!(
                loops = self.completed_loops,
                forward = self.forward,
                "timeline wrapped"
            );
        }
        position
    }

    pub fn pause(&mut self) {
        if let ClockAnchor::Running { .. } = self.anchor {
            self.anchor = ClockAnchor::Frozen {
                elapsed: self.elapsed(),
            };
            self.revision += 1;
        }
    }

    pub fn resume(&mut self) {
        if let ClockAnchor::Frozen { elapsed } = self.anchor {
            let from = if self.ended {
                self.ended = false;
                self.completed_loops = 0;
                self.forward = true;
                Duration::zero()
            } else {
                elapsed
            };
            self.anchor = ClockAnchor::Running {
                since: self.clock.now(),
                offset: from,
            };
            self.revision += 1;
        }
    }

    /// Jump to `to`, clamped to the document. Keeps the paused state.
    pub fn seek(&mut self, to: Duration) {
        let to = if to > self.duration { self.duration } else { to };
        self.ended = false;
        self.set_elapsed(to);
    }

    pub fn seek_to_progress(&mut self, progress: f64) {
        self.seek(self.duration * progress.clamp(0.0, 1.0));
    }

    pub fn seek_to_start(&mut self) {
        self.seek(Duration::zero());
    }

    pub fn seek_to_end(&mut self) {
        self.seek(self.duration);
    }

    /// Move by `seconds` from the current position (backward when
    /// negative), clamped to the document.
    pub fn seek_by(&mut self, seconds: f64) {
        let target = (self.position().as_seconds() + seconds).max(0.0);
        self.seek(Duration::from_seconds(target));
    }

    /// Move by a fraction of the duration (backward when negative).
    pub fn seek_by_progress(&mut self, fraction: f64) {
        self.seek_by(self.duration.as_seconds() * fraction);
    }

    /// Pause at the start and forget loop and direction state.
    pub fn stop(&mut self) {
        self.anchor = ClockAnchor::Frozen {
            elapsed: Duration::zero(),
        };
        self.completed_loops = 0;
        self.forward = true;
        self.ended = false;
        self.revision += 1;
    }

    /// Pause for interactive scrubbing, remembering whether to pick up
    /// playback afterwards.
    pub fn begin_scrubbing(&mut self) {
        if self.scrub.is_none() {
            self.scrub = Some(!self.is_paused());
            self.pause();
        }
    }

    /// Only moves while scrubbing.
    pub fn scrub_to_progress(&mut self, progress: f64) {
        if self.scrub.is_some() {
            self.seek_to_progress(progress);
        }
    }

    /// Leave scrubbing; with `resume`, playback restarts if it was running
    /// when scrubbing began.
    pub fn end_scrubbing(&mut self, resume: bool) {
        if let Some(was_running) = self.scrub.take() {
            if resume && was_running {
                self.resume();
            }
        }
    }

    pub fn seek_to_frame(&mut self, frame: u64) {
        if self.total_frames == 0 {
            return;
        }
        self.seek(self.time_for_frame(frame));
    }

    /// Pause, then move `frames` frames forward (or backward when negative).
    pub fn step_frames(&mut self, frames: i64) {
        if self.total_frames == 0 {
            return;
        }
        self.pause();
        let current = self.current_frame() as i64;
        let target = (current + frames).clamp(0, self.total_frames as i64 - 1);
        self.seek_to_frame(target as u64);
    }

    /// `true` loops (keeping ping-pong or a count if one is set), `false`
    /// plays once.
    pub fn set_loop_enabled(&mut self, enabled: bool) {
        match (enabled, self.repeat_mode) {
            (true, RepeatMode::Once) => self.set_repeat_mode(RepeatMode::Loop),
            (false, mode) if mode != RepeatMode::Once => self.set_repeat_mode(RepeatMode::Once),
            _ => {}
        }
    }

    /// Switch repeat behavior from the current position. A count restarts
    /// from zero completed passes; `Count(0)` counts as one pass.
    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        let mode = match mode {
            RepeatMode::Count(0) => RepeatMode::Count(1),
            other => other,
        };
        if mode == self.repeat_mode {
            return;
        }
        let position = self.advance();
        self.repeat_mode = mode;
        if mode != RepeatMode::PingPong {
            self.forward = true;
        }
        if let RepeatMode::Count(_) = mode {
            self.completed_loops = 0;
        }
        self.set_elapsed(position);
        tracing::debug!(mode = %mode, "repeat mode changed");
    }

    /// Scale the speed of time. Clamped to `[-10, 10]`, with magnitudes
    /// under 0.01 raised to 0.01; negative plays backward.
    pub fn set_playback_rate(&mut self, rate: f64) {
        if !rate.is_finite() {
            return;
        }
        let clamped = rate.clamp(-MAX_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        let rate = if clamped.abs() < MIN_PLAYBACK_RATE {
            MIN_PLAYBACK_RATE.copysign(clamped)
        } else {
            clamped
        };
        if rate == self.rate {
            return;
        }
        let position = self.advance();
        self.rate = rate;
        self.set_elapsed(position);
        tracing::debug!(rate, "playback rate changed");
    }

    /// Position within the document, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        (self.position().as_seconds() / self.duration.as_seconds()).clamp(0.0, 1.0)
    }

    pub fn current_frame(&self) -> u64 {
        self.frame_for_time(self.position())
    }

    pub fn frame_for_time(&self, at: Duration) -> u64 {
        if self.total_frames == 0 || self.duration.is_zero() {
            return 0;
        }
        let scaled = at.as_seconds() * self.total_frames as f64 / self.duration.as_seconds();
        let frame = (scaled + BOUNDARY_EPSILON).floor() as u64;
        frame.min(self.total_frames - 1)
    }

    pub fn time_for_frame(&self, frame: u64) -> Duration {
        if self.total_frames == 0 || self.duration.is_zero() {
            return Duration::zero();
        }
        let frame = frame.min(self.total_frames - 1);
        let frame_time = self.duration.as_seconds() / self.total_frames as f64;
        Duration::from_seconds(frame as f64 * frame_time)
    }

    /// `MM:SS.mmm`.
    pub fn format_time(at: Duration) -> String {
        let seconds = at.as_seconds();
        let whole = seconds.floor() as u64;
        let ms = ((seconds - seconds.floor()) * 1000.0) as u64;
        format!("{:02}:{:02}.{:03}", whole / 60, whole % 60, ms)
    }

    fn set_elapsed(&mut self, elapsed: Duration) {
        self.anchor = match self.anchor {
            ClockAnchor::Running { .. } => ClockAnchor::Running {
                since: self.clock.now(),
                offset: elapsed,
            },
            ClockAnchor::Frozen { .. } => ClockAnchor::Frozen { elapsed },
        };
        self.revision += 1;
    }
}
