use std::sync::Arc;

use reel_core::{Duration, ReelError, ReelResult};
use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// How values between keyframes are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcMode {
    /// Jump from value to value.
    Discrete,
    /// Proportional blend between neighbouring values.
    Linear,
    /// Per-segment cubic-bezier easing, driven by `keySplines`.
    Spline,
}

impl std::fmt::Display for CalcMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalcMode::Discrete => write!(f, "discrete"),
            CalcMode::Linear => write!(f, "linear"),
            CalcMode::Spline => write!(f, "spline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RepeatCount {
    /// Play `n` simple durations. Fractional counts end mid-cycle.
    Finite(f64),
    Indefinite,
}

impl Default for RepeatCount {
    fn default() -> Self {
        RepeatCount::Finite(1.0)
    }
}

/// What an attribute shows once a finite animation is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    /// Keep the last keyframe value (`fill="freeze"`).
    Hold,
    /// Go back to the value the document gives the attribute (`fill="remove"`).
    Revert,
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Revert
    }
}

/// Cubic-bezier timing curve from (0,0) to (1,1) with two control points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeySpline {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl KeySpline {
    pub const LINEAR: KeySpline = KeySpline {
        x1: 0.0,
        y1: 0.0,
        x2: 1.0,
        y2: 1.0,
    };

    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Map a linear phase in [0, 1] through the curve.
    pub fn apply(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        if t == 0.0 || t == 1.0 {
            return t;
        }
        let s = self.solve_x(t);
        bezier(self.y1, self.y2, s)
    }

    /// Find the curve parameter whose x equals `x`. x(s) is monotonic
    /// because both control x values lie in [0, 1].
    fn solve_x(&self, x: f64) -> f64 {
        let mut s = x;
        for _ in 0..8 {
            let err = bezier(self.x1, self.x2, s) - x;
            if err.abs() < 1e-9 {
                return s;
            }
            let slope = bezier_slope(self.x1, self.x2, s);
            if slope.abs() < 1e-6 {
                break;
            }
            s -= err / slope;
        }

        let (mut lo, mut hi) = (0.0, 1.0);
        s = x;
        for _ in 0..64 {
            let value = bezier(self.x1, self.x2, s);
            if (value - x).abs() < 1e-9 {
                break;
            }
            if value < x {
                lo = s;
            } else {
                hi = s;
            }
            s = (lo + hi) / 2.0;
        }
        s
    }
}

fn bezier(p1: f64, p2: f64, s: f64) -> f64 {
    let inv = 1.0 - s;
    3.0 * inv * inv * s * p1 + 3.0 * inv * s * s * p2 + s * s * s
}

fn bezier_slope(p1: f64, p2: f64, s: f64) -> f64 {
    let inv = 1.0 - s;
    3.0 * inv * inv * p1 + 6.0 * inv * s * (p2 - p1) + 3.0 * s * s * (1.0 - p2)
}

/// One animated attribute binding.
///
/// Built and checked once, when the document loads; never mutated after.
/// Evaluation through [`AnimationDirective::value_at`] cannot fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationDirective {
    pub target_id: String,
    pub attribute_name: String,
    values: Vec<AttributeValue>,
    key_times: Option<Vec<f64>>,
    key_splines: Vec<KeySpline>,
    duration: Duration,
    repeat_count: RepeatCount,
    calc_mode: CalcMode,
    fill_mode: FillMode,
    base_value: AttributeValue,
}

/// Unvalidated directive fields, assembled by the parser or by hand.
#[derive(Debug, Clone)]
pub struct DirectiveSpec {
    pub target_id: String,
    pub attribute_name: String,
    pub values: Vec<AttributeValue>,
    pub key_times: Option<Vec<f64>>,
    pub key_splines: Vec<KeySpline>,
    pub duration: Duration,
    pub repeat_count: RepeatCount,
    pub calc_mode: CalcMode,
    pub fill_mode: FillMode,
    /// Defaults to the attribute's initial value when `None`.
    pub base_value: Option<AttributeValue>,
}

impl DirectiveSpec {
    pub fn new(
        target_id: impl Into<String>,
        attribute_name: impl Into<String>,
        values: Vec<AttributeValue>,
        duration: Duration,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            attribute_name: attribute_name.into(),
            values,
            key_times: None,
            key_splines: Vec::new(),
            duration,
            repeat_count: RepeatCount::default(),
            calc_mode: CalcMode::Linear,
            fill_mode: FillMode::default(),
            base_value: None,
        }
    }

    pub fn calc_mode(mut self, mode: CalcMode) -> Self {
        self.calc_mode = mode;
        self
    }

    pub fn repeat(mut self, count: RepeatCount) -> Self {
        self.repeat_count = count;
        self
    }

    pub fn fill(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    pub fn key_times(mut self, times: Vec<f64>) -> Self {
        self.key_times = Some(times);
        self
    }

    pub fn key_splines(mut self, splines: Vec<KeySpline>) -> Self {
        self.key_splines = splines;
        self
    }

    pub fn base(mut self, value: AttributeValue) -> Self {
        self.base_value = Some(value);
        self
    }

    /// Validate and freeze into a directive.
    pub fn build(self) -> ReelResult<AnimationDirective> {
        let label = format!("{}.{}", self.target_id, self.attribute_name);
        let fail = |message: String| ReelError::parse(message, label.clone());

        if self.values.is_empty() {
            return Err(fail("animation has no values".into()));
        }
        let seconds = self.duration.as_seconds();
        if !(seconds > 0.0) || !seconds.is_finite() {
            return Err(fail("duration must be positive".into()));
        }
        if let RepeatCount::Finite(n) = self.repeat_count {
            if !(n > 0.0) || !n.is_finite() {
                return Err(fail(format!("repeat count must be positive, got {}", n)));
            }
        }

        let n = self.values.len();
        if let Some(times) = &self.key_times {
            if times.len() != n {
                return Err(fail(format!(
                    "{} key times for {} values",
                    times.len(),
                    n
                )));
            }
            if times.iter().any(|t| !(0.0..=1.0).contains(t)) {
                return Err(fail("key times must lie in [0, 1]".into()));
            }
            if times.windows(2).any(|w| w[1] < w[0]) {
                return Err(fail("key times must not decrease".into()));
            }
            if times[0] != 0.0 {
                return Err(fail("first key time must be 0".into()));
            }
            if self.calc_mode != CalcMode::Discrete && n > 1 && times[n - 1] != 1.0 {
                return Err(fail(format!(
                    "last key time must be 1 for {} animation",
                    self.calc_mode
                )));
            }
        }

        if self.calc_mode == CalcMode::Spline {
            let segments = n.saturating_sub(1);
            if self.key_splines.len() != segments {
                return Err(fail(format!(
                    "{} key splines for {} intervals",
                    self.key_splines.len(),
                    segments
                )));
            }
            let in_unit = |v: f64| (0.0..=1.0).contains(&v);
            if self
                .key_splines
                .iter()
                .any(|s| !in_unit(s.x1) || !in_unit(s.y1) || !in_unit(s.x2) || !in_unit(s.y2))
            {
                return Err(fail("key spline control points must lie in [0, 1]".into()));
            }
        }

        if self.calc_mode != CalcMode::Discrete {
            let first_kind = self.values[0].kind_name();
            if let Some(other) = self.values.iter().find(|v| v.kind_name() != first_kind) {
                return Err(fail(format!(
                    "cannot interpolate between {} and {} values",
                    first_kind,
                    other.kind_name()
                )));
            }
        }

        let base_value = self
            .base_value
            .unwrap_or_else(|| AttributeValue::default_for(&self.attribute_name));

        Ok(AnimationDirective {
            target_id: self.target_id,
            attribute_name: self.attribute_name,
            values: self.values,
            key_times: self.key_times,
            key_splines: self.key_splines,
            duration: self.duration,
            repeat_count: self.repeat_count,
            calc_mode: self.calc_mode,
            fill_mode: self.fill_mode,
            base_value,
        })
    }
}

impl AnimationDirective {
    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    /// Length of one cycle.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn repeat_count(&self) -> RepeatCount {
        self.repeat_count
    }

    pub fn calc_mode(&self) -> CalcMode {
        self.calc_mode
    }

    pub fn fill_mode(&self) -> FillMode {
        self.fill_mode
    }

    pub fn base_value(&self) -> &AttributeValue {
        &self.base_value
    }

    /// Total playing time, or `None` when the animation repeats forever.
    pub fn active_duration(&self) -> Option<Duration> {
        match self.repeat_count {
            RepeatCount::Finite(n) => Some(self.duration * n),
            RepeatCount::Indefinite => None,
        }
    }

    /// The attribute value at `elapsed` time since the timeline started.
    pub fn value_at(&self, elapsed: Duration) -> AttributeValue {
        match self.phase_at(elapsed) {
            Some(phase) => self.sample(phase),
            None => self.fill_value(),
        }
    }

    /// Index of the keyframe in effect at `elapsed`, or `None` once a
    /// finite animation has ended.
    pub fn keyframe_index_at(&self, elapsed: Duration) -> Option<usize> {
        self.phase_at(elapsed).map(|phase| self.segment(phase).0)
    }

    /// Position inside the current cycle, in [0, 1).
    fn phase_at(&self, elapsed: Duration) -> Option<f64> {
        let t = elapsed.as_seconds();
        if let Some(active) = self.active_duration() {
            if t >= active.as_seconds() {
                return None;
            }
        }
        let simple = self.duration.as_seconds();
        let phase = t.rem_euclid(simple) / simple;
        // Rounding in rem_euclid can land exactly on 1.0.
        Some(if phase >= 1.0 { 0.0 } else { phase })
    }

    fn fill_value(&self) -> AttributeValue {
        match self.fill_mode {
            FillMode::Hold => self.values[self.values.len() - 1].clone(),
            FillMode::Revert => self.base_value.clone(),
        }
    }

    fn sample(&self, phase: f64) -> AttributeValue {
        let (index, local) = self.segment(phase);
        let interpolates = self.calc_mode != CalcMode::Discrete
            && index + 1 < self.values.len()
            && self.values[index].is_interpolable();
        if !interpolates {
            return self.values[index].clone();
        }

        let eased = match self.calc_mode {
            CalcMode::Spline => self.key_splines[index].apply(local),
            _ => local,
        };
        self.values[index].interpolate(&self.values[index + 1], eased)
    }

    /// The keyframe interval containing `phase`, and how far into it we are.
    /// Intervals are closed-open, so a phase on a key time belongs to the
    /// later keyframe.
    fn segment(&self, phase: f64) -> (usize, f64) {
        let n = self.values.len();
        if n == 1 {
            return (0, 0.0);
        }

        match (&self.key_times, self.calc_mode) {
            (None, CalcMode::Discrete) => {
                let index = ((phase * n as f64 + BOUNDARY_EPSILON).floor() as usize).min(n - 1);
                (index, 0.0)
            }
            (None, _) => {
                let scaled = phase * (n - 1) as f64;
                let index = ((scaled + BOUNDARY_EPSILON).floor() as usize).min(n - 1);
                (index, (scaled - index as f64).max(0.0))
            }
            (Some(times), _) => {
                let index = times
                    .iter()
                    .rposition(|&k| k <= phase + BOUNDARY_EPSILON)
                    .unwrap_or(0);
                match times.get(index + 1) {
                    Some(&next) if next > times[index] => {
                        (index, ((phase - times[index]) / (next - times[index])).max(0.0))
                    }
                    _ => (index, 0.0),
                }
            }
        }
    }
}

/// Tolerance when mapping a time onto a keyframe or frame boundary, so that
/// a time computed from a frame index lands on that frame.
pub const BOUNDARY_EPSILON: f64 = 1e-9;

/// A cheaply cloneable, immutable list of directives.
pub type DirectiveSet = Arc<[AnimationDirective]>;

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_seconds(s)
    }

    fn num(v: f64) -> AttributeValue {
        AttributeValue::Number(v)
    }

    fn number_at(d: &AnimationDirective, t: f64) -> f64 {
        d.value_at(secs(t)).as_number().unwrap()
    }

    #[test]
    fn test_opacity_cycle_scenario() {
        let d = DirectiveSpec::new("logo", "opacity", vec![num(0.0), num(1.0)], secs(2.0))
            .repeat(RepeatCount::Indefinite)
            .build()
            .unwrap();
        assert!((number_at(&d, 1.0) - 0.5).abs() < 1e-9);
        assert!((number_at(&d, 3.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_linear_endpoints_and_midpoint() {
        let hold = DirectiveSpec::new("a", "x", vec![num(10.0), num(30.0)], secs(4.0))
            .fill(FillMode::Hold)
            .base(num(-1.0))
            .build()
            .unwrap();
        assert_eq!(number_at(&hold, 0.0), 10.0);
        assert!((number_at(&hold, 2.0) - 20.0).abs() < 1e-9);
        assert_eq!(number_at(&hold, 4.0), 30.0);

        let revert = DirectiveSpec::new("a", "x", vec![num(10.0), num(30.0)], secs(4.0))
            .fill(FillMode::Revert)
            .base(num(-1.0))
            .build()
            .unwrap();
        assert_eq!(number_at(&revert, 4.0), -1.0);
        assert_eq!(number_at(&revert, 100.0), -1.0);
    }

    #[test]
    fn test_periodicity_for_indefinite_repeat() {
        let d = DirectiveSpec::new("a", "x", vec![num(0.0), num(5.0), num(-3.0)], secs(1.5))
            .repeat(RepeatCount::Indefinite)
            .build()
            .unwrap();
        for i in 0..40 {
            let t = i as f64 * 0.137;
            let a = number_at(&d, t);
            let b = number_at(&d, t + 1.5);
            assert!((a - b).abs() < 1e-6, "t={} a={} b={}", t, a, b);
        }
    }

    #[test]
    fn test_evaluation_is_pure() {
        let d = DirectiveSpec::new("a", "fill", vec![
            AttributeValue::Color(reel_core::Color::RED),
            AttributeValue::Color(reel_core::Color::BLUE),
        ], secs(1.0))
        .build()
        .unwrap();
        let first = d.value_at(secs(0.3));
        let second = d.value_at(secs(0.3));
        assert_eq!(first, second);
    }

    #[test]
    fn test_discrete_equal_slices() {
        let frames: Vec<_> = (0..4).map(|i| AttributeValue::Text(format!("#f{}", i))).collect();
        let d = DirectiveSpec::new("player", "xlink:href", frames, secs(1.0))
            .calc_mode(CalcMode::Discrete)
            .repeat(RepeatCount::Indefinite)
            .build()
            .unwrap();
        assert_eq!(d.value_at(secs(0.0)).as_text(), Some("#f0"));
        assert_eq!(d.value_at(secs(0.24)).as_text(), Some("#f0"));
        // Exactly on a slice boundary resolves to the later frame.
        assert_eq!(d.value_at(secs(0.25)).as_text(), Some("#f1"));
        assert_eq!(d.value_at(secs(0.99)).as_text(), Some("#f3"));
        assert_eq!(d.value_at(secs(1.0)).as_text(), Some("#f0"));
    }

    #[test]
    fn test_linear_boundary_takes_later_keyframe() {
        let d = DirectiveSpec::new("a", "x", vec![num(0.0), num(10.0), num(10.0), num(0.0)], secs(3.0))
            .build()
            .unwrap();
        assert_eq!(d.keyframe_index_at(secs(1.0)), Some(1));
        assert_eq!(d.keyframe_index_at(secs(2.0)), Some(2));
        assert_eq!(number_at(&d, 2.0), 10.0);
    }

    #[test]
    fn test_explicit_key_times() {
        let d = DirectiveSpec::new("a", "x", vec![num(0.0), num(100.0), num(0.0)], secs(10.0))
            .key_times(vec![0.0, 0.8, 1.0])
            .build()
            .unwrap();
        assert!((number_at(&d, 4.0) - 50.0).abs() < 1e-9);
        assert!((number_at(&d, 9.0) - 50.0).abs() < 1e-9);

        let discrete = DirectiveSpec::new("a", "x", vec![num(1.0), num(2.0)], secs(10.0))
            .calc_mode(CalcMode::Discrete)
            .key_times(vec![0.0, 0.9])
            .build()
            .unwrap();
        assert_eq!(number_at(&discrete, 8.9), 1.0);
        assert_eq!(number_at(&discrete, 9.0), 2.0);
    }

    #[test]
    fn test_spline_easing() {
        let ease_in = KeySpline::new(0.42, 0.0, 1.0, 1.0);
        let d = DirectiveSpec::new("a", "x", vec![num(0.0), num(1.0)], secs(1.0))
            .calc_mode(CalcMode::Spline)
            .key_splines(vec![ease_in])
            .build()
            .unwrap();
        let mid = number_at(&d, 0.5);
        assert!(mid < 0.5, "ease-in should lag behind linear, got {}", mid);
        assert!(mid > 0.0);

        assert!((KeySpline::LINEAR.apply(0.3) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_fractional_repeat_count() {
        let d = DirectiveSpec::new("a", "x", vec![num(0.0), num(1.0)], secs(1.0))
            .repeat(RepeatCount::Finite(2.5))
            .fill(FillMode::Hold)
            .build()
            .unwrap();
        assert!((number_at(&d, 1.25) - 0.25).abs() < 1e-9);
        assert!((number_at(&d, 2.4) - 0.4).abs() < 1e-9);
        assert_eq!(number_at(&d, 2.5), 1.0);
        assert_eq!(d.active_duration(), Some(secs(2.5)));
    }

    #[test]
    fn test_text_under_linear_steps() {
        let d = DirectiveSpec::new(
            "a",
            "visibility",
            vec![AttributeValue::Text("visible".into()), AttributeValue::Text("hidden".into())],
            secs(2.0),
        )
        .build()
        .unwrap();
        assert_eq!(d.value_at(secs(0.5)).as_text(), Some("visible"));
        assert_eq!(d.value_at(secs(1.9)).as_text(), Some("visible"));
    }

    #[test]
    fn test_malformed_directives_rejected() {
        let values = vec![num(0.0), num(1.0)];
        let cases = vec![
            DirectiveSpec::new("a", "x", vec![], secs(1.0)),
            DirectiveSpec::new("a", "x", values.clone(), secs(0.0)),
            DirectiveSpec::new("a", "x", values.clone(), secs(1.0)).key_times(vec![0.0]),
            DirectiveSpec::new("a", "x", values.clone(), secs(1.0)).key_times(vec![0.0, 0.5]),
            DirectiveSpec::new("a", "x", vec![num(0.0), num(1.0), num(2.0)], secs(1.0))
                .key_times(vec![0.0, 0.7, 0.2]),
            DirectiveSpec::new("a", "x", values.clone(), secs(1.0)).calc_mode(CalcMode::Spline),
            DirectiveSpec::new("a", "x", values.clone(), secs(1.0))
                .calc_mode(CalcMode::Spline)
                .key_splines(vec![KeySpline::new(0.0, 0.0, 1.5, 1.0)]),
            DirectiveSpec::new("a", "x", values.clone(), secs(1.0)).repeat(RepeatCount::Finite(0.0)),
            DirectiveSpec::new(
                "a",
                "fill",
                vec![num(0.0), AttributeValue::Color(reel_core::Color::RED)],
                secs(1.0),
            ),
        ];
        for spec in cases {
            let err = spec.clone().build().unwrap_err();
            assert!(matches!(err, ReelError::Parse { .. }), "{:?}", spec);
        }
    }

    #[test]
    fn test_revert_defaults_to_attribute_initial_value() {
        let d = DirectiveSpec::new("a", "opacity", vec![num(0.0), num(0.5)], secs(1.0))
            .build()
            .unwrap();
        assert_eq!(number_at(&d, 2.0), 1.0);
    }
}
