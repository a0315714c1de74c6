//! SMIL attribute parsing.
//!
//! Turns the string attributes of `<animate>` records into validated
//! [`AnimationDirective`]s. Every malformed input is reported here, at load
//! time, as a [`ReelError::Parse`]; nothing downstream re-checks it.

use reel_core::{Duration, ReelError, ReelResult};

use crate::animation::{
    AnimationDirective, CalcMode, DirectiveSpec, FillMode, KeySpline, RepeatCount,
};
use crate::document::{AnimationDocument, RawAnimation};
use crate::validate::ensure_valid;
use crate::value::AttributeValue;

/// Parse a document from JSON and check its structure.
pub fn load_document(json: &str) -> ReelResult<AnimationDocument> {
    let document: AnimationDocument = serde_json::from_str(json)?;
    ensure_valid(&document)?;
    Ok(document)
}

/// Compile every animation of `document`, in document order.
pub fn compile_animations(document: &AnimationDocument) -> ReelResult<Vec<AnimationDirective>> {
    document
        .animations
        .iter()
        .map(|raw| compile_animation(document, raw))
        .collect()
}

fn compile_animation(
    document: &AnimationDocument,
    raw: &RawAnimation,
) -> ReelResult<AnimationDirective> {
    let label = raw.label();
    let err = |message: String| ReelError::parse(message, label.clone());

    let target = document
        .find(&raw.target)
        .ok_or_else(|| err(format!("unknown target element '{}'", raw.target)))?;

    let values = parse_values(&raw.values)
        .into_iter()
        .map(|v| AttributeValue::parse(&raw.attribute_name, v))
        .collect::<Vec<_>>();

    let duration = parse_clock_value(&raw.dur).map_err(&err)?;

    let repeat_count = match raw.repeat_count.as_deref() {
        Some(text) => parse_repeat_count(text).map_err(&err)?,
        None => RepeatCount::default(),
    };

    let calc_mode = match raw.calc_mode.as_deref() {
        Some(text) => parse_calc_mode(text).map_err(&err)?,
        None => CalcMode::Linear,
    };

    let fill_mode = match raw.fill.as_deref() {
        Some(text) => parse_fill(text).map_err(&err)?,
        None => FillMode::default(),
    };

    // Normalize the document's static value through the same parser so a
    // painted "red" becomes a color that can blend with animated colors.
    let base = target
        .attribute(&raw.attribute_name)
        .map(|v| match v {
            AttributeValue::Text(text) => AttributeValue::parse(&raw.attribute_name, text),
            other => other.clone(),
        });

    let mut spec = DirectiveSpec::new(&raw.target, &raw.attribute_name, values, duration)
        .repeat(repeat_count)
        .calc_mode(calc_mode)
        .fill(fill_mode);
    if let Some(text) = raw.key_times.as_deref() {
        spec = spec.key_times(parse_key_times(text).map_err(&err)?);
    }
    if let Some(text) = raw.key_splines.as_deref() {
        spec = spec.key_splines(parse_key_splines(text).map_err(&err)?);
    }
    if let Some(base) = base {
        spec = spec.base(base);
    }
    spec.build()
}

/// Split a `values` list on `;`, trimming entries and dropping empty ones.
pub fn parse_values(text: &str) -> Vec<&str> {
    text.split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

/// Parse a SMIL clock value: `500ms`, `2s`, `1.5min`, `1h`, a bare number
/// of seconds, or a full/partial clock `hh:mm:ss(.fff)` / `mm:ss(.fff)`.
pub fn parse_clock_value(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("missing duration".into());
    }

    if text.contains(':') {
        let parts = text
            .split(':')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("invalid clock value '{}'", text))?;
        let seconds = match parts.as_slice() {
            [m, s] => m * 60.0 + s,
            [h, m, s] => h * 3600.0 + m * 60.0 + s,
            _ => return Err(format!("invalid clock value '{}'", text)),
        };
        return positive(seconds, text);
    }

    // Longest suffixes first so "ms" and "min" are not read as "s".
    let (number, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = text.strip_suffix("min") {
        (n, 60.0)
    } else if let Some(n) = text.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1.0)
    } else {
        (text, 1.0)
    };

    let value = number
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid duration '{}'", text))?;
    positive(value * scale, text)
}

fn positive(seconds: f64, text: &str) -> Result<Duration, String> {
    if seconds > 0.0 && seconds.is_finite() {
        Ok(Duration::from_seconds(seconds))
    } else {
        Err(format!("duration must be positive, got '{}'", text))
    }
}

pub fn parse_repeat_count(text: &str) -> Result<RepeatCount, String> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("indefinite") {
        return Ok(RepeatCount::Indefinite);
    }
    match text.parse::<f64>() {
        Ok(n) if n > 0.0 && n.is_finite() => Ok(RepeatCount::Finite(n)),
        _ => Err(format!("invalid repeatCount '{}'", text)),
    }
}

/// `paced` needs path-length information the player does not model; it
/// evaluates as `linear`.
pub fn parse_calc_mode(text: &str) -> Result<CalcMode, String> {
    match text.trim() {
        "discrete" => Ok(CalcMode::Discrete),
        "linear" => Ok(CalcMode::Linear),
        "spline" => Ok(CalcMode::Spline),
        "paced" => {
            tracing::debug!("calcMode=paced evaluated as linear");
            Ok(CalcMode::Linear)
        }
        other => Err(format!("invalid calcMode '{}'", other)),
    }
}

pub fn parse_fill(text: &str) -> Result<FillMode, String> {
    match text.trim() {
        "freeze" | "hold" => Ok(FillMode::Hold),
        "remove" | "revert" => Ok(FillMode::Revert),
        other => Err(format!("invalid fill '{}'", other)),
    }
}

pub fn parse_key_times(text: &str) -> Result<Vec<f64>, String> {
    parse_values(text)
        .into_iter()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| format!("invalid key time '{}'", v))
        })
        .collect()
}

/// Groups of four control values separated by `;`, with the values inside
/// a group separated by spaces and/or commas.
pub fn parse_key_splines(text: &str) -> Result<Vec<KeySpline>, String> {
    parse_values(text)
        .into_iter()
        .map(|group| {
            let numbers = group
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| format!("invalid key spline '{}'", group))?;
            match numbers.as_slice() {
                [x1, y1, x2, y2] => Ok(KeySpline::new(*x1, *y1, *x2, *y2)),
                _ => Err(format!(
                    "key spline '{}' needs 4 values, got {}",
                    group,
                    numbers.len()
                )),
            }
        })
        .collect()
}
