use reel_core::Color;
use serde::{Deserialize, Serialize};

/// The value of an element attribute, static or animated.
///
/// Documents store plain JSON numbers and strings; paint attributes are
/// promoted to [`AttributeValue::Color`] when an animation targets them so
/// that they interpolate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Color(Color),
    Text(String),
}

/// Attributes whose values are paints.
const PAINT_ATTRIBUTES: &[&str] = &["fill", "stroke", "stop-color", "color"];

impl AttributeValue {
    /// Parse a raw value string in the context of the attribute it belongs to.
    pub fn parse(attribute: &str, raw: &str) -> AttributeValue {
        let raw = raw.trim();
        if PAINT_ATTRIBUTES.contains(&attribute) {
            if let Ok(color) = Color::parse(raw) {
                return AttributeValue::Color(color);
            }
        }
        match parse_length(raw) {
            Some(n) => AttributeValue::Number(n),
            None => AttributeValue::Text(raw.to_string()),
        }
    }

    /// The value an attribute has when the document does not set it.
    pub fn default_for(attribute: &str) -> AttributeValue {
        match attribute {
            "opacity" | "fill-opacity" | "stroke-opacity" => AttributeValue::Number(1.0),
            "fill" => AttributeValue::Color(Color::BLACK),
            "stroke" => AttributeValue::Color(Color::TRANSPARENT),
            "visibility" => AttributeValue::Text("visible".into()),
            "display" => AttributeValue::Text("inline".into()),
            "href" | "xlink:href" => AttributeValue::Text(String::new()),
            _ => AttributeValue::Number(0.0),
        }
    }

    pub fn is_interpolable(&self) -> bool {
        !matches!(self, AttributeValue::Text(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            AttributeValue::Number(_) => "number",
            AttributeValue::Color(_) => "color",
            AttributeValue::Text(_) => "text",
        }
    }

    /// Blend towards `other` by `t` in [0, 1].
    ///
    /// Values of different kinds, and text, do not blend: the result steps
    /// from `self` to `other` at `t == 1`.
    pub fn interpolate(&self, other: &AttributeValue, t: f64) -> AttributeValue {
        match (self, other) {
            (AttributeValue::Number(a), AttributeValue::Number(b)) => {
                AttributeValue::Number(a + (b - a) * t)
            }
            (AttributeValue::Color(a), AttributeValue::Color(b)) => {
                AttributeValue::Color(a.lerp(b, t as f32))
            }
            _ if t >= 1.0 => other.clone(),
            _ => self.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(s) => parse_length(s),
            AttributeValue::Color(_) => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            AttributeValue::Color(c) => Some(*c),
            AttributeValue::Text(s) => Color::parse(s).ok(),
            AttributeValue::Number(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Number(n)
    }
}

impl From<Color> for AttributeValue {
    fn from(c: Color) -> Self {
        AttributeValue::Color(c)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Color(c) => write!(f, "{}", c),
            AttributeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A number with an optional `px` unit.
fn parse_length(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let raw = raw.strip_suffix("px").unwrap_or(raw);
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_attribute() {
        assert_eq!(
            AttributeValue::parse("opacity", " 0.25 "),
            AttributeValue::Number(0.25)
        );
        assert_eq!(
            AttributeValue::parse("x", "12px"),
            AttributeValue::Number(12.0)
        );
        assert_eq!(
            AttributeValue::parse("fill", "#ff0000"),
            AttributeValue::Color(Color::RED)
        );
        assert_eq!(
            AttributeValue::parse("xlink:href", "#frame1"),
            AttributeValue::Text("#frame1".into())
        );
    }

    #[test]
    fn test_interpolate_numbers_and_colors() {
        let a = AttributeValue::Number(0.0);
        let b = AttributeValue::Number(10.0);
        assert_eq!(a.interpolate(&b, 0.25), AttributeValue::Number(2.5));

        let c = AttributeValue::Color(Color::BLACK).interpolate(&AttributeValue::Color(Color::WHITE), 0.5);
        let c = c.as_color().unwrap();
        assert!((c.r - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_text_steps() {
        let a = AttributeValue::Text("hidden".into());
        let b = AttributeValue::Text("visible".into());
        assert_eq!(a.interpolate(&b, 0.99), a);
        assert_eq!(a.interpolate(&b, 1.0), b);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(AttributeValue::Text("3".into()).as_number(), Some(3.0));
        assert_eq!(
            AttributeValue::Text("red".into()).as_color(),
            Some(Color::RED)
        );
        assert_eq!(AttributeValue::Number(1.0).as_color(), None);
    }

    #[test]
    fn test_untagged_json() {
        let v: Vec<AttributeValue> = serde_json::from_str(r##"[1.5, "#00ff00"]"##).unwrap();
        assert_eq!(v[0], AttributeValue::Number(1.5));
        assert_eq!(v[1], AttributeValue::Text("#00ff00".into()));
    }
}
