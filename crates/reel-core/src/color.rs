use serde::{Deserialize, Serialize};
use std::fmt;

/// RGBA color representation with f32 components in [0.0, 1.0] range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque RGB color (alpha = 1.0).
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn from_rgba8(px: [u8; 4]) -> Self {
        Self::rgba(
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        )
    }

    /// Create a color from a hex string: `#RGB`, `#RRGGBB` or `#RRGGBBAA`
    /// (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let hex = hex.trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(ColorError::InvalidHex);
        }
        let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| ColorError::InvalidHex);
        match hex.len() {
            3 => {
                let nibble = |i: usize| byte(&hex[i..i + 1]).map(|v| v * 17);
                Ok(Self::from_rgba8([nibble(0)?, nibble(1)?, nibble(2)?, 255]))
            }
            6 => Ok(Self::from_rgba8([
                byte(&hex[0..2])?,
                byte(&hex[2..4])?,
                byte(&hex[4..6])?,
                255,
            ])),
            8 => Ok(Self::from_rgba8([
                byte(&hex[0..2])?,
                byte(&hex[2..4])?,
                byte(&hex[4..6])?,
                byte(&hex[6..8])?,
            ])),
            _ => Err(ColorError::InvalidHex),
        }
    }

    /// Parse a paint value as it appears in a document attribute: a hex
    /// color, `none`/`transparent`, or one of the basic color keywords.
    pub fn parse(value: &str) -> Result<Self, ColorError> {
        let value = value.trim();
        if value.starts_with('#') {
            return Self::from_hex(value);
        }
        match value.to_ascii_lowercase().as_str() {
            "none" | "transparent" => Ok(Color::TRANSPARENT),
            "black" => Ok(Color::BLACK),
            "white" => Ok(Color::WHITE),
            "red" => Ok(Color::RED),
            "lime" => Ok(Color::GREEN),
            "green" => Ok(Color::rgb(0.0, 128.0 / 255.0, 0.0)),
            "blue" => Ok(Color::BLUE),
            "yellow" => Ok(Color::rgb(1.0, 1.0, 0.0)),
            "cyan" | "aqua" => Ok(Color::rgb(0.0, 1.0, 1.0)),
            "magenta" | "fuchsia" => Ok(Color::rgb(1.0, 0.0, 1.0)),
            "gray" | "grey" => Ok(Color::rgb(128.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0)),
            "orange" => Ok(Color::rgb(1.0, 165.0 / 255.0, 0.0)),
            _ => Err(ColorError::UnknownName(value.to_string())),
        }
    }

    /// Convert to RGBA u8 array.
    pub fn to_rgba8(&self) -> [u8; 4] {
        [
            (self.r * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.g * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.b * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.a * 255.0).round().clamp(0.0, 255.0) as u8,
        ]
    }

    /// Linearly interpolate between two colors.
    pub fn lerp(&self, other: &Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        Color {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
            a: self.a + (other.a - self.a) * t,
        }
    }

    /// The same color with its alpha scaled by `factor`.
    pub fn with_alpha_scaled(&self, factor: f32) -> Color {
        Color {
            a: (self.a * factor.clamp(0.0, 1.0)).clamp(0.0, 1.0),
            ..*self
        }
    }

    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    pub const RED: Color = Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const GREEN: Color = Color {
        r: 0.0,
        g: 1.0,
        b: 0.0,
        a: 1.0,
    };
    pub const BLUE: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 1.0,
        a: 1.0,
    };
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.to_rgba8();
        if a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ColorError {
    #[error("invalid hex color string")]
    InvalidHex,
    #[error("unknown color name '{0}'")]
    UnknownName(String),
}
