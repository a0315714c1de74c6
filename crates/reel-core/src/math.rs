use serde::{Deserialize, Serialize};

/// A 2D size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size2D {
    pub width: f64,
    pub height: f64,
}

impl Size2D {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Compute the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0.0 {
            return 0.0;
        }
        self.width / self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Uniform scale-to-fit placement of content inside an output area.
///
/// Content keeps its aspect ratio and is centered; the bars on either
/// side (or above and below) belong to the output's clear color. Both
/// the GPU and software paths place frames through this one computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Letterbox {
    /// Fit `content` into `output`. Degenerate sizes yield a zero scale,
    /// which paints nothing but the clear color.
    pub fn fit(content: Size2D, output: Size2D) -> Self {
        if content.is_empty() || output.is_empty() {
            return Self {
                scale: 0.0,
                offset_x: 0.0,
                offset_y: 0.0,
            };
        }
        let scale = (output.width / content.width).min(output.height / content.height);
        Self {
            scale,
            offset_x: (output.width - content.width * scale) / 2.0,
            offset_y: (output.height - content.height * scale) / 2.0,
        }
    }

    /// Map a point in output pixels back to content coordinates.
    pub fn to_content(&self, x: f64, y: f64) -> (f64, f64) {
        if self.scale == 0.0 {
            return (f64::NAN, f64::NAN);
        }
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_aspect_ratio() {
        let s = Size2D::new(1920.0, 1080.0);
        assert!((s.aspect_ratio() - 16.0 / 9.0).abs() < 0.01);
    }

    #[test]
    fn test_letterbox_pillarbox() {
        // 4:3 content in a 16:9 output: bars on the left and right.
        let lb = Letterbox::fit(Size2D::new(400.0, 300.0), Size2D::new(1600.0, 900.0));
        assert!((lb.scale - 3.0).abs() < 1e-9);
        assert!((lb.offset_x - 200.0).abs() < 1e-9);
        assert!(lb.offset_y.abs() < 1e-9);
    }

    #[test]
    fn test_letterbox_bars_top_bottom() {
        let lb = Letterbox::fit(Size2D::new(200.0, 100.0), Size2D::new(100.0, 100.0));
        assert!((lb.scale - 0.5).abs() < 1e-9);
        assert!(lb.offset_x.abs() < 1e-9);
        assert!((lb.offset_y - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_letterbox_round_trip_point() {
        let lb = Letterbox::fit(Size2D::new(100.0, 100.0), Size2D::new(300.0, 200.0));
        let (cx, cy) = lb.to_content(150.0, 100.0);
        assert!((cx - 50.0).abs() < 1e-9);
        assert!((cy - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_letterbox_degenerate() {
        let lb = Letterbox::fit(Size2D::new(0.0, 100.0), Size2D::new(300.0, 200.0));
        assert_eq!(lb.scale, 0.0);
        assert!(lb.to_content(1.0, 1.0).0.is_nan());
    }
}
