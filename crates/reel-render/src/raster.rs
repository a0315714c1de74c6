//! CPU rasterization of a document at one instant.
//!
//! The renderer flattens the element tree into a draw list in output
//! pixel space (groups, `use` references, inherited opacity and
//! visibility all resolved), then fills each shape into the frame with
//! rows split across the rayon pool. Every frame is letterboxed: the
//! document keeps its aspect ratio and the bars get the clear color.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use reel_core::frame::blend_over;
use reel_core::{Color, FrameBuffer, Letterbox, PixelFormat, Size2D};
use reel_ir::{AnimationDocument, AttributeOverrides, AttributeValue, Element, ElementKind};

/// Deepest chain of `use` references that is followed.
pub const MAX_USE_DEPTH: usize = 16;

/// Raised when a render is abandoned because its slot went stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("render cancelled")]
pub struct Cancelled;

/// Cheap, cloneable check for "has the pool moved on since this render
/// started".
#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: Option<Arc<AtomicU64>>,
    expected: u64,
}

impl CancelToken {
    pub fn new(epoch: Arc<AtomicU64>, expected: u64) -> Self {
        Self {
            epoch: Some(epoch),
            expected,
        }
    }

    /// A token that never cancels.
    pub fn never() -> Self {
        Self {
            epoch: None,
            expected: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.epoch
            .as_ref()
            .is_some_and(|e| e.load(Ordering::Acquire) != self.expected)
    }

    fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Rect { x0: f64, y0: f64, x1: f64, y1: f64 },
    Ellipse { cx: f64, cy: f64, rx: f64, ry: f64 },
}

impl Shape {
    /// Row range `[first, last)` the shape can touch.
    fn rows(&self, height: u32) -> (usize, usize) {
        let (top, bottom) = match *self {
            Shape::Rect { y0, y1, .. } => (y0, y1),
            Shape::Ellipse { cy, ry, .. } => (cy - ry, cy + ry),
        };
        let first = top.floor().max(0.0) as usize;
        let last = (bottom.ceil().max(0.0) as usize).min(height as usize);
        (first, last)
    }

    /// Horizontal span `[x0, x1)` covered on the row whose center is `py`.
    fn span(&self, py: f64, width: u32) -> Option<(usize, usize)> {
        let (left, right) = match *self {
            Shape::Rect { x0, y0, x1, y1 } => {
                if py < y0 || py >= y1 {
                    return None;
                }
                (x0, x1)
            }
            Shape::Ellipse { cx, cy, rx, ry } => {
                if rx <= 0.0 || ry <= 0.0 {
                    return None;
                }
                let dy = (py - cy) / ry;
                let k = 1.0 - dy * dy;
                if k < 0.0 {
                    return None;
                }
                let half = rx * k.sqrt();
                (cx - half, cx + half)
            }
        };
        // A pixel is covered when its center is inside the span.
        let first = (left - 0.5).ceil().max(0.0);
        let last = ((right - 0.5).ceil().max(0.0) as usize).min(width as usize);
        let first = first as usize;
        (first < last).then_some((first, last))
    }
}

#[derive(Debug, Clone, Copy)]
struct DrawOp {
    shape: Shape,
    /// Straight-alpha color in the frame's channel order.
    pixel: [u8; 4],
}

#[derive(Debug, Clone, Copy)]
struct Inherited {
    dx: f64,
    dy: f64,
    opacity: f64,
    visible: bool,
}

struct Scene<'a> {
    document: &'a AnimationDocument,
    overrides: &'a AttributeOverrides,
    letterbox: Letterbox,
    format: PixelFormat,
    ops: Vec<DrawOp>,
}

impl<'a> Scene<'a> {
    fn value(&self, element: &'a Element, name: &str) -> Option<&'a AttributeValue> {
        element
            .id
            .as_deref()
            .and_then(|id| self.overrides.get(id, name))
            .or_else(|| element.attribute(name))
    }

    fn number(&self, element: &'a Element, name: &str) -> f64 {
        self.value(element, name)
            .and_then(|v| match v {
                AttributeValue::Number(n) => Some(*n),
                AttributeValue::Text(t) => t.trim().trim_end_matches("px").parse().ok(),
                AttributeValue::Color(_) => None,
            })
            .filter(|n| n.is_finite())
            .unwrap_or_else(|| {
                AttributeValue::default_for(name)
                    .as_number()
                    .unwrap_or(0.0)
            })
    }

    fn text(&self, element: &'a Element, name: &str) -> Option<&'a str> {
        self.value(element, name).and_then(AttributeValue::as_text)
    }

    fn color(&self, element: &'a Element, name: &str) -> Color {
        match self.value(element, name) {
            Some(AttributeValue::Color(c)) => *c,
            Some(AttributeValue::Text(t)) => Color::parse(t).unwrap_or(Color::TRANSPARENT),
            _ => AttributeValue::default_for(name)
                .as_color()
                .unwrap_or(Color::TRANSPARENT),
        }
    }

    fn walk(&mut self, element: &'a Element, inherited: Inherited, depth: usize) -> Result<(), Cancelled> {
        if self.text(element, "display") == Some("none") {
            return Ok(());
        }
        let visible = match self.text(element, "visibility") {
            Some("hidden") | Some("collapse") => false,
            Some("visible") => true,
            _ => inherited.visible,
        };
        let opacity = inherited.opacity * self.number(element, "opacity").clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return Ok(());
        }
        let ctx = Inherited {
            opacity,
            visible,
            ..inherited
        };

        match &element.kind {
            ElementKind::Rect => {
                let x = self.number(element, "x") + ctx.dx;
                let y = self.number(element, "y") + ctx.dy;
                let w = self.number(element, "width");
                let h = self.number(element, "height");
                if visible && w > 0.0 && h > 0.0 {
                    let (x0, y0) = self.to_output(x, y);
                    let (x1, y1) = self.to_output(x + w, y + h);
                    self.push(element, Shape::Rect { x0, y0, x1, y1 }, opacity);
                }
            }
            ElementKind::Ellipse => {
                let radius = self.number(element, "r");
                let mut rx = self.number(element, "rx");
                let mut ry = self.number(element, "ry");
                if rx <= 0.0 {
                    rx = radius;
                }
                if ry <= 0.0 {
                    ry = radius;
                }
                let cx = self.number(element, "cx") + ctx.dx;
                let cy = self.number(element, "cy") + ctx.dy;
                if visible && rx > 0.0 && ry > 0.0 {
                    let (ox, oy) = self.to_output(cx, cy);
                    let scale = self.letterbox.scale;
                    self.push(
                        element,
                        Shape::Ellipse {
                            cx: ox,
                            cy: oy,
                            rx: rx * scale,
                            ry: ry * scale,
                        },
                        opacity,
                    );
                }
            }
            ElementKind::Group { children } => {
                for child in children {
                    self.walk(child, ctx, depth)?;
                }
            }
            ElementKind::Use => {
                if depth >= MAX_USE_DEPTH {
                    tracing::warn!(depth, "use reference chain too deep, skipping");
                    return Ok(());
                }
                let href = self
                    .text(element, "xlink:href")
                    .or_else(|| self.text(element, "href"))
                    .map(|h| h.trim_start_matches('#'));
                let Some(target) = href.and_then(|id| self.document.find(id)) else {
                    tracing::debug!(href = ?href, "use reference does not resolve");
                    return Ok(());
                };
                let shifted = Inherited {
                    dx: ctx.dx + self.number(element, "x"),
                    dy: ctx.dy + self.number(element, "y"),
                    ..ctx
                };
                self.walk(target, shifted, depth + 1)?;
            }
        }
        Ok(())
    }

    fn to_output(&self, x: f64, y: f64) -> (f64, f64) {
        let lb = &self.letterbox;
        (lb.offset_x + x * lb.scale, lb.offset_y + y * lb.scale)
    }

    fn push(&mut self, element: &'a Element, shape: Shape, opacity: f64) {
        let fill_opacity = self.number(element, "fill-opacity").clamp(0.0, 1.0);
        let fill = self
            .color(element, "fill")
            .with_alpha_scaled((opacity * fill_opacity) as f32);
        if fill.a <= 0.0 {
            return;
        }
        self.ops.push(DrawOp {
            shape,
            pixel: encode(fill.to_rgba8(), self.format),
        });
    }
}

fn encode(rgba: [u8; 4], format: PixelFormat) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8 => rgba,
        PixelFormat::Bgra8 => [rgba[2], rgba[1], rgba[0], rgba[3]],
    }
}

/// Draws documents into frame buffers.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    clear: Color,
}

impl FrameRenderer {
    /// `clear` paints the letterbox bars.
    pub fn new(clear: Color) -> Self {
        Self { clear }
    }

    pub fn clear_color(&self) -> Color {
        self.clear
    }

    /// Render `document` with `overrides` applied into `target`, which is
    /// fully overwritten. Cancellation is checked between elements.
    pub fn render(
        &self,
        document: &AnimationDocument,
        overrides: &AttributeOverrides,
        target: &mut FrameBuffer,
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        cancel.check()?;
        target.fill(&self.clear);

        let output = Size2D::new(target.width as f64, target.height as f64);
        let letterbox = Letterbox::fit(document.size(), output);
        if letterbox.scale <= 0.0 {
            return Ok(());
        }

        let mut scene = Scene {
            document,
            overrides,
            letterbox,
            format: target.format,
            ops: Vec::new(),
        };

        if let Some(background) = document.background_color() {
            let (x1, y1) = scene.to_output(document.width, document.height);
            scene.ops.push(DrawOp {
                shape: Shape::Rect {
                    x0: letterbox.offset_x,
                    y0: letterbox.offset_y,
                    x1,
                    y1,
                },
                pixel: encode(background.to_rgba8(), target.format),
            });
        }

        let root = Inherited {
            dx: 0.0,
            dy: 0.0,
            opacity: 1.0,
            visible: true,
        };
        for element in &document.content {
            cancel.check()?;
            scene.walk(element, root, 0)?;
        }

        for op in &scene.ops {
            cancel.check()?;
            fill_shape(target, op);
        }
        Ok(())
    }

    /// Render into a new buffer of the given size.
    pub fn render_to_buffer(
        &self,
        document: &AnimationDocument,
        overrides: &AttributeOverrides,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height, format);
        // A token that never fires cannot cancel.
        let _ = self.render(document, overrides, &mut frame, &CancelToken::never());
        frame
    }
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new(Color::BLACK)
    }
}

fn fill_shape(target: &mut FrameBuffer, op: &DrawOp) {
    let (first, last) = op.shape.rows(target.height);
    if first >= last {
        return;
    }
    let width = target.width;
    let stride = target.stride();
    let pixel = op.pixel;
    let shape = op.shape;
    target.data[first * stride..last * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(i, row)| {
            let py = (first + i) as f64 + 0.5;
            if let Some((x0, x1)) = shape.span(py, width) {
                for px in row[x0 * 4..x1 * 4].chunks_exact_mut(4) {
                    blend_over(px, pixel);
                }
            }
        });
}
