use serde::{Deserialize, Serialize};

use crate::Color;

/// Pixel format of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGBA (4 bytes per pixel).
    Rgba8,
    /// 8-bit BGRA, the native layout of most window surfaces.
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::Rgba8
    }
}

/// A single frame as a raw, non-premultiplied pixel buffer.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Raw pixel data, rows top to bottom, no padding.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameBuffer {
    /// Create a new frame buffer filled with zeros (transparent black).
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            data: vec![0u8; size],
            width,
            height,
            format,
        }
    }

    /// Create an RGBA frame buffer filled with a solid color.
    pub fn solid(width: u32, height: u32, color: &Color) -> Self {
        let mut fb = Self::new(width, height, PixelFormat::Rgba8);
        fb.fill(color);
        fb
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Overwrite every pixel with `color`.
    pub fn fill(&mut self, color: &Color) {
        let pixel = self.encode(color.to_rgba8());
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&pixel);
        }
    }

    /// Get the RGBA value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ];
        Some(self.decode(px))
    }

    /// Set the RGBA value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = self.encode(rgba);
        self.data[offset..offset + 4].copy_from_slice(&px);
    }

    /// Reallocate for new dimensions, discarding the contents.
    pub fn reallocate(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data
            .resize(self.pixel_count() * self.format.bytes_per_pixel(), 0);
    }

    /// Copy pixels from `src`, converting the channel order if needed.
    /// Both buffers must have the same dimensions.
    pub fn copy_from(&mut self, src: &FrameBuffer) -> bool {
        if self.dimensions() != src.dimensions() {
            return false;
        }
        self.data.copy_from_slice(&src.data);
        if self.format != src.format {
            swap_red_blue(&mut self.data);
        }
        true
    }

    /// A copy of this buffer in `format`.
    pub fn to_format(&self, format: PixelFormat) -> FrameBuffer {
        let mut out = self.clone();
        if out.format != format {
            swap_red_blue(&mut out.data);
            out.format = format;
        }
        out
    }

    fn encode(&self, rgba: [u8; 4]) -> [u8; 4] {
        match self.format {
            PixelFormat::Rgba8 => rgba,
            PixelFormat::Bgra8 => [rgba[2], rgba[1], rgba[0], rgba[3]],
        }
    }

    fn decode(&self, px: [u8; 4]) -> [u8; 4] {
        // The swizzle is its own inverse.
        self.encode(px)
    }
}

/// Source-over blend of a straight-alpha RGBA color into one 4-byte pixel.
/// The caller is responsible for the destination's channel order.
#[inline]
pub fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let sa = src[3] as u32;
    if sa == 0 {
        return;
    }
    if sa == 255 {
        dst.copy_from_slice(&src);
        return;
    }

    let da = dst[3] as u32;
    let inv_sa = 255 - sa;
    let out_a = sa + (da * inv_sa) / 255;
    if out_a == 0 {
        return;
    }
    for c in 0..3 {
        let s = src[c] as u32;
        let d = dst[c] as u32;
        dst[c] = ((s * sa * 255 + d * da * inv_sa) / (out_a * 255)) as u8;
    }
    dst[3] = out_a as u8;
}

fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}
