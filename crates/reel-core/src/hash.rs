//! Content hashing for frame comparison.
//!
//! Screenshots and conformance tests compare frames by SHA-256 digest
//! instead of shipping reference images.

use sha2::{Digest, Sha256};

use crate::frame::FrameBuffer;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash a frame's dimensions and RGBA pixels.
///
/// The pixels are hashed in RGBA order regardless of storage format, so a
/// frame read back from a BGRA surface hashes the same as its RGBA source.
pub fn hash_frame(frame: &FrameBuffer) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(frame.width.to_le_bytes());
    hasher.update(frame.height.to_le_bytes());
    match frame.format {
        crate::PixelFormat::Rgba8 => hasher.update(&frame.data),
        crate::PixelFormat::Bgra8 => {
            hasher.update(&frame.to_format(crate::PixelFormat::Rgba8).data)
        }
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    ContentHash::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Color, PixelFormat};

    #[test]
    fn test_hash_deterministic() {
        let frame1 = FrameBuffer::solid(10, 10, &Color::RED);
        let frame2 = FrameBuffer::solid(10, 10, &Color::RED);
        assert_eq!(hash_frame(&frame1), hash_frame(&frame2));
    }

    #[test]
    fn test_hash_different_content() {
        let frame1 = FrameBuffer::solid(10, 10, &Color::RED);
        let frame2 = FrameBuffer::solid(10, 10, &Color::BLUE);
        assert_ne!(hash_frame(&frame1), hash_frame(&frame2));
    }

    #[test]
    fn test_hash_different_size() {
        let frame1 = FrameBuffer::solid(10, 10, &Color::RED);
        let frame2 = FrameBuffer::solid(20, 5, &Color::RED);
        assert_ne!(hash_frame(&frame1), hash_frame(&frame2));
    }

    #[test]
    fn test_hash_ignores_channel_order() {
        let rgba = FrameBuffer::solid(3, 3, &Color::RED);
        let bgra = rgba.to_format(PixelFormat::Bgra8);
        assert_eq!(hash_frame(&rgba), hash_frame(&bgra));
    }

    #[test]
    fn test_hash_hex_format() {
        let hash = hash_frame(&FrameBuffer::solid(2, 2, &Color::BLACK));
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.short(), hex[..12]);
        assert_eq!(format!("{}", hash), hex);
    }
}
