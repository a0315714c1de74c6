//! # reel-core
//!
//! Core types and primitives for the Reel animation player.
//! This crate contains foundational types shared across all Reel crates:
//! frame buffers, colors, letterbox geometry, durations, clocks, player
//! configuration, and error types.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod hash;
pub mod math;
pub mod time;

pub use config::*;

pub use color::Color;
pub use error::{ReelError, ReelResult};
pub use frame::{FrameBuffer, PixelFormat};
pub use math::{Letterbox, Size2D};
pub use time::{Clock, Duration, ManualClock, SystemClock, Timestamp};
