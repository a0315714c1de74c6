//! # reel-render
//!
//! The Reel playback pipeline. A render worker rasterizes timeline samples
//! into a small pool of frame slots; the presentation thread moves ready
//! frames onto a GPU surface, or onto a software frame sink when the GPU
//! path is unavailable or keeps failing.

pub mod backend;
pub mod failover;
pub mod gpu;
pub mod lifecycle;
pub mod player;
pub mod pool;
pub mod presenter;
pub mod raster;
pub mod software;
pub mod stats;
pub mod worker;

pub use backend::{
    BackendFactory, BackendKind, DefaultBackends, FrameSink, MemorySink, OutputTarget,
    PresentBackend,
};
pub use failover::BackendState;
pub use gpu::GpuBackend;
pub use player::{Player, PlayerEvent, PlayerHandle};
pub use pool::{FramePool, SlotState};
pub use presenter::CycleOutcome;
pub use raster::FrameRenderer;
pub use software::SoftwareBackend;
pub use stats::PlaybackStats;
