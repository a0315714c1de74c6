//! The frame slot pool shared by the render worker and the presenter.
//!
//! Each slot cycles `Free → Rendering → ReadyToPresent → Presenting → Free`.
//! A slot handed out by the pool is moved out by value, so while the worker
//! owns a `Rendering` slot nothing else can touch its pixels; handing it
//! back through [`FramePool::release`] is the only way to change its state.
//!
//! A resize bumps the pool epoch. Slots at home are reallocated on the
//! spot; slots that are out on loan are stale and come back as `Free` with
//! fresh storage when released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::{Condvar, Mutex};
use reel_core::{Duration, FrameBuffer, PixelFormat, ReelError, ReelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Free,
    Rendering,
    ReadyToPresent,
    Presenting,
}

/// Returned when no slot is free within the allowed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all frame slots are in use")]
pub struct Busy;

/// What happened to a slot handed back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The requested state was applied.
    Accepted,
    /// The slot predates the current epoch and was reset to `Free`.
    Stale,
}

/// A slot on loan from the pool.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    epoch: u64,
    sequence: u64,
    state: SlotState,
    /// Timeline time this frame shows.
    pub elapsed: Duration,
    /// Timeline revision the frame was rendered for.
    pub revision: u64,
    pub buffer: FrameBuffer,
}

impl FrameSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

#[derive(Debug)]
struct SlotRecord {
    state: SlotState,
    /// `None` while the slot is on loan.
    storage: Option<FrameBuffer>,
    sequence: u64,
    elapsed: Duration,
    revision: u64,
}

#[derive(Debug)]
struct PoolInner {
    slots: Vec<SlotRecord>,
    width: u32,
    height: u32,
    format: PixelFormat,
    next_sequence: u64,
    closed: bool,
}

/// Fixed-size pool of frame slots (1 to 3).
#[derive(Debug)]
pub struct FramePool {
    inner: Mutex<PoolInner>,
    freed: Condvar,
    epoch: Arc<AtomicU64>,
}

impl FramePool {
    pub fn new(slot_count: usize, width: u32, height: u32, format: PixelFormat) -> Self {
        let slot_count = slot_count.clamp(1, 3);
        let slots = (0..slot_count)
            .map(|_| SlotRecord {
                state: SlotState::Free,
                storage: Some(FrameBuffer::new(width, height, format)),
                sequence: 0,
                elapsed: Duration::zero(),
                revision: 0,
            })
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                slots,
                width,
                height,
                format,
                next_sequence: 1,
                closed: false,
            }),
            freed: Condvar::new(),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.width, inner.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.lock().format
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Shared view of the epoch, for cancelling work without taking the lock.
    pub fn epoch_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.epoch)
    }

    /// Whether `slot` belongs to the current epoch.
    pub fn is_current(&self, slot: &FrameSlot) -> bool {
        slot.epoch == self.epoch()
    }

    /// Take a free slot without waiting.
    pub fn try_acquire_free(&self) -> Result<FrameSlot, Busy> {
        let mut inner = self.inner.lock();
        self.take_free(&mut inner).ok_or(Busy)
    }

    /// Take a free slot, waiting up to `wait` for one to come back.
    pub fn acquire_free(&self, wait: StdDuration) -> Result<FrameSlot, Busy> {
        let mut inner = self.inner.lock();
        if let Some(slot) = self.take_free(&mut inner) {
            return Ok(slot);
        }
        if inner.closed || wait.is_zero() {
            return Err(Busy);
        }
        self.freed.wait_for(&mut inner, wait);
        self.take_free(&mut inner).ok_or(Busy)
    }

    fn take_free(&self, inner: &mut PoolInner) -> Option<FrameSlot> {
        if inner.closed {
            return None;
        }
        let epoch = self.epoch();
        let (index, record) = inner
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, r)| r.state == SlotState::Free && r.storage.is_some())?;
        let buffer = record.storage.take()?;
        record.state = SlotState::Rendering;
        Some(FrameSlot {
            index,
            epoch,
            sequence: 0,
            state: SlotState::Rendering,
            elapsed: Duration::zero(),
            revision: 0,
            buffer,
        })
    }

    /// Take the oldest ready frame for presentation.
    ///
    /// Returns `None` when nothing is ready, or when a slot is already
    /// presenting: at most one slot is ever in `Presenting`.
    pub fn acquire_ready(&self) -> Option<FrameSlot> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        if inner.slots.iter().any(|r| r.state == SlotState::Presenting) {
            tracing::debug!("acquire_ready while a frame is still presenting");
            return None;
        }
        let epoch = self.epoch();
        let (index, record) = inner
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, r)| r.state == SlotState::ReadyToPresent && r.storage.is_some())
            .min_by_key(|(_, r)| r.sequence)?;
        let buffer = record.storage.take()?;
        record.state = SlotState::Presenting;
        Some(FrameSlot {
            index,
            epoch,
            sequence: record.sequence,
            state: SlotState::Presenting,
            elapsed: record.elapsed,
            revision: record.revision,
            buffer,
        })
    }

    /// Hand a slot back, moving it to `to`.
    ///
    /// Allowed moves are `Rendering → ReadyToPresent | Free` and
    /// `Presenting → Free | ReadyToPresent` (the latter requeues a frame
    /// that could not be shown, keeping its place in line). Any other move
    /// is rejected with [`ReelError::InvalidTransition`]; the slot still
    /// goes home as `Free` so it is never lost.
    pub fn release(&self, slot: FrameSlot, to: SlotState) -> ReelResult<Release> {
        let mut inner = self.inner.lock();
        let epoch = self.epoch();
        let (width, height) = (inner.width, inner.height);
        let index = slot.index;
        let from = slot.state;

        let valid = matches!(
            (from, to),
            (SlotState::Rendering, SlotState::ReadyToPresent)
                | (SlotState::Rendering, SlotState::Free)
                | (SlotState::Presenting, SlotState::Free)
                | (SlotState::Presenting, SlotState::ReadyToPresent)
        );

        let sequence = match (from, to) {
            (SlotState::Rendering, SlotState::ReadyToPresent) => {
                let seq = inner.next_sequence;
                inner.next_sequence += 1;
                seq
            }
            _ => slot.sequence,
        };

        let Some(record) = inner.slots.get_mut(index) else {
            return Err(ReelError::InvalidArgument(format!(
                "slot {} does not belong to this pool",
                index
            )));
        };

        let mut buffer = slot.buffer;
        let stale = slot.epoch != epoch;
        if stale || buffer.dimensions() != (width, height) {
            buffer.reallocate(width, height);
        }
        record.storage = Some(buffer);
        record.elapsed = slot.elapsed;
        record.revision = slot.revision;
        record.sequence = sequence;

        let outcome = if !valid {
            record.state = SlotState::Free;
            Err(ReelError::invalid_transition(from, to))
        } else if stale {
            record.state = SlotState::Free;
            Ok(Release::Stale)
        } else {
            record.state = to;
            Ok(Release::Accepted)
        };

        if record.state == SlotState::Free {
            self.freed.notify_one();
        }
        outcome
    }

    /// Reallocate every slot for new output dimensions.
    ///
    /// Returns the number of ready frames that were dropped.
    pub fn resize(&self, width: u32, height: u32) -> usize {
        let mut inner = self.inner.lock();
        inner.width = width;
        inner.height = height;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let dropped = Self::reset_home_slots(&mut inner, true);
        self.freed.notify_all();
        tracing::debug!(width, height, dropped, "frame pool resized");
        dropped
    }

    /// Drop all ready frames and start a new epoch without changing size,
    /// e.g. after a seek or a new document.
    pub fn invalidate(&self) -> usize {
        let mut inner = self.inner.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let dropped = Self::reset_home_slots(&mut inner, false);
        self.freed.notify_all();
        dropped
    }

    fn reset_home_slots(inner: &mut PoolInner, reallocate: bool) -> usize {
        let (width, height) = (inner.width, inner.height);
        let mut dropped = 0;
        for record in inner.slots.iter_mut() {
            let Some(storage) = record.storage.as_mut() else {
                continue;
            };
            if record.state == SlotState::ReadyToPresent {
                dropped += 1;
            }
            record.state = SlotState::Free;
            if reallocate {
                storage.reallocate(width, height);
            }
        }
        dropped
    }

    /// Wake any waiter and refuse further acquisitions.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.freed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Current state of every slot, in slot order.
    pub fn snapshot(&self) -> Vec<SlotState> {
        self.inner.lock().slots.iter().map(|r| r.state).collect()
    }

    pub fn count(&self, state: SlotState) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|r| r.state == state)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> FramePool {
        FramePool::new(n, 4, 3, PixelFormat::Rgba8)
    }

    #[test]
    fn test_slot_lifecycle() {
        let pool = pool(2);
        let slot = pool.try_acquire_free().unwrap();
        assert_eq!(slot.state(), SlotState::Rendering);
        assert_eq!(pool.release(slot, SlotState::ReadyToPresent).unwrap(), Release::Accepted);

        let shown = pool.acquire_ready().unwrap();
        assert_eq!(shown.state(), SlotState::Presenting);
        assert_eq!(
            pool.snapshot(),
            vec![SlotState::Presenting, SlotState::Free]
        );
        pool.release(shown, SlotState::Free).unwrap();
        assert_eq!(pool.count(SlotState::Free), 2);
    }

    #[test]
    fn test_busy_when_exhausted() {
        let pool = pool(1);
        let _held = pool.try_acquire_free().unwrap();
        assert_eq!(pool.try_acquire_free().unwrap_err(), Busy);
        assert!(pool
            .acquire_free(StdDuration::from_millis(5))
            .is_err());
    }

    #[test]
    fn test_ready_frames_come_out_oldest_first() {
        let pool = pool(3);
        for revision in 1..=3 {
            let mut slot = pool.try_acquire_free().unwrap();
            slot.revision = revision;
            pool.release(slot, SlotState::ReadyToPresent).unwrap();
        }
        let first = pool.acquire_ready().unwrap();
        assert_eq!(first.revision, 1);
        // Requeued frames keep their place.
        pool.release(first, SlotState::ReadyToPresent).unwrap();
        let again = pool.acquire_ready().unwrap();
        assert_eq!(again.revision, 1);
        pool.release(again, SlotState::Free).unwrap();
        assert_eq!(pool.acquire_ready().unwrap().revision, 2);
    }

    #[test]
    fn test_single_presenting_slot() {
        let pool = pool(2);
        for _ in 0..2 {
            let slot = pool.try_acquire_free().unwrap();
            pool.release(slot, SlotState::ReadyToPresent).unwrap();
        }
        let _shown = pool.acquire_ready().unwrap();
        assert!(pool.acquire_ready().is_none());
        assert_eq!(pool.count(SlotState::Presenting), 1);
    }

    #[test]
    fn test_invalid_transition_returns_slot_home() {
        let pool = pool(1);
        let slot = pool.try_acquire_free().unwrap();
        let err = pool.release(slot, SlotState::Presenting).unwrap_err();
        assert!(matches!(err, ReelError::InvalidTransition { .. }));
        assert_eq!(pool.snapshot(), vec![SlotState::Free]);
    }

    #[test]
    fn test_resize_reallocates_and_invalidates_loans() {
        let pool = pool(2);
        let ready = pool.try_acquire_free().unwrap();
        pool.release(ready, SlotState::ReadyToPresent).unwrap();
        let in_flight = pool.try_acquire_free().unwrap();

        assert_eq!(pool.resize(8, 6), 1);
        assert!(!pool.is_current(&in_flight));
        assert_eq!(pool.dimensions(), (8, 6));
        assert!(pool.acquire_ready().is_none());

        assert_eq!(
            pool.release(in_flight, SlotState::ReadyToPresent).unwrap(),
            Release::Stale
        );
        assert_eq!(pool.count(SlotState::Free), 2);
        let fresh = pool.try_acquire_free().unwrap();
        assert_eq!(fresh.buffer.dimensions(), (8, 6));
        assert!(pool.is_current(&fresh));
    }

    #[test]
    fn test_wait_wakes_on_release() {
        let pool = Arc::new(pool(1));
        let held = pool.try_acquire_free().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire_free(StdDuration::from_secs(5)).is_ok())
        };
        std::thread::sleep(StdDuration::from_millis(20));
        pool.release(held, SlotState::Free).unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_close_refuses_acquisitions() {
        let pool = pool(2);
        pool.close();
        assert!(pool.try_acquire_free().is_err());
        assert!(pool.acquire_ready().is_none());
    }
}
