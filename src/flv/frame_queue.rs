// src/flv/frame_queue.rs - Bounded queue between the muxer and the sender thread
//
// Core features:
// - Fixed capacity, newest frame dropped when full (drop counter kept)
// - Blocking poll with timeout for the sender thread
// - Resizable while running, as long as the backlog still fits
// - drain() hands every pending frame back so allocations can be released

use crate::error::QueueError;
use crate::flv::flv_frame::FlvFrame;
use crate::util::lock;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Default number of frames a queue holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

struct QueueState {
    frames: VecDeque<FlvFrame>,
    capacity: usize,
    dropped_frames: u64,
}

/// Frame queue
///
/// Multi-producer, single-consumer FIFO of muxed tags.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                capacity,
                dropped_frames: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a frame
    ///
    /// # Returns
    /// * `Ok(())` - Frame queued
    /// * `Err(frame)` - Queue full; the frame is handed back and counted as dropped
    #[allow(clippy::result_large_err)]
    pub fn push(&self, frame: FlvFrame) -> Result<(), FlvFrame> {
        let mut state = lock(&self.state);
        if state.frames.len() >= state.capacity {
            state.dropped_frames += 1;
            return Err(frame);
        }
        state.frames.push_back(frame);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Takes the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn poll(&self, timeout: Duration) -> Option<FlvFrame> {
        let state = lock(&self.state);
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.frames.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.frames.pop_front()
    }

    /// Removes every pending frame.
    pub fn drain(&self) -> Vec<FlvFrame> {
        lock(&self.state).frames.drain(..).collect()
    }

    /// Changes the capacity.
    ///
    /// Fails without changing anything when `capacity` is zero or smaller
    /// than the number of frames already queued.
    pub fn resize(&self, capacity: usize) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        Self::check_resize(&state, capacity)?;
        state.capacity = capacity;
        Ok(())
    }

    /// Whether [`resize`](Self::resize) would accept `capacity` right now.
    pub fn can_resize(&self, capacity: usize) -> Result<(), QueueError> {
        Self::check_resize(&lock(&self.state), capacity)
    }

    fn check_resize(state: &QueueState, capacity: usize) -> Result<(), QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if capacity < state.frames.len() {
            return Err(QueueError::BacklogExceedsCapacity {
                requested: capacity,
                backlog: state.frames.len(),
            });
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        lock(&self.state).capacity
    }

    pub fn len(&self) -> usize {
        lock(&self.state).frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames rejected because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        lock(&self.state).dropped_frames
    }

    /// Counts a frame that left the queue but never reached the server.
    pub fn record_dropped(&self) {
        lock(&self.state).dropped_frames += 1;
    }

    pub fn reset_dropped_frames(&self) {
        lock(&self.state).dropped_frames = 0;
    }
}
