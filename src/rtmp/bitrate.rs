// src/rtmp/bitrate.rs - Outgoing bitrate measurement

use crate::rtmp::connect_checker::ConnectChecker;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Accumulates sent bits and reports a rate once per interval.
pub struct BitrateManager {
    checker: Arc<dyn ConnectChecker>,
    bits: u64,
    window_start: Instant,
}

impl BitrateManager {
    pub fn new(checker: Arc<dyn ConnectChecker>) -> Self {
        Self {
            checker,
            bits: 0,
            window_start: Instant::now(),
        }
    }

    /// Adds `size` bytes to the current window.
    pub fn calculation_bitrate(&mut self, size: usize) {
        self.calculation_bitrate_at(size, Instant::now());
    }

    fn calculation_bitrate_at(&mut self, size: usize, now: Instant) {
        self.bits += size as u64 * 8;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= REPORT_INTERVAL {
            let rate = (self.bits as f64 / elapsed.as_secs_f64()) as u64;
            self.checker.on_new_bitrate(rate);
            self.bits = 0;
            self.window_start = now;
        }
    }

    pub fn reset(&mut self) {
        self.bits = 0;
        self.window_start = Instant::now();
    }
}
