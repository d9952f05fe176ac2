// SPDX-License-Identifier: GPL-3.0-only

//! Per-processor timing statistics
//!
//! Each processor times its `process` calls and periodically logs the
//! running average, so slow backends show up in the logs without a profiler.

use crate::constants::PERF_LOG_INTERVAL;
use std::time::{Duration, Instant};
use tracing::info;

/// Accumulates `process` durations and logs an average every N frames
#[derive(Debug)]
pub struct PerfTimer {
    label: &'static str,
    started: Option<Instant>,
    accumulated: Duration,
    frames: u32,
    interval: u32,
}

impl PerfTimer {
    /// Create a timer that logs under `label`
    pub fn new(label: &'static str) -> Self {
        Self::with_interval(label, PERF_LOG_INTERVAL)
    }

    /// Create a timer with a custom log interval (in frames)
    pub fn with_interval(label: &'static str, interval: u32) -> Self {
        Self {
            label,
            started: None,
            accumulated: Duration::ZERO,
            frames: 0,
            interval: interval.max(1),
        }
    }

    /// Mark the start of one `process` call
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Mark the end of one `process` call
    ///
    /// Returns the average duration when a log line was emitted.
    pub fn stop(&mut self) -> Option<Duration> {
        let started = self.started.take()?;
        self.accumulated += started.elapsed();
        self.frames += 1;

        if self.frames < self.interval {
            return None;
        }

        let average = self.accumulated / self.frames;
        info!(
            processor = self.label,
            frames = self.frames,
            avg_ms = format!("{:.3}", average.as_secs_f64() * 1000.0),
            "Packet processing time"
        );
        self.accumulated = Duration::ZERO;
        self.frames = 0;
        Some(average)
    }
}
