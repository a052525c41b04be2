use std::fmt;
use std::time::{Duration, Instant};

use crate::pool::PoolTag;

/// Frame count and latency of one mode over its activation window.
#[derive(Debug, Clone)]
pub struct ModeMetrics {
    frames: u64,
    latency_sum: Duration,
    window_start: Instant,
    window_end: Option<Instant>,
}

impl ModeMetrics {
    pub fn new(window_start: Instant) -> Self {
        Self {
            frames: 0,
            latency_sum: Duration::ZERO,
            window_start,
            window_end: None,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.frames += 1;
        self.latency_sum += latency;
    }

    /// Closes the window when the mode is deactivated.
    pub fn finish(&mut self, now: Instant) {
        self.window_end = Some(now);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn window_end(&self) -> Option<Instant> {
        self.window_end
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.window_end
            .unwrap_or(now)
            .saturating_duration_since(self.window_start)
    }

    pub fn fps(&self, now: Instant) -> f64 {
        let secs = self.elapsed(now).as_secs_f64();
        if self.frames == 0 || secs <= 0.0 {
            return 0.0;
        }
        self.frames as f64 / secs
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.frames == 0 {
            return None;
        }
        Some(self.latency_sum.as_secs_f64() * 1e3 / self.frames as f64)
    }

    pub fn report(&self, pool: PoolTag, now: Instant) -> Option<ModeReport> {
        let latency_ms = self.mean_latency_ms()?;
        Some(ModeReport {
            pool,
            frames: self.frames,
            fps: self.fps(now),
            latency_ms,
        })
    }
}

/// Metrics windows of both modes.
#[derive(Debug, Clone)]
pub struct MetricsBook {
    primary: ModeMetrics,
    secondary: ModeMetrics,
}

impl MetricsBook {
    pub fn new(now: Instant) -> Self {
        Self {
            primary: ModeMetrics::new(now),
            secondary: ModeMetrics::new(now),
        }
    }

    pub fn mode(&self, tag: PoolTag) -> &ModeMetrics {
        match tag {
            PoolTag::Primary => &self.primary,
            PoolTag::Secondary => &self.secondary,
        }
    }

    pub fn mode_mut(&mut self, tag: PoolTag) -> &mut ModeMetrics {
        match tag {
            PoolTag::Primary => &mut self.primary,
            PoolTag::Secondary => &mut self.secondary,
        }
    }

    /// Opens a fresh window for a mode that just became active.
    pub fn reset(&mut self, tag: PoolTag, now: Instant) {
        *self.mode_mut(tag) = ModeMetrics::new(now);
    }

    /// One report per mode that rendered at least one frame.
    pub fn reports(&self, now: Instant) -> Vec<ModeReport> {
        [PoolTag::Primary, PoolTag::Secondary]
            .into_iter()
            .filter_map(|tag| self.mode(tag).report(tag, now))
            .collect()
    }
}

/// Interval between the two most recent completions, independent of
/// dispatch order.
#[derive(Debug, Clone)]
pub struct WallclockMeter {
    last: Instant,
    interval: Duration,
}

impl WallclockMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            last: now,
            interval: Duration::ZERO,
        }
    }

    /// Completions reported out of order leave the interval alone.
    pub fn tick(&mut self, at: Instant) {
        if at <= self.last {
            return;
        }
        self.interval = at - self.last;
        self.last = at;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeReport {
    pub pool: PoolTag,
    pub frames: u64,
    pub fps: f64,
    pub latency_ms: f64,
}

impl fmt::Display for ModeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mode: {} frames, FPS: {:.1}, Latency: {:.1} ms",
            self.pool.mode_name(),
            self.frames,
            self.fps,
            self.latency_ms
        )
    }
}

/// Figures drawn over each rendered frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMetrics {
    pub mode: PoolTag,
    pub wallclock: Duration,
    pub fps: f64,
    pub latency_ms: f64,
    /// Capture plus render time of the previous cycle.
    pub host_time: Duration,
}

impl fmt::Display for OverlayMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wallclock_ms = self.wallclock.as_secs_f64() * 1e3;
        let wallclock_fps = if wallclock_ms > 0.0 {
            1000.0 / wallclock_ms
        } else {
            0.0
        };
        write!(
            f,
            "Wallclock time ({}): {:.2} ms ({:.2} fps) | FPS: {:.2} | Latency: {:.2} ms | cap/render time: {:.2} ms",
            self.mode.mode_name(),
            wallclock_ms,
            wallclock_fps,
            self.fps,
            self.latency_ms,
            self.host_time.as_secs_f64() * 1e3
        )
    }
}
