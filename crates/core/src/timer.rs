//! Frame timing.

use std::time::{Duration, Instant};

/// Measures frame deltas and reports the frame rate about once per interval.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    frame_count: u64,
    report_interval: Duration,
    report_start: Instant,
    frames_since_report: u32,
}

impl FrameTimer {
    /// Create a new timer, starting from now, reporting once per second.
    pub fn new() -> Self {
        Self::starting_at(Instant::now(), Duration::from_secs(1))
    }

    pub fn starting_at(now: Instant, report_interval: Duration) -> Self {
        Self {
            start: now,
            last_tick: now,
            frame_count: 0,
            report_interval,
            report_start: now,
            frames_since_report: 0,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Number of ticks so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Marks the end of a frame and returns the time since the previous one
    /// in seconds.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f32 {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.frame_count += 1;
        self.frames_since_report += 1;
        delta.as_secs_f32()
    }

    /// Returns the average frame rate once a full interval has passed since
    /// the previous report.
    pub fn fps_report(&mut self) -> Option<f32> {
        self.fps_report_at(Instant::now())
    }

    pub fn fps_report_at(&mut self, now: Instant) -> Option<f32> {
        let window = now.saturating_duration_since(self.report_start);
        if window < self.report_interval || window.is_zero() {
            return None;
        }
        let fps = self.frames_since_report as f32 / window.as_secs_f32();
        self.report_start = now;
        self.frames_since_report = 0;
        Some(fps)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_measures_delta() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start, Duration::from_secs(1));

        let dt = timer.tick_at(start + Duration::from_millis(16));
        assert!((dt - 0.016).abs() < 1e-6);
        let dt = timer.tick_at(start + Duration::from_millis(48));
        assert!((dt - 0.032).abs() < 1e-6);
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_fps_report_once_per_interval() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start, Duration::from_secs(1));

        for i in 1..=30 {
            timer.tick_at(start + Duration::from_millis(i * 20));
        }
        assert_eq!(timer.fps_report_at(start + Duration::from_millis(600)), None);

        let fps = timer
            .fps_report_at(start + Duration::from_secs(1))
            .expect("interval elapsed");
        assert!((fps - 30.0).abs() < 1e-3);

        // Counters restart after a report
        assert_eq!(timer.fps_report_at(start + Duration::from_millis(1500)), None);
    }

    #[test]
    fn test_clock_going_backwards() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start + Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(timer.tick_at(start), 0.0);
    }
}
