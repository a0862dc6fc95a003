//! Adaptive concurrency control driven by observed call latency.
//!
//! [`AdaptiveLimiter`] applies Little's Law (`L = λ·W`) to the mean latency of
//! the last [`WINDOW_CAPACITY`] calls to estimate how many requests may run in
//! parallel to reach the target requests-per-minute, then moves 20% toward
//! that estimate on every sample. A rate-limit signal bypasses the smoothing
//! through [`AdaptiveLimiter::halve_on_rate_limit`].

use std::collections::VecDeque;

/// Maximum number of latency samples kept in the window.
pub const WINDOW_CAPACITY: usize = 20;
/// Samples required before the concurrency estimate is recomputed.
pub const MIN_SAMPLES: usize = 5;
pub const MIN_CONCURRENCY: f64 = 1.0;
pub const MAX_CONCURRENCY: f64 = 50.0;
/// Fraction of the Little's Law estimate actually targeted.
const SAFETY_FACTOR: f64 = 0.9;
/// Weight given to a fresh estimate during exponential smoothing.
const SMOOTHING: f64 = 0.2;

/// Bounded FIFO of per-call durations in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest once the window is over capacity.
    pub fn push(&mut self, ms: f64) {
        self.samples.push_back(ms);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Samples from oldest to newest.
    #[cfg(test)]
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

/// Latency-driven concurrency estimator for a single batch run.
#[derive(Debug, Clone)]
pub struct AdaptiveLimiter {
    target_rpm: f64,
    concurrency: f64,
    window: LatencyWindow,
}

impl AdaptiveLimiter {
    /// Creates a limiter for the given target rate, starting at one in-flight request.
    pub fn new(target_rpm: f64) -> Self {
        Self {
            target_rpm,
            concurrency: MIN_CONCURRENCY,
            window: LatencyWindow::default(),
        }
    }

    pub fn target_rpm(&self) -> f64 {
        self.target_rpm
    }

    /// Updates the target rate. Latency history is kept.
    #[allow(dead_code)]
    pub fn set_target_rpm(&mut self, rpm: f64) {
        self.target_rpm = rpm;
    }

    /// Records one call duration and recomputes the concurrency estimate.
    pub fn record_latency(&mut self, ms: f64) {
        self.window.push(ms);
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.window.len() < MIN_SAMPLES {
            return;
        }
        let Some(mean_ms) = self.window.mean() else {
            return;
        };
        let avg_latency_sec = mean_ms / 1000.0;
        let target_rps = self.target_rpm / 60.0;
        let ideal = target_rps * avg_latency_sec * SAFETY_FACTOR;

        let smoothed = self.concurrency * (1.0 - SMOOTHING) + ideal * SMOOTHING;
        self.concurrency = clamp_concurrency(smoothed);
    }

    /// Backpressure override: halves the concurrency immediately, skipping smoothing.
    pub fn halve_on_rate_limit(&mut self) {
        self.concurrency = clamp_concurrency(self.concurrency / 2.0);
    }

    /// Continuous concurrency estimate, always within `[1, 50]`.
    pub fn concurrency(&self) -> f64 {
        self.concurrency
    }

    /// Number of requests allowed in flight right now.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.round() as usize
    }

    #[cfg(test)]
    pub fn window(&self) -> &LatencyWindow {
        &self.window
    }

    /// Mean latency over the window, rounded to whole milliseconds.
    pub fn avg_latency_ms(&self) -> u64 {
        self.window.mean().map(|m| m.round() as u64).unwrap_or(0)
    }

    /// Throughput implied by the current concurrency and mean latency.
    pub fn current_rpm(&self) -> u64 {
        let latency_sec = self.avg_latency_ms() as f64 / 1000.0;
        if latency_sec == 0.0 {
            return 0;
        }
        (self.effective_concurrency() as f64 / latency_sec * 60.0).round() as u64
    }
}

// NaN (e.g. from a zero target) falls back to the floor.
fn clamp_concurrency(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_CONCURRENCY;
    }
    value.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(limiter: &mut AdaptiveLimiter, ms: f64, n: usize) {
        for _ in 0..n {
            limiter.record_latency(ms);
        }
    }

    #[test]
    fn starts_at_one() {
        let limiter = AdaptiveLimiter::new(600.0);
        assert_eq!(limiter.concurrency(), 1.0);
        assert_eq!(limiter.effective_concurrency(), 1);
        assert_eq!(limiter.avg_latency_ms(), 0);
        assert_eq!(limiter.current_rpm(), 0);
    }

    #[test]
    fn waits_for_min_samples_before_adjusting() {
        let mut limiter = AdaptiveLimiter::new(600.0);
        feed(&mut limiter, 2000.0, MIN_SAMPLES - 1);
        assert_eq!(limiter.concurrency(), 1.0);

        limiter.record_latency(2000.0);
        // 0.8 * 1 + 0.2 * (10 rps * 2 s * 0.9) = 4.4
        assert!((limiter.concurrency() - 4.4).abs() < 1e-9);
    }

    #[test]
    fn converges_to_littles_law_estimate() {
        let mut limiter = AdaptiveLimiter::new(600.0);
        feed(&mut limiter, 2000.0, 200);
        // 0.9 * (600 / 60) * 2 = 18
        assert!((limiter.concurrency() - 18.0).abs() < 0.01);
        assert_eq!(limiter.effective_concurrency(), 18);
    }

    #[test]
    fn clamps_to_upper_bound() {
        let mut limiter = AdaptiveLimiter::new(6000.0);
        feed(&mut limiter, 10_000.0, 200);
        assert_eq!(limiter.concurrency(), MAX_CONCURRENCY);
    }

    #[test]
    fn clamps_to_lower_bound() {
        let mut limiter = AdaptiveLimiter::new(10.0);
        feed(&mut limiter, 100.0, 200);
        assert_eq!(limiter.concurrency(), MIN_CONCURRENCY);
    }

    #[test]
    fn window_keeps_most_recent_twenty_in_order() {
        let mut limiter = AdaptiveLimiter::new(60.0);
        for i in 1..=25 {
            limiter.record_latency(i as f64);
        }
        let kept: Vec<f64> = limiter.window().samples().collect();
        let expected: Vec<f64> = (6..=25).map(|i| i as f64).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn rate_limit_halves_without_smoothing() {
        let mut limiter = AdaptiveLimiter::new(600.0);
        feed(&mut limiter, 2000.0, 200);
        let before = limiter.concurrency();

        limiter.halve_on_rate_limit();
        assert!((limiter.concurrency() - before / 2.0).abs() < 1e-9);
    }

    #[test]
    fn rate_limit_never_drops_below_one() {
        let mut limiter = AdaptiveLimiter::new(600.0);
        limiter.halve_on_rate_limit();
        limiter.halve_on_rate_limit();
        assert_eq!(limiter.concurrency(), 1.0);
    }

    #[test]
    fn set_target_keeps_history() {
        let mut limiter = AdaptiveLimiter::new(600.0);
        feed(&mut limiter, 2000.0, 10);
        limiter.set_target_rpm(1200.0);
        assert_eq!(limiter.window().len(), 10);
        assert_eq!(limiter.target_rpm(), 1200.0);

        feed(&mut limiter, 2000.0, 200);
        // 0.9 * 20 * 2 = 36
        assert!((limiter.concurrency() - 36.0).abs() < 0.01);
    }

    #[test]
    fn reports_average_latency_and_rpm() {
        let mut limiter = AdaptiveLimiter::new(600.0);
        feed(&mut limiter, 2000.0, 200);
        assert_eq!(limiter.avg_latency_ms(), 2000);
        // 18 in flight at 2 s each → 540 rpm
        assert_eq!(limiter.current_rpm(), 540);
    }
}
