//! Performance aggregator - streak, accuracy, and consistency statistics
//!
//! Consumes classified hits and maintains the session's running feedback
//! numbers. Hits with no reference tick are excluded from every statistic.
//! The rolling accuracy is an exponential moving average recomputed on the
//! adaptive controller's wall-clock interval rather than per hit.

use serde::{Deserialize, Serialize};

use crate::correlator::{HitEvent, Timing};

/// Running performance statistics over the session hit log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Consecutive on-time hits since the last non-on-time hit
    pub streak: u32,
    /// Lengths of completed streaks, recorded when a streak ends
    pub streak_history: Vec<u32>,
    on_time_count: u32,
    with_reference_count: u32,
    /// Signed deltas of every hit that matched a tick
    deltas: Vec<f64>,
    /// Exponentially smoothed accuracy, 0-100
    pub rolling_accuracy: f64,
}

impl PerformanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one classified hit into the statistics.
    ///
    /// No-reference hits are ignored entirely: they count toward neither
    /// accuracy term and do not break a streak.
    pub fn record(&mut self, hit: &HitEvent) {
        if hit.timing == Timing::NoReference {
            return;
        }

        if hit.timing == Timing::OnTime {
            self.streak += 1;
            self.on_time_count += 1;
        } else {
            if self.streak > 0 {
                self.streak_history.push(self.streak);
            }
            self.streak = 0;
        }

        self.with_reference_count += 1;
        if let Some(delta) = hit.delta_ms {
            self.deltas.push(delta);
        }
    }

    /// Instantaneous accuracy: `100 x on_time / with_reference`, or 0
    /// before the first judged hit.
    pub fn instant_accuracy(&self) -> f64 {
        if self.with_reference_count == 0 {
            return 0.0;
        }
        100.0 * self.on_time_count as f64 / self.with_reference_count as f64
    }

    /// Timing consistency: population standard deviation of all recorded
    /// deltas, in milliseconds. Zero with fewer than two deltas.
    pub fn consistency_ms(&self) -> f64 {
        if self.deltas.len() < 2 {
            return 0.0;
        }
        let n = self.deltas.len() as f64;
        let mean = self.deltas.iter().sum::<f64>() / n;
        let variance = self
            .deltas
            .iter()
            .map(|d| (d - mean) * (d - mean))
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    /// Recompute the rolling accuracy from the current instant accuracy.
    ///
    /// `rolling = rolling * (1 - alpha) + instant * alpha`, with a seeding
    /// rule: a zero rolling value snaps straight to a nonzero instant value
    /// so the average does not ramp up from zero at session start.
    pub fn recompute_rolling(&mut self, alpha: f64) -> f64 {
        let instant = self.instant_accuracy();
        if self.rolling_accuracy == 0.0 && instant != 0.0 {
            self.rolling_accuracy = instant;
        } else {
            self.rolling_accuracy = self.rolling_accuracy * (1.0 - alpha) + instant * alpha;
        }
        self.rolling_accuracy
    }

    /// Longest streak seen so far, including the one still running.
    pub fn longest_streak(&self) -> u32 {
        self.streak_history
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .max(self.streak)
    }

    pub fn judged_hits(&self) -> u32 {
        self.with_reference_count
    }
}
