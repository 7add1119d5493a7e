//! Adaptive tempo controller - accuracy-driven BPM nudging
//!
//! Polled on a fixed wall-clock interval while the session is active and
//! adaptive mode is enabled. Each poll recomputes the rolling accuracy and
//! produces at most one tempo adjustment: up when the player is comfortably
//! accurate, down when they are struggling, otherwise none. Every poll
//! (including "none") yields a notice for transient UI display.

use serde::{Deserialize, Serialize};

use crate::config::AdaptiveConfig;

/// Direction of a tempo adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Up,
    Down,
    None,
}

/// One adjustment notice, auto-expiring for UI purposes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoAdjustment {
    pub kind: AdjustmentKind,
    /// When the adjustment was made, session clock milliseconds
    pub at_ms: f64,
    /// The tempo in effect after the adjustment
    pub bpm: u32,
}

impl TempoAdjustment {
    /// Whether the notice has outlived its display window.
    pub fn is_expired(&self, now_ms: f64, ttl_ms: f64) -> bool {
        now_ms - self.at_ms >= ttl_ms
    }
}

/// Stateless policy mapping rolling accuracy to a bounded tempo step.
#[derive(Debug, Clone)]
pub struct AdaptiveTempoController {
    config: AdaptiveConfig,
}

impl AdaptiveTempoController {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self { config }
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.config.poll_interval_ms
    }

    pub fn rolling_alpha(&self) -> f64 {
        self.config.rolling_alpha
    }

    pub fn notice_ttl_ms(&self) -> f64 {
        self.config.notice_ttl_ms
    }

    /// Evaluate one poll.
    ///
    /// # Arguments
    /// * `rolling_accuracy` - Freshly recomputed rolling accuracy, 0-100
    /// * `bpm` - Current tempo
    /// * `now_ms` - Session clock reading for the notice timestamp
    ///
    /// # Returns
    /// The new tempo (clamped to the configured bounds) and the notice.
    pub fn evaluate(&self, rolling_accuracy: f64, bpm: u32, now_ms: f64) -> (u32, TempoAdjustment) {
        let (kind, new_bpm) = if rolling_accuracy > self.config.raise_threshold {
            (
                AdjustmentKind::Up,
                (bpm + self.config.step_bpm).min(self.config.max_bpm),
            )
        } else if rolling_accuracy < self.config.lower_threshold {
            (
                AdjustmentKind::Down,
                bpm.saturating_sub(self.config.step_bpm)
                    .max(self.config.min_bpm),
            )
        } else {
            (AdjustmentKind::None, bpm)
        };

        if new_bpm != bpm {
            log::info!(
                "[Adaptive] Rolling accuracy {:.1} -> BPM {} ({:?})",
                rolling_accuracy,
                new_bpm,
                kind
            );
        }

        (
            new_bpm,
            TempoAdjustment {
                kind,
                at_ms: now_ms,
                bpm: new_bpm,
            },
        )
    }
}
