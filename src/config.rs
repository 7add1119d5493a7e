//! Configuration management for dynamic parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. Key parameters for the
//! metronome, hit correlation, pose buffering, and adaptive tempo can be
//! adjusted via the config file for rapid experimentation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub metronome: MetronomeConfig,
    pub correlator: CorrelatorConfig,
    pub pose: PoseConfig,
    pub adaptive: AdaptiveConfig,
    pub history: HistoryConfig,
}

/// Metronome / beat scheduler parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetronomeConfig {
    /// Starting tempo in beats per minute (valid range 40-240)
    pub bpm: u32,
    /// Beat subdivision: 1 = quarter, 2 = eighth, 4 = sixteenth
    pub subdivision: u32,
    /// Beats per measure for the beat counter wraparound
    pub beats_per_measure: u32,
    /// Flag the first sub-beat of beat 1 as an accent
    pub accent_first_beat: bool,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: 120,
            subdivision: 1,
            beats_per_measure: 4,
            accent_first_beat: true,
        }
    }
}

/// Hit correlation parameters
///
/// The two tie-break bands are empirically chosen values carried over from
/// field testing; they are kept configurable rather than re-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// On-time tolerance as a fraction of the sub-beat interval
    pub tolerance_ratio: f64,
    /// Candidate admission window, in beats, around the hit timestamp
    pub window_beats: f64,
    /// Anti-jitter band: below this absolute delta, near-ties prefer the
    /// newer tick (milliseconds)
    pub jitter_band_ms: f64,
    /// Near-equal band: deltas within this distance of each other prefer the
    /// newer tick (milliseconds)
    pub near_equal_band_ms: f64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            tolerance_ratio: 0.2,
            window_beats: 2.0,
            jitter_band_ms: 15.0,
            near_equal_band_ms: 50.0,
        }
    }
}

/// Pose stream buffer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseConfig {
    /// Samples older than this are evicted from the live window
    pub max_frame_age_ms: f64,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            max_frame_age_ms: 200.0,
        }
    }
}

/// Adaptive tempo controller parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Interval between controller polls in milliseconds
    pub poll_interval_ms: u64,
    /// Rolling accuracy above this raises the tempo
    pub raise_threshold: f64,
    /// Rolling accuracy below this lowers the tempo
    pub lower_threshold: f64,
    /// Tempo step applied per adjustment, in BPM
    pub step_bpm: u32,
    /// Lower tempo bound
    pub min_bpm: u32,
    /// Upper tempo bound
    pub max_bpm: u32,
    /// Smoothing factor for the rolling accuracy moving average
    pub rolling_alpha: f64,
    /// How long an adjustment notice stays visible, in milliseconds
    pub notice_ttl_ms: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            raise_threshold: 75.0,
            lower_threshold: 65.0,
            step_bpm: 2,
            min_bpm: 40,
            max_bpm: 240,
            rolling_alpha: 0.2,
            notice_ttl_ms: 2000.0,
        }
    }
}

/// Tick history retention parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Ticks older than this are pruned from the history buffer
    pub tick_retention_ms: f64,
    /// Prune the tick history every N accepted ticks
    pub prune_every_n_ticks: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            tick_retention_ms: 5000.0,
            prune_every_n_ticks: 10,
        }
    }
}

impl Default for AppConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            metronome: MetronomeConfig::default(),
            correlator: CorrelatorConfig::default(),
            pose: PoseConfig::default(),
            adaptive: AdaptiveConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration; if the file doesn't exist or the JSON is
    /// invalid, the defaults are returned and a warning is logged.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        Self::load_from_file("assets/trainer_config.json")
    }
}
