//! Session state - the single aggregate owning all trainer buffers
//!
//! One session is active at a time. All producers (scheduler timer, device
//! hits, pose frames, adaptive polls) mutate this aggregate through the
//! engine's mutex, which serializes them and makes the correlator's
//! "no retroactive revision" guarantee safe without further locking.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::adaptive::TempoAdjustment;
use crate::config::AppConfig;
use crate::correlator::{correlate, filter_note_on, Hand, HitEvent, RawDeviceEvent, Timing};
use crate::error::SessionError;
use crate::pose::{LandmarkFrame, PoseBuffer, WristFeature};
use crate::scheduler::{BeatScheduler, Tick};
use crate::stats::PerformanceStats;

/// A non-hit pose frame retained for training-data export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonHitFrame {
    pub relative_ms: f64,
    pub left_wrist: Option<WristFeature>,
    pub right_wrist: Option<WristFeature>,
}

/// A remote-classifier prediction merged back into the session log.
///
/// Predictions are best effort: a failed or slow classification call simply
/// omits the frame's entry and never affects timing classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub timestamp_ms: f64,
    pub relative_ms: f64,
    pub probability: f64,
    pub predicted_class: i32,
    pub confidence: f64,
}

/// Frozen end-of-session report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub duration_ms: f64,
    pub accuracy: f64,
    pub consistency_ms: f64,
    pub longest_streak: u32,
    pub streak_history: Vec<u32>,
    pub bpm_start: u32,
    pub bpm_end: u32,
    /// On-time percentage per attributed hand, when any hits were attributed
    pub left_hand_accuracy: Option<f64>,
    pub right_hand_accuracy: Option<f64>,
    pub total_hits: usize,
    pub judged_hits: u32,
}

/// The session aggregate: tick history, pose window, hit/frame/prediction
/// logs, statistics, and tempo state.
pub struct SessionState {
    config: AppConfig,
    pub active: bool,
    pub adaptive_enabled: bool,
    pub start_ms: Option<f64>,
    pub end_ms: Option<f64>,
    bpm_start: u32,
    pub scheduler: BeatScheduler,
    ticks: VecDeque<Tick>,
    ticks_since_prune: u64,
    pub poses: PoseBuffer,
    pub hits: Vec<HitEvent>,
    pub frames: Vec<NonHitFrame>,
    pub predictions: Vec<Prediction>,
    pub stats: PerformanceStats,
    pub last_adjustment: Option<TempoAdjustment>,
}

impl SessionState {
    pub fn new(config: AppConfig) -> Self {
        let scheduler = BeatScheduler::new(&config.metronome);
        let poses = PoseBuffer::new(config.pose.max_frame_age_ms);
        let bpm_start = config.metronome.bpm;
        Self {
            config,
            active: false,
            adaptive_enabled: false,
            start_ms: None,
            end_ms: None,
            bpm_start,
            scheduler,
            ticks: VecDeque::new(),
            ticks_since_prune: 0,
            poses,
            hits: Vec::new(),
            frames: Vec::new(),
            predictions: Vec::new(),
            stats: PerformanceStats::new(),
            last_adjustment: None,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.scheduler.bpm()
    }

    pub fn subdivision(&self) -> u32 {
        self.scheduler.subdivision()
    }

    pub fn ticks(&self) -> impl Iterator<Item = &Tick> {
        self.ticks.iter()
    }

    /// Milliseconds since session start; zero-based before the first start.
    pub fn relative_ms(&self, timestamp_ms: f64) -> f64 {
        timestamp_ms - self.start_ms.unwrap_or(timestamp_ms)
    }

    /// Mark the session active. Idempotent once running.
    pub fn start(&mut self, now_ms: f64) {
        if !self.active {
            self.active = true;
            if self.start_ms.is_none() {
                self.start_ms = Some(now_ms);
                self.bpm_start = self.bpm();
            }
            self.end_ms = None;
            self.scheduler.reset();
            log::info!("[Session] Started at {:.1}ms, {} BPM", now_ms, self.bpm());
        }
    }

    /// Mark the session inactive, freezing the end time.
    pub fn stop(&mut self, now_ms: f64) {
        if self.active {
            self.active = false;
            self.end_ms = Some(now_ms);
            log::info!("[Session] Stopped at {:.1}ms", now_ms);
        }
    }

    /// Discard everything and reinitialize from config defaults.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
        log::info!("[Session] Reset");
    }

    /// Validated tempo update; the scheduler picks up the new interval.
    pub fn set_bpm(&mut self, bpm: u32) -> Result<(), SessionError> {
        if !(self.config.adaptive.min_bpm..=self.config.adaptive.max_bpm).contains(&bpm) {
            return Err(SessionError::BpmOutOfRange { bpm });
        }
        self.scheduler.set_bpm(bpm);
        Ok(())
    }

    pub fn set_subdivision(&mut self, subdivision: u32) -> Result<(), SessionError> {
        if !matches!(subdivision, 1 | 2 | 4) {
            return Err(SessionError::SubdivisionInvalid { subdivision });
        }
        self.scheduler.set_subdivision(subdivision);
        Ok(())
    }

    /// Process a scheduler timer firing: emit, record, and prune.
    ///
    /// The tick history is pruned on a cadence rather than per tick, and
    /// drops entries older than the retention window.
    pub fn on_scheduler_fire(&mut self, now_ms: f64) -> Option<Tick> {
        let tick = self.scheduler.fire(now_ms)?;
        self.ticks.push_back(tick.clone());
        self.ticks_since_prune += 1;
        if self.ticks_since_prune >= self.config.history.prune_every_n_ticks {
            self.ticks_since_prune = 0;
            let horizon = now_ms - self.config.history.tick_retention_ms;
            while self
                .ticks
                .front()
                .is_some_and(|t| t.timestamp_ms < horizon)
            {
                self.ticks.pop_front();
            }
        }
        Some(tick)
    }

    /// Ingest one pose frame: derive features, evict stale samples, and log
    /// the frame for export while the session runs.
    pub fn on_landmark_frame(&mut self, frame: &LandmarkFrame) {
        let sample = self.poses.push(frame);
        self.poses.evict(frame.timestamp_ms);
        if self.active {
            self.frames.push(NonHitFrame {
                relative_ms: self.relative_ms(frame.timestamp_ms),
                left_wrist: sample.left_wrist,
                right_wrist: sample.right_wrist,
            });
        }
    }

    /// Ingest one raw device event.
    ///
    /// Irrelevant events (wrong message type, zero velocity, unmapped pad)
    /// are dropped silently. Accepted hits are correlated against the
    /// current buffers, appended to the immutable hit log, and folded into
    /// the statistics.
    pub fn on_raw_hit(&mut self, event: &RawDeviceEvent) -> Option<HitEvent> {
        let (note, velocity) = filter_note_on(event)?;
        let hit = correlate(
            event.timestamp_ms,
            self.relative_ms(event.timestamp_ms),
            note,
            velocity,
            self.bpm(),
            self.subdivision(),
            self.ticks.iter(),
            self.poses.samples(),
            &self.config.correlator,
        );
        self.stats.record(&hit);
        self.hits.push(hit.clone());
        Some(hit)
    }

    /// Merge a remote-classifier prediction into the session log.
    pub fn on_prediction(&mut self, prediction: Prediction) {
        if self.active {
            self.predictions.push(prediction);
        }
    }

    /// Freeze the current state into a summary.
    pub fn summary(&self, now_ms: f64) -> SessionSummary {
        let start = self.start_ms.unwrap_or(now_ms);
        let end = self.end_ms.unwrap_or(now_ms);

        SessionSummary {
            duration_ms: (end - start).max(0.0),
            accuracy: self.stats.instant_accuracy(),
            consistency_ms: self.stats.consistency_ms(),
            longest_streak: self.stats.longest_streak(),
            streak_history: self.stats.streak_history.clone(),
            bpm_start: self.bpm_start,
            bpm_end: self.bpm(),
            left_hand_accuracy: self.hand_accuracy(Hand::Left),
            right_hand_accuracy: self.hand_accuracy(Hand::Right),
            total_hits: self.hits.len(),
            judged_hits: self.stats.judged_hits(),
        }
    }

    /// On-time percentage among judged hits attributed to one hand.
    fn hand_accuracy(&self, hand: Hand) -> Option<f64> {
        let judged: Vec<&HitEvent> = self
            .hits
            .iter()
            .filter(|h| h.timing != Timing::NoReference && h.hand == Some(hand))
            .collect();
        if judged.is_empty() {
            return None;
        }
        let on_time = judged.iter().filter(|h| h.timing == Timing::OnTime).count();
        Some(100.0 * on_time as f64 / judged.len() as f64)
    }
}
