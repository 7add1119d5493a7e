//! Beat scheduler - periodic tick generation for the metronome grid
//!
//! This module produces the reference tick stream that hits are judged
//! against. Key features:
//! - Interval derivation from BPM and subdivision (60000 / bpm / subdivision)
//! - Debounce guard against host-timer double-fires
//! - Beat / sub-beat counters with measure wraparound
//! - Accent flagging on the first sub-beat of beat 1 (informational only)
//!
//! The scheduler is a pure state machine driven by an external timer: the
//! engine owns the timer loop and calls [`BeatScheduler::fire`] with the
//! current clock reading, which makes the tick logic fully deterministic
//! under test.

use serde::{Deserialize, Serialize};

use crate::config::MetronomeConfig;

/// One scheduled metronome beat or sub-beat event.
///
/// Ticks are immutable once created and retained in a bounded-recency
/// history owned by the session. `tick_index` is strictly increasing within
/// one scheduler run; timestamps are non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Timestamp in milliseconds from the session clock
    pub timestamp_ms: f64,
    /// Beat position within the measure, 1-based
    pub beat_number: u32,
    /// Sub-beat position within the beat, 1-based
    pub sub_beat_number: u32,
    /// Monotonic tick counter for this scheduler run
    pub tick_index: u64,
    /// True on the first sub-beat of beat 1 when accenting is enabled
    pub accent: bool,
}

/// Computes the tick interval in milliseconds for a tempo and subdivision.
///
/// Formula: `interval_ms = 60000 / bpm / subdivision`
///
/// # Examples
/// ```
/// use drum_trainer::scheduler::interval_ms;
/// assert_eq!(interval_ms(120, 1), 500.0);
/// assert_eq!(interval_ms(120, 2), 250.0);
/// assert_eq!(interval_ms(60, 4), 250.0);
/// ```
#[inline]
pub fn interval_ms(bpm: u32, subdivision: u32) -> f64 {
    60000.0 / bpm as f64 / subdivision as f64
}

/// Milliseconds per whole beat at a tempo.
#[inline]
pub fn ms_per_beat(bpm: u32) -> f64 {
    60000.0 / bpm as f64
}

/// Milliseconds per sub-beat; same quantity as [`interval_ms`], named for
/// use in tolerance calculations.
#[inline]
pub fn ms_per_sub_beat(bpm: u32, subdivision: u32) -> f64 {
    ms_per_beat(bpm) / subdivision as f64
}

/// Beat scheduler state machine.
///
/// Emits one [`Tick`] per interval while active. The first firing after a
/// reset is accepted immediately; afterwards a firing arriving less than
/// `0.8 x interval` after the previous accepted one is suppressed, guarding
/// against spurious re-entrant timer callbacks.
#[derive(Debug, Clone)]
pub struct BeatScheduler {
    bpm: u32,
    subdivision: u32,
    beats_per_measure: u32,
    accent_first_beat: bool,
    current_beat: u32,
    current_sub_beat: u32,
    next_index: u64,
    last_fire_ms: Option<f64>,
}

impl BeatScheduler {
    /// Fraction of the interval below which a second firing is treated as a
    /// timer double-fire and suppressed.
    const DEBOUNCE_RATIO: f64 = 0.8;

    pub fn new(config: &MetronomeConfig) -> Self {
        Self {
            bpm: config.bpm,
            subdivision: config.subdivision,
            beats_per_measure: config.beats_per_measure,
            accent_first_beat: config.accent_first_beat,
            current_beat: 1,
            current_sub_beat: 1,
            next_index: 0,
            last_fire_ms: None,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn subdivision(&self) -> u32 {
        self.subdivision
    }

    /// Current tick interval in milliseconds.
    pub fn interval_ms(&self) -> f64 {
        interval_ms(self.bpm, self.subdivision)
    }

    /// Retarget the tempo. Counters and debounce state are kept so the beat
    /// position survives a mid-run tempo change.
    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = bpm;
    }

    /// Change the subdivision. Counters restart from the top of the measure
    /// since sub-beat positions are not comparable across subdivisions.
    pub fn set_subdivision(&mut self, subdivision: u32) {
        self.subdivision = subdivision;
        self.current_beat = 1;
        self.current_sub_beat = 1;
    }

    /// Restart counters and debounce state for a fresh run.
    pub fn reset(&mut self) {
        self.current_beat = 1;
        self.current_sub_beat = 1;
        self.next_index = 0;
        self.last_fire_ms = None;
    }

    /// Process one timer firing at `now_ms`.
    ///
    /// Returns the emitted tick, or `None` when the firing was debounced.
    /// Counters only advance on accepted firings, so a suppressed
    /// double-fire never skips a beat position.
    pub fn fire(&mut self, now_ms: f64) -> Option<Tick> {
        if let Some(last) = self.last_fire_ms {
            if now_ms - last < self.interval_ms() * Self::DEBOUNCE_RATIO {
                log::debug!(
                    "[BeatScheduler] Suppressed double-fire at {:.1}ms (last {:.1}ms)",
                    now_ms,
                    last
                );
                return None;
            }
        }
        self.last_fire_ms = Some(now_ms);

        let is_sub_beat_start = self.current_sub_beat == 1;
        let accent = self.accent_first_beat && self.current_beat == 1 && is_sub_beat_start;

        let tick = Tick {
            timestamp_ms: now_ms,
            beat_number: self.current_beat,
            sub_beat_number: self.current_sub_beat,
            tick_index: self.next_index,
            accent,
        };
        self.next_index += 1;

        // Sub-beat cycles 1..=subdivision; the main beat advances only when
        // the sub-beat wraps back to 1.
        self.current_sub_beat = (self.current_sub_beat % self.subdivision) + 1;
        if self.current_sub_beat == 1 {
            self.current_beat = (self.current_beat % self.beats_per_measure) + 1;
        }

        Some(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(bpm: u32, subdivision: u32) -> BeatScheduler {
        BeatScheduler::new(&MetronomeConfig {
            bpm,
            subdivision,
            beats_per_measure: 4,
            accent_first_beat: true,
        })
    }

    #[test]
    fn test_interval_formula() {
        // interval_ms = 60000 / bpm / subdivision across the full range
        for bpm in [40u32, 60, 100, 120, 178, 240] {
            for subdivision in [1u32, 2, 4] {
                let expected = 60000.0 / bpm as f64 / subdivision as f64;
                assert_eq!(interval_ms(bpm, subdivision), expected);
            }
        }
        assert_eq!(interval_ms(120, 1), 500.0);
        assert_eq!(interval_ms(40, 1), 1500.0);
        assert_eq!(interval_ms(240, 4), 62.5);
    }

    #[test]
    fn test_tick_indices_strictly_increasing() {
        let mut sched = scheduler(120, 2);
        let mut expected_index = 0;
        let mut now = 0.0;
        for _ in 0..20 {
            let tick = sched.fire(now).expect("regular firing must emit a tick");
            assert_eq!(tick.tick_index, expected_index, "no index gaps allowed");
            expected_index += 1;
            now += sched.interval_ms();
        }
    }

    #[test]
    fn test_first_fire_immediate() {
        let mut sched = scheduler(120, 1);
        let tick = sched.fire(0.0).expect("first firing fires with zero delay");
        assert_eq!(tick.tick_index, 0);
        assert_eq!(tick.beat_number, 1);
        assert_eq!(tick.sub_beat_number, 1);
    }

    #[test]
    fn test_debounce_suppresses_rapid_fire() {
        let mut sched = scheduler(120, 1); // interval 500ms, debounce below 400ms
        assert!(sched.fire(1000.0).is_some());
        assert!(sched.fire(1100.0).is_none(), "100ms gap must be suppressed");
        assert!(sched.fire(1399.0).is_none(), "just under 0.8x interval");
        let tick = sched.fire(1400.0).expect("0.8x interval gap is accepted");
        // Counter did not advance on suppressed firings
        assert_eq!(tick.tick_index, 1);
        assert_eq!(tick.beat_number, 2);
    }

    #[test]
    fn test_beat_wraparound_quarter_notes() {
        let mut sched = scheduler(120, 1);
        let mut beats = Vec::new();
        let mut now = 0.0;
        for _ in 0..6 {
            beats.push(sched.fire(now).unwrap().beat_number);
            now += 500.0;
        }
        assert_eq!(beats, vec![1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn test_sub_beat_wraparound_sixteenths() {
        let mut sched = scheduler(120, 4);
        let mut positions = Vec::new();
        let mut now = 0.0;
        for _ in 0..9 {
            let tick = sched.fire(now).unwrap();
            positions.push((tick.beat_number, tick.sub_beat_number));
            now += sched.interval_ms();
        }
        assert_eq!(
            positions,
            vec![
                (1, 1),
                (1, 2),
                (1, 3),
                (1, 4),
                (2, 1),
                (2, 2),
                (2, 3),
                (2, 4),
                (3, 1)
            ]
        );
    }

    #[test]
    fn test_accent_on_measure_start_only() {
        let mut sched = scheduler(120, 2);
        let mut now = 0.0;
        for i in 0..16 {
            let tick = sched.fire(now).unwrap();
            let expected = tick.beat_number == 1 && tick.sub_beat_number == 1;
            assert_eq!(
                tick.accent, expected,
                "accent mismatch at tick {} ({}.{})",
                i, tick.beat_number, tick.sub_beat_number
            );
            now += sched.interval_ms();
        }
    }

    #[test]
    fn test_accent_disabled() {
        let mut sched = BeatScheduler::new(&MetronomeConfig {
            bpm: 120,
            subdivision: 1,
            beats_per_measure: 4,
            accent_first_beat: false,
        });
        let mut now = 0.0;
        for _ in 0..5 {
            assert!(!sched.fire(now).unwrap().accent);
            now += 500.0;
        }
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut sched = scheduler(100, 2);
        let mut last = f64::NEG_INFINITY;
        let mut now = 0.0;
        for _ in 0..10 {
            let tick = sched.fire(now).unwrap();
            assert!(tick.timestamp_ms >= last);
            last = tick.timestamp_ms;
            // Jittery timer: intervals vary but stay above the debounce band
            now += sched.interval_ms() * 0.95;
        }
    }

    #[test]
    fn test_reset_restarts_counters() {
        let mut sched = scheduler(120, 1);
        sched.fire(0.0);
        sched.fire(500.0);
        sched.reset();
        let tick = sched.fire(10_000.0).unwrap();
        assert_eq!(tick.tick_index, 0);
        assert_eq!(tick.beat_number, 1);
        assert_eq!(tick.sub_beat_number, 1);
    }

    #[test]
    fn test_set_subdivision_restarts_measure() {
        let mut sched = scheduler(120, 1);
        sched.fire(0.0);
        sched.fire(500.0);
        sched.set_subdivision(4);
        let tick = sched.fire(1000.0).unwrap();
        assert_eq!(tick.beat_number, 1);
        assert_eq!(tick.sub_beat_number, 1);
    }
}
