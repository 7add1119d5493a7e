//! Hit correlator - timing classification and hand attribution
//!
//! This is the central algorithm of the trainer: it reconciles three
//! independently clocked event streams (metronome ticks, device hits, pose
//! samples) into a single immutable judgement per hit.
//!
//! Matching policy, reproduced exactly for compatible behavior:
//! 1. Tolerance = `0.2 x ms_per_sub_beat`.
//! 2. Candidate ticks lie within `2 x ms_per_beat` of the hit.
//! 3. No candidates -> `no-reference` (not an error; the metronome may
//!    simply not be running).
//! 4. Scan candidates keeping the smallest absolute delta, with two ordered
//!    recency overrides: inside the 15ms anti-jitter band near-ties prefer
//!    the newer tick, and deltas within 50ms of each other also prefer the
//!    newer tick. Hit detection and tick generation run on independent
//!    timers, so a hit landing between two close ticks is ambiguous; the
//!    newer tick better matches "which beat was this hit for".
//! 5. `on-time` when `|delta| <= tolerance`, else `early` for negative
//!    delta (hit before the tick), else `late`.
//! 6. Hand attribution compares each wrist's distance to the struck pad's
//!    anchor position, using the pose sample nearest the hit timestamp
//!    (later sample wins timestamp ties). Best effort: a missing or stale
//!    pose leaves the hand unresolved.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::CorrelatorConfig;
use crate::pose::{PoseSample, WristFeature};
use crate::scheduler::{ms_per_beat, ms_per_sub_beat, Tick};

/// Timing classification for a hit relative to the metronome grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timing {
    /// Within tolerance of the matched tick
    OnTime,
    /// Hit landed before the matched tick, outside tolerance
    Early,
    /// Hit landed after the matched tick, outside tolerance
    Late,
    /// No tick available to judge against
    NoReference,
}

/// Hand attributed to a hit from pose data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
    /// Wrist distances were equal; attribution is ambiguous
    Unknown,
}

/// Wrist snapshot carried on a hit for export and per-hand statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitPose {
    pub left_wrist: Option<WristFeature>,
    pub right_wrist: Option<WristFeature>,
}

/// One judged strike event.
///
/// Created once per accepted device hit and never mutated afterwards;
/// downstream aggregation is read-only over the hit log. When
/// `matched_tick` is present, `|timestamp_ms - tick.timestamp_ms|` is
/// bounded by the candidate admission window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitEvent {
    pub timestamp_ms: f64,
    /// Milliseconds since session start
    pub relative_ms: f64,
    /// Pad note number from the device
    pub note: u8,
    pub velocity: u8,
    pub hand: Option<Hand>,
    pub pose: Option<HitPose>,
    pub matched_tick: Option<Tick>,
    /// Signed delta: hit timestamp minus matched tick timestamp
    pub delta_ms: Option<f64>,
    pub sub_beat_number: Option<u32>,
    pub timing: Timing,
}

/// Raw event from the device hit source, before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceEvent {
    pub timestamp_ms: f64,
    pub status: u8,
    pub note: u8,
    pub velocity: u8,
}

/// Anchor positions for the mapped pads: kick, snare, closed hat, open
/// hat, and tom, in normalized camera space.
static PAD_ANCHORS: Lazy<HashMap<u8, [f64; 3]>> = Lazy::new(|| {
    HashMap::from([
        (36, [0.0, 0.0, 0.0]),
        (38, [0.0, 1.0, 0.0]),
        (42, [1.0, 1.0, 0.0]),
        (46, [1.0, 0.0, 0.0]),
        (50, [0.5, 0.5, 0.0]),
    ])
});

/// Fixed 3D anchor position for a pad note.
///
/// Returns `None` for unmapped notes; those events are dropped before
/// correlation.
pub fn pad_anchor(note: u8) -> Option<[f64; 3]> {
    PAD_ANCHORS.get(&note).copied()
}

/// Filter a raw device event down to an accepted (note, velocity) strike.
///
/// Drops anything that is not a note-on, zero-velocity releases, and notes
/// with no mapped pad. Silently dropping these is policy, not an error.
pub fn filter_note_on(event: &RawDeviceEvent) -> Option<(u8, u8)> {
    if event.status & 0xf0 != 0x90 || event.velocity == 0 {
        return None;
    }
    pad_anchor(event.note)?;
    Some((event.note, event.velocity))
}

fn wrist_distance(wrist: Option<&WristFeature>, anchor: [f64; 3]) -> f64 {
    match wrist {
        Some(w) => {
            let dx = w.x - anchor[0];
            let dy = w.y - anchor[1];
            let dz = w.z - anchor[2];
            (dx * dx + dy * dy + dz * dz).sqrt()
        }
        None => f64::INFINITY,
    }
}

/// Pose sample with timestamp closest to the hit; later sample wins ties.
fn closest_pose<'a, I>(samples: I, hit_ms: f64) -> Option<&'a PoseSample>
where
    I: Iterator<Item = &'a PoseSample>,
{
    let mut closest: Option<&PoseSample> = None;
    let mut min_diff = f64::INFINITY;
    for sample in samples {
        let diff = (sample.timestamp_ms - hit_ms).abs();
        let later_tie = diff == min_diff
            && closest.is_some_and(|c| sample.timestamp_ms > c.timestamp_ms);
        if diff < min_diff || later_tie {
            min_diff = diff;
            closest = Some(sample);
        }
    }
    closest
}

/// Correlate one accepted hit against the tick history and pose window.
///
/// Pure over the buffer contents at call time: previously emitted hits are
/// never revised when later ticks or poses arrive.
///
/// # Arguments
/// * `timestamp_ms` - Hit timestamp from the session clock
/// * `relative_ms` - Hit timestamp relative to session start
/// * `note`, `velocity` - Accepted device data (already filtered)
/// * `bpm`, `subdivision` - Current grid parameters
/// * `ticks` - Recent tick history, oldest to newest
/// * `poses` - Live pose window
/// * `params` - Tolerance and tie-break bands
#[allow(clippy::too_many_arguments)]
pub fn correlate<'a, T, P>(
    timestamp_ms: f64,
    relative_ms: f64,
    note: u8,
    velocity: u8,
    bpm: u32,
    subdivision: u32,
    ticks: T,
    poses: P,
    params: &CorrelatorConfig,
) -> HitEvent
where
    T: Iterator<Item = &'a Tick>,
    P: Iterator<Item = &'a PoseSample>,
{
    let tolerance = params.tolerance_ratio * ms_per_sub_beat(bpm, subdivision);
    let time_window = params.window_beats * ms_per_beat(bpm);

    let mut hit = HitEvent {
        timestamp_ms,
        relative_ms,
        note,
        velocity,
        hand: None,
        pose: None,
        matched_tick: None,
        delta_ms: None,
        sub_beat_number: None,
        timing: Timing::NoReference,
    };

    // --- Hand attribution (best effort) ---
    if let Some(anchor) = pad_anchor(note) {
        if let Some(sample) = closest_pose(poses, timestamp_ms) {
            let left_dist = wrist_distance(sample.left_wrist.as_ref(), anchor);
            let right_dist = wrist_distance(sample.right_wrist.as_ref(), anchor);
            hit.hand = Some(if left_dist < right_dist {
                Hand::Left
            } else if right_dist < left_dist {
                Hand::Right
            } else {
                Hand::Unknown
            });
            hit.pose = Some(HitPose {
                left_wrist: sample.left_wrist,
                right_wrist: sample.right_wrist,
            });
        }
    }

    // --- Tick matching ---
    let mut closest_tick: Option<&Tick> = None;
    let mut smallest_delta = f64::INFINITY;

    for tick in ticks {
        // A 0.0 timestamp is a legitimate clock reading (the session clock
        // starts at zero); only non-finite values are invalid
        if !tick.timestamp_ms.is_finite()
            || (timestamp_ms - tick.timestamp_ms).abs() > time_window
        {
            continue;
        }

        let delta = timestamp_ms - tick.timestamp_ms;
        let abs_delta = delta.abs();
        let best_abs = smallest_delta.abs();
        let newer = closest_tick.is_none_or(|c| tick.timestamp_ms > c.timestamp_ms);

        if abs_delta < best_abs {
            closest_tick = Some(tick);
            smallest_delta = delta;
        } else if best_abs < params.jitter_band_ms && abs_delta < params.jitter_band_ms && newer {
            // Anti-jitter: near-tie inside the tight band, prefer newer tick
            closest_tick = Some(tick);
            smallest_delta = delta;
        } else if (abs_delta - best_abs).abs() < params.near_equal_band_ms && newer {
            // Near-equal deltas, general recency preference
            closest_tick = Some(tick);
            smallest_delta = delta;
        }
    }

    if let Some(tick) = closest_tick {
        hit.matched_tick = Some(tick.clone());
        hit.delta_ms = Some(smallest_delta);
        hit.sub_beat_number = Some(tick.sub_beat_number);
        hit.timing = if smallest_delta.abs() <= tolerance {
            Timing::OnTime
        } else if smallest_delta < 0.0 {
            Timing::Early
        } else {
            Timing::Late
        };
        log::debug!(
            "[Correlator] Hit {:.1}ms -> tick {}.{} delta {:.1}ms ({:?})",
            timestamp_ms,
            tick.beat_number,
            tick.sub_beat_number,
            smallest_delta,
            hit.timing
        );
    } else {
        log::debug!(
            "[Correlator] Hit {:.1}ms has no reference tick",
            timestamp_ms
        );
    }

    hit
}
