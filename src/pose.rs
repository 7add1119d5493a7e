//! Pose stream buffer - rolling window of wrist features
//!
//! Maintains a short recency cache of body-landmark samples with derived
//! velocity, acceleration, and normalized wrist height. The buffer is a
//! live cache consumed by the hit correlator for hand attribution, not a
//! replayable log: samples older than the configured age are evicted.
//!
//! Feature derivation:
//! - velocity: 3D Euclidean displacement from the previous retained sample
//!   for the same limb, divided by elapsed seconds
//! - acceleration: change in velocity divided by elapsed seconds, only when
//!   the previous sample carried a velocity
//! - normalized height: `(avg_shoulder_y - wrist_y) / torso_length` while
//!   torso length is positive and finite, else the raw fallback `1 - wrist_y`

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A raw 3D body landmark as delivered by the pose provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One landmark frame from the pose provider.
///
/// The core consumes only the wrists plus shoulders/hips for height
/// normalization; any landmark may be missing on a given frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub timestamp_ms: f64,
    pub left_wrist: Option<Landmark>,
    pub right_wrist: Option<Landmark>,
    pub left_shoulder: Option<Landmark>,
    pub right_shoulder: Option<Landmark>,
    pub left_hip: Option<Landmark>,
    pub right_hip: Option<Landmark>,
}

/// Derived features for one wrist in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WristFeature {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// 3D speed against the previous retained sample; `None` without a valid
    /// predecessor (first sample, or gap)
    pub velocity: Option<f64>,
    /// Velocity change per second; requires a predecessor with velocity
    pub acceleration: Option<f64>,
    /// Wrist height above the shoulder line in torso lengths
    pub normalized_height: f64,
}

/// One retained pose sample with per-wrist features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp_ms: f64,
    pub left_wrist: Option<WristFeature>,
    pub right_wrist: Option<WristFeature>,
}

/// Rolling recency-bounded buffer of pose samples, ordered oldest to newest.
#[derive(Debug)]
pub struct PoseBuffer {
    max_age_ms: f64,
    samples: VecDeque<PoseSample>,
}

impl PoseBuffer {
    pub fn new(max_age_ms: f64) -> Self {
        Self {
            max_age_ms,
            samples: VecDeque::new(),
        }
    }

    /// Derive features from a raw frame and append the resulting sample.
    ///
    /// Derivatives are computed against the newest retained sample, so a
    /// frame arriving after the buffer drained (gap longer than the
    /// retention window) restarts with `None` velocity.
    pub fn push(&mut self, frame: &LandmarkFrame) -> PoseSample {
        let prev = self.samples.back().cloned();
        let dt_s = prev
            .as_ref()
            .map(|p| (frame.timestamp_ms - p.timestamp_ms) / 1000.0);

        let torso = TorsoReference::from_frame(frame);

        let sample = PoseSample {
            timestamp_ms: frame.timestamp_ms,
            left_wrist: build_wrist(
                frame.left_wrist,
                prev.as_ref().and_then(|p| p.left_wrist),
                dt_s,
                &torso,
            ),
            right_wrist: build_wrist(
                frame.right_wrist,
                prev.as_ref().and_then(|p| p.right_wrist),
                dt_s,
                &torso,
            ),
        };
        self.samples.push_back(sample.clone());
        sample
    }

    /// Drop samples with `now - timestamp >= max_age_ms`.
    pub fn evict(&mut self, now_ms: f64) {
        while let Some(front) = self.samples.front() {
            if now_ms - front.timestamp_ms >= self.max_age_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// The live window, oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = &PoseSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Shoulder/hip geometry used to normalize wrist height.
struct TorsoReference {
    shoulder_y: Option<f64>,
    torso_length: Option<f64>,
}

impl TorsoReference {
    fn from_frame(frame: &LandmarkFrame) -> Self {
        let shoulder_y = match (frame.left_shoulder, frame.right_shoulder) {
            (Some(l), Some(r)) => Some((l.y + r.y) / 2.0),
            _ => None,
        };
        let hip_y = match (frame.left_hip, frame.right_hip) {
            (Some(l), Some(r)) => Some((l.y + r.y) / 2.0),
            _ => None,
        };
        let torso_length = match (shoulder_y, hip_y) {
            (Some(s), Some(h)) => Some(h - s),
            _ => None,
        };
        Self {
            shoulder_y,
            torso_length,
        }
    }
}

fn build_wrist(
    wrist: Option<Landmark>,
    prev: Option<WristFeature>,
    dt_s: Option<f64>,
    torso: &TorsoReference,
) -> Option<WristFeature> {
    let wrist = wrist?;

    let mut velocity = None;
    let mut acceleration = None;
    if let (Some(prev), Some(dt)) = (prev, dt_s) {
        if dt > 0.0 {
            let dx = wrist.x - prev.x;
            let dy = wrist.y - prev.y;
            let dz = wrist.z - prev.z;
            let v = (dx * dx + dy * dy + dz * dz).sqrt() / dt;
            velocity = Some(v);
            if let Some(prev_v) = prev.velocity {
                acceleration = Some((v - prev_v) / dt);
            }
        }
    }

    let normalized_height = match (torso.shoulder_y, torso.torso_length) {
        (Some(shoulder_y), Some(torso_len)) if torso_len > 0.0 && torso_len.is_finite() => {
            (shoulder_y - wrist.y) / torso_len
        }
        _ => 1.0 - wrist.y,
    };

    Some(WristFeature {
        x: wrist.x,
        y: wrist.y,
        z: wrist.z,
        velocity,
        acceleration,
        normalized_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(x: f64, y: f64, z: f64) -> Option<Landmark> {
        Some(Landmark { x, y, z })
    }

    fn frame(timestamp_ms: f64, wrist_x: f64) -> LandmarkFrame {
        LandmarkFrame {
            timestamp_ms,
            left_wrist: lm(wrist_x, 0.5, 0.0),
            right_wrist: lm(wrist_x + 0.5, 0.5, 0.0),
            left_shoulder: lm(0.4, 0.3, 0.0),
            right_shoulder: lm(0.6, 0.3, 0.0),
            left_hip: lm(0.4, 0.7, 0.0),
            right_hip: lm(0.6, 0.7, 0.0),
        }
    }

    #[test]
    fn test_first_sample_has_no_derivatives() {
        let mut buffer = PoseBuffer::new(200.0);
        let sample = buffer.push(&frame(1000.0, 0.1));
        let left = sample.left_wrist.unwrap();
        assert_eq!(left.velocity, None);
        assert_eq!(left.acceleration, None);
    }

    #[test]
    fn test_velocity_is_displacement_over_seconds() {
        let mut buffer = PoseBuffer::new(200.0);
        buffer.push(&frame(1000.0, 0.1));
        // 0.2 units of x displacement over 100ms -> 2.0 units/s
        let sample = buffer.push(&frame(1100.0, 0.3));
        let left = sample.left_wrist.unwrap();
        let v = left.velocity.unwrap();
        assert!((v - 2.0).abs() < 1e-9, "expected 2.0 units/s, got {}", v);
        // Acceleration requires a previous velocity
        assert_eq!(left.acceleration, None);
    }

    #[test]
    fn test_acceleration_from_velocity_change() {
        let mut buffer = PoseBuffer::new(200.0);
        buffer.push(&frame(1000.0, 0.0));
        buffer.push(&frame(1100.0, 0.2)); // v = 2.0
        let sample = buffer.push(&frame(1200.0, 0.5)); // v = 3.0
        let left = sample.left_wrist.unwrap();
        assert!((left.velocity.unwrap() - 3.0).abs() < 1e-9);
        // (3.0 - 2.0) / 0.1s = 10.0 units/s^2
        assert!((left.acceleration.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_height_uses_torso_length() {
        let mut buffer = PoseBuffer::new(200.0);
        // shoulder_y = 0.3, hip_y = 0.7, torso = 0.4; wrist y = 0.5
        let sample = buffer.push(&frame(1000.0, 0.1));
        let left = sample.left_wrist.unwrap();
        let expected = (0.3 - 0.5) / 0.4;
        assert!((left.normalized_height - expected).abs() < 1e-9);
    }

    #[test]
    fn test_height_fallback_without_torso() {
        let mut buffer = PoseBuffer::new(200.0);
        let f = LandmarkFrame {
            timestamp_ms: 1000.0,
            left_wrist: lm(0.1, 0.4, 0.0),
            right_wrist: None,
            left_shoulder: None,
            right_shoulder: None,
            left_hip: None,
            right_hip: None,
        };
        let sample = buffer.push(&f);
        let left = sample.left_wrist.unwrap();
        assert!((left.normalized_height - 0.6).abs() < 1e-9, "raw 1 - y fallback");
    }

    #[test]
    fn test_height_fallback_with_inverted_torso() {
        // Hips above shoulders yields a non-positive torso length
        let mut buffer = PoseBuffer::new(200.0);
        let f = LandmarkFrame {
            timestamp_ms: 1000.0,
            left_wrist: lm(0.1, 0.4, 0.0),
            right_wrist: None,
            left_shoulder: lm(0.4, 0.7, 0.0),
            right_shoulder: lm(0.6, 0.7, 0.0),
            left_hip: lm(0.4, 0.3, 0.0),
            right_hip: lm(0.6, 0.3, 0.0),
        };
        let sample = buffer.push(&f);
        assert!((sample.left_wrist.unwrap().normalized_height - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_missing_wrist_yields_none() {
        let mut buffer = PoseBuffer::new(200.0);
        let mut f = frame(1000.0, 0.1);
        f.right_wrist = None;
        let sample = buffer.push(&f);
        assert!(sample.left_wrist.is_some());
        assert!(sample.right_wrist.is_none());
    }

    #[test]
    fn test_eviction_respects_max_age() {
        let mut buffer = PoseBuffer::new(200.0);
        buffer.push(&frame(1000.0, 0.1));
        buffer.push(&frame(1100.0, 0.2));
        buffer.push(&frame(1250.0, 0.3));
        buffer.evict(1300.0);
        // 1000.0 is 300ms old (>= 200), 1100.0 is exactly 200ms old (>= 200)
        let stamps: Vec<f64> = buffer.samples().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![1250.0]);
    }

    #[test]
    fn test_window_ordered_oldest_to_newest() {
        let mut buffer = PoseBuffer::new(10_000.0);
        for i in 0..5 {
            buffer.push(&frame(1000.0 + i as f64 * 50.0, 0.1));
        }
        let stamps: Vec<f64> = buffer.samples().map(|s| s.timestamp_ms).collect();
        let mut sorted = stamps.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(stamps, sorted);
    }
}
