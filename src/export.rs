//! Training-data export: flatten a session into labelled CSV rows.
//!
//! Each row is one observation of both wrists. Rows from judged hits carry
//! `target = 1`; ambient pose frames recorded between hits carry
//! `target = 0`. The two streams are merged and sorted by session-relative
//! timestamp so the file reads as one chronological trace.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::correlator::Hand;
use crate::pose::WristFeature;
use crate::session::SessionState;

/// One flattened CSV row.
///
/// Field order is the column order on disk. Missing wrists leave their six
/// feature cells empty rather than zero so downstream tooling can tell
/// "not detected" from "at origin".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Milliseconds since session start
    pub timestamp_ms_relative: f64,
    /// "hit" or "frame"
    pub frame_type: String,
    pub left_wrist_x: Option<f64>,
    pub left_wrist_y: Option<f64>,
    pub left_wrist_z: Option<f64>,
    pub left_wrist_velocity: Option<f64>,
    pub left_wrist_height: Option<f64>,
    pub left_wrist_acceleration: Option<f64>,
    pub right_wrist_x: Option<f64>,
    pub right_wrist_y: Option<f64>,
    pub right_wrist_z: Option<f64>,
    pub right_wrist_velocity: Option<f64>,
    pub right_wrist_height: Option<f64>,
    pub right_wrist_acceleration: Option<f64>,
    pub hand: Option<Hand>,
    pub pad_note: Option<u8>,
    pub hit_velocity: Option<u8>,
    /// 1 for a strike row, 0 for an ambient frame
    pub target: u8,
}

fn wrist_columns(
    wrist: Option<&WristFeature>,
) -> (
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
) {
    match wrist {
        Some(w) => (
            Some(w.x),
            Some(w.y),
            Some(w.z),
            w.velocity,
            Some(w.normalized_height),
            w.acceleration,
        ),
        None => (None, None, None, None, None, None),
    }
}

/// Flatten a session's hit log and ambient frames into export rows,
/// chronologically ordered by session-relative timestamp.
pub fn collect_records(state: &SessionState) -> Vec<ExportRecord> {
    let mut records = Vec::with_capacity(state.hits.len() + state.frames.len());

    for hit in &state.hits {
        let (left, right) = match &hit.pose {
            Some(pose) => (pose.left_wrist.as_ref(), pose.right_wrist.as_ref()),
            None => (None, None),
        };
        let (lx, ly, lz, lv, lh, la) = wrist_columns(left);
        let (rx, ry, rz, rv, rh, ra) = wrist_columns(right);
        records.push(ExportRecord {
            timestamp_ms_relative: hit.relative_ms,
            frame_type: "hit".to_string(),
            left_wrist_x: lx,
            left_wrist_y: ly,
            left_wrist_z: lz,
            left_wrist_velocity: lv,
            left_wrist_height: lh,
            left_wrist_acceleration: la,
            right_wrist_x: rx,
            right_wrist_y: ry,
            right_wrist_z: rz,
            right_wrist_velocity: rv,
            right_wrist_height: rh,
            right_wrist_acceleration: ra,
            hand: hit.hand,
            pad_note: Some(hit.note),
            hit_velocity: Some(hit.velocity),
            target: 1,
        });
    }

    for frame in &state.frames {
        let (lx, ly, lz, lv, lh, la) = wrist_columns(frame.left_wrist.as_ref());
        let (rx, ry, rz, rv, rh, ra) = wrist_columns(frame.right_wrist.as_ref());
        records.push(ExportRecord {
            timestamp_ms_relative: frame.relative_ms,
            frame_type: "frame".to_string(),
            left_wrist_x: lx,
            left_wrist_y: ly,
            left_wrist_z: lz,
            left_wrist_velocity: lv,
            left_wrist_height: lh,
            left_wrist_acceleration: la,
            right_wrist_x: rx,
            right_wrist_y: ry,
            right_wrist_z: rz,
            right_wrist_velocity: rv,
            right_wrist_height: rh,
            right_wrist_acceleration: ra,
            hand: None,
            pad_note: None,
            hit_velocity: None,
            target: 0,
        });
    }

    records.sort_by(|a, b| a.timestamp_ms_relative.total_cmp(&b.timestamp_ms_relative));
    records
}

/// Write records as headered CSV.
pub fn write_csv(path: &Path, records: &[ExportRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    log::info!("exported {} rows to {}", records.len(), path.display());
    Ok(())
}

/// Read a CSV file previously produced by [`write_csv`].
pub fn read_csv(path: &Path) -> anyhow::Result<Vec<ExportRecord>> {
    let mut reader = csv::Reader::from_reader(File::open(path)?);
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::correlator::RawDeviceEvent;
    use crate::pose::{Landmark, LandmarkFrame};

    fn frame_at(timestamp_ms: f64, wrist_y: f64) -> LandmarkFrame {
        LandmarkFrame {
            timestamp_ms,
            left_wrist: Some(Landmark {
                x: 0.3,
                y: wrist_y,
                z: 0.0,
            }),
            right_wrist: None,
            left_shoulder: None,
            right_shoulder: None,
            left_hip: None,
            right_hip: None,
        }
    }

    fn populated_state() -> SessionState {
        let mut state = SessionState::new(AppConfig::default());
        state.start(0.0);
        state.on_scheduler_fire(1000.0);
        state.on_landmark_frame(&frame_at(950.0, 0.5));
        state.on_raw_hit(&RawDeviceEvent {
            timestamp_ms: 1010.0,
            status: 0x90,
            note: 38,
            velocity: 100,
        });
        state.on_landmark_frame(&frame_at(1100.0, 0.6));
        state
    }

    #[test]
    fn test_collect_merges_and_sorts() {
        let state = populated_state();
        let records = collect_records(&state);
        assert_eq!(records.len(), 3);
        assert!(records
            .windows(2)
            .all(|w| w[0].timestamp_ms_relative <= w[1].timestamp_ms_relative));
        assert_eq!(records[0].frame_type, "frame");
        assert_eq!(records[1].frame_type, "hit");
        assert_eq!(records[1].target, 1);
        assert_eq!(records[1].pad_note, Some(38));
        assert_eq!(records[1].hit_velocity, Some(100));
        assert_eq!(records[2].target, 0);
        assert_eq!(records[2].hand, None);
    }

    #[test]
    fn test_hit_row_carries_pose_snapshot() {
        let state = populated_state();
        let records = collect_records(&state);
        let hit_row = &records[1];
        assert_eq!(hit_row.left_wrist_x, Some(0.3));
        assert_eq!(hit_row.left_wrist_y, Some(0.5));
        // Left is the only detected wrist, so attribution resolves to it
        assert_eq!(hit_row.hand, Some(Hand::Left));
        assert_eq!(hit_row.right_wrist_x, None);
    }

    #[test]
    fn test_ambient_frame_has_empty_hit_columns() {
        let state = populated_state();
        let records = collect_records(&state);
        let frame_row = &records[0];
        assert_eq!(frame_row.pad_note, None);
        assert_eq!(frame_row.hit_velocity, None);
        assert_eq!(frame_row.target, 0);
        assert_eq!(frame_row.left_wrist_velocity, None, "first sample has no predecessor");
    }

    #[test]
    fn test_csv_header_column_names() {
        let state = populated_state();
        let records = collect_records(&state);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.csv");
        write_csv(&path, &records).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let header = contents.lines().next().unwrap();
        assert!(
            header.starts_with("timestamp_ms_relative,frame_type,left_wrist_x"),
            "unexpected header: {header}"
        );
        assert!(header.ends_with("hand,pad_note,hit_velocity,target"));
    }

    #[test]
    fn test_csv_round_trip_preserves_records() {
        let state = populated_state();
        let records = collect_records(&state);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        write_csv(&path, &records).unwrap();
        let restored = read_csv(&path).unwrap();
        assert_eq!(restored, records);
    }

    #[test]
    fn test_empty_session_round_trips() {
        let state = SessionState::new(AppConfig::default());
        let records = collect_records(&state);
        assert!(records.is_empty());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_csv(&path, &records).unwrap();
        let restored = read_csv(&path).unwrap();
        assert!(restored.is_empty());
    }
}
