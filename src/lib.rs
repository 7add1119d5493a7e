//! Drum practice trainer core: metronome scheduling, pose-aware hit
//! correlation, performance aggregation, and adaptive tempo control.
//!
//! The crate is organized around a single serialized [`session::SessionState`]
//! that all event producers feed:
//!
//! - [`scheduler`] emits metronome ticks on a monotonic timeline
//! - [`pose`] retains a short window of wrist features derived from
//!   landmark frames
//! - [`correlator`] judges each device hit against nearby ticks and
//!   attributes it to a hand
//! - [`stats`] folds judged hits into streaks, accuracy, and consistency
//! - [`adaptive`] nudges the tempo from rolling accuracy
//! - [`engine`] wires the above into an async control surface,
//!   [`engine::TrainerHandle`]
//! - [`export`] flattens a finished session into labelled CSV

pub mod adaptive;
pub mod clock;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod export;
pub mod pose;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use adaptive::{AdjustmentKind, TempoAdjustment};
pub use config::AppConfig;
pub use correlator::{Hand, HitEvent, RawDeviceEvent, Timing};
pub use engine::{AudioSink, NullSink, ParamPatch, SessionEvent, TrainerHandle};
pub use error::SessionError;
pub use scheduler::Tick;
pub use session::{SessionState, SessionSummary};
