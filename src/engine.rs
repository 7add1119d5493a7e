//! TrainerHandle: session orchestration over the correlation core.
//!
//! Owns the shared [`SessionState`] behind a single mutex and drives the
//! periodic producers (scheduler timer, adaptive tempo poll) as tokio
//! tasks. All producers funnel through the one lock, preserving the
//! serialization invariant the correlator relies on: each callback runs to
//! completion before the next mutates session state.
//!
//! Cancellation uses a run generation counter plus task aborts: stopping a
//! session invalidates the generation before aborting, so a stale loop that
//! races the stop can never fire into the next run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::adaptive::{AdaptiveTempoController, TempoAdjustment};
use crate::clock::{ClockSource, SystemClock};
use crate::config::AppConfig;
use crate::correlator::{HitEvent, RawDeviceEvent, Timing};
use crate::error::{log_session_error, SessionError};
use crate::pose::LandmarkFrame;
use crate::scheduler::Tick;
use crate::session::{Prediction, SessionState, SessionSummary};

/// Fire-and-forget audio commands.
///
/// Implementations must tolerate an unavailable sink (suspended or closed
/// backend) by logging and returning; failures never reach the correlator
/// or aggregator.
pub trait AudioSink: Send + Sync {
    /// Play a metronome click; `accent` marks the first sub-beat of beat 1.
    fn play_click(&self, accent: bool);
    /// Play the per-hit feedback tone for a timing judgement.
    fn play_feedback(&self, timing: Timing);
    /// Synchronously stop any sounding voices.
    fn quiesce(&self);
}

/// Sink that discards all audio commands.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play_click(&self, _accent: bool) {}
    fn play_feedback(&self, _timing: Timing) {}
    fn quiesce(&self) {}
}

/// Patch describing parameter updates to apply to the running session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamPatch {
    #[serde(default)]
    pub bpm: Option<u32>,
    #[serde(default)]
    pub subdivision: Option<u32>,
    #[serde(default)]
    pub adaptive: Option<bool>,
}

/// Event published on the session broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionStarted { bpm: u32, subdivision: u32 },
    SessionStopped,
    BpmChanged { bpm: u32 },
    TickFired { tick: Tick },
    HitClassified { hit: HitEvent },
    TempoAdjusted { adjustment: TempoAdjustment },
}

struct EngineCore {
    state: Mutex<SessionState>,
    clock: Arc<dyn ClockSource>,
    audio: Arc<dyn AudioSink>,
    adaptive: AdaptiveTempoController,
    events_tx: broadcast::Sender<SessionEvent>,
    /// Bumped on every scheduler (re)spawn and stop; loops exit when their
    /// generation is no longer current.
    generation: AtomicU64,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    adaptive_task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineCore {
    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SessionState>, SessionError> {
        self.state.lock().map_err(|_| SessionError::LockPoisoned {
            component: "SessionState".to_string(),
        })
    }

    fn publish(&self, event: SessionEvent) {
        // Send only fails with no subscribers, which is fine
        let _ = self.events_tx.send(event);
    }

    /// Spawn (or respawn) the scheduler loop at the state's current
    /// interval. The previous loop, if any, is invalidated and aborted.
    fn spawn_scheduler_loop(core: &Arc<EngineCore>) -> Result<(), SessionError> {
        let generation = core.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let interval_ms = core.lock_state()?.scheduler.interval_ms();

        let task_core = Arc::clone(core);
        let handle = tokio::spawn(async move {
            let mut timer =
                tokio::time::interval(Duration::from_secs_f64(interval_ms / 1000.0));
            // Free-running: a late firing does not trigger catch-up bursts
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // First await completes immediately: the first tick fires
                // with zero delay on activation
                timer.tick().await;
                if task_core.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                let now = task_core.clock.now_ms();
                let tick = {
                    let mut state = match task_core.state.lock() {
                        Ok(guard) => guard,
                        Err(_) => break,
                    };
                    if !state.active {
                        break;
                    }
                    state.on_scheduler_fire(now)
                };
                if let Some(tick) = tick {
                    task_core.audio.play_click(tick.accent);
                    task_core.publish(SessionEvent::TickFired { tick });
                }
            }
        });

        let mut guard = core
            .scheduler_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// Halt the scheduler loop and silence the sink.
    fn stop_scheduler(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut guard = self
            .scheduler_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        self.audio.quiesce();
    }

    fn spawn_adaptive_loop(core: &Arc<EngineCore>) {
        let task_core = Arc::clone(core);
        let handle = tokio::spawn(async move {
            let poll = task_core.adaptive.poll_interval_ms();
            let alpha = task_core.adaptive.rolling_alpha();
            let mut timer = tokio::time::interval(Duration::from_millis(poll));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate firing: the first poll happens one full
            // interval after enabling
            timer.tick().await;
            loop {
                timer.tick().await;
                let now = task_core.clock.now_ms();
                let outcome = {
                    let mut state = match task_core.state.lock() {
                        Ok(guard) => guard,
                        Err(_) => break,
                    };
                    if !state.active || !state.adaptive_enabled {
                        break;
                    }
                    let rolling = state.stats.recompute_rolling(alpha);
                    let bpm = state.bpm();
                    let (new_bpm, adjustment) =
                        task_core.adaptive.evaluate(rolling, bpm, now);
                    let changed = new_bpm != bpm;
                    if changed {
                        // Bounds were applied by the controller
                        let _ = state.set_bpm(new_bpm);
                    }
                    state.last_adjustment = Some(adjustment);
                    (changed, new_bpm, adjustment)
                };
                task_core.publish(SessionEvent::TempoAdjusted {
                    adjustment: outcome.2,
                });
                if outcome.0 {
                    // Retarget the metronome interval for the new tempo
                    if EngineCore::spawn_scheduler_loop(&task_core).is_err() {
                        break;
                    }
                    task_core.publish(SessionEvent::BpmChanged { bpm: outcome.1 });
                }
            }
        });

        let mut guard = core.adaptive_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }

    fn stop_adaptive(&self) {
        let mut guard = self
            .adaptive_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

/// Public handle orchestrating the trainer session.
///
/// Clone-free by design: embed it in an `Arc` if multiple owners need it.
pub struct TrainerHandle {
    core: Arc<EngineCore>,
    command_tx: mpsc::Sender<ParamPatch>,
    command_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ParamPatch>>>,
    command_worker_started: AtomicBool,
}

impl TrainerHandle {
    pub fn new(config: AppConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemClock::new()), Arc::new(NullSink))
    }

    pub fn with_parts(
        config: AppConfig,
        clock: Arc<dyn ClockSource>,
        audio: Arc<dyn AudioSink>,
    ) -> Self {
        let adaptive = AdaptiveTempoController::new(config.adaptive.clone());
        let state = Mutex::new(SessionState::new(config));
        let (events_tx, _) = broadcast::channel(128);
        let (command_tx, command_rx) = mpsc::channel(64);
        Self {
            core: Arc::new(EngineCore {
                state,
                clock,
                audio,
                adaptive,
                events_tx,
                generation: AtomicU64::new(0),
                scheduler_task: Mutex::new(None),
                adaptive_task: Mutex::new(None),
            }),
            command_tx,
            command_rx: Arc::new(tokio::sync::Mutex::new(command_rx)),
            command_worker_started: AtomicBool::new(false),
        }
    }

    /// Subscribe to the session event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events_tx.subscribe()
    }

    /// Sender half of the parameter patch pipeline.
    pub fn command_sender(&self) -> mpsc::Sender<ParamPatch> {
        self.command_tx.clone()
    }

    fn init_command_worker(&self) {
        if self
            .command_worker_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let core = Arc::clone(&self.core);
        let command_rx = Arc::clone(&self.command_rx);
        tokio::spawn(async move {
            loop {
                let patch = {
                    let mut guard = command_rx.lock().await;
                    guard.recv().await
                };
                match patch {
                    Some(patch) => {
                        if let Err(err) = Self::apply_patch(&core, &patch) {
                            log_session_error(&err, "command worker");
                        }
                    }
                    None => break,
                }
            }
        });
    }

    fn apply_patch(core: &Arc<EngineCore>, patch: &ParamPatch) -> Result<(), SessionError> {
        if let Some(bpm) = patch.bpm {
            Self::apply_bpm(core, bpm)?;
        }
        if let Some(subdivision) = patch.subdivision {
            Self::apply_subdivision(core, subdivision)?;
        }
        if let Some(adaptive) = patch.adaptive {
            Self::apply_adaptive(core, adaptive)?;
        }
        Ok(())
    }

    fn apply_bpm(core: &Arc<EngineCore>, bpm: u32) -> Result<(), SessionError> {
        let active = {
            let mut state = core.lock_state()?;
            state.set_bpm(bpm)?;
            state.active
        };
        if active {
            EngineCore::spawn_scheduler_loop(core)?;
        }
        core.publish(SessionEvent::BpmChanged { bpm });
        Ok(())
    }

    fn apply_subdivision(core: &Arc<EngineCore>, subdivision: u32) -> Result<(), SessionError> {
        let active = {
            let mut state = core.lock_state()?;
            state.set_subdivision(subdivision)?;
            state.active
        };
        if active {
            EngineCore::spawn_scheduler_loop(core)?;
        }
        Ok(())
    }

    fn apply_adaptive(core: &Arc<EngineCore>, enabled: bool) -> Result<(), SessionError> {
        let start_loop = {
            let mut state = core.lock_state()?;
            state.adaptive_enabled = enabled;
            enabled && state.active
        };
        if start_loop {
            EngineCore::spawn_adaptive_loop(core);
        } else {
            core.stop_adaptive();
        }
        Ok(())
    }

    // ========================================================================
    // SESSION LIFECYCLE
    // ========================================================================

    /// Start the session and the metronome loop.
    pub fn start_session(&self) -> Result<(), SessionError> {
        let now = self.core.clock.now_ms();
        let (bpm, subdivision, adaptive) = {
            let mut state = self.core.lock_state()?;
            if state.active {
                return Err(SessionError::AlreadyRunning);
            }
            state.start(now);
            (state.bpm(), state.subdivision(), state.adaptive_enabled)
        };

        EngineCore::spawn_scheduler_loop(&self.core)?;
        if adaptive {
            EngineCore::spawn_adaptive_loop(&self.core);
        }
        self.init_command_worker();
        self.core
            .publish(SessionEvent::SessionStarted { bpm, subdivision });
        Ok(())
    }

    /// Stop the session, halting all periodic loops synchronously.
    pub fn stop_session(&self) -> Result<(), SessionError> {
        let now = self.core.clock.now_ms();
        {
            let mut state = self.core.lock_state()?;
            if !state.active {
                return Err(SessionError::NotRunning);
            }
            state.stop(now);
        }
        self.core.stop_scheduler();
        self.core.stop_adaptive();
        self.core.publish(SessionEvent::SessionStopped);
        Ok(())
    }

    /// Discard the session and reinitialize from config defaults.
    pub fn reset_session(&self) -> Result<(), SessionError> {
        self.core.stop_scheduler();
        self.core.stop_adaptive();
        self.core.lock_state()?.reset();
        Ok(())
    }

    // ========================================================================
    // PARAMETERS
    // ========================================================================

    pub fn set_bpm(&self, bpm: u32) -> Result<(), SessionError> {
        Self::apply_bpm(&self.core, bpm)
    }

    pub fn set_subdivision(&self, subdivision: u32) -> Result<(), SessionError> {
        Self::apply_subdivision(&self.core, subdivision)
    }

    pub fn set_adaptive(&self, enabled: bool) -> Result<(), SessionError> {
        Self::apply_adaptive(&self.core, enabled)
    }

    // ========================================================================
    // PRODUCER CALLBACKS
    // ========================================================================

    /// Ingest one raw device event, returning the judged hit when accepted.
    pub fn push_raw_hit(&self, event: RawDeviceEvent) -> Result<Option<HitEvent>, SessionError> {
        let hit = self.core.lock_state()?.on_raw_hit(&event);
        if let Some(hit) = &hit {
            self.core.audio.play_feedback(hit.timing);
            self.core.publish(SessionEvent::HitClassified { hit: hit.clone() });
        }
        Ok(hit)
    }

    /// Ingest one pose landmark frame.
    pub fn push_landmark_frame(&self, frame: LandmarkFrame) -> Result<(), SessionError> {
        self.core.lock_state()?.on_landmark_frame(&frame);
        Ok(())
    }

    /// Merge a remote-classifier prediction (best effort).
    pub fn push_prediction(&self, prediction: Prediction) -> Result<(), SessionError> {
        self.core.lock_state()?.on_prediction(prediction);
        Ok(())
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn summary(&self) -> Result<SessionSummary, SessionError> {
        let now = self.core.clock.now_ms();
        Ok(self.core.lock_state()?.summary(now))
    }

    /// Run a closure against the locked session state.
    pub fn with_state<R>(
        &self,
        f: impl FnOnce(&SessionState) -> R,
    ) -> Result<R, SessionError> {
        let state = self.core.lock_state()?;
        Ok(f(&state))
    }
}

impl Drop for TrainerHandle {
    fn drop(&mut self) {
        self.core.stop_scheduler();
        self.core.stop_adaptive();
    }
}
