//! Color transition and mode arbitration engine for pwmshift
//!
//! This library owns everything between "someone asked for a color" and
//! "the PWM device got a line of text": linear ramps, the auto-cycle worker
//! that plays patterns, and the mode controller that makes sure only one
//! writer drives the output at a time. It is hardware-agnostic; the device
//! is reached through the [`OutputSink`] trait.

pub mod cancel;
pub mod controller;
pub mod level;
pub mod pattern;
pub mod ramp;
pub mod sink;
pub mod worker;

pub use cancel::CancelToken;
pub use controller::{
    EngineError, Mode, ModeController, ModeKind, PatternSource, Status, DEFAULT_RECOVERY_RAMP_MS,
};
pub use level::{color, Channel, ColorTriple, Intensity, Output, SharedOutput, BLACK};
pub use pattern::{ColorStep, Pattern, PatternError, Preset, MAX_STEPS};
pub use ramp::{ramp, RampOutcome, STEP_INTERVAL_MS};
pub use rgb::RGB;
pub use sink::{OutputSink, PiBlasterSink, PinMap, RecordingSink, SinkWrite};
pub use worker::{AutoCycleWorker, WorkerState};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if another thread panicked while holding it.
///
/// Every value guarded in this crate stays valid across a panic (plain
/// colors and handles), so poisoning carries no information we act on.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
