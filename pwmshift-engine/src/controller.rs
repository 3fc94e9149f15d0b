//! Mode arbitration: the single entry point for every color change.
//!
//! Both the console and the remote listener call into one shared
//! [`ModeController`]. Each operation is a full transition:
//!
//! 1. preempt any foreground ramp still running on another caller's thread,
//! 2. take the transition lock,
//! 3. stop the active auto-cycle worker (cancel, wait for exit, join),
//! 4. update mode and base color, then ramp or spawn the next worker.
//!
//! Because the lock covers steps 3 and 4, two callers can never interleave
//! a stop with a spawn, and at most one worker ever writes the output.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use atomic_enum::atomic_enum;
use derive_more::{Display, Error, From};
use log::{debug, info};

use crate::cancel::CancelToken;
use crate::level::{Channel, ColorTriple, Output, SharedOutput, BLACK};
use crate::lock;
use crate::pattern::{Pattern, Preset};
use crate::ramp::{ramp, RampOutcome};
use crate::sink::OutputSink;
use crate::worker::{AtomicWorkerState, AutoCycleWorker, WorkerState};

/// Default time to fade back to the base color after leaving auto mode.
pub const DEFAULT_RECOVERY_RAMP_MS: u32 = 1000;

/// What is currently driving the output.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Disabled,
    Crazy,
    NamedPattern(Pattern),
    RemotePattern(Pattern),
}

impl Mode {
    #[must_use]
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::Disabled => ModeKind::Disabled,
            Self::Crazy => ModeKind::Crazy,
            Self::NamedPattern(_) => ModeKind::NamedPattern,
            Self::RemotePattern(_) => ModeKind::RemotePattern,
        }
    }
}

/// Data-free tag of [`Mode`], readable without the transition lock.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum ModeKind {
    Disabled,
    Crazy,
    NamedPattern,
    RemotePattern,
}

impl ModeKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Crazy => "crazy",
            Self::NamedPattern => "pattern",
            Self::RemotePattern => "remote pattern",
        }
    }
}

/// Who asked for a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSource {
    Named,
    Remote,
}

#[derive(Debug, Display, Error, From)]
pub enum EngineError {
    #[display("failed to spawn auto-cycle worker: {_0}")]
    Spawn(std::io::Error),
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub current: ColorTriple,
    pub base: ColorTriple,
    pub mode: ModeKind,
    pub worker: WorkerState,
}

/// State only touched while holding the transition lock.
struct EngineState {
    mode: Mode,
    worker: Option<AutoCycleWorker>,
}

pub struct ModeController {
    output: SharedOutput,
    transition: Mutex<EngineState>,
    /// Token of the most recent foreground transition
    foreground: Mutex<CancelToken>,
    base: Mutex<ColorTriple>,
    mode_kind: AtomicModeKind,
    worker_state: Arc<AtomicWorkerState>,
    recovery_ramp_ms: u32,
}

impl ModeController {
    /// Take ownership of the sink and drive it to all-zero.
    pub fn new(sink: impl OutputSink + 'static, recovery_ramp_ms: u32) -> Self {
        let mut output = Output::new(sink);
        output.set_levels(BLACK);

        Self {
            output: output.shared(),
            transition: Mutex::new(EngineState {
                mode: Mode::Disabled,
                worker: None,
            }),
            foreground: Mutex::new(CancelToken::new()),
            base: Mutex::new(BLACK),
            mode_kind: AtomicModeKind::new(ModeKind::Disabled),
            worker_state: Arc::new(AtomicWorkerState::new(WorkerState::Exited)),
            recovery_ramp_ms,
        }
    }

    /// Stop auto mode, remember `levels` as the base color and ramp to it.
    pub fn set_static(&self, levels: ColorTriple, duration_ms: u32) -> RampOutcome {
        let (mut state, token) = self.begin_transition();
        self.stop_auto(&mut state);
        *lock(&self.base) = levels;
        info!("Static color {levels:?} over {duration_ms}ms");
        ramp(&self.output, levels, duration_ms, &token)
    }

    /// Stop auto mode and switch the output off.
    pub fn off(&self) -> RampOutcome {
        info!("Off");
        self.set_static(BLACK, 0)
    }

    /// Leave auto mode and fade back to the base color.
    ///
    /// Does nothing when no auto mode is active.
    pub fn disable_auto(&self) -> RampOutcome {
        // Leave another caller's ramp alone when there is nothing to stop
        if self.mode_kind.load(Ordering::SeqCst) == ModeKind::Disabled {
            debug!("Auto mode not active, nothing to disable");
            return RampOutcome::Completed;
        }
        let (mut state, token) = self.begin_transition();
        if !self.stop_auto(&mut state) {
            debug!("Auto mode not active, nothing to disable");
            return RampOutcome::Completed;
        }
        let base = *lock(&self.base);
        info!("Auto mode disabled, restoring {base:?}");
        ramp(&self.output, base, self.recovery_ramp_ms, &token)
    }

    /// Replace any active auto mode with a worker playing `pattern`.
    pub fn start_pattern(
        &self,
        pattern: Pattern,
        ramp_ms: u32,
        source: PatternSource,
    ) -> Result<(), EngineError> {
        let mode = match source {
            PatternSource::Named => Mode::NamedPattern(pattern.clone()),
            PatternSource::Remote => Mode::RemotePattern(pattern.clone()),
        };
        self.start_auto(mode, pattern, ramp_ms)
    }

    pub fn start_preset(&self, preset: Preset) -> Result<(), EngineError> {
        info!("Starting preset '{}'", preset.name());
        self.start_pattern(preset.pattern(), preset.ramp_ms(), PatternSource::Named)
    }

    /// Random colors, ramping `step_delay_ms` into each.
    pub fn start_crazy(&self, step_delay_ms: u32) -> Result<(), EngineError> {
        self.start_auto(Mode::Crazy, Pattern::crazy(), step_delay_ms)
    }

    /// Nudge the base color of `channels` by `delta`.
    ///
    /// Outside auto mode the new base is written straight to the output;
    /// during auto mode it only takes effect once auto mode is left.
    pub fn adjust_static(&self, channels: &[Channel], delta: f64) -> ColorTriple {
        let (state, _token) = self.begin_transition();

        let base = {
            let mut base = lock(&self.base);
            for &channel in channels {
                let next = channel.get(*base).offset(delta);
                channel.set(&mut base, next);
            }
            *base
        };

        if matches!(state.mode, Mode::Disabled) {
            let mut output = lock(&self.output);
            match channels {
                [channel] => output.set_channel(*channel, channel.get(base)),
                _ => output.set_levels(base),
            }
        }
        base
    }

    /// Stop auto mode and write all-zero immediately.
    pub fn shutdown(&self) {
        let (mut state, _token) = self.begin_transition();
        if self.stop_auto(&mut state) {
            info!("Auto mode stopped for shutdown");
        }
        lock(&self.output).set_levels(BLACK);
    }

    #[must_use]
    pub fn status(&self) -> Status {
        let current = lock(&self.output).current();
        let base = *lock(&self.base);
        Status {
            current,
            base,
            mode: self.mode_kind.load(Ordering::SeqCst),
            worker: self.worker_state.load(Ordering::SeqCst),
        }
    }

    /// Cancel the previous caller's foreground ramp, then wait for the lock.
    fn begin_transition(&self) -> (MutexGuard<'_, EngineState>, CancelToken) {
        let token = CancelToken::new();
        let previous = std::mem::replace(&mut *lock(&self.foreground), token.clone());
        previous.cancel();
        (lock(&self.transition), token)
    }

    /// Stop protocol. Returns `true` if an auto mode was active.
    fn stop_auto(&self, state: &mut EngineState) -> bool {
        if matches!(state.mode, Mode::Disabled) {
            return false;
        }
        debug!("Stopping {} mode", state.mode.kind().label());

        state.mode = Mode::Disabled;
        self.mode_kind.store(ModeKind::Disabled, Ordering::SeqCst);
        if let Some(worker) = state.worker.take() {
            worker.stop();
        }
        debug_assert!(!self.worker_state.load(Ordering::SeqCst).is_alive());
        true
    }

    fn start_auto(&self, mode: Mode, pattern: Pattern, ramp_ms: u32) -> Result<(), EngineError> {
        let (mut state, _token) = self.begin_transition();
        self.stop_auto(&mut state);

        let kind = mode.kind();
        info!(
            "Starting {} mode: {} steps, ramp {ramp_ms}ms",
            kind.label(),
            pattern.len()
        );
        let worker = AutoCycleWorker::spawn(
            pattern,
            ramp_ms,
            self.output.clone(),
            self.worker_state.clone(),
        )?;

        state.mode = mode;
        state.worker = Some(worker);
        self.mode_kind.store(kind, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        let state = self
            .transition
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(worker) = state.worker.take() {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{color, Intensity};
    use crate::pattern::ColorStep;
    use crate::sink::{RecordingSink, SinkWrite};
    use std::time::{Duration, Instant};

    fn controller() -> (Arc<ModeController>, RecordingSink) {
        let sink = RecordingSink::new();
        let controller = ModeController::new(sink.clone(), 20);
        sink.clear();
        (Arc::new(controller), sink)
    }

    fn wait_for_writes(sink: &RecordingSink, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for writes");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn two_step_pattern() -> Pattern {
        Pattern::new(vec![
            ColorStep::new(color(0.0, 1.0, 0.0), 0),
            ColorStep::new(color(0.0, 0.0, 1.0), 0),
        ])
        .expect("non-empty")
    }

    #[test]
    fn test_new_writes_zero() {
        let sink = RecordingSink::new();
        let controller = ModeController::new(sink.clone(), DEFAULT_RECOVERY_RAMP_MS);
        assert_eq!(sink.writes(), vec![SinkWrite::Levels(BLACK)]);
        let status = controller.status();
        assert_eq!(status.mode, ModeKind::Disabled);
        assert_eq!(status.worker, WorkerState::Exited);
    }

    #[test]
    fn test_set_static_updates_base_and_output() {
        let (controller, sink) = controller();
        let target = color(0.2, 0.4, 0.6);

        assert_eq!(controller.set_static(target, 10), RampOutcome::Completed);

        let status = controller.status();
        assert_eq!(status.base, target);
        assert_eq!(status.current, target);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_pattern_then_static_stops_worker() {
        let (controller, sink) = controller();
        controller
            .start_pattern(two_step_pattern(), 0, PatternSource::Remote)
            .expect("start pattern");
        wait_for_writes(&sink, 2);
        assert_eq!(controller.status().mode, ModeKind::RemotePattern);
        assert!(controller.status().worker.is_alive());

        controller.set_static(color(1.0, 0.0, 0.0), 0);

        let status = controller.status();
        assert_eq!(status.mode, ModeKind::Disabled);
        assert_eq!(status.worker, WorkerState::Exited);
        assert_eq!(status.current, color(1.0, 0.0, 0.0));

        // Nothing writes after the transition finished
        let settled = sink.len();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.len(), settled);
    }

    #[test]
    fn test_disable_auto_restores_base() {
        let (controller, sink) = controller();
        let base = color(0.1, 0.1, 0.1);
        controller.set_static(base, 0);
        controller.start_crazy(0).expect("start crazy");
        wait_for_writes(&sink, 5);

        assert_eq!(controller.disable_auto(), RampOutcome::Completed);

        let status = controller.status();
        assert_eq!(status.mode, ModeKind::Disabled);
        assert_eq!(status.current, base);
    }

    #[test]
    fn test_disable_auto_without_auto_is_noop() {
        let (controller, sink) = controller();
        controller.set_static(color(0.5, 0.5, 0.5), 0);
        sink.clear();

        assert_eq!(controller.disable_auto(), RampOutcome::Completed);

        assert!(sink.is_empty());
        let status = controller.status();
        assert_eq!(status.mode, ModeKind::Disabled);
        assert_eq!(status.worker, WorkerState::Exited);
    }

    #[test]
    fn test_new_pattern_does_not_restore_base() {
        let (controller, sink) = controller();
        controller.set_static(color(1.0, 1.0, 1.0), 0);

        let hold_red = Pattern::new(vec![ColorStep::new(color(1.0, 0.0, 0.0), 60_000)])
            .expect("non-empty");
        controller
            .start_pattern(hold_red, 0, PatternSource::Named)
            .expect("start pattern");
        wait_for_writes(&sink, 2);

        sink.clear();
        let hold_blue = Pattern::new(vec![ColorStep::new(color(0.0, 0.0, 1.0), 60_000)])
            .expect("non-empty");
        controller
            .start_pattern(hold_blue, 0, PatternSource::Named)
            .expect("start pattern");
        wait_for_writes(&sink, 1);

        // The stopped worker left red behind and nobody faded back to white
        assert_eq!(
            sink.writes().first(),
            Some(&SinkWrite::Levels(color(0.0, 0.0, 1.0)))
        );
        assert_eq!(controller.status().base, color(1.0, 1.0, 1.0));
        controller.shutdown();
    }

    #[test]
    fn test_off_zeroes_base_and_output() {
        let (controller, _sink) = controller();
        controller.set_static(color(0.7, 0.7, 0.7), 0);
        controller.start_preset(Preset::Halloween).expect("start preset");

        assert_eq!(controller.off(), RampOutcome::Completed);

        let status = controller.status();
        assert_eq!(status.base, BLACK);
        assert_eq!(status.current, BLACK);
        assert_eq!(status.mode, ModeKind::Disabled);
    }

    #[test]
    fn test_adjust_static_single_channel() {
        let (controller, sink) = controller();
        let base = controller.adjust_static(&[Channel::Red], 0.1);

        assert!((base.r.get() - 0.1).abs() < 1e-9);
        assert_eq!(
            sink.writes(),
            vec![SinkWrite::Channel(Channel::Red, base.r)]
        );
    }

    #[test]
    fn test_adjust_static_stops_at_zero() {
        let (controller, _sink) = controller();
        let base = controller.adjust_static(&[Channel::Green], -0.1);
        assert_eq!(base.g, Intensity::OFF);
        assert_eq!(controller.status().current, BLACK);
    }

    #[test]
    fn test_adjust_static_during_auto_only_changes_base() {
        let (controller, sink) = controller();
        let hold = Pattern::new(vec![ColorStep::new(color(0.0, 1.0, 0.0), 60_000)])
            .expect("non-empty");
        controller
            .start_pattern(hold, 0, PatternSource::Named)
            .expect("start pattern");
        wait_for_writes(&sink, 1);
        sink.clear();

        let base = controller.adjust_static(&Channel::ALL, 0.3);

        assert!(sink.is_empty());
        assert!((base.b.get() - 0.3).abs() < 1e-9);
        assert_eq!(controller.status().mode, ModeKind::NamedPattern);
        controller.shutdown();
    }

    #[test]
    fn test_adjust_static_clamps_at_full() {
        let (controller, _sink) = controller();
        controller.set_static(color(0.95, 0.0, 0.0), 0);
        let base = controller.adjust_static(&Channel::ALL, 0.1);
        assert_eq!(base.r, Intensity::FULL);
        assert!((base.g.get() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_later_transition_preempts_long_ramp() {
        let (controller, _sink) = controller();
        let slow = {
            let controller = controller.clone();
            std::thread::spawn(move || controller.set_static(color(1.0, 1.0, 1.0), 60_000))
        };
        std::thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        assert_eq!(controller.set_static(color(0.0, 0.0, 1.0), 0), RampOutcome::Completed);
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(slow.join().expect("slow thread"), RampOutcome::Cancelled);
        assert_eq!(controller.status().current, color(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_idle_disable_leaves_running_ramp_alone() {
        let (controller, _sink) = controller();
        let white = color(1.0, 1.0, 1.0);
        let ramping = {
            let controller = controller.clone();
            std::thread::spawn(move || controller.set_static(white, 300))
        };
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(controller.disable_auto(), RampOutcome::Completed);

        assert_eq!(ramping.join().expect("ramp thread"), RampOutcome::Completed);
        let status = controller.status();
        assert_eq!(status.current, white);
        assert_eq!(status.base, white);
        assert_eq!(status.mode, ModeKind::Disabled);
    }

    #[test]
    fn test_concurrent_starts_leave_one_worker() {
        let (controller, sink) = controller();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let controller = controller.clone();
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        controller.start_crazy(0)
                    } else {
                        controller.start_pattern(two_step_pattern(), 0, PatternSource::Remote)
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("caller thread").expect("start auto");
        }

        assert!(controller.status().worker.is_alive());
        controller.shutdown();
        assert_eq!(controller.status().worker, WorkerState::Exited);
        assert_eq!(sink.last(), Some(SinkWrite::Levels(BLACK)));

        let settled = sink.len();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.len(), settled);
    }
}
