//! Background task that plays a pattern until told to stop.
//!
//! The controller owns the only [`AutoCycleWorker`] handle, so stopping one
//! worker and starting the next is strictly ordered: `stop` does not return
//! until the thread has left its loop and been joined.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use atomic_enum::atomic_enum;
use log::{debug, error, warn};
use rand::Rng;

use crate::cancel::CancelToken;
use crate::level::{ColorTriple, Intensity, SharedOutput};
use crate::pattern::Pattern;
use crate::ramp::{ramp, RampOutcome};

/// Stop waits longer than this get logged.
const SLOW_STOP_WARNING: Duration = Duration::from_secs(1);

/// Upper bound (exclusive) for each channel of a random color.
const CRAZY_MAX_LEVEL: f64 = 0.5;

/// Lifecycle of the auto-cycle worker. Anything but `Exited` counts as alive.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Exited,
}

impl WorkerState {
    #[must_use]
    pub fn is_alive(self) -> bool {
        self != Self::Exited
    }
}

/// Handle to a running worker thread.
pub struct AutoCycleWorker {
    token: CancelToken,
    state: Arc<AtomicWorkerState>,
    exited: oneshot::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Marks the worker exited and fires the exit signal, even on unwind.
struct ExitGuard {
    state: Arc<AtomicWorkerState>,
    exited: Option<oneshot::Sender<()>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.state.store(WorkerState::Exited, Ordering::SeqCst);
        if let Some(tx) = self.exited.take() {
            // The receiver only goes away together with the handle
            let _ = tx.send(());
        }
    }
}

impl AutoCycleWorker {
    /// Spawn a worker that loops over `pattern`, ramping `ramp_ms` into each step.
    ///
    /// `state` is the controller's liveness flag; the worker moves it to
    /// `Running` and finally `Exited`.
    pub fn spawn(
        pattern: Pattern,
        ramp_ms: u32,
        output: SharedOutput,
        state: Arc<AtomicWorkerState>,
    ) -> std::io::Result<Self> {
        let token = CancelToken::new();
        let (exited_tx, exited) = oneshot::channel();
        state.store(WorkerState::Starting, Ordering::SeqCst);

        let guard = ExitGuard {
            state: state.clone(),
            exited: Some(exited_tx),
        };
        let worker_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("auto-cycle".to_string())
            .spawn(move || {
                let guard = guard;
                run(&pattern, ramp_ms, &output, &worker_token, &guard.state);
            });

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                state.store(WorkerState::Exited, Ordering::SeqCst);
                return Err(e);
            }
        };

        Ok(Self {
            token,
            state,
            exited,
            handle,
        })
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state.load(Ordering::SeqCst)
    }

    /// Cancel the worker and block until its thread has exited.
    pub fn stop(self) {
        self.state.store(WorkerState::Stopping, Ordering::SeqCst);
        self.token.cancel();

        // Sent, or the guard dropped without sending: exited either way
        if let Err(oneshot::RecvTimeoutError::Timeout) = self.exited.recv_timeout(SLOW_STOP_WARNING) {
            warn!("Auto-cycle worker still running after {SLOW_STOP_WARNING:?}, waiting");
        }

        // No deadline: the worker checks its token at least every few ms
        if self.handle.join().is_err() {
            error!("Auto-cycle worker panicked");
        }
        debug!("Auto-cycle worker stopped");
    }
}

fn run(
    pattern: &Pattern,
    ramp_ms: u32,
    output: &SharedOutput,
    token: &CancelToken,
    state: &AtomicWorkerState,
) {
    // A stop may already have been requested before the thread got here
    let _ = state.compare_exchange(
        WorkerState::Starting,
        WorkerState::Running,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    debug!(
        "Auto-cycle worker running: {} steps, ramp {ramp_ms}ms",
        pattern.len()
    );

    let crazy = pattern.is_crazy();
    let mut rng = rand::thread_rng();
    let mut index = 0;

    while !token.is_cancelled() {
        let step = pattern.step(index);
        let target = if crazy {
            random_color(&mut rng)
        } else {
            step.color
        };

        if ramp(output, target, ramp_ms, token) == RampOutcome::Cancelled {
            break;
        }
        if !token.sleep_ms(step.rest_ms) {
            break;
        }

        index = (index + 1) % pattern.len();
    }
}

/// Each channel drawn independently from `[0, 0.5)`.
fn random_color(rng: &mut impl Rng) -> ColorTriple {
    let mut channel = || Intensity::new(rng.gen_range(0.0..CRAZY_MAX_LEVEL));
    ColorTriple::new(channel(), channel(), channel())
}
