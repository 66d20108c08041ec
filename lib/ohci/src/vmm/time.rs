// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One-shot timers used by devices to schedule periodic work.
//!
//! A [FrameTimer] holds at most one pending callback. Arming it replaces any
//! callback still outstanding. Callbacks are always invoked without any
//! timer-internal lock held, so they are free to re-arm the timer.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type TimerFn = Box<dyn FnOnce() + Send + 'static>;

pub trait FrameTimer: Send + Sync + 'static {
    /// Monotonic time elapsed since the timer was created.
    fn now(&self) -> Duration;

    /// Schedule `func` to run once `delay` has elapsed.
    fn arm(&self, delay: Duration, func: TimerFn);

    /// Cancel the pending callback (if any).
    ///
    /// A callback which has already been dequeued for execution may still
    /// run; callers must be prepared to discard such stragglers.
    fn disarm(&self);
}

struct Pending {
    deadline: Duration,
    func: TimerFn,
}

#[derive(Default)]
struct ThreadTimerState {
    pending: Option<Pending>,
    terminate: bool,
}

/// Timer backed by a dedicated host thread.
pub struct ThreadTimer {
    epoch: Instant,
    inner: Arc<(Mutex<ThreadTimerState>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimer {
    pub fn new(name: &str) -> std::io::Result<Arc<Self>> {
        let epoch = Instant::now();
        let inner = Arc::new((
            Mutex::new(ThreadTimerState::default()),
            Condvar::new(),
        ));
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::wait_loop(epoch, worker_inner))?;

        Ok(Arc::new(Self { epoch, inner, worker: Mutex::new(Some(worker)) }))
    }

    fn wait_loop(
        epoch: Instant,
        inner: Arc<(Mutex<ThreadTimerState>, Condvar)>,
    ) {
        let (state, cvar) = &*inner;
        let mut guard = state.lock().unwrap();
        loop {
            guard = cvar
                .wait_while(guard, |s| s.pending.is_none() && !s.terminate)
                .unwrap();
            if guard.terminate {
                break;
            }
            let deadline = match guard.pending.as_ref() {
                Some(p) => p.deadline,
                None => continue,
            };

            let now = epoch.elapsed();
            if deadline > now {
                // Sleep until the deadline, waking early if the pending
                // callback changes or the timer is torn down.
                let (g, _) = cvar
                    .wait_timeout_while(guard, deadline - now, |s| {
                        !s.terminate
                            && s.pending.as_ref().map(|p| p.deadline)
                                == Some(deadline)
                    })
                    .unwrap();
                guard = g;
                continue;
            }

            if let Some(Pending { func, .. }) = guard.pending.take() {
                drop(guard);
                func();
                guard = state.lock().unwrap();
            }
        }
    }
}

impl FrameTimer for ThreadTimer {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn arm(&self, delay: Duration, func: TimerFn) {
        let (state, cvar) = &*self.inner;
        let deadline = self.now() + delay;
        state.lock().unwrap().pending = Some(Pending { deadline, func });
        cvar.notify_one();
    }

    fn disarm(&self) {
        let (state, cvar) = &*self.inner;
        state.lock().unwrap().pending = None;
        cvar.notify_one();
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        let (state, cvar) = &*self.inner;
        {
            let mut guard = state.lock().unwrap();
            guard.terminate = true;
            guard.pending = None;
        }
        cvar.notify_all();

        if let Some(worker) = self.worker.lock().unwrap().take() {
            // The final reference may be released by a callback running on
            // the worker itself, which cannot join itself.
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    pending: Option<Pending>,
}

/// Timer whose clock only moves when explicitly advanced.
///
/// Callbacks run synchronously on the thread calling [ManualTimer::advance],
/// making frame-by-frame behavior fully deterministic.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deadline of the pending callback, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.state.lock().unwrap().pending.as_ref().map(|p| p.deadline)
    }

    pub fn is_armed(&self) -> bool {
        self.deadline().is_some()
    }

    /// Move the clock forward by `delta`, firing every callback which comes
    /// due along the way (including ones armed by earlier callbacks).
    ///
    /// Returns the number of callbacks fired.
    pub fn advance(&self, delta: Duration) -> usize {
        let target = self.state.lock().unwrap().now + delta;
        let mut fired = 0;
        loop {
            let func = {
                let mut state = self.state.lock().unwrap();
                match state.pending.take() {
                    Some(p) if p.deadline <= target => {
                        state.now = state.now.max(p.deadline);
                        p.func
                    }
                    other => {
                        state.pending = other;
                        state.now = target;
                        break;
                    }
                }
            };
            func();
            fired += 1;
        }
        fired
    }
}

impl FrameTimer for ManualTimer {
    fn now(&self) -> Duration {
        self.state.lock().unwrap().now
    }

    fn arm(&self, delay: Duration, func: TimerFn) {
        let mut state = self.state.lock().unwrap();
        let deadline = state.now + delay;
        state.pending = Some(Pending { deadline, func });
    }

    fn disarm(&self) {
        self.state.lock().unwrap().pending = None;
    }
}
