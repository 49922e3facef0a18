//! Clock port: wall time plus one-shot delayed callbacks.
//!
//! Nothing else in the engine reads the system time; everything goes
//! through a [`Clock`] so tests can drive time with [`ManualClock`].

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::task::AbortHandle;

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Run `callback` once after `delay`. Non-positive delays fire on the
    /// next opportunity, never synchronously inside `after`.
    fn after(&self, delay: Duration, callback: TimerCallback) -> CancellationToken;
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Default)]
struct TokenState {
    state: AtomicU8,
    abort: OnceLock<AbortHandle>,
}

/// Handle to a pending timer.
///
/// A timer ends exactly once: either it fires or it is cancelled.
/// `cancel()` after firing (or twice) is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(handle) = self.inner.abort.get() {
                handle.abort();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn has_fired(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FIRED
    }

    /// Claim the right to run the callback. False if already cancelled or fired.
    pub(crate) fn try_fire(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn attach_abort(&self, handle: AbortHandle) {
        let _ = self.inner.abort.set(handle);
        if self.is_cancelled() {
            if let Some(handle) = self.inner.abort.get() {
                handle.abort();
            }
        }
    }
}

/// Wall clock; timers are tokio tasks. `after` must be called inside a
/// tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn after(&self, delay: Duration, callback: TimerCallback) -> CancellationToken {
        let token = CancellationToken::new();
        let fire = token.clone();
        let sleep_for = delay.to_std().unwrap_or(std::time::Duration::ZERO);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;
            if fire.try_fire() {
                callback();
            }
        });
        token.attach_abort(handle.abort_handle());
        token
    }
}

struct ManualTimer {
    token: CancellationToken,
    callback: TimerCallback,
}

struct ManualState {
    now: DateTime<Utc>,
    seq: u64,
    timers: BTreeMap<(DateTime<Utc>, u64), ManualTimer>,
}

/// Virtual clock. Time only moves when told to; timers fire inside
/// [`ManualClock::advance`]. Clones share the same timeline.
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualClock")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .finish()
    }
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now,
                seq: 0,
                timers: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jump to `now` without firing anything.
    pub fn set(&self, now: DateTime<Utc>) {
        self.lock().now = now;
    }

    /// Move time forward and fire every due timer in (fire time, registration)
    /// order. Returns how many callbacks ran.
    pub fn advance(&self, by: Duration) -> usize {
        {
            let mut state = self.lock();
            state.now += by.max(Duration::zero());
        }

        let mut fired = 0;
        loop {
            // Pop under the lock, run the callback outside it: callbacks may
            // register new timers.
            let next = {
                let mut state = self.lock();
                let now = state.now;
                let due = matches!(state.timers.first_key_value(), Some((&(at, _), _)) if at <= now);
                if due {
                    state.timers.pop_first().map(|(_, t)| t)
                } else {
                    None
                }
            };
            let Some(timer) = next else { break };
            if timer.token.try_fire() {
                (timer.callback)();
                fired += 1;
            }
        }
        fired
    }

    /// Fire whatever is due at the current instant.
    pub fn fire_due(&self) -> usize {
        self.advance(Duration::zero())
    }

    /// Timers that are neither fired nor cancelled.
    pub fn pending_timers(&self) -> usize {
        self.lock()
            .timers
            .values()
            .filter(|t| !t.token.is_cancelled())
            .count()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn after(&self, delay: Duration, callback: TimerCallback) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = self.lock();
        let at = state.now + delay.max(Duration::zero());
        state.seq += 1;
        let seq = state.seq;
        state.timers.insert(
            (at, seq),
            ManualTimer {
                token: token.clone(),
                callback,
            },
        );
        token
    }
}
