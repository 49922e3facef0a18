//! Reminder scheduler: reconciles a changing task set against wall time.
//!
//! Per reminder key the lifecycle is
//!
//! ```text
//! Unneeded -> Pending (timer live) -> Fired (ledger entry) -> Unneeded (pruned)
//!                  \-> Cancelled -> Unneeded
//! ```
//!
//! The scheduler owns the ledger, the live timer map and the last task
//! snapshot; nothing else touches them. Timer callbacks do not run reminder
//! logic themselves: they post a [`TimerFired`] into the scheduler's queue,
//! which is drained by [`ReminderScheduler::run_due`] or the service loop.
//! A fire marks the ledger before anything user-visible happens, so a
//! reconciliation triggered by the delivery already sees the key as fired.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::{CancellationToken, Clock};
use crate::error::ReminderError;
use crate::ledger::ReminderLedger;
use crate::reminders::{ReminderKey, ReminderPolicy};
use crate::sink::NotificationSink;
use crate::task::{Task, TaskId};

/// Posted by a timer callback when its delay elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: ReminderKey,
    pub timer_id: u64,
}

/// A live timer. Held only in memory.
#[derive(Debug)]
pub struct ScheduledTimer {
    pub key: ReminderKey,
    pub fire_at: DateTime<Utc>,
    id: u64,
    token: CancellationToken,
}

impl ScheduledTimer {
    fn cancel(self) {
        self.token.cancel();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Size of the desired set after this pass.
    pub desired: usize,
    pub scheduled: Vec<ReminderKey>,
    pub cancelled: Vec<ReminderKey>,
    pub pruned: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.scheduled.is_empty() && self.cancelled.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Delivered,
    /// Ledger written, delivery attempted and failed. Not retried.
    Failed(String),
    /// Ledger written, sink unavailable.
    Skipped,
    /// Timer was cancelled or superseded before its event was handled.
    Stale,
    AlreadyFired,
}

pub struct ReminderScheduler<C: Clock, S: NotificationSink> {
    clock: C,
    sink: S,
    policy: ReminderPolicy,
    ledger: ReminderLedger,

    timers: HashMap<ReminderKey, ScheduledTimer>,
    tasks: HashMap<TaskId, Task>,

    fired_tx: mpsc::UnboundedSender<TimerFired>,
    fired_rx: mpsc::UnboundedReceiver<TimerFired>,
    next_timer_id: u64,

    warned_unavailable: bool,
}

impl<C: Clock, S: NotificationSink> ReminderScheduler<C, S> {
    pub fn new(clock: C, sink: S, mut ledger: ReminderLedger) -> Self {
        let policy = ReminderPolicy::default();
        ledger.cover_window(policy.longest_window());
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            clock,
            sink,
            policy,
            ledger,
            timers: HashMap::new(),
            tasks: HashMap::new(),
            fired_tx,
            fired_rx,
            next_timer_id: 0,
            warned_unavailable: false,
        }
    }

    /// Retention is widened to cover the policy's longest window.
    pub fn with_policy(mut self, policy: ReminderPolicy) -> Self {
        self.ledger.cover_window(policy.longest_window());
        self.policy = policy;
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn ledger(&self) -> &ReminderLedger {
        &self.ledger
    }

    pub fn is_pending(&self, key: &ReminderKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn pending_keys(&self) -> Vec<ReminderKey> {
        let mut keys: Vec<ReminderKey> = self.timers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn pending_timers(&self) -> impl Iterator<Item = &ScheduledTimer> {
        self.timers.values()
    }

    /// Bring live timers in line with `tasks` at `now`.
    ///
    /// Cancellations are applied before new schedules, so a key whose
    /// eligibility flips within one pass is never double-armed.
    pub fn reconcile(&mut self, tasks: &[Task], now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport {
            pruned: self.ledger.prune(now),
            ..Default::default()
        };

        self.tasks = tasks
            .iter()
            .map(|t| (t.id.clone(), t.clone()))
            .collect();

        // Desired keys and the instant each should fire.
        let mut desired: BTreeMap<ReminderKey, DateTime<Utc>> = BTreeMap::new();
        for task in tasks {
            let Some(due) = task.due_date else { continue };
            for key in self.policy.desired_reminders(task, now) {
                let window_start = self.policy.window(key.kind, due).start;
                desired.insert(key, window_start.max(now));
            }
        }
        report.desired = desired.len();

        let stale: Vec<ReminderKey> = self
            .timers
            .keys()
            .filter(|k| !desired.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            if let Some(timer) = self.timers.remove(&key) {
                timer.cancel();
                debug!(%key, "cancelled reminder timer");
                report.cancelled.push(key);
            }
        }
        report.cancelled.sort();

        for (key, fire_at) in desired {
            if self.ledger.has_fired(&key) || self.timers.contains_key(&key) {
                continue;
            }
            self.schedule(key.clone(), fire_at, now);
            report.scheduled.push(key);
        }

        if !report.is_noop() {
            debug!(
                scheduled = report.scheduled.len(),
                cancelled = report.cancelled.len(),
                desired = report.desired,
                "reconciled reminders"
            );
        }
        report
    }

    /// Re-run reconciliation on the last snapshot at the clock's current time.
    pub fn tick(&mut self) -> ReconcileReport {
        let now = self.clock.now();
        let tasks: Vec<Task> = self.tasks.values().cloned().collect();
        self.reconcile(&tasks, now)
    }

    fn schedule(&mut self, key: ReminderKey, fire_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.next_timer_id += 1;
        let id = self.next_timer_id;

        let tx = self.fired_tx.clone();
        let event = TimerFired {
            key: key.clone(),
            timer_id: id,
        };
        let token = self.clock.after(
            fire_at - now,
            Box::new(move || {
                // Receiver gone means the scheduler is gone; nothing to do.
                let _ = tx.send(event);
            }),
        );

        debug!(%key, %fire_at, "scheduled reminder timer");
        self.timers.insert(
            key.clone(),
            ScheduledTimer {
                key,
                fire_at,
                id,
                token,
            },
        );
    }

    /// Handle one fired timer.
    pub fn handle_fired(&mut self, event: TimerFired) -> FireOutcome {
        let current = self
            .timers
            .get(&event.key)
            .is_some_and(|t| t.id == event.timer_id);
        if !current {
            return FireOutcome::Stale;
        }
        self.timers.remove(&event.key);

        let key = event.key;
        if self.ledger.has_fired(&key) {
            return FireOutcome::AlreadyFired;
        }
        let Some(task) = self.tasks.get(&key.task_id).cloned() else {
            return FireOutcome::Stale;
        };

        // Ledger first: anything the delivery triggers must see this key as fired.
        self.ledger.mark_fired(&key, self.clock.now());

        if !self.sink.is_available() {
            let e = ReminderError::PermissionDenied("notification sink unavailable".into());
            if self.warned_unavailable {
                debug!(%key, "skipping delivery: {e}");
            } else {
                warn!(%key, "skipping delivery: {e}");
                self.warned_unavailable = true;
            }
            return FireOutcome::Skipped;
        }
        self.warned_unavailable = false;

        match self.sink.deliver(&key, &task) {
            Ok(()) => {
                info!(%key, "reminder delivered");
                FireOutcome::Delivered
            }
            Err(e) => {
                warn!(%key, "reminder delivery failed, not retrying: {e}");
                FireOutcome::Failed(e.to_string())
            }
        }
    }

    /// Handle every fire event already queued. Returns how many.
    pub fn run_due(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.fired_rx.try_recv() {
            self.handle_fired(event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next fire event.
    pub async fn next_fired(&mut self) -> Option<TimerFired> {
        self.fired_rx.recv().await
    }

    /// Cancel every live timer without touching the ledger.
    pub fn shutdown(&mut self) {
        let n = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        while self.fired_rx.try_recv().is_ok() {}
        if n > 0 {
            info!("reminder scheduler stopped, cancelled {n} pending timers");
        }
    }
}

impl<C: Clock, S: NotificationSink> Drop for ReminderScheduler<C, S> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reminders::ReminderKind;
    use crate::sink::{InAppSink, PermissionState};
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn setup() -> (ManualClock, InAppSink, ReminderScheduler<ManualClock, InAppSink>) {
        let clock = ManualClock::new(t0());
        let sink = InAppSink::default();
        let scheduler = ReminderScheduler::new(clock.clone(), sink.clone(), ReminderLedger::in_memory());
        (clock, sink, scheduler)
    }

    #[test]
    fn schedules_once_per_key() {
        let (_clock, _sink, mut s) = setup();
        let tasks = vec![Task::new("t1", "x").with_due_date(t0() + Duration::minutes(30))];

        let first = s.reconcile(&tasks, t0());
        assert_eq!(first.scheduled.len(), 2);

        let second = s.reconcile(&tasks, t0());
        assert!(second.is_noop());
        assert_eq!(s.pending_keys().len(), 2);
    }

    #[test]
    fn fire_marks_ledger_and_delivers() {
        let (clock, sink, mut s) = setup();
        let tasks = vec![Task::new("t1", "x").with_due_date(t0() + Duration::hours(2))];
        s.reconcile(&tasks, t0());

        clock.fire_due();
        assert_eq!(s.run_due(), 1);

        let key = ReminderKey::new("t1", ReminderKind::DayBefore);
        assert_eq!(s.ledger().fired_at(&key), Some(t0()));
        assert!(!s.is_pending(&key));
        assert_eq!(sink.banners().len(), 1);
    }

    #[test]
    fn superseded_event_is_stale() {
        let (_clock, _sink, mut s) = setup();
        let outcome = s.handle_fired(TimerFired {
            key: ReminderKey::new("ghost", ReminderKind::Overdue),
            timer_id: 42,
        });
        assert_eq!(outcome, FireOutcome::Stale);
    }

    #[test]
    fn unavailable_sink_still_writes_ledger() {
        let (clock, sink, mut s) = setup();
        sink.set_permission(PermissionState::Denied);
        let tasks = vec![Task::new("t1", "x").with_due_date(t0() - Duration::hours(1))];
        s.reconcile(&tasks, t0());
        clock.fire_due();
        s.run_due();

        let key = ReminderKey::new("t1", ReminderKind::Overdue);
        assert!(s.ledger().has_fired(&key));
        assert!(sink.banners().is_empty());

        // Permission coming back does not resurrect the reminder.
        sink.set_permission(PermissionState::Granted);
        assert!(s.reconcile(&tasks, t0()).is_noop());
    }

    #[test]
    fn shutdown_cancels_without_ledger_entries() {
        let (clock, sink, mut s) = setup();
        let tasks = vec![Task::new("t1", "x").with_due_date(t0() + Duration::minutes(10))];
        s.reconcile(&tasks, t0());
        s.shutdown();

        assert!(s.pending_keys().is_empty());
        assert_eq!(clock.pending_timers(), 0);
        assert_eq!(clock.fire_due(), 0);
        assert!(s.ledger().is_empty());
        assert!(sink.banners().is_empty());
    }

    #[derive(Clone, Default)]
    struct LogBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuf {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches(needle)
                .count()
        }
    }

    #[test]
    fn unavailable_sink_warns_once_until_it_recovers() {
        let logs = LogBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let (clock, sink, mut s) = setup();
            let overdue = |id: &str| Task::new(id, "x").with_due_date(t0() - Duration::hours(1));

            sink.set_permission(PermissionState::Denied);
            s.reconcile(&[overdue("a"), overdue("b")], t0());
            clock.fire_due();
            assert_eq!(s.run_due(), 2);
            assert_eq!(logs.count("skipping delivery"), 1);

            // Recovery delivers normally and re-arms the warning.
            sink.set_permission(PermissionState::Granted);
            s.reconcile(&[overdue("a"), overdue("b"), overdue("c")], t0());
            clock.fire_due();
            s.run_due();
            assert_eq!(sink.banners().len(), 1);

            sink.set_permission(PermissionState::Denied);
            s.reconcile(
                &[overdue("a"), overdue("b"), overdue("c"), overdue("d")],
                t0(),
            );
            clock.fire_due();
            s.run_due();
            assert_eq!(logs.count("skipping delivery"), 2);
            assert_eq!(s.ledger().len(), 4);
        });
    }
}
