//! Reminder policy: which reminders a task wants right now.
//!
//! Each [`ReminderKind`] owns a window relative to the task's due date:
//!
//! - `DayBefore`:  `[due - 24h, due)`
//! - `HourBefore`: `[due - 1h,  due)`
//! - `Overdue`:    `(due, due + 24h]`
//!
//! Windows may overlap. The policy reports every open window; at-most-once
//! delivery is the scheduler's job (via the ledger), not ours.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReminderKind {
    DayBefore,
    HourBefore,
    Overdue,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 3] = [Self::DayBefore, Self::HourBefore, Self::Overdue];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DayBefore => "DayBefore",
            Self::HourBefore => "HourBefore",
            Self::Overdue => "Overdue",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One potential reminder occurrence for one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderKey {
    pub task_id: TaskId,
    pub kind: ReminderKind,
}

impl ReminderKey {
    pub fn new(task_id: impl Into<TaskId>, kind: ReminderKind) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
        }
    }
}

impl fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task_id, self.kind)
    }
}

/// A reminder window. `start_inclusive` distinguishes `[start, end)` from
/// `(start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub start_inclusive: bool,
}

impl ReminderWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.start_inclusive {
            self.start <= now && now < self.end
        } else {
            self.start < now && now <= self.end
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPolicy {
    pub day_lead_hours: i64,
    pub hour_lead_minutes: i64,
    pub overdue_grace_hours: i64,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            day_lead_hours: 24,
            hour_lead_minutes: 60,
            overdue_grace_hours: 24,
        }
    }
}

impl ReminderPolicy {
    pub fn window(&self, kind: ReminderKind, due: DateTime<Utc>) -> ReminderWindow {
        match kind {
            ReminderKind::DayBefore => ReminderWindow {
                start: due - Duration::hours(self.day_lead_hours),
                end: due,
                start_inclusive: true,
            },
            ReminderKind::HourBefore => ReminderWindow {
                start: due - Duration::minutes(self.hour_lead_minutes),
                end: due,
                start_inclusive: true,
            },
            ReminderKind::Overdue => ReminderWindow {
                start: due,
                end: due + Duration::hours(self.overdue_grace_hours),
                start_inclusive: false,
            },
        }
    }

    /// Length of the widest window. A fired key must stay in the ledger at
    /// least this long or it becomes eligible again while its window is open.
    pub fn longest_window(&self) -> Duration {
        ReminderKind::ALL
            .into_iter()
            .map(|kind| {
                let w = self.window(kind, DateTime::<Utc>::UNIX_EPOCH);
                w.end - w.start
            })
            .max()
            .unwrap_or_else(Duration::zero)
    }

    /// Keys whose window is open at `now`. Pure.
    pub fn desired_reminders(&self, task: &Task, now: DateTime<Utc>) -> BTreeSet<ReminderKey> {
        if task.completed {
            return BTreeSet::new();
        }
        let Some(due) = task.due_date else {
            return BTreeSet::new();
        };

        ReminderKind::ALL
            .into_iter()
            .filter(|kind| self.window(*kind, due).contains(now))
            .map(|kind| ReminderKey::new(task.id.clone(), kind))
            .collect()
    }
}

/// [`ReminderPolicy::desired_reminders`] with the default windows.
pub fn desired_reminders(task: &Task, now: DateTime<Utc>) -> BTreeSet<ReminderKey> {
    ReminderPolicy::default().desired_reminders(task, now)
}

/// User-facing reminder content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Platform replace-tag; one visible notification per task.
    pub tag: String,
}

impl Notification {
    pub fn for_reminder(kind: ReminderKind, task: &Task) -> Self {
        let label = match &task.emoji {
            Some(e) => format!("{e} {}", task.text),
            None => task.text.clone(),
        };
        let (title, body) = match kind {
            ReminderKind::Overdue => ("⚠️ Overdue Task", format!("{label} is overdue!")),
            ReminderKind::HourBefore => ("📅 Task Reminder", format!("{label} is due within the hour!")),
            ReminderKind::DayBefore => ("📅 Task Reminder", format!("{label} is due soon!")),
        };
        Self {
            title: title.to_string(),
            body,
            tag: format!("todo-{}", task.id),
        }
    }

    pub fn welcome() -> Self {
        Self {
            title: "Welcome to Your Todo App! 📝".to_string(),
            body: "You'll receive reminders for your tasks with due dates.".to_string(),
            tag: "todo-welcome".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 21, 8, 0, 0).unwrap()
    }

    fn kinds(set: &BTreeSet<ReminderKey>) -> Vec<ReminderKind> {
        set.iter().map(|k| k.kind).collect()
    }

    #[test]
    fn completed_or_undated_task_wants_nothing() {
        let t = Task::new("t1", "done")
            .with_due_date(now() + Duration::minutes(30))
            .with_completed(true);
        assert!(desired_reminders(&t, now()).is_empty());

        let t = Task::new("t2", "no date");
        assert!(desired_reminders(&t, now()).is_empty());
    }

    #[test]
    fn longest_window_tracks_policy() {
        assert_eq!(ReminderPolicy::default().longest_window(), Duration::hours(24));
        let wide = ReminderPolicy {
            overdue_grace_hours: 72,
            ..Default::default()
        };
        assert_eq!(wide.longest_window(), Duration::hours(72));
    }

    #[test]
    fn far_future_task_wants_nothing() {
        for hours in [25, 48, 24 * 30] {
            let t = Task::new("t", "later").with_due_date(now() + Duration::hours(hours));
            assert!(desired_reminders(&t, now()).is_empty(), "due in {hours}h");
        }
    }

    #[test]
    fn day_before_window_opens_at_exactly_24h() {
        let t = Task::new("t", "x").with_due_date(now() + Duration::hours(24));
        assert_eq!(kinds(&desired_reminders(&t, now())), vec![ReminderKind::DayBefore]);

        let t = Task::new("t", "x").with_due_date(now() + Duration::hours(23));
        assert_eq!(kinds(&desired_reminders(&t, now())), vec![ReminderKind::DayBefore]);
    }

    #[test]
    fn overlapping_windows_report_both() {
        let t = Task::new("t", "x").with_due_date(now() + Duration::minutes(30));
        assert_eq!(
            kinds(&desired_reminders(&t, now())),
            vec![ReminderKind::DayBefore, ReminderKind::HourBefore]
        );
    }

    #[test]
    fn due_now_is_not_yet_overdue() {
        let t = Task::new("t", "x").with_due_date(now());
        assert!(desired_reminders(&t, now()).is_empty());

        let later = now() + Duration::seconds(1);
        assert_eq!(kinds(&desired_reminders(&t, later)), vec![ReminderKind::Overdue]);
    }

    #[test]
    fn overdue_window_is_closed_at_24h() {
        let t = Task::new("t", "x").with_due_date(now() - Duration::hours(24));
        assert_eq!(kinds(&desired_reminders(&t, now())), vec![ReminderKind::Overdue]);

        let t = Task::new("t", "x").with_due_date(now() - Duration::hours(24) - Duration::seconds(1));
        assert!(desired_reminders(&t, now()).is_empty());
    }

    #[test]
    fn notification_text() {
        let t = Task::new("t9", "file taxes").with_emoji("🧾");
        let n = Notification::for_reminder(ReminderKind::Overdue, &t);
        assert_eq!(n.title, "⚠️ Overdue Task");
        assert_eq!(n.body, "🧾 file taxes is overdue!");
        assert_eq!(n.tag, "todo-t9");

        let n = Notification::for_reminder(ReminderKind::DayBefore, &Task::new("t9", "file taxes"));
        assert_eq!(n.body, "file taxes is due soon!");
    }
}
