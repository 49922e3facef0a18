//! Task projection: the read-only view of a to-do item the engine works on.
//!
//! The task store owns tasks; we only ever read `id`, `due_date` and
//! `completed` for reminder decisions. The rest is carried for display.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

use crate::error::{ReminderError, Result};
use crate::time::{DueDateValue, parse_due_date};

pub const DEFAULT_CATEGORY: &str = "General";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Validated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub text: String,

    /// Optional due instant (UTC). No due date, no reminders.
    pub due_date: Option<DateTime<Utc>>,

    pub completed: bool,

    pub category: String,
    pub emoji: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            text: text.into(),
            due_date: None,
            completed: false,
            category: DEFAULT_CATEGORY.to_string(),
            emoji: None,
        }
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = Some(emoji.into());
        self
    }
}

/// Raw task document as delivered by a task source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub due_date: Option<DueDateValue>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
}

impl TaskRecord {
    /// Validate into a [`Task`]. Local wall-clock due dates are read in `tz`.
    pub fn into_task(self, tz: Tz) -> Result<Task> {
        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ReminderError::invalid_task(None, "missing id")),
        };

        let due_date = match &self.due_date {
            Some(raw) => Some(
                parse_due_date(raw, tz)
                    .map_err(|e| ReminderError::invalid_task(Some(&id), e.to_string()))?,
            ),
            None => None,
        };

        Ok(Task {
            id: TaskId(id),
            text: self.text,
            due_date,
            completed: self.completed,
            category: self
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            emoji: self.emoji.filter(|e| !e.is_empty()),
        })
    }
}

/// Validate a full snapshot. Invalid records are logged and dropped;
/// the first occurrence of a duplicated id wins.
pub fn project_snapshot(records: Vec<TaskRecord>, tz: Tz) -> Vec<Task> {
    let mut seen: HashSet<TaskId> = HashSet::new();
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        let task = match record.into_task(tz) {
            Ok(t) => t,
            Err(e) => {
                warn!("skipping task: {e}");
                continue;
            }
        };
        if !seen.insert(task.id.clone()) {
            let e = ReminderError::invalid_task(Some(task.id.as_str()), "duplicate id in snapshot");
            warn!("skipping task: {e}");
            continue;
        }
        out.push(task);
    }

    out
}

/// Decode raw JSON task documents one at a time. A document with an
/// unexpected shape is logged and dropped without affecting its siblings.
pub fn decode_records(values: Vec<serde_json::Value>) -> Vec<TaskRecord> {
    values
        .into_iter()
        .filter_map(|value| {
            let id = value.get("id").and_then(|v| v.as_str()).map(str::to_string);
            match serde_json::from_value::<TaskRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    let e = ReminderError::invalid_task(id.as_deref(), e.to_string());
                    warn!("skipping task: {e}");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    #[test]
    fn record_decodes_from_store_json() {
        let json = r#"[
            {"id": "a", "text": "pay rent", "dueDate": "2026-02-01T09:00:00Z", "completed": false, "category": "Personal", "emoji": "🏠"},
            {"id": "b", "text": "no date"}
        ]"#;
        let records: Vec<TaskRecord> = serde_json::from_str(json).unwrap();
        let tasks = project_snapshot(records, utc());

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id.as_str(), "a");
        assert_eq!(
            tasks[0].due_date,
            Some(Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(tasks[0].emoji.as_deref(), Some("🏠"));
        assert_eq!(tasks[1].due_date, None);
        assert_eq!(tasks[1].category, DEFAULT_CATEGORY);
    }

    #[test]
    fn missing_id_is_invalid() {
        let r = TaskRecord {
            id: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(
            r.into_task(utc()),
            Err(ReminderError::InvalidTask { id: None, .. })
        ));
    }

    #[test]
    fn malformed_date_excludes_only_that_task() {
        let records = vec![
            TaskRecord {
                id: Some("bad".into()),
                due_date: Some(DueDateValue::Text("soon-ish".into())),
                ..Default::default()
            },
            TaskRecord {
                id: Some("good".into()),
                due_date: Some(DueDateValue::Millis(1_700_000_000_000)),
                ..Default::default()
            },
        ];
        let tasks = project_snapshot(records, utc());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_str(), "good");
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let records = vec![
            TaskRecord {
                id: Some("t1".into()),
                text: "first".into(),
                ..Default::default()
            },
            TaskRecord {
                id: Some("t1".into()),
                text: "second".into(),
                ..Default::default()
            },
        ];
        let tasks = project_snapshot(records, utc());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "first");
    }

    #[test]
    fn mistyped_document_is_dropped_alone() {
        let values: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
                {"id": "good", "text": "ok", "dueDate": "2026-10-18T09:00:00Z"},
                {"id": "flag", "text": "bool date", "dueDate": true},
                {"id": "nulls", "text": null, "completed": null},
                "not even an object"
            ]"#,
        )
        .unwrap();

        let records = decode_records(values);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_deref(), Some("good"));
        assert_eq!(project_snapshot(records, utc()).len(), 1);
    }
}
