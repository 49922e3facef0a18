use anyhow::{Context, Result};
use chrono_tz::Tz;
use duebell_core::{DEFAULT_RETENTION_HOURS, DEFAULT_TICK_SECS, parse_timezone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::state::{default_tasks_path, ensure_duebell_home};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Fallback tracing filter when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub reminders: RemindersSection,
    #[serde(default)]
    pub tasks: TasksSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Console,
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemindersSection {
    pub tick_secs: u64,
    pub retention_hours: i64,
    pub sink: SinkKind,
    /// For sink = "desktop": override the notifier binary (default:
    /// notify-send on Linux, osascript on macOS).
    pub notify_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    /// JSON export of the task list. Defaults to ~/.duebell/tasks.json.
    pub path: Option<PathBuf>,
    pub poll_secs: u64,
    /// Zone for due dates written as local wall time.
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub user_id: String,
}

fn default_log_level() -> String {
    "duebell=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reminders: RemindersSection::default(),
            tasks: TasksSection::default(),
            session: SessionSection::default(),
        }
    }
}

impl Default for RemindersSection {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            retention_hours: DEFAULT_RETENTION_HOURS,
            sink: SinkKind::Console,
            notify_command: None,
        }
    }
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            path: None,
            poll_secs: 5,
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
        }
    }
}

impl Config {
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.tasks.timezone)
            .with_context(|| format!("config [tasks].timezone = {:?}", self.tasks.timezone))
    }

    pub fn tasks_path(&self) -> Result<PathBuf> {
        match &self.tasks.path {
            Some(p) => Ok(p.clone()),
            None => default_tasks_path(),
        }
    }

    /// Never shorter than the default reminder windows.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reminders.retention_hours.max(DEFAULT_RETENTION_HOURS))
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_duebell_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config_to(cfg: &Config, p: &Path) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&Config::default(), &p)?;
    println!("Wrote {}", p.display());
    Ok(())
}

pub fn show_config() -> Result<()> {
    let p = config_path()?;
    let cfg = load_config_from(&p)?;
    let source = if p.exists() { "file" } else { "defaults" };
    println!("# {} ({source})", p.display());
    print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.reminders.tick_secs, 60);
        assert_eq!(cfg.reminders.retention_hours, 24);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("config.toml");
        fs::write(
            &p,
            r#"
[reminders]
sink = "desktop"

[tasks]
timezone = "America/Chicago"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&p).unwrap();
        assert_eq!(cfg.reminders.sink, SinkKind::Desktop);
        assert_eq!(cfg.reminders.tick_secs, 60);
        assert_eq!(cfg.tasks.poll_secs, 5);
        assert_eq!(cfg.session.user_id, "default");
        assert_eq!(cfg.log_level, "duebell=info");
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::America::Chicago);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.session.user_id = "alice".into();
        cfg.tasks.path = Some(dir.path().join("tasks.json"));

        save_config_to(&cfg, &p).unwrap();
        assert_eq!(load_config_from(&p).unwrap(), cfg);
    }

    #[test]
    fn bad_timezone_is_an_error() {
        let mut cfg = Config::default();
        cfg.tasks.timezone = "Mars/Olympus".into();
        assert!(cfg.timezone().is_err());
    }

    #[test]
    fn retention_cannot_undercut_a_day() {
        let mut cfg = Config::default();
        cfg.reminders.retention_hours = 1;
        assert_eq!(cfg.retention(), chrono::Duration::hours(24));
        cfg.reminders.retention_hours = 48;
        assert_eq!(cfg.retention(), chrono::Duration::hours(48));
    }
}
