use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$DUEBELL_HOME`, else `~/.duebell`.
pub fn duebell_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DUEBELL_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".duebell"))
}

pub fn ensure_duebell_home() -> Result<PathBuf> {
    let dir = duebell_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Ledger file for one user session. Not created here; the file backend
/// creates its parent on first save.
pub fn ledger_path(session: &str) -> Result<PathBuf> {
    Ok(duebell_home()?
        .join("ledger")
        .join(format!("{}.json", sanitize_session(session))))
}

pub fn default_tasks_path() -> Result<PathBuf> {
    Ok(duebell_home()?.join("tasks.json"))
}

fn sanitize_session(session: &str) -> String {
    let cleaned: String = session
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names_are_path_safe() {
        assert_eq!(sanitize_session("alice@example.com"), "alice_example_com");
        assert_eq!(sanitize_session("../etc"), "___etc");
        assert_eq!(sanitize_session(""), "default");
        assert_eq!(sanitize_session("user-42_b"), "user-42_b");
    }
}
