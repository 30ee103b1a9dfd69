use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::meta::{SessionMeta, scan_day};
use crate::session::SessionStore;

/// Path of the index note for `date`.
pub fn daily_index_path(vault: &Path, date: NaiveDate) -> PathBuf {
    vault.join(format!("{}.md", date.format("%Y-%m-%d")))
}

/// `(10min, 4 prompts, 35 tools, ~$0.23)`, each part only when known.
fn summary(meta: &SessionMeta) -> String {
    let mut parts = Vec::new();
    if let Some(duration) = &meta.duration {
        parts.push(duration.clone());
    }
    if meta.prompts > 0 {
        parts.push(format!("{} prompts", meta.prompts));
    }
    let tools = meta.tool_total();
    if tools > 0 {
        parts.push(format!("{tools} tools"));
    }
    if let Some(cost) = &meta.estimated_cost {
        parts.push(format!("~{cost}"));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

/// Render the index for `date` from its sessions.
fn render(date: &str, mut sessions: Vec<SessionMeta>) -> String {
    sessions.sort_by(|a, b| a.file_time.cmp(&b.file_time));

    // Keyed case-insensitively, with the real name as tie-break.
    let mut by_project: BTreeMap<(String, String), Vec<SessionMeta>> = BTreeMap::new();
    for meta in sessions {
        by_project
            .entry((meta.project.to_lowercase(), meta.project.clone()))
            .or_default()
            .push(meta);
    }

    let mut out = format!(
        "---\ndate: {date}\ntags:\n  - claude-daily\n---\n\n# Claude Sessions - {date}\n"
    );
    for ((_, project), entries) in &by_project {
        let _ = write!(out, "\n## {project}\n");
        for meta in entries {
            let _ = writeln!(
                out,
                "- [[{}|{}]]{}",
                meta.rel_path,
                meta.file_time.as_deref().unwrap_or(""),
                summary(meta)
            );
        }
    }
    out
}

/// Regenerate `<vault>/<date>.md` from every project's notes of that day.
///
/// Prompt counts tracked in `store` take precedence over what the notes
/// say. When there are no sessions nothing is written.
pub fn rebuild_daily_index(vault: &Path, date: NaiveDate, store: &SessionStore) -> Result<()> {
    let mut sessions = scan_day(vault, date)?;
    if sessions.is_empty() {
        return Ok(());
    }
    for meta in &mut sessions {
        if let Some(count) = meta.session_id.as_deref().and_then(|id| store.prompt_count(id)) {
            meta.prompts = count;
        }
    }

    let date_str = date.format("%Y-%m-%d").to_string();
    let path = daily_index_path(vault, date);
    fs::write(&path, render(&date_str, sessions))
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(index = %path.display(), "rebuilt daily index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 12).unwrap()
    }

    fn note(vault: &Path, project: &str, file: &str, content: &str) {
        let dir = vault.join(project);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn groups_projects_case_insensitively_and_sorts_by_time() {
        let vault = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let store = SessionStore::new(state.path());

        note(vault.path(), "MewsPMSClaude", "2026-02-12_0800.md", "---\n---\n");
        note(vault.path(), "cubilis-claude", "2026-02-12_1100.md", "---\n---\n");
        note(
            vault.path(),
            "Coding",
            "2026-02-12_1500.md",
            "---\nsession_id: s1\nduration: 10min\ntools:\n  Read: 30\n  Bash: 5\nestimated_cost: \"$0.23\"\n---\n> [!user]\n",
        );
        note(vault.path(), "Coding", "2026-02-12_0915.md", "---\n---\n> [!user]\n> [!user]\n");
        note(vault.path(), "Coding", "2026-02-11_0915.md", "---\n---\n");

        store
            .write(
                "s1",
                &SessionState {
                    note_path: vault.path().join("Coding/2026-02-12_1500.md"),
                    prompt_count: 4,
                    ..Default::default()
                },
            )
            .unwrap();

        rebuild_daily_index(vault.path(), day(), &store).unwrap();
        let got = fs::read_to_string(vault.path().join("2026-02-12.md")).unwrap();
        assert_eq!(
            got,
            "---\ndate: 2026-02-12\ntags:\n  - claude-daily\n---\n\n# Claude Sessions - 2026-02-12\n\
             \n## Coding\n\
             - [[Coding/2026-02-12_0915|09:15]] (2 prompts)\n\
             - [[Coding/2026-02-12_1500|15:00]] (10min, 4 prompts, 35 tools, ~$0.23)\n\
             \n## cubilis-claude\n\
             - [[cubilis-claude/2026-02-12_1100|11:00]]\n\
             \n## MewsPMSClaude\n\
             - [[MewsPMSClaude/2026-02-12_0800|08:00]]\n"
        );
    }

    #[test]
    fn no_sessions_writes_nothing() {
        let vault = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        note(vault.path(), "proj", "2026-02-11_0900.md", "---\n---\n");

        rebuild_daily_index(vault.path(), day(), &SessionStore::new(state.path())).unwrap();
        assert!(!daily_index_path(vault.path(), day()).exists());
    }
}
