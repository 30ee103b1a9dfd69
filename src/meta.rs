use anyhow::{Context, Result};
use chrono::NaiveDate;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::frontmatter::Frontmatter;

const USER_MARKER: &str = "[!user]";
const SESSION_FILE_GLOB: &str = "????-??-??_*.md";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lightweight metadata of one session note, read from its file name and
/// frontmatter. Shared by the daily index and the stats reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMeta {
    pub project: String,
    pub date: NaiveDate,
    /// Vault-relative path without extension, `/`-separated.
    pub rel_path: String,
    /// `HH:MM` from the file name.
    pub file_time: Option<String>,
    pub session_id: Option<String>,
    /// `HH:MM` from the frontmatter.
    pub start_time: Option<String>,
    pub duration: Option<String>,
    pub duration_min: u64,
    pub model: Option<String>,
    pub branch: Option<String>,
    pub tools: BTreeMap<String, u64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
    /// As written, e.g. `$0.23`.
    pub estimated_cost: Option<String>,
    pub cost: f64,
    pub files_touched: Vec<String>,
    pub commits: usize,
    pub prompts: u32,
}

impl SessionMeta {
    /// Parse a note. Malformed or missing fields are left at their
    /// defaults. The prompt count comes from a `prompts:` field, falling
    /// back to counting user callouts in the body.
    pub fn parse(content: &str, project: &str, date: NaiveDate) -> Self {
        let content = content.replace('\r', "");
        let mut meta = SessionMeta {
            project: project.to_string(),
            date,
            ..Default::default()
        };

        if let Some((fm, _)) = Frontmatter::parse(&content) {
            let owned = |key: &str| fm.field(key).map(str::to_string);
            let number = |key: &str| fm.field(key).and_then(|v| v.parse().ok()).unwrap_or(0);

            meta.session_id = owned("session_id");
            meta.start_time = owned("start_time");
            meta.duration = owned("duration");
            meta.duration_min = meta.duration.as_deref().map_or(0, parse_duration_min);
            meta.model = owned("model");
            meta.branch = owned("branch");
            meta.tools = fm.counts("tools");
            meta.tokens_in = number("tokens_in");
            meta.tokens_out = number("tokens_out");
            meta.cache_read = number("cache_read");
            meta.cache_creation = number("cache_creation");
            meta.estimated_cost = owned("estimated_cost");
            meta.cost = meta.estimated_cost.as_deref().map_or(0.0, parse_cost);
            meta.files_touched = fm.list("files_touched").into_iter().map(String::from).collect();
            meta.commits = fm.list("commits").len();
            meta.prompts = fm.field("prompts").and_then(|v| v.parse().ok()).unwrap_or(0);
        }
        if meta.prompts == 0 {
            meta.prompts = content.matches(USER_MARKER).count() as u32;
        }
        meta
    }

    pub fn tool_total(&self) -> u64 {
        self.tools.values().sum()
    }

    /// Hour of day the session started, from the frontmatter.
    pub fn start_hour(&self) -> Option<u32> {
        self.start_time.as_deref()?.get(..2)?.parse().ok()
    }
}

/// Total minutes of a `25min`, `1h 30min` or `2h` duration.
pub fn parse_duration_min(s: &str) -> u64 {
    let number_before = |suffix: &str| -> u64 {
        s.find(suffix)
            .map(|end| {
                let digits: String = s[..end]
                    .chars()
                    .rev()
                    .take_while(char::is_ascii_digit)
                    .collect();
                digits.chars().rev().collect::<String>().parse().unwrap_or(0)
            })
            .unwrap_or(0)
    };
    number_before("h") * 60 + number_before("min")
}

fn parse_cost(s: &str) -> f64 {
    s.trim_start_matches('$').trim().parse().unwrap_or(0.0)
}

/// `HH:MM` from `<date>_HHMM...md`.
fn time_from_file_name(name: &str) -> Option<String> {
    let digits = name.get(11..15)?;
    digits
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| format!("{}:{}", &digits[..2], &digits[2..]))
}

/// `/`-separated path relative to `vault`, without the `.md` extension.
pub fn vault_relative(vault: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(vault).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let joined = parts.join("/");
    Some(joined.strip_suffix(".md").unwrap_or(&joined).to_string())
}

/// Immediate project directories of the vault, sorted by name. Hidden
/// directories are not projects.
fn project_dirs(vault: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries =
        fs::read_dir(vault).with_context(|| format!("listing vault {}", vault.display()))?;
    let mut dirs: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            (!name.starts_with('.')).then(|| (name, e.path()))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Every session note dated within `start..=end`, across all projects.
pub fn scan_sessions(vault: &Path, start: NaiveDate, end: NaiveDate) -> Result<Vec<SessionMeta>> {
    let mut sessions = Vec::new();
    for (project, dir) in project_dirs(vault)? {
        let pattern = format!(
            "{}/{SESSION_FILE_GLOB}",
            Pattern::escape(&dir.to_string_lossy())
        );
        let Ok(paths) = glob::glob(&pattern) else {
            continue;
        };
        for path in paths.flatten() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(date) = name
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
            else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(note = %path.display(), error = %e, "skipping unreadable note");
                    continue;
                }
            };
            let mut meta = SessionMeta::parse(&content, &project, date);
            meta.file_time = time_from_file_name(name);
            meta.rel_path = vault_relative(vault, &path).unwrap_or_default();
            sessions.push(meta);
        }
    }
    Ok(sessions)
}

/// Session notes of a single day.
pub fn scan_day(vault: &Path, date: NaiveDate) -> Result<Vec<SessionMeta>> {
    scan_sessions(vault, date, date)
}

/// Vault-relative path of the note recording `session_id`, if any.
pub fn find_note_by_session_id(vault: &Path, session_id: &str) -> Option<String> {
    let pattern = format!("{}/**/*.md", Pattern::escape(&vault.to_string_lossy()));
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    glob::glob_with(&pattern, options)
        .ok()?
        .flatten()
        .find(|path| {
            fs::read_to_string(path).is_ok_and(|content| {
                Frontmatter::parse(&content)
                    .and_then(|(fm, _)| fm.field("session_id"))
                    .is_some_and(|id| id == session_id)
            })
        })
        .and_then(|path| vault_relative(vault, &path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    const NOTE: &str = "---\r\n\
date: 2026-02-12\r\n\
session_id: abc\r\n\
project: proj\r\n\
start_time: 09:15\r\n\
duration: 1h 30min\r\n\
model: opus\r\n\
tools:\r\n  Bash: 2\r\n  Read: 5\r\n\
tokens_in: 1200\r\n\
estimated_cost: \"$0.23\"\r\n\
files_touched:\r\n  - /a.rs\r\n  - /b.rs\r\n\
commits:\r\n  - a1b2c3d Fix\r\n\
tags:\r\n  - claude-session\r\n\
---\r\n\
\r\n> [!user]+ #1 - You\r\n\r\n> [!user]+ #2 - You\r\n";

    #[test]
    fn parses_note_metadata() {
        let meta = SessionMeta::parse(NOTE, "proj", day(12));
        assert_eq!(meta.session_id.as_deref(), Some("abc"));
        assert_eq!(meta.start_time.as_deref(), Some("09:15"));
        assert_eq!(meta.start_hour(), Some(9));
        assert_eq!(meta.duration_min, 90);
        assert_eq!(meta.model.as_deref(), Some("opus"));
        assert_eq!(meta.tool_total(), 7);
        assert_eq!(meta.tokens_in, 1200);
        assert_eq!(meta.estimated_cost.as_deref(), Some("$0.23"));
        assert!((meta.cost - 0.23).abs() < 1e-9);
        assert_eq!(meta.files_touched, vec!["/a.rs", "/b.rs"]);
        assert_eq!(meta.commits, 1);
        assert_eq!(meta.prompts, 2);
    }

    #[test]
    fn prompts_field_wins_over_markers() {
        let meta = SessionMeta::parse("---\nprompts: 7\n---\n> [!user]+ #1\n", "p", day(1));
        assert_eq!(meta.prompts, 7);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration_min("25min"), 25);
        assert_eq!(parse_duration_min("1h 30min"), 90);
        assert_eq!(parse_duration_min("2h"), 120);
        assert_eq!(parse_duration_min("soon"), 0);
    }

    #[test]
    fn file_name_time() {
        assert_eq!(time_from_file_name("2026-02-12_0915.md").as_deref(), Some("09:15"));
        assert_eq!(time_from_file_name("2026-02-12_0915_fix-bug_2.md").as_deref(), Some("09:15"));
        assert_eq!(time_from_file_name("2026-02-12_ab.md"), None);
    }

    #[test]
    fn scan_filters_by_date_and_skips_hidden_dirs() {
        let vault = tempfile::tempdir().unwrap();
        let proj = vault.path().join("proj");
        let hidden = vault.path().join(".obsidian");
        fs::create_dir_all(&proj).unwrap();
        fs::create_dir_all(&hidden).unwrap();
        fs::write(proj.join("2026-02-10_0900.md"), "---\nduration: 5min\n---\n").unwrap();
        fs::write(proj.join("2026-02-12_1000.md"), "---\n---\n").unwrap();
        fs::write(proj.join("notes.md"), "---\n---\n").unwrap();
        fs::write(hidden.join("2026-02-10_0800.md"), "---\n---\n").unwrap();

        let found = scan_sessions(vault.path(), day(9), day(11)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].project, "proj");
        assert_eq!(found[0].rel_path, "proj/2026-02-10_0900");
        assert_eq!(found[0].file_time.as_deref(), Some("09:00"));
        assert_eq!(found[0].duration.as_deref(), Some("5min"));

        assert_eq!(scan_day(vault.path(), day(12)).unwrap().len(), 1);
    }

    #[test]
    fn finds_note_by_session_id() {
        let vault = tempfile::tempdir().unwrap();
        let proj = vault.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        fs::write(proj.join("2026-02-10_0900.md"), "---\nsession_id: parent-1\n---\n").unwrap();
        fs::write(proj.join("2026-02-10_1000.md"), "---\nsession_id: parent-10\n---\n").unwrap();

        assert_eq!(
            find_note_by_session_id(vault.path(), "parent-1").as_deref(),
            Some("proj/2026-02-10_0900")
        );
        assert_eq!(find_note_by_session_id(vault.path(), "missing"), None);
    }
}
