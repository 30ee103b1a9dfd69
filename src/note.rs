use anyhow::{Context, Result};
use chrono::{NaiveDateTime, NaiveTime};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::frontmatter::{Frontmatter, upsert_field};

const SESSION_HEADING: &str = "# Claude Session - ";
const SUMMARY_MARKER: &str = "[!summary]";

/// Prefix every line with `> ` so it renders inside a callout.
fn quote(text: &str) -> String {
    text.split('\n')
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ===================================================================
// Entries
// ===================================================================

pub fn format_prompt_entry(number: u32, time: &str, cwd: &str, prompt: &str) -> String {
    format!(
        "\n> [!user]+ #{number} - You ({time})\n> **cwd**: ``{cwd}``\n>\n{}\n\n---\n",
        quote(prompt)
    )
}

pub fn format_response_entry(time: &str, response: &str) -> String {
    format!("\n> [!claude]- Claude ({time})\n{}\n\n---\n", quote(response))
}

pub fn format_plan_entry(time: &str, plan: &str) -> String {
    format!("\n> [!plan]- Claude's Plan ({time})\n{}\n\n---\n", quote(plan))
}

/// Commits as a collapsed callout, one backtick-quoted `hash message` per
/// bullet. Empty when there are no commits.
pub fn format_commits_entry(time: &str, commits: &[String]) -> String {
    if commits.is_empty() {
        return String::new();
    }
    let mut out = format!("\n> [!git]- Commits ({time})\n");
    for commit in commits {
        out.push_str(&format!("> - `{commit}`\n"));
    }
    out.push_str("\n---\n");
    out
}

/// Topic list shown under the session heading. It sits above the heading's
/// own separator, so it carries none itself.
pub fn format_summary_block(topics: &[String]) -> String {
    if topics.is_empty() {
        return String::new();
    }
    let mut out = String::from("> [!summary] Topics covered\n");
    for topic in topics {
        out.push_str(&format!("> - {topic}\n"));
    }
    out
}

// ===================================================================
// File updates
// ===================================================================

pub fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))
}

/// Minutes since the note's `start_time` on the day of `now`, at least 1.
fn elapsed_minutes(start_time: &str, now: NaiveDateTime) -> Option<i64> {
    let start = NaiveTime::parse_from_str(start_time.trim(), "%H:%M").ok()?;
    let elapsed = now - now.date().and_time(start);
    Some(elapsed.num_minutes().max(1))
}

/// Write `duration: Nmin` into the note's frontmatter, replacing an
/// existing value or adding it right after `start_time`. Notes without a
/// readable `start_time` are left alone.
pub fn update_duration(path: &Path, now: NaiveDateTime) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let Some(minutes) = Frontmatter::parse(&content)
        .and_then(|(fm, _)| fm.field("start_time"))
        .and_then(|start| elapsed_minutes(start, now))
    else {
        return Ok(());
    };
    let Some(updated) = upsert_field(&content, "duration", &format!("{minutes}min"), "start_time")
    else {
        return Ok(());
    };
    if updated != content {
        fs::write(path, updated).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

/// Byte range of the session heading section: from the heading line up to
/// the `---` line that closes it.
fn heading_section(content: &str) -> Option<(usize, usize)> {
    let mut pos = 0;
    let mut heading = None;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_end();
        match heading {
            None if trimmed.starts_with(SESSION_HEADING) => heading = Some(pos),
            Some(start) if trimmed == "---" => return Some((start, pos)),
            _ => {}
        }
        pos += line.len();
    }
    None
}

/// Insert `block` once, just above the separator under the session heading.
/// Returns whether the note was changed.
pub fn insert_summary_block(path: &Path, block: &str) -> Result<bool> {
    if block.is_empty() {
        return Ok(false);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let Some((heading, at)) = heading_section(&content) else {
        tracing::debug!(note = %path.display(), "no heading separator to anchor the summary");
        return Ok(false);
    };
    if content[heading..at].contains(SUMMARY_MARKER) {
        return Ok(false);
    }
    let updated = format!("{}{block}\n{}", &content[..at], &content[at..]);
    fs::write(path, updated).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}
