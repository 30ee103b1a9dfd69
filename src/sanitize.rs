use regex::Regex;
use std::sync::LazyLock;

/// Wrapper tags the assistant injects into prompts. Their content is noise in
/// a human-facing note.
const SYSTEM_TAGS: &[&str] = &[
    "system-reminder",
    "task-notification",
    "claude-mem-context",
    "context-window-budget",
    "skill-reminders",
    "local-command-caveat",
    "command-name",
    "command-message",
    "command-args",
    "local-command-stdout",
];

static SYSTEM_TAG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SYSTEM_TAGS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?s)<{tag}>.*?</{tag}>")).ok())
        .collect()
});

const UNSAFE_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const SLUG_MAX_WORDS: usize = 6;

/// Remove every system-injected tag (and its content) from `text`.
///
/// Each tag pattern is applied in turn, so a tag nested inside a different
/// tag is removed by whichever pattern runs first.
pub fn strip_system_tags(text: &str) -> String {
    let mut out = text.to_string();
    for pat in SYSTEM_TAG_PATTERNS.iter() {
        out = pat.replace_all(&out, "").into_owned();
    }
    out.trim().to_string()
}

/// Byte offset of the `max`-th char, or `None` if `s` is not longer than that.
fn char_boundary(s: &str, max: usize) -> Option<usize> {
    s.char_indices().nth(max).map(|(i, _)| i)
}

/// Truncate to `max` chars, noting the original length.
pub fn truncate(text: &str, max: usize) -> String {
    match char_boundary(text, max) {
        None => text.to_string(),
        Some(idx) => format!(
            "{}\n\n... (truncated, {} chars total)",
            &text[..idx],
            text.chars().count()
        ),
    }
}

/// Truncate to `max` chars with a fixed suffix.
pub fn truncate_simple(text: &str, max: usize) -> String {
    match char_boundary(text, max) {
        None => text.to_string(),
        Some(idx) => format!("{}\n\n... (truncated)", &text[..idx]),
    }
}

/// Word-aware truncation for one-line topic summaries.
pub fn truncate_topic(text: &str, max: usize) -> String {
    let Some(idx) = char_boundary(text, max) else {
        return text.to_string();
    };
    let cut = &text[..idx];
    let cut = match cut.rfind(' ') {
        Some(space) if space > 0 => &cut[..space],
        _ => cut,
    };
    format!("{}...", cut.trim_end())
}

/// Make a directory-safe project name. Leading dots are stripped so the
/// folder is not hidden by the note app.
pub fn sanitize_project_name(name: &str) -> String {
    let name = name.trim_start_matches('.');
    let name = if name.is_empty() { "unnamed" } else { name };
    name.chars()
        .map(|c| if UNSAFE_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Slug from the first line of a prompt: lower-case words joined by hyphens,
/// punctuation dropped, capped at a few words.
pub fn generate_title_slug(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let cleaned: String = first_line
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .take(SLUG_MAX_WORDS)
        .collect::<Vec<_>>()
        .join("-")
}
