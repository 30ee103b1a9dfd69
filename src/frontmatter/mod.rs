use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Keys owned by [`StatsFields`]. They are removed and re-rendered as a unit.
const STATS_KEYS: &[&str] = &[
    "tools",
    "tokens_in",
    "tokens_out",
    "cache_read",
    "cache_creation",
    "estimated_cost",
    "files_touched",
    "commits",
    "branch",
    "model",
];

// ===================================================================
// Reading
// ===================================================================

/// Byte ranges of the frontmatter block: `(inner, rest)`, where `inner` is
/// the text between the delimiters and `rest` starts at the closing `---`.
fn split(content: &str) -> Option<(&str, &str)> {
    content.strip_prefix("---\n")?;
    let mut pos = 4;
    for line in content[4..].split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some((&content[4..pos], &content[pos..]));
        }
        pos += line.len();
    }
    None
}

/// Key of a top-level `key: value` line. Indented lines have none.
fn top_level_key(line: &str) -> Option<&str> {
    if line.starts_with([' ', '\t']) {
        return None;
    }
    line.split_once(':').map(|(k, _)| k.trim())
}

fn is_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t'])
}

/// The frontmatter of a note, separated from its body once and then
/// queried by key.
#[derive(Debug, Clone)]
pub struct Frontmatter<'a> {
    lines: Vec<&'a str>,
}

impl<'a> Frontmatter<'a> {
    /// Split `content` into its frontmatter and the body that follows the
    /// closing delimiter. `None` if there is no delimited block at the top.
    pub fn parse(content: &'a str) -> Option<(Self, &'a str)> {
        let (inner, rest) = split(content)?;
        let body = rest.split_once('\n').map_or("", |(_, b)| b);
        let lines = inner.lines().map(|l| l.trim_end_matches('\r')).collect();
        Some((Self { lines }, body))
    }

    /// Index of the top-level line for `key`.
    fn position(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|l| top_level_key(l) == Some(key))
    }

    fn continuation(&self, key: &str) -> &[&'a str] {
        let Some(start) = self.position(key) else {
            return &[];
        };
        let rest = &self.lines[start + 1..];
        let len = rest.iter().take_while(|l| is_continuation(l)).count();
        &rest[..len]
    }

    /// Scalar value of `key`, with surrounding double quotes removed.
    /// Empty values are `None`.
    pub fn field(&self, key: &str) -> Option<&'a str> {
        let line = self.lines[self.position(key)?];
        let value = line.split_once(':')?.1.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        (!value.is_empty()).then_some(value)
    }

    /// Indented `name: n` entries under `key`. Entries whose count does not
    /// parse are skipped.
    pub fn counts(&self, key: &str) -> BTreeMap<String, u64> {
        self.continuation(key)
            .iter()
            .filter_map(|l| {
                let (name, n) = l.trim().split_once(':')?;
                Some((name.trim().to_string(), n.trim().parse().ok()?))
            })
            .collect()
    }

    /// Indented `- item` entries under `key`.
    pub fn list(&self, key: &str) -> Vec<&'a str> {
        self.continuation(key)
            .iter()
            .filter_map(|l| l.trim().strip_prefix("- "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Set `key: value` in the frontmatter of `content`. An existing top-level
/// line is replaced in place; otherwise the line goes right after the
/// `after` line. Returns `None` when there is no frontmatter or no `after`
/// line to anchor on.
pub fn upsert_field(content: &str, key: &str, value: &str, after: &str) -> Option<String> {
    let (inner, rest) = split(content)?;
    let mut lines: Vec<String> = inner.lines().map(String::from).collect();
    let line = format!("{key}: {value}");
    if let Some(i) = lines.iter().position(|l| top_level_key(l) == Some(key)) {
        lines[i] = line;
    } else {
        let i = lines.iter().position(|l| top_level_key(l) == Some(after))?;
        lines.insert(i + 1, line);
    }
    Some(assemble(&lines, rest))
}

fn assemble<S: AsRef<str>>(lines: &[S], rest: &str) -> String {
    let mut out = String::from("---\n");
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out.push_str(rest);
    out
}

// ===================================================================
// Writing
// ===================================================================

/// The replaceable statistics block of a session note.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsFields {
    pub branch: Option<String>,
    pub model: Option<String>,
    pub tools: BTreeMap<String, u64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
    pub estimated_cost: f64,
    pub files_touched: Vec<String>,
    pub commits: Vec<String>,
}

impl StatsFields {
    /// Render the non-empty fields, one `key: value` line each, with lists
    /// and the tool histogram as indented continuation lines.
    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(branch) = self.branch.as_deref().filter(|b| !b.is_empty()) {
            let _ = writeln!(out, "branch: {branch}");
        }
        if let Some(model) = self.model.as_deref().filter(|m| !m.is_empty()) {
            let _ = writeln!(out, "model: {model}");
        }
        if !self.tools.is_empty() {
            out.push_str("tools:\n");
            for (name, count) in &self.tools {
                let _ = writeln!(out, "  {name}: {count}");
            }
        }
        for (key, n) in [
            ("tokens_in", self.tokens_in),
            ("tokens_out", self.tokens_out),
            ("cache_read", self.cache_read),
            ("cache_creation", self.cache_creation),
        ] {
            if n > 0 {
                let _ = writeln!(out, "{key}: {n}");
            }
        }
        if let Some(cost) = format_cost(self.estimated_cost) {
            let _ = writeln!(out, "estimated_cost: \"{cost}\"");
        }
        for (key, items) in [("files_touched", &self.files_touched), ("commits", &self.commits)] {
            if !items.is_empty() {
                let _ = writeln!(out, "{key}:");
                for item in items {
                    let _ = writeln!(out, "  - {item}");
                }
            }
        }
        out
    }
}

/// Everything needed to start a new session note.
#[derive(Debug, Clone, Default)]
pub struct NoteHeader {
    pub date: String,
    pub session_id: String,
    pub project: String,
    pub start_time: String,
    /// Vault-relative path of the note this session continues.
    pub resumed_from: Option<String>,
    pub stats: StatsFields,
}

/// `"$0.23"`, or `None` for a zero cost.
pub fn format_cost(cost: f64) -> Option<String> {
    (cost > 0.0).then(|| format!("${cost:.2}"))
}

/// Thousands with a `K` suffix, smaller counts as-is.
pub fn format_token_count(n: u64) -> String {
    if n >= 1000 {
        format!("{}K", n / 1000)
    } else {
        n.to_string()
    }
}

fn project_tag(project: &str) -> String {
    project
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Frontmatter, heading and first separator of a new session note.
pub fn build_frontmatter(header: &NoteHeader) -> String {
    let resumed_from = header.resumed_from.as_deref().filter(|r| !r.is_empty());

    let mut out = String::from("---\n");
    let _ = writeln!(out, "date: {}", header.date);
    let _ = writeln!(out, "session_id: {}", header.session_id);
    let _ = writeln!(out, "project: {}", header.project);
    let _ = writeln!(out, "start_time: {}", header.start_time);
    if let Some(parent) = resumed_from {
        let _ = writeln!(out, "resumed_from: \"[[{parent}]]\"");
    }
    out.push_str(&header.stats.render());
    out.push_str("tags:\n  - claude-session\n");
    let _ = writeln!(out, "  - {}", project_tag(&header.project));
    out.push_str("---\n");
    let _ = writeln!(out, "\n# Claude Session - {}", header.project);
    if let Some(parent) = resumed_from {
        let name = parent.rsplit('/').next().unwrap_or(parent);
        let _ = writeln!(out, "Resumed from [[{parent}|{name}]]");
    }
    out.push_str("\n---\n");
    out
}

/// Replace the statistics block of an existing note.
///
/// Every top-level stats key and its indented continuation lines are
/// dropped, all other lines are kept in order, and the fresh block is
/// inserted before `tags:` (or at the end of the frontmatter). Content
/// without a frontmatter block is returned unchanged.
pub fn update_frontmatter_stats(content: &str, stats: &StatsFields) -> String {
    let Some((inner, rest)) = split(content) else {
        return content.to_string();
    };

    let rendered = stats.render();
    let mut kept: Vec<&str> = Vec::new();
    let mut in_stats_block = false;
    for line in inner.lines() {
        if top_level_key(line).is_some_and(|k| STATS_KEYS.contains(&k)) {
            in_stats_block = true;
            continue;
        }
        if in_stats_block && is_continuation(line) {
            continue;
        }
        in_stats_block = false;
        kept.push(line);
    }

    let at = kept
        .iter()
        .position(|l| top_level_key(l) == Some("tags"))
        .unwrap_or(kept.len());
    let mut lines = kept[..at].to_vec();
    lines.extend(rendered.lines());
    lines.extend_from_slice(&kept[at..]);

    assemble(&lines, rest)
}

/// Compact summary for the note body:
///
/// ```text
/// > **17 tool calls** | **45K in / 12K out tokens** | ~$0.23
/// > Read(10) Edit(6) Bash(1)
/// ```
///
/// Empty when there were neither tool calls nor input tokens.
pub fn format_stats_line(
    tools: &BTreeMap<String, u64>,
    tokens_in: u64,
    tokens_out: u64,
    cost: f64,
) -> String {
    let total: u64 = tools.values().sum();
    if total == 0 && tokens_in == 0 {
        return String::new();
    }

    let mut out = format!("> **{total} tool calls**");
    if tokens_in > 0 || tokens_out > 0 {
        let _ = write!(
            out,
            " | **{} in / {} out tokens**",
            format_token_count(tokens_in),
            format_token_count(tokens_out)
        );
    }
    if let Some(cost) = format_cost(cost) {
        let _ = write!(out, " | ~{cost}");
    }
    out.push('\n');

    if total > 0 {
        let mut ranked: Vec<(&String, &u64)> = tools.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let breakdown: Vec<String> = ranked.iter().map(|(n, c)| format!("{n}({c})")).collect();
        let _ = writeln!(out, "> {}", breakdown.join(" "));
    }
    out
}
