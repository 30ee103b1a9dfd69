use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::sanitize::{strip_system_tags, truncate_topic};

/// How many lines from the end of the log the reply search looks at.
const REPLY_WINDOW: usize = 200;

const TOPIC_MAX_CHARS: usize = 100;

// ===================================================================
// Transcript events, one per JSONL line
// ===================================================================

/// A single line of the assistant's `.jsonl` event log.
///
/// Only the handful of fields the vault notes need are typed; everything
/// is defaulted so that unfamiliar entry kinds (progress, snapshots, system
/// entries) still deserialize and are simply ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub is_meta: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
    /// Present on the prompt injected after the user approves a plan.
    #[serde(default)]
    pub plan_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: MessageContent,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Content that matches neither shape (`null`, a bare object) reads as
/// empty, so the rest of the message keeps its usage counters.
fn lenient_content<'de, D>(deserializer: D) -> std::result::Result<MessageContent, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(MessageContent::deserialize(value).unwrap_or_default())
}

/// `message.content` is a plain string for typed user prompts and an array
/// of blocks everywhere else.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text(TextBlock),
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultBlock),
    /// Thinking, images, and anything newer.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ToolUseBlock {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolResultBlock {
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl TranscriptEvent {
    fn blocks(&self) -> &[ContentBlock] {
        match self.message.as_ref().map(|m| &m.content) {
            Some(MessageContent::Blocks(b)) => b,
            _ => &[],
        }
    }

    fn role(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.role.as_str())
    }

    pub fn is_assistant(&self) -> bool {
        self.kind == "assistant" && self.role() == "assistant"
    }

    pub fn is_user(&self) -> bool {
        self.kind == "user"
    }

    /// All text blocks of the event joined by blank lines.
    pub fn assistant_text(&self) -> String {
        self.blocks()
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) if !t.text.is_empty() => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Text the user typed: the bare string content, or the first text block.
    pub fn user_text(&self) -> Option<&str> {
        match &self.message.as_ref()?.content {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text(t) => Some(t.text.as_str()),
                _ => None,
            }),
        }
    }

    /// True for the user entry that opens a turn (as opposed to tool results
    /// fed back to the model, which are also `user` entries).
    fn opens_turn(&self) -> bool {
        self.is_user()
            && !self.is_sidechain
            && !self.is_meta
            && self.user_text().is_some_and(|t| !t.trim().is_empty())
    }

    /// Plan text carried by this event: either the injected `planContent`
    /// or the `plan` argument of an `ExitPlanMode` call.
    pub fn plan(&self) -> Option<&str> {
        if let Some(plan) = self.plan_content.as_deref().filter(|p| !p.trim().is_empty()) {
            return Some(plan);
        }
        self.blocks().iter().find_map(|b| match b {
            ContentBlock::ToolUse(tu) if tu.name == "ExitPlanMode" => tu
                .input
                .get("plan")
                .and_then(|v| v.as_str())
                .filter(|p| !p.trim().is_empty()),
            _ => None,
        })
    }
}

/// Parse one JSONL line. Blank and malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<TranscriptEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::trace!(error = %e, "skipping malformed transcript line");
            None
        }
    }
}

fn read_log(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading transcript {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ===================================================================
// Last reply + plan
// ===================================================================

/// The most recent assistant reply and plan of the current turn.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LastReply {
    pub response: Option<String>,
    pub plan: Option<String>,
}

impl LastReply {
    pub fn is_empty(&self) -> bool {
        self.response.is_none() && self.plan.is_none()
    }
}

/// Walk the log backwards (at most [`REPLY_WINDOW`] lines) for the latest
/// assistant text and the latest plan. The walk ends at the prompt that
/// opened the current turn, so nothing from an earlier turn is returned.
pub fn find_last_assistant_reply(path: &Path) -> Result<LastReply> {
    let contents = read_log(path)?;
    let mut found = LastReply::default();

    for event in contents.lines().rev().take(REPLY_WINDOW).filter_map(parse_line) {
        if found.plan.is_none() {
            found.plan = event.plan().map(String::from);
        }
        if found.response.is_none() && event.is_assistant() && !event.is_sidechain {
            let text = event.assistant_text();
            if !text.trim().is_empty() {
                found.response = Some(text);
            }
        }
        if (found.response.is_some() && found.plan.is_some()) || event.opens_turn() {
            break;
        }
    }
    Ok(found)
}

/// [`find_last_assistant_reply`], retried while the log writer may still be
/// flushing the final entry.
pub fn find_last_assistant_reply_with_retry(
    path: &Path,
    attempts: u32,
    delay: Duration,
) -> LastReply {
    for attempt in 1..=attempts.max(1) {
        match find_last_assistant_reply(path) {
            Ok(found) if !found.is_empty() => return found,
            Ok(_) => tracing::debug!(attempt, "no reply in transcript yet"),
            Err(e) => tracing::debug!(attempt, error = %e, "transcript not readable"),
        }
        if attempt < attempts {
            thread::sleep(delay);
        }
    }
    LastReply::default()
}

// ===================================================================
// User topics
// ===================================================================

/// One-line summaries of the first `limit` user prompts, oldest first.
pub fn extract_user_topics(path: &Path, limit: usize) -> Result<Vec<String>> {
    let contents = read_log(path)?;
    let mut topics = Vec::new();
    for event in contents.lines().filter_map(parse_line) {
        if topics.len() >= limit {
            break;
        }
        if !event.is_user() || event.is_sidechain || event.is_meta {
            continue;
        }
        let Some(text) = event.user_text() else { continue };
        let stripped = strip_system_tags(text);
        let first_line = stripped.lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            continue;
        }
        topics.push(truncate_topic(first_line, TOPIC_MAX_CHARS));
    }
    Ok(topics)
}

/// The first session id in the log's opening lines that differs from
/// `current`. A resumed conversation starts with entries copied from the
/// session it continues.
pub fn find_foreign_session_id(path: &Path, current: &str, max_lines: usize) -> Option<String> {
    let contents = read_log(path).ok()?;
    contents
        .lines()
        .take(max_lines)
        .filter_map(parse_line)
        .filter_map(|e| e.session_id)
        .find(|id| !id.is_empty() && id != current)
}

// ===================================================================
// Session statistics
// ===================================================================

/// Model family used for pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Opus,
    Sonnet,
    Haiku,
}

/// Dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub input: f64,
    pub output: f64,
}

impl ModelFamily {
    /// Detect the family from a full model id such as `claude-opus-4-6`.
    pub fn detect(model: &str) -> Option<Self> {
        let lower = model.to_lowercase();
        if lower.contains("opus") {
            Some(Self::Opus)
        } else if lower.contains("sonnet") {
            Some(Self::Sonnet)
        } else if lower.contains("haiku") {
            Some(Self::Haiku)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
            Self::Haiku => "haiku",
        }
    }

    pub fn rates(self) -> Rates {
        match self {
            Self::Opus => Rates { input: 5.0, output: 25.0 },
            Self::Sonnet => Rates { input: 3.0, output: 15.0 },
            Self::Haiku => Rates { input: 1.0, output: 5.0 },
        }
    }
}

/// Aggregated usage of one transcript. Sidechain events are excluded.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionStats {
    pub tool_counts: BTreeMap<String, u64>,
    pub files_touched: Vec<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
    pub estimated_cost: f64,
    /// `None` when no event named a recognizable model.
    pub model: Option<ModelFamily>,
}

impl SessionStats {
    pub fn total_tool_calls(&self) -> u64 {
        self.tool_counts.values().sum()
    }

    fn add_usage(&mut self, usage: &Usage) {
        self.tokens_in += usage.input_tokens;
        self.tokens_out += usage.output_tokens;
        self.cache_read += usage.cache_read_input_tokens;
        self.cache_creation += usage.cache_creation_input_tokens;
    }

    /// Cost with cache reads billed at 10% and cache writes at 125% of the
    /// input rate. Unknown models are priced as sonnet.
    fn compute_cost(&self) -> f64 {
        let rates = self.model.unwrap_or(ModelFamily::Sonnet).rates();
        self.tokens_in as f64 / 1e6 * rates.input
            + self.cache_read as f64 / 1e6 * (rates.input * 0.1)
            + self.cache_creation as f64 / 1e6 * (rates.input * 1.25)
            + self.tokens_out as f64 / 1e6 * rates.output
    }
}

/// The path argument a file-oriented tool call operates on.
fn touched_path<'a>(tool: &str, input: &'a serde_json::Value) -> Option<&'a str> {
    let field = match tool {
        "Read" | "Edit" | "MultiEdit" | "Write" => "file_path",
        "NotebookEdit" => "notebook_path",
        "Grep" | "Glob" => "path",
        _ => return None,
    };
    input.get(field).and_then(|v| v.as_str()).filter(|p| !p.is_empty())
}

/// Aggregate usage over every non-sidechain assistant event in the log.
pub fn parse_transcript(path: &Path) -> Result<SessionStats> {
    let contents = read_log(path)?;
    let mut stats = SessionStats::default();
    let mut files = BTreeSet::new();

    for event in contents.lines().filter_map(parse_line) {
        if event.is_sidechain || !event.is_assistant() {
            continue;
        }
        let Some(message) = &event.message else { continue };

        if stats.model.is_none() {
            stats.model = message.model.as_deref().and_then(ModelFamily::detect);
        }
        if let Some(usage) = &message.usage {
            stats.add_usage(usage);
        }
        for block in event.blocks() {
            if let ContentBlock::ToolUse(tu) = block {
                if tu.name.is_empty() {
                    continue;
                }
                *stats.tool_counts.entry(tu.name.clone()).or_default() += 1;
                if let Some(p) = touched_path(&tu.name, &tu.input) {
                    files.insert(p.replace('\\', "/"));
                }
            }
        }
    }

    stats.estimated_cost = stats.compute_cost();
    stats.files_touched = files.into_iter().collect();
    Ok(stats)
}
