use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::daily_index::rebuild_daily_index;
use crate::frontmatter::{
    Frontmatter, NoteHeader, StatsFields, build_frontmatter, format_stats_line,
    update_frontmatter_stats,
};
use crate::git::{self, GitContext};
use crate::meta::find_note_by_session_id;
use crate::note;
use crate::reports;
use crate::sanitize::{
    generate_title_slug, sanitize_project_name, strip_system_tags, truncate, truncate_simple,
};
use crate::session::{SessionState, SessionStore};
use crate::settings::Settings;
use crate::transcript::{
    SessionStats, extract_user_topics, find_foreign_session_id,
    find_last_assistant_reply_with_retry, parse_transcript,
};
use crate::types::{StopInput, UserPromptSubmitInput};

const PROMPT_MAX_CHARS: usize = 5000;
const PLAN_MAX_CHARS: usize = 5000;
const RESPONSE_MAX_CHARS: usize = 3000;
const TOPIC_LIMIT: usize = 10;
const RESUME_SCAN_LINES: usize = 20;
const REPLY_ATTEMPTS: u32 = 3;
const REPLY_DELAY: Duration = Duration::from_millis(500);

/// Log and drop the error of a step whose failure must not stop the hook.
fn best_effort<T>(step: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{step} failed: {e:#}");
            None
        }
    }
}

/// Writes hook events into the vault: one note per session plus the
/// derived daily index and reports.
pub struct Recorder {
    settings: Settings,
    vault: PathBuf,
    store: SessionStore,
    reply_attempts: u32,
    reply_delay: Duration,
}

impl Recorder {
    /// `None` when no vault is configured.
    pub fn open(settings: Settings) -> Option<Self> {
        let vault = settings.vault_path.clone()?;
        let store = settings.session_store();
        Some(Self {
            settings,
            vault,
            store,
            reply_attempts: REPLY_ATTEMPTS,
            reply_delay: REPLY_DELAY,
        })
    }

    /// Override how long a response waits for the transcript to be flushed.
    pub fn with_reply_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.reply_attempts = attempts;
        self.reply_delay = delay;
        self
    }

    // ---------------------------------------------------------------
    // Prompt
    // ---------------------------------------------------------------

    /// Append a submitted prompt to the session's note, creating the note
    /// on the session's first prompt.
    pub fn log_prompt(&self, input: &UserPromptSubmitInput, now: NaiveDateTime) -> Result<()> {
        let prompt = strip_system_tags(&input.prompt);
        if prompt.trim().is_empty() {
            return Ok(());
        }
        let prompt = truncate(&prompt, PROMPT_MAX_CHARS);

        fs::create_dir_all(&self.vault)
            .with_context(|| format!("creating vault {}", self.vault.display()))?;
        self.store.cleanup_stale();

        let session_id = &input.common.session_id;
        let existing = best_effort("reading session state", self.store.read(session_id))
            .flatten()
            .filter(|state| state.note_path.is_file());

        let (note_path, number) = match existing {
            Some(mut state) => {
                state.prompt_count += 1;
                best_effort("writing session state", self.store.write(session_id, &state));
                (state.note_path, state.prompt_count)
            }
            None => (self.start_note(input, &prompt, now)?, 1),
        };

        let entry = note::format_prompt_entry(
            number,
            &now.format("%H:%M:%S").to_string(),
            &input.common.cwd,
            &prompt,
        );
        note::append(&note_path, &entry)?;
        tracing::debug!(note = %note_path.display(), number, "logged prompt");
        Ok(())
    }

    /// Create the note for a new session and record its state.
    fn start_note(
        &self,
        input: &UserPromptSubmitInput,
        prompt: &str,
        now: NaiveDateTime,
    ) -> Result<PathBuf> {
        let common = &input.common;
        let cwd = Path::new(&common.cwd);
        let project =
            sanitize_project_name(cwd.file_name().and_then(|n| n.to_str()).unwrap_or(""));
        let dir = self.vault.join(&project);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let date = now.format("%Y-%m-%d").to_string();
        let mut stem = format!("{date}_{}", now.format("%H%M"));
        let slug = generate_title_slug(prompt);
        if !slug.is_empty() {
            stem = format!("{stem}_{slug}");
        }
        let path = unique_note_path(&dir, &stem);

        let git = GitContext::capture(cwd);
        let header = NoteHeader {
            date,
            session_id: common.session_id.clone(),
            project,
            start_time: now.format("%H:%M").to_string(),
            resumed_from: self.resumed_from(&common.transcript_path, &common.session_id),
            stats: StatsFields {
                branch: git.branch.clone(),
                ..Default::default()
            },
        };
        fs::write(&path, build_frontmatter(&header))
            .with_context(|| format!("writing {}", path.display()))?;

        let state = SessionState {
            note_path: path.clone(),
            prompt_count: 1,
            branch: git.branch,
            start_hash: git.head,
            cwd: Some(common.cwd.clone()).filter(|c| !c.is_empty()),
        };
        best_effort(
            "writing session state",
            self.store.write(&common.session_id, &state),
        );
        tracing::debug!(note = %path.display(), "started session note");
        Ok(path)
    }

    /// Vault path of the note for the session this one was resumed from.
    fn resumed_from(&self, transcript_path: &str, session_id: &str) -> Option<String> {
        if transcript_path.is_empty() {
            return None;
        }
        let parent =
            find_foreign_session_id(Path::new(transcript_path), session_id, RESUME_SCAN_LINES)?;
        find_note_by_session_id(&self.vault, &parent)
    }

    // ---------------------------------------------------------------
    // Response
    // ---------------------------------------------------------------

    /// Record the end of a turn: reply, plan, usage and commits, then
    /// refresh the derived files and sync the vault.
    pub fn log_response(&self, input: &StopInput, now: NaiveDateTime) -> Result<()> {
        let session_id = &input.common.session_id;
        let transcript = Path::new(&input.common.transcript_path);
        if input.common.transcript_path.is_empty() || !transcript.is_file() {
            return Ok(());
        }
        let Some(mut state) = self.store.read(session_id)? else {
            return Ok(());
        };
        if !state.note_path.is_file() {
            return Ok(());
        }

        let reply =
            find_last_assistant_reply_with_retry(transcript, self.reply_attempts, self.reply_delay);
        let stats = best_effort("parsing transcript", parse_transcript(transcript))
            .unwrap_or_default();
        let commits = self.detect_commits(session_id, &mut state);

        let time = now.format("%H:%M:%S").to_string();
        let mut out = String::new();
        if stats.total_tool_calls() > 0 {
            let line = format_stats_line(
                &stats.tool_counts,
                stats.tokens_in,
                stats.tokens_out,
                stats.estimated_cost,
            );
            if !line.is_empty() {
                out.push('\n');
                out.push_str(&line);
            }
        }
        if let Some(plan) = &reply.plan {
            out.push_str(&note::format_plan_entry(&time, &truncate_simple(plan, PLAN_MAX_CHARS)));
        }
        if let Some(response) = &reply.response {
            out.push_str(&note::format_response_entry(
                &time,
                &truncate(response, RESPONSE_MAX_CHARS),
            ));
        }
        out.push_str(&note::format_commits_entry(
            &now.format("%H:%M").to_string(),
            &commits,
        ));
        if !out.is_empty() {
            note::append(&state.note_path, &out)?;
        }

        best_effort("updating duration", note::update_duration(&state.note_path, now));
        if stats.total_tool_calls() > 0 || !commits.is_empty() {
            best_effort(
                "updating note stats",
                self.update_stats(&state, &stats, &commits),
            );
        }
        best_effort("adding topic summary", self.add_topic_summary(&state, transcript));

        self.refresh(now);
        if self.settings.git_auto_push {
            best_effort("syncing vault", self.sync(now));
        }
        Ok(())
    }

    /// Commits made in the session's repository since the last check. The
    /// recorded start hash moves to the new head so each commit is
    /// reported once.
    fn detect_commits(&self, session_id: &str, state: &mut SessionState) -> Vec<String> {
        let (Some(start), Some(cwd)) = (state.start_hash.clone(), state.cwd.clone()) else {
            return Vec::new();
        };
        let cwd = Path::new(&cwd);
        let Some(commits) = best_effort("listing commits", git::commits_since(cwd, &start)) else {
            return Vec::new();
        };
        if commits.is_empty() {
            return Vec::new();
        }
        if let Some(head) = GitContext::capture(cwd).head {
            state.start_hash = Some(head);
            best_effort("advancing start hash", self.store.write(session_id, state));
        }
        commits.iter().map(ToString::to_string).collect()
    }

    /// Rewrite the note's stats block. Commits already listed in the note
    /// are kept ahead of the new ones.
    fn update_stats(&self, state: &SessionState, stats: &SessionStats, new: &[String]) -> Result<()> {
        let path = &state.note_path;
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

        let mut commits: Vec<String> = Frontmatter::parse(&content)
            .map(|(fm, _)| fm.list("commits").into_iter().map(String::from).collect())
            .unwrap_or_default();
        for commit in new {
            if !commits.contains(commit) {
                commits.push(commit.clone());
            }
        }

        let fields = StatsFields {
            branch: state.branch.clone(),
            model: stats.model.map(|m| m.as_str().to_string()),
            tools: stats.tool_counts.clone(),
            tokens_in: stats.tokens_in,
            tokens_out: stats.tokens_out,
            cache_read: stats.cache_read,
            cache_creation: stats.cache_creation,
            estimated_cost: stats.estimated_cost,
            files_touched: stats.files_touched.clone(),
            commits,
        };
        let updated = update_frontmatter_stats(&content, &fields);
        if updated != content {
            fs::write(path, updated).with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }

    /// Once the session has enough prompts, list its opening topics under
    /// the note heading. Happens at most once per note.
    fn add_topic_summary(&self, state: &SessionState, transcript: &Path) -> Result<()> {
        if state.prompt_count < self.settings.summary_after_prompts {
            return Ok(());
        }
        let topics = extract_user_topics(transcript, TOPIC_LIMIT)?;
        let block = note::format_summary_block(&topics);
        if note::insert_summary_block(&state.note_path, &block)? {
            tracing::debug!(topics = topics.len(), "added topic summary");
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Derived files
    // ---------------------------------------------------------------

    /// Rebuild today's index and any stale report. Each is independent.
    fn refresh(&self, now: NaiveDateTime) {
        best_effort(
            "rebuilding daily index",
            rebuild_daily_index(&self.vault, now.date(), &self.store),
        );
        best_effort(
            "rebuilding weekly report",
            reports::rebuild_weekly_stats_if_stale(&self.vault, now),
        );
        best_effort(
            "rebuilding monthly report",
            reports::rebuild_monthly_stats_if_stale(&self.vault, now),
        );
    }

    /// Regenerate the index of `date` and the reports covering it.
    /// `force` rewrites reports that are already fresh.
    pub fn rebuild(&self, date: NaiveDate, force: bool) -> Result<()> {
        rebuild_daily_index(&self.vault, date, &self.store)?;
        reports::rebuild_weekly_stats(&self.vault, date, force)?;
        reports::rebuild_monthly_stats(&self.vault, date, force)?;
        Ok(())
    }

    fn sync(&self, now: NaiveDateTime) -> Result<()> {
        let message = self.settings.render_sync_message(
            &now.format("%Y-%m-%d").to_string(),
            &now.format("%H:%M").to_string(),
        )?;
        if git::sync_vault(&self.vault, &message)? {
            tracing::debug!(message = %message, "committed vault");
        }
        Ok(())
    }
}

/// `<dir>/<stem>.md`, or `<stem>_2.md`, `<stem>_3.md`… when taken.
fn unique_note_path(dir: &Path, stem: &str) -> PathBuf {
    let mut path = dir.join(format!("{stem}.md"));
    let mut counter = 2;
    while path.exists() {
        path = dir.join(format!("{stem}_{counter}.md"));
        counter += 1;
    }
    path
}
