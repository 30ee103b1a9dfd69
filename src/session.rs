use anyhow::{Context, Result, bail};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

const FILE_PREFIX: &str = "claude_session_";
const FILE_SUFFIX: &str = ".txt";
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-session record: which note a session writes to and its running
/// counters.
///
/// Stored as `claude_session_{session_id}.txt`, one value per line:
/// note path, prompt count, branch, start commit hash, working directory.
/// Older writers only produced the first two lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub note_path: PathBuf,
    pub prompt_count: u32,
    pub branch: Option<String>,
    pub start_hash: Option<String>,
    pub cwd: Option<String>,
}

impl SessionState {
    fn parse(contents: &str) -> Result<Self> {
        let lines: Vec<&str> = contents.trim().lines().map(str::trim).collect();
        if lines.len() < 2 {
            bail!("session record has {} line(s), expected at least 2", lines.len());
        }
        let prompt_count = lines[1]
            .parse()
            .with_context(|| format!("parsing prompt count {:?}", lines[1]))?;
        let optional = |i: usize| {
            lines
                .get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        Ok(Self {
            note_path: PathBuf::from(lines[0]),
            prompt_count,
            branch: optional(2),
            start_hash: optional(3),
            cwd: optional(4),
        })
    }

    fn render(&self) -> String {
        let or_empty = |v: &Option<String>| v.clone().unwrap_or_default();
        format!(
            "{}\n{}\n{}\n{}\n{}",
            self.note_path.display(),
            self.prompt_count,
            or_empty(&self.branch),
            or_empty(&self.start_hash),
            or_empty(&self.cwd),
        )
    }
}

/// Flat-file store of [`SessionState`] records, one file per session id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{session_id}{FILE_SUFFIX}"))
    }

    /// Read the record for `session_id`. Returns `None` if there is none.
    pub fn read(&self, session_id: &str) -> Result<Option<SessionState>> {
        let path = self.path(session_id);
        match fs::read_to_string(&path) {
            Ok(s) => SessionState::parse(&s)
                .map(Some)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Overwrite the record for `session_id`.
    pub fn write(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let path = self.path(session_id);
        fs::write(&path, state.render()).with_context(|| format!("writing {}", path.display()))
    }

    /// Tracked prompt count for a session, if a usable record exists.
    pub fn prompt_count(&self, session_id: &str) -> Option<u32> {
        self.read(session_id)
            .ok()
            .flatten()
            .map(|s| s.prompt_count)
            .filter(|&n| n > 0)
    }

    /// Delete records not modified within the last 24 hours.
    pub fn cleanup_stale(&self) {
        let Some(cutoff) = SystemTime::now().checked_sub(STALE_AFTER) else {
            return;
        };
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
                continue;
            }
            let modified = entry.metadata().and_then(|m| m.modified());
            if matches!(modified, Ok(t) if t < cutoff) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => tracing::debug!(file = name, "removed stale session record"),
                    Err(e) => tracing::debug!(file = name, error = %e, "could not remove stale session record"),
                }
            }
        }
    }
}
