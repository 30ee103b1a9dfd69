use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::session::SessionStore;

const FILENAME: &str = "claude-hooks.toml";

const DEFAULT_SYNC_MESSAGE: &str = "claude: sync session {{ time }}";
const DEFAULT_SUMMARY_AFTER_PROMPTS: u32 = 3;

/// One settings file. Every key is optional so that a project file can
/// override just the keys it names.
///
/// ```toml
/// vault_path = "/home/me/notes"
/// git_auto_push = true
/// sync_message = "claude: {{ date }} {{ time }}"
/// ```
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
struct SettingsFile {
    vault_path: Option<PathBuf>,
    skip_when_focused: Option<bool>,
    git_auto_push: Option<bool>,
    sync_message: Option<String>,
    summary_after_prompts: Option<u32>,
    state_dir: Option<PathBuf>,
}

impl SettingsFile {
    /// Read a settings file, returning `None` if it doesn't exist.
    fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map(Some)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Keys set in `self` win over those in `lower`.
    fn over(self, lower: Self) -> Self {
        Self {
            vault_path: self.vault_path.or(lower.vault_path),
            skip_when_focused: self.skip_when_focused.or(lower.skip_when_focused),
            git_auto_push: self.git_auto_push.or(lower.git_auto_push),
            sync_message: self.sync_message.or(lower.sync_message),
            summary_after_prompts: self.summary_after_prompts.or(lower.summary_after_prompts),
            state_dir: self.state_dir.or(lower.state_dir),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolved hook settings.
///
/// Precedence: environment, then `$CLAUDE_PROJECT_DIR/.claude/claude-hooks.toml`,
/// then `~/.claude/claude-hooks.toml`, then built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root of the note vault. Session logging is off when unset.
    pub vault_path: Option<PathBuf>,
    pub skip_when_focused: bool,
    pub git_auto_push: bool,
    /// Commit message template for vault sync.
    pub sync_message: String,
    /// Prompt count at which the topic summary is added to a note.
    pub summary_after_prompts: u32,
    /// Where session state records live.
    pub state_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_path: None,
            skip_when_focused: true,
            git_auto_push: false,
            sync_message: DEFAULT_SYNC_MESSAGE.into(),
            summary_after_prompts: DEFAULT_SUMMARY_AFTER_PROMPTS,
            state_dir: env::temp_dir(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment and the settings files.
    pub fn load() -> Self {
        let project_dir = env::var_os("CLAUDE_PROJECT_DIR").map(PathBuf::from);
        Self::resolve(
            |key| env::var(key).ok(),
            project_dir.as_deref(),
            dirs::home_dir().as_deref(),
        )
    }

    /// Resolve settings from an environment lookup and the two candidate
    /// settings locations. Unreadable or malformed files are skipped.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        project_dir: Option<&Path>,
        home: Option<&Path>,
    ) -> Self {
        let layer = |root: Option<&Path>| -> SettingsFile {
            let Some(path) = root.map(|r| r.join(".claude").join(FILENAME)) else {
                return SettingsFile::default();
            };
            match SettingsFile::read(&path) {
                Ok(file) => file.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!("ignoring settings file: {e:#}");
                    SettingsFile::default()
                }
            }
        };
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let from_env = SettingsFile {
            vault_path: var("CLAUDE_VAULT").map(PathBuf::from),
            skip_when_focused: var("CLAUDE_HOOKS_SKIP_WHEN_FOCUSED").and_then(|v| parse_bool(&v)),
            git_auto_push: var("CLAUDE_HOOKS_GIT_AUTO_PUSH").and_then(|v| parse_bool(&v)),
            state_dir: var("CLAUDE_HOOKS_STATE_DIR").map(PathBuf::from),
            ..Default::default()
        };
        let merged = from_env.over(layer(project_dir)).over(layer(home));

        let defaults = Settings::default();
        Settings {
            vault_path: merged.vault_path.filter(|p| !p.as_os_str().is_empty()),
            skip_when_focused: merged.skip_when_focused.unwrap_or(defaults.skip_when_focused),
            git_auto_push: merged.git_auto_push.unwrap_or(defaults.git_auto_push),
            sync_message: merged.sync_message.unwrap_or(defaults.sync_message),
            summary_after_prompts: merged
                .summary_after_prompts
                .unwrap_or(defaults.summary_after_prompts),
            state_dir: merged.state_dir.unwrap_or(defaults.state_dir),
        }
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.state_dir)
    }

    /// Render the vault sync commit message.
    pub fn render_sync_message(&self, date: &str, time: &str) -> Result<String> {
        let env = Environment::new();
        let tmpl = env
            .template_from_str(&self.sync_message)
            .context("parsing sync message template")?;
        tmpl.render(context! { date, time })
            .context("rendering sync message template")
    }
}
