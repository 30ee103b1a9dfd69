use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const MAX_COMMITS: usize = 20;
const LOCK_FILE: &str = "claude-sync.lock";
const LOCK_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;
const FALLBACK_NAME: &str = "claude-vault-hooks";
const FALLBACK_EMAIL: &str = "claude-vault-hooks@localhost";

/// Branch and head commit of the repository containing a working directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitContext {
    pub branch: Option<String>,
    /// Abbreviated head commit id.
    pub head: Option<String>,
}

impl GitContext {
    /// Capture the context of `cwd`. Outside a repository, or before the
    /// first commit, the missing parts are `None`.
    pub fn capture(cwd: &Path) -> Self {
        let Ok(repo) = git2::Repository::discover(cwd) else {
            return Self::default();
        };
        let Ok(head) = repo.head() else {
            return Self::default();
        };
        let branch = head.shorthand().map(str::to_string);
        let head = head.peel_to_commit().ok().and_then(|c| short_id(&c));
        Self { branch, head }
    }
}

fn short_id(commit: &git2::Commit) -> Option<String> {
    commit
        .as_object()
        .short_id()
        .ok()
        .and_then(|buf| buf.as_str().map(str::to_string))
}

/// One commit as shown in a session note.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub hash: String,
    pub summary: String,
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.hash, self.summary)
    }
}

/// Commits reachable from HEAD but not from `start`, newest first, at most 20.
pub fn commits_since(cwd: &Path, start: &str) -> Result<Vec<Commit>> {
    let repo = git2::Repository::discover(cwd)
        .with_context(|| format!("finding git repo from {}", cwd.display()))?;
    let start = repo
        .revparse_single(start)
        .and_then(|obj| obj.peel_to_commit())
        .with_context(|| format!("resolving {start}"))?;

    let mut walk = repo.revwalk().context("starting revwalk")?;
    walk.push_head().context("walking from HEAD")?;
    walk.hide(start.id()).context("hiding start commit")?;

    let mut commits = Vec::new();
    for oid in walk.take(MAX_COMMITS) {
        let commit = repo
            .find_commit(oid.context("walking history")?)
            .context("reading commit")?;
        commits.push(Commit {
            hash: short_id(&commit).unwrap_or_else(|| commit.id().to_string()),
            summary: commit.summary().unwrap_or_default().to_string(),
        });
    }
    Ok(commits)
}

// ===== Vault sync =====

/// Exclusive sync lock inside the `.git` directory, removed on drop.
struct SyncLock {
    path: PathBuf,
}

impl SyncLock {
    /// Take the lock, replacing it if its holder is older than five
    /// minutes. `None` when another sync holds it.
    fn acquire(git_dir: &Path) -> Result<Option<Self>> {
        let path = git_dir.join(LOCK_FILE);
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Some(Self { path })),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !is_stale(&path) {
                        return Ok(None);
                    }
                    tracing::debug!(lock = %path.display(), "removing stale sync lock");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(e)
                                .with_context(|| format!("removing {}", path.display()));
                        }
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
            }
        }
        Ok(None)
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

/// Stage everything in the repository containing `vault`, commit it with
/// `message` when the tree changed, then push the current branch to
/// `origin` if that remote exists.
///
/// Returns whether a commit was made. A sync already in progress makes
/// this a no-op.
pub fn sync_vault(vault: &Path, message: &str) -> Result<bool> {
    let repo = git2::Repository::discover(vault)
        .with_context(|| format!("finding git repo from {}", vault.display()))?;
    let Some(_lock) = SyncLock::acquire(repo.path())? else {
        tracing::debug!("vault sync already running");
        return Ok(false);
    };

    let committed = commit_all(&repo, message)?;
    if repo.find_remote("origin").is_ok() {
        push_current_branch(&repo)?;
    }
    Ok(committed)
}

fn commit_all(repo: &git2::Repository, message: &str) -> Result<bool> {
    let mut index = repo.index().context("opening index")?;
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .context("staging changes")?;
    index
        .update_all(["*"].iter(), None)
        .context("staging removals")?;
    index.write().context("writing index")?;
    let tree_oid = index.write_tree().context("writing tree")?;

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let unchanged = match &parent {
        Some(commit) => commit.tree_id() == tree_oid,
        None => index.is_empty(),
    };
    if unchanged {
        return Ok(false);
    }

    let tree = repo.find_tree(tree_oid).context("finding tree")?;
    let sig = repo
        .signature()
        .or_else(|_| git2::Signature::now(FALLBACK_NAME, FALLBACK_EMAIL))
        .context("building commit signature")?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .context("creating commit")?;
    Ok(true)
}

fn push_current_branch(repo: &git2::Repository) -> Result<()> {
    let head = repo.head().context("reading HEAD")?;
    let branch = head
        .shorthand()
        .filter(|_| head.is_branch())
        .context("HEAD is not on a branch")?;
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

    let config = repo.config().context("reading git config")?;
    let mut attempts = 0;
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("credentials rejected"));
        }
        if allowed.contains(git2::CredentialType::SSH_KEY) {
            return git2::Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) {
            return git2::Cred::credential_helper(&config, url, username);
        }
        git2::Cred::default()
    });
    let mut options = git2::PushOptions::new();
    options.remote_callbacks(callbacks);

    let mut remote = repo.find_remote("origin").context("finding origin")?;
    remote
        .push(&[refspec.as_str()], Some(&mut options))
        .with_context(|| format!("pushing {branch} to origin"))?;
    tracing::debug!(branch, "pushed vault");
    Ok(())
}
