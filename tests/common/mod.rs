#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Isolated vault, state directory and home for one binary run.
pub struct HookEnv {
    pub vault: tempfile::TempDir,
    pub state: tempfile::TempDir,
    pub home: tempfile::TempDir,
    pub work: tempfile::TempDir,
}

impl HookEnv {
    pub fn new() -> Self {
        let env = Self {
            vault: tempfile::tempdir().unwrap(),
            state: tempfile::tempdir().unwrap(),
            home: tempfile::tempdir().unwrap(),
            work: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(env.cwd()).unwrap();
        env
    }

    /// Working directory reported in hook payloads. Its name is the project.
    pub fn cwd(&self) -> PathBuf {
        self.work.path().join("demo-app")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_claude-vault-hooks"));
        cmd.args(args)
            .env("CLAUDE_VAULT", self.vault.path())
            .env("CLAUDE_HOOKS_STATE_DIR", self.state.path())
            .env("HOME", self.home.path())
            .env_remove("CLAUDE_PROJECT_DIR")
            .env_remove("CLAUDE_HOOKS_LOG")
            .env_remove("CLAUDE_HOOKS_GIT_AUTO_PUSH");
        cmd
    }

    /// Run the binary with `args`, feeding `stdin`.
    pub fn run(&self, args: &[&str], stdin: &str) -> (i32, String, String) {
        run_command(self.command(args), stdin)
    }

    /// Like [`HookEnv::run`] but without a configured vault.
    pub fn run_without_vault(&self, args: &[&str], stdin: &str) -> (i32, String, String) {
        let mut cmd = self.command(args);
        cmd.env_remove("CLAUDE_VAULT");
        run_command(cmd, stdin)
    }

    pub fn payload(&self, event: &str, transcript: &Path, extra: &str) -> String {
        let cwd = self.cwd();
        let common = common("s1", transcript.to_str().unwrap(), cwd.to_str().unwrap());
        format!(r#"{{ {common}, "hook_event_name": "{event}"{extra} }}"#)
    }

    /// Session notes of the `demo-app` project.
    pub fn notes(&self) -> Vec<PathBuf> {
        let dir = self.vault.path().join("demo-app");
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut notes: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        notes.sort();
        notes
    }
}

pub fn run_command(mut cmd: Command, stdin: &str) -> (i32, String, String) {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn binary");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();

    let output = child.wait_with_output().unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

pub fn common(session_id: &str, transcript_path: &str, cwd: &str) -> String {
    format!(
        r#"
    "session_id": "{session_id}",
    "transcript_path": "{transcript_path}",
    "cwd": "{cwd}",
    "permission_mode": "default"
"#
    )
}

/// A transcript with one prompt and one reply that used a tool.
pub fn write_transcript(dir: &Path) -> PathBuf {
    let path = dir.join("transcript.jsonl");
    fs::write(
        &path,
        concat!(
            r#"{"type":"user","sessionId":"s1","isSidechain":false,"message":{"role":"user","content":"Add a README"}}"#, "\n",
            r#"{"type":"assistant","sessionId":"s1","isSidechain":false,"message":{"role":"assistant","model":"claude-opus-4-5-20251101","content":[{"type":"tool_use","id":"t1","name":"Write","input":{"file_path":"/work/README.md","content":"hi"}}],"usage":{"input_tokens":100,"output_tokens":20}}}"#, "\n",
            r#"{"type":"user","sessionId":"s1","isSidechain":false,"message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#, "\n",
            r#"{"type":"assistant","sessionId":"s1","isSidechain":false,"message":{"role":"assistant","model":"claude-opus-4-5-20251101","content":[{"type":"text","text":"README added."}],"usage":{"input_tokens":150,"output_tokens":10}}}"#, "\n",
        ),
    )
    .unwrap();
    path
}
