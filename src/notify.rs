use anyhow::{Result, bail};
use std::process::{Command, Stdio};

pub const DEFAULT_TITLE: &str = "Claude";
pub const DEFAULT_MESSAGE: &str = "Task completed!";
const APP_NAME: &str = "Claude Code";

/// Something that can show a desktop notification.
pub trait Notifier {
    fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Notifications through the platform's command-line notifier:
/// `osascript` on macOS, `notify-send` elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    fn command(title: &str, message: &str) -> Command {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                applescript_escape(message),
                applescript_escape(title)
            );
            let mut cmd = Command::new("osascript");
            cmd.args(["-e", &script]);
            cmd
        } else {
            let mut cmd = Command::new("notify-send");
            cmd.args(["--app-name", APP_NAME, title, message]);
            cmd
        }
    }
}

fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        let output = Self::command(title, message)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            bail!(
                "notifier exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Whether the terminal running the assistant has focus. Focus cannot be
/// queried on the supported platforms, so notifications are always shown.
pub fn terminal_is_focused() -> bool {
    false
}

/// Show a notification unless the user is already looking at the terminal.
/// Returns whether one was sent.
pub fn notify_unless_focused(
    notifier: &dyn Notifier,
    skip_when_focused: bool,
    focused: impl FnOnce() -> bool,
    title: &str,
    message: &str,
) -> Result<bool> {
    if skip_when_focused && focused() {
        tracing::debug!("terminal focused, skipping notification");
        return Ok(false);
    }
    notifier.notify(title, message)?;
    Ok(true)
}
