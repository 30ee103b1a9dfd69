mod daily_index;
mod frontmatter;
mod git;
mod logging;
mod meta;
mod note;
mod notify;
mod recorder;
mod reports;
mod sanitize;
mod session;
mod settings;
mod transcript;
mod types;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};

use notify::{DEFAULT_MESSAGE, DEFAULT_TITLE, DesktopNotifier, notify_unless_focused};
use recorder::Recorder;
use settings::Settings;
use types::HookInput;

/// Hooks that log assistant sessions into a markdown note vault.
#[derive(Debug, Parser)]
#[command(name = "claude-vault-hooks", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record the hook event read from stdin.
    Log,
    /// Show a desktop notification.
    Notify {
        #[arg(long, default_value = DEFAULT_TITLE)]
        title: String,
        #[arg(long, default_value = DEFAULT_MESSAGE)]
        message: String,
    },
    /// Regenerate the daily index and the stats reports.
    Rebuild {
        /// Day to rebuild, defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Rewrite reports even if they were already written today.
        #[arg(long)]
        force: bool,
    },
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading stdin")?;
    Ok(buffer)
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load();
    let now = Local::now().naive_local();

    match cli.command {
        Command::Log => {
            let input = read_stdin()?;
            let hook: HookInput = serde_json::from_str(&input).context("parsing hook input")?;
            let Some(recorder) = Recorder::open(settings) else {
                tracing::debug!("no vault configured");
                return Ok(());
            };
            match &hook {
                HookInput::UserPromptSubmit(e) => recorder.log_prompt(e, now),
                HookInput::Stop(e) => recorder.log_response(e, now),
                HookInput::Other => Ok(()),
            }
        }
        Command::Notify { title, message } => {
            notify_unless_focused(
                &DesktopNotifier,
                settings.skip_when_focused,
                notify::terminal_is_focused,
                &title,
                &message,
            )?;
            Ok(())
        }
        Command::Rebuild { date, force } => {
            let Some(recorder) = Recorder::open(settings) else {
                tracing::debug!("no vault configured");
                return Ok(());
            };
            recorder.rebuild(date.unwrap_or(now.date()), force)
        }
    }
}

/// Hooks never block the assistant: every failure, including a panic, is
/// logged and the process exits 0 without writing to stdout.
fn main() {
    logging::init();
    panic::set_hook(Box::new(|info| tracing::error!("panic: {info}")));

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return;
        }
        Err(e) => {
            tracing::warn!("invalid arguments: {e}");
            return;
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| run(cli))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("{e:#}"),
        Err(_) => {}
    }
}
