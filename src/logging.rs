use tracing_subscriber::EnvFilter;

/// Filter directive variable, e.g. `CLAUDE_HOOKS_LOG=debug`.
pub const LOG_ENV: &str = "CLAUDE_HOOKS_LOG";

/// Install the stderr subscriber. Hooks must stay quiet, so nothing is
/// logged unless `CLAUDE_HOOKS_LOG` asks for it.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
