// ABOUTME: Structured logging setup for the runner
// ABOUTME: RUST_LOG takes precedence over the --log-level flag

use tracing_subscriber::EnvFilter;

/// Crate whose events follow `--log-level`.
const RUNNER_TARGET: &str = "sqlpackage_batch";

/// Filter used when RUST_LOG is unset. The HTTP stack stays at `warn` so a
/// debug run does not dump signed request headers.
fn default_directives(log_level: &str) -> String {
    format!("warn,{}={}", RUNNER_TARGET, log_level)
}

pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(log_level)))
        .unwrap_or_else(|_| EnvFilter::new("warn,sqlpackage_batch=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
