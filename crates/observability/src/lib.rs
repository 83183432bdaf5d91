//! Logging bootstrap for the GridEdge binaries.
//!
//! Simulation output (JSON summaries, exported CSV) goes to stdout and
//! is often piped, so every diagnostic line goes to stderr through a
//! non-blocking writer. Filter resolution order: `GRIDEDGE_LOG`, then
//! `RUST_LOG`, then a default that keeps the service at the requested
//! level and the HTTP stack quiet.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(
    service_name: &str,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = std::env::var("GRIDEDGE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| {
            let level = if verbose { "debug" } else { "info" };
            EnvFilter::new(format!(
                "{service_name}={level},hyper=warn,reqwest=warn,{level}"
            ))
        });

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .compact()
        .try_init()
        .is_ok();

    // Without a live subscriber the guard has nothing to flush.
    installed.then_some(guard)
}
