use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Filter via `RUST_LOG` (default `info`). The host process calls this once
/// at startup; calling it twice is a no-op rather than a panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
