/// Installs the global fmt subscriber at `default_level`.
///
/// Only the first call takes effect; later calls are ignored.
pub fn init(default_level: &str) {
    let lvl = parse_level(default_level);

    // a subscriber may already be installed by an earlier call
    let _ = tracing_subscriber::fmt()
        .with_max_level(lvl)
        .with_target(false)
        .try_init();
}

/// Unknown names fall back to INFO.
pub(crate) fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
