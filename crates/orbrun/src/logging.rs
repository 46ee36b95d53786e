use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `ORB_LOG`, then `RUST_LOG`, then `warn`.
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_env("ORB_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
