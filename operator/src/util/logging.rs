use tracing_subscriber::EnvFilter;

/// Initializes `tracing` logging from `POOLBOY_LOG`, defaulting to INFO.
pub fn init() {
    let filter = EnvFilter::try_from_env("POOLBOY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
