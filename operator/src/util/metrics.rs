/// Metrics prefix, overridable with the `METRICS_PREFIX` environment
/// variable.
pub fn prefix() -> String {
    std::env::var("METRICS_PREFIX").unwrap_or_else(|_| "poolboy".to_string())
}
