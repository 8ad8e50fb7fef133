use std::time::Duration;

/// Process-wide configuration, read once at startup from the environment
/// variables named in the external-interfaces contract.
#[derive(Clone, Debug)]
pub struct Config {
    pub operator_domain: String,
    pub operator_version: String,
    pub operator_namespace: String,
    pub manage_claims_interval: Duration,
    pub manage_handles_interval: Duration,
    pub manage_pools_interval: Duration,
    pub resource_refresh_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            operator_domain: env_or("OPERATOR_DOMAIN", "poolboy.gpte.redhat.com"),
            operator_version: env_or("OPERATOR_VERSION", "v1"),
            operator_namespace: env_or("OPERATOR_NAMESPACE", "poolboy"),
            manage_claims_interval: env_secs("MANAGE_CLAIMS_INTERVAL", 60),
            manage_handles_interval: env_secs("MANAGE_HANDLES_INTERVAL", 60),
            manage_pools_interval: env_secs("MANAGE_POOLS_INTERVAL", 60),
            resource_refresh_interval: env_secs("RESOURCE_REFRESH_INTERVAL", 600),
        }
    }

    /// `$OPERATOR_DOMAIN/<key>` annotation key, e.g. `resource-handle-name`.
    pub fn annotation(&self, key: &str) -> String {
        format!("{}/{}", self.operator_domain, key)
    }

    /// `$OPERATOR_DOMAIN/ignore` label key that disables reconciliation for
    /// an object when present.
    pub fn ignore_label(&self) -> String {
        self.annotation("ignore")
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: u64) -> Duration {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(default)),
        Err(_) => Duration::from_secs(default),
    }
}
