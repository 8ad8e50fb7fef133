use std::time::Duration;

pub mod finalizer;
pub mod logging;
pub mod metrics;

pub(crate) mod messages;

mod error;
mod merge;

pub use error::*;
pub use merge::deep_merge;

/// Default interval for requeuing a managed resource when nothing else drove
/// a shorter delay.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the field manager used for every patch this operator issues.
pub(crate) const MANAGER_NAME: &str = "poolboy";

/// A label that, if present on a first-party resource, disables reconciliation
/// for it entirely.
pub(crate) const IGNORE_LABEL_SUFFIX: &str = "ignore";
