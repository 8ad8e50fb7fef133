/// Error taxonomy used by every reconciler step (spec §7). A *temporary*
/// error is retried after its delay without touching `status`; a
/// *permanent* error requires a user edit to the definition and is only
/// logged, never retried on a tight loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("temporary error, retry in {delay:?}: {message}")]
    Temporary {
        message: String,
        delay: std::time::Duration,
    },

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("failed to parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("failed to parse timestamp: {source}")]
    Chrono {
        #[from]
        source: chrono::ParseError,
    },
}

impl Error {
    pub fn temporary(message: impl Into<String>, delay: std::time::Duration) -> Self {
        Error::Temporary {
            message: message.into(),
            delay,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Error::Permanent(message.into())
    }

    /// True for Kubernetes 404s, which cascading-delete paths treat as
    /// success rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(resp),
            } if resp.code == 404
        )
    }

    /// The delay to requeue after. Permanent errors use a long backoff so
    /// the operator still notices if the definition is eventually fixed.
    pub fn retry_delay(&self) -> std::time::Duration {
        match self {
            Error::Temporary { delay, .. } => *delay,
            _ => std::time::Duration::from_secs(600),
        }
    }
}
