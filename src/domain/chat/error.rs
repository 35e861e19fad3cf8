use std::time::Duration;

/// Failures of the remote language-model call.
///
/// The orchestrator never retries these; surfacing them uniformly lets the
/// HTTP adapter map each class to a status of its choosing.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("language model authentication failed: {0}")]
    Auth(String),

    #[error("language model rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("language model transport failure: {0}")]
    Transport(String),

    #[error("language model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("language model provider error: {0}")]
    Provider(String),
}
