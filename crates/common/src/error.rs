use thiserror::Error;

/// Canonical GridMR error taxonomy used across crates.
///
/// Classification guidance:
/// - [`GmrError::JobPack`]: submitted job pack failed decoding or validation
/// - [`GmrError::Unsupported`]: syntactically valid pack whose pipeline shape
///   is intentionally unimplemented
/// - [`GmrError::Scheduler`]: cluster scheduler refused or timed out on a
///   registration/submission call
/// - [`GmrError::Coordinator`]: coordinator-internal contract violations
///   (unknown ids, mailbox gone, agent panicked)
/// - [`GmrError::InvalidConfig`]: environment/path contract violations
/// - [`GmrError::Io`]: raw filesystem IO failures from std APIs
#[derive(Debug, Error)]
pub enum GmrError {
    /// Job pack bytes could not be decoded or did not validate.
    ///
    /// Examples:
    /// - malformed JSON envelope
    /// - empty stage list or duplicate stage names
    /// - input replica URL without a scheme
    #[error("job pack error: {0}")]
    JobPack(String),

    /// Valid pack requesting a pipeline shape outside the supported set.
    #[error("unsupported job: {0}")]
    Unsupported(String),

    /// Cluster scheduler registration or task admission failed.
    ///
    /// Examples:
    /// - `new_job` refused at coordinator start
    /// - `new_task` exhausted its bounded submission retries
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Coordinator-internal failures after init succeeded.
    ///
    /// Examples:
    /// - message references a task id the state store never allocated
    /// - mailbox closed or overflowed
    #[error("coordinator error: {0}")]
    Coordinator(String),

    /// Invalid or inconsistent configuration state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard GridMR result alias.
pub type Result<T> = std::result::Result<T, GmrError>;
