use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmTraceError {
    /// An `end`/`fail` arrived for a run id that was never begun, or was
    /// already finalized. Logged by the adapter, never fatal.
    #[error("unknown run: {0}")]
    UnknownRun(String),

    /// A `begin` arrived for a run id that is already in flight. Run ids are
    /// a framework contract; the original registration is kept.
    #[error("duplicate run: {0}")]
    DuplicateRun(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Store(String),

    /// Index/table inconsistency detected on read. Surfaced as a degraded
    /// query result, never a process crash.
    #[error("storage corruption: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LlmTraceError>;
