use thiserror::Error;

/// Errors returned by the channel layer.
///
/// Parameter and sequencing errors are detected synchronously and leave the
/// channel untouched. `DmaFailure`, `Aborted` and `Timeout` come out of the
/// event-flag wait path or from a channel that is already in the `Error` or
/// `Aborted` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("null buffer pointer")]
    NullPointer,
    #[error("bad argument: {0}")]
    BadArgument(&'static str),
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("channel not configured")]
    NotConfigured,
    #[error("transfer already started")]
    AlreadyStarted,
    #[error("invalid call sequence: {0}")]
    InvalidSequence(&'static str),
    #[error("transfer not started")]
    NotStarted,
    #[error("out of descriptors or buffer memory")]
    MemoryError,
    #[error("failed to acquire channel lock")]
    MutexFailure,
    #[error("DMA hardware error")]
    DmaFailure,
    #[error("channel aborted")]
    Aborted,
    #[error("timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
