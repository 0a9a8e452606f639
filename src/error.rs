use std::fmt;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a unit of work failed to produce a value.
///
/// Cheap to clone so every retriever of a handle observes the same cause.
#[derive(Clone)]
pub enum Cause {
    /// The unit of work panicked; holds the panic message.
    Panic(String),
    /// The unit of work returned an error.
    Error(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl Cause {
    pub fn panic<S: Into<String>>(msg: S) -> Self {
        Cause::Panic(msg.into())
    }

    pub fn error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Cause::Error(Arc::new(err))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Cause::Panic(_))
    }

    /// Try to view the underlying error as a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Cause::Error(err) => err.downcast_ref::<E>(),
            Cause::Panic(_) => None,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Panic(msg) => write!(f, "panicked: {}", msg),
            Cause::Error(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Panic(msg) => f.debug_tuple("Panic").field(msg).finish(),
            Cause::Error(err) => f.debug_tuple("Error").field(&err.to_string()).finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("submission rejected: executor saturated or shut down")]
    Rejected,

    #[error("execution failed: {0}")]
    Execution(Cause),

    #[error("cancelled")]
    Cancelled,

    #[error("interrupted while waiting")]
    Interrupted,

    #[error("timed out waiting for completion")]
    Timeout,

    #[error("executor error: {0}")]
    Executor(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// The failure cause, if this is an execution failure.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Error::Execution(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<Cause> for Error {
    fn from(cause: Cause) -> Self {
        Error::Execution(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_cause_display() {
        assert_eq!(Cause::panic("boom").to_string(), "panicked: boom");
        assert_eq!(Cause::error(DiskFull).to_string(), "disk full");
    }

    #[test]
    fn test_cause_downcast() {
        let cause = Cause::error(DiskFull);
        assert!(cause.downcast_ref::<DiskFull>().is_some());
        assert!(Cause::panic("x").downcast_ref::<DiskFull>().is_none());
    }

    #[test]
    fn test_execution_error_carries_cause() {
        let err = Error::from(Cause::panic("bad input"));
        assert!(err.cause().unwrap().is_panic());
        assert_eq!(err.to_string(), "execution failed: panicked: bad input");
    }
}
