use std::io;

/// All errors surfaced by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An unsupported value was supplied at construction time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation is illegal for the process configuration.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The requested operation is illegal for the current process state.
    #[error("invalid process state: {0}")]
    InvalidProcessState(String),

    /// The child exited with a status outside of its OK-status set.
    #[error("`{command}` terminated with an error status {status}")]
    Execution {
        command: String,
        status: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// The child terminated, but some of its output was abandoned because a
    /// descendant kept the output descriptor open.
    ///
    /// A subkind of [`Error::Execution`]: it carries the same payload and is
    /// raised from the same checked-wait path.
    #[error("`{command}` output was truncated")]
    OutputTruncated {
        command: String,
        status: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// Captured or iterated output is not valid UTF-8.
    #[error("process output is not valid UTF-8")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("I/O error")]
    Io {
        #[from]
        cause: io::Error,
    },
}

impl Error {
    /// Returns true for the execution-failure kinds that carry a status and
    /// captured output.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Error::Execution { .. } | Error::OutputTruncated { .. }
        )
    }

    /// The child's exit status, for execution-failure kinds.
    pub fn status(&self) -> Option<i32> {
        match self {
            Error::Execution { status, .. } | Error::OutputTruncated { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// The captured stdout attached to an execution failure.
    pub fn stdout(&self) -> Option<&[u8]> {
        match self {
            Error::Execution { stdout, .. } | Error::OutputTruncated { stdout, .. } => {
                Some(stdout)
            }
            _ => None,
        }
    }

    /// The captured stderr attached to an execution failure.
    pub fn stderr(&self) -> Option<&[u8]> {
        match self {
            Error::Execution { stderr, .. } | Error::OutputTruncated { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Error::Io {
            cause: crate::util::io_error(err),
        }
    }
}

pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
    Error::InvalidArgument(message.into())
}

pub(crate) fn invalid_operation(message: impl Into<String>) -> Error {
    Error::InvalidOperation(message.into())
}

pub(crate) fn invalid_state(message: impl Into<String>) -> Error {
    Error::InvalidProcessState(message.into())
}
